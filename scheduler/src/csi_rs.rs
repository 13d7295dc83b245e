//! CSI-RS scheduling

use crate::config::CellConfiguration;
use crate::grid::{GrantInfo, LinkDirection, SlotResourceAllocator};
use crate::result::CsiRsInfo;
use crate::SchedulerError;
use std::sync::Arc;
use tracing::trace;

/// Claims the periodic CSI-RS occasions of the cell
pub struct CsiRsScheduler {
    cfg: Arc<CellConfiguration>,
}

impl CsiRsScheduler {
    pub fn new(cfg: Arc<CellConfiguration>) -> Self {
        Self { cfg }
    }

    /// Reserve the CSI-RS of a slot that just entered the scheduling window
    pub fn run_slot(&self, slot_alloc: &mut SlotResourceAllocator) -> Result<(), SchedulerError> {
        let Some(csi) = &self.cfg.csi_rs else {
            return Ok(());
        };
        if !self.cfg.is_csi_rs_slot(slot_alloc.slot()) {
            return Ok(());
        }
        let region = GrantInfo::new(csi.symbols, self.cfg.bwp_crbs());
        slot_alloc.reserve(LinkDirection::Downlink, region)?;
        slot_alloc.result.dl.csi_rs.push(CsiRsInfo { region });
        trace!("CSI-RS scheduled in slot {}", slot_alloc.slot());
        Ok(())
    }
}
