//! PDCCH Resource Allocator
//!
//! Assigns DL PDCCH candidates of the common search space in CORESET#0.

use crate::config::CellConfiguration;
use crate::grid::{GrantInfo, LinkDirection, SlotRecord, SlotResourceAllocator, SlotRing};
use crate::{ControlChannel, SchedulerError};
use common::{Rnti, SlotPoint, SubcarrierSpacing};
use std::sync::Arc;
use tracing::{debug, trace};

/// CCEs assigned to one DCI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PdcchAllocation {
    pub cce_index: u8,
    pub aggregation_level: u8,
    pub region: GrantInfo,
}

#[derive(Debug)]
struct PdcchSlotRecord {
    slot: SlotPoint,
    used_cces: u64,
    allocs: Vec<(Rnti, PdcchAllocation)>,
}

impl SlotRecord for PdcchSlotRecord {
    fn slot(&self) -> SlotPoint {
        self.slot
    }

    fn reset(&mut self, slot: SlotPoint) {
        self.slot = slot;
        self.used_cces = 0;
        self.allocs.clear();
    }
}

/// CCE start positions of the common search space candidates (TS 38.213 §10.1, Y = 0)
pub fn common_ss_candidates(nof_cces: u8, aggregation_level: u8, nof_candidates: u8) -> Vec<u8> {
    let (n_cce, l, m_total) = (nof_cces as u32, aggregation_level as u32, nof_candidates as u32);
    if l == 0 || m_total == 0 || n_cce < l {
        return Vec::new();
    }
    (0..m_total)
        .map(|m| (l * ((m * n_cce / (l * m_total)) % (n_cce / l))) as u8)
        .collect()
}

/// PDCCH allocator of one cell
pub struct PdcchResourceAllocator {
    cfg: Arc<CellConfiguration>,
    candidates: Vec<u8>,
    ring: SlotRing<PdcchSlotRecord>,
}

impl PdcchResourceAllocator {
    pub fn new(cfg: Arc<CellConfiguration>, ring_size: usize) -> Self {
        let ss = cfg.search_space;
        let candidates = common_ss_candidates(cfg.coreset0.nof_cces(), ss.aggregation_level, ss.nof_candidates);
        debug!("PDCCH common search space candidates: {:?}", candidates);
        let origin = SlotPoint::zero(SubcarrierSpacing::Scs15);
        Self {
            cfg,
            candidates,
            ring: SlotRing::new(ring_size, || PdcchSlotRecord { slot: origin, used_cces: 0, allocs: Vec::new() }),
        }
    }

    pub fn slot_indication(&mut self, sl_tx: SlotPoint) -> Result<(), SchedulerError> {
        self.ring.slot_indication(sl_tx).map(|_| ())
    }

    pub fn candidates(&self) -> &[u8] {
        &self.candidates
    }

    pub fn nof_cces(&self) -> u8 {
        self.cfg.coreset0.nof_cces()
    }

    /// Allocate a DCI 1_0 for `rnti` in the slot of `slot_alloc`, reserving
    /// its REGs in the DL grid.
    pub fn alloc_dl_pdcch_common(
        &mut self,
        slot_alloc: &mut SlotResourceAllocator,
        rnti: Rnti,
    ) -> Result<PdcchAllocation, SchedulerError> {
        let slot = slot_alloc.slot();
        let no_candidate = SchedulerError::NoCandidateAvailable { slot, channel: ControlChannel::Pdcch };
        let coreset = self.cfg.coreset0;
        if !self.cfg.dl_symbols(slot).contains(&coreset.symbols()) {
            return Err(no_candidate);
        }
        let record = self.ring.find_mut(slot).ok_or(SchedulerError::SlotOutOfWindow(slot))?;

        let level = self.cfg.search_space.aggregation_level;
        let level_mask = if level >= 64 { u64::MAX } else { (1u64 << level) - 1 };
        for &cce_index in &self.candidates {
            let mask = level_mask << cce_index;
            if record.used_cces & mask != 0 {
                continue;
            }
            let region = coreset.cce_region(cce_index, level);
            if slot_alloc.dl_grid.collides(&region) {
                continue;
            }
            slot_alloc.reserve(LinkDirection::Downlink, region)?;
            record.used_cces |= mask;
            let alloc = PdcchAllocation { cce_index, aggregation_level: level, region };
            record.allocs.push((rnti, alloc));
            trace!("PDCCH for rnti={} at cce={} L={} in slot {}", rnti, cce_index, level, slot);
            return Ok(alloc);
        }
        Err(no_candidate)
    }

    /// Cancel the PDCCH of `rnti` in the slot of `slot_alloc`
    pub fn release(&mut self, slot_alloc: &mut SlotResourceAllocator, rnti: Rnti) -> Option<PdcchAllocation> {
        let record = self.ring.find_mut(slot_alloc.slot())?;
        let pos = record.allocs.iter().rposition(|(r, _)| *r == rnti)?;
        let (_, alloc) = record.allocs.swap_remove(pos);
        let level_mask = (1u64 << alloc.aggregation_level) - 1;
        record.used_cces &= !(level_mask << alloc.cce_index);
        slot_alloc.release(LinkDirection::Downlink, alloc.region);
        trace!("Released PDCCH of rnti={} in slot {}", rnti, slot_alloc.slot());
        Some(alloc)
    }
}
