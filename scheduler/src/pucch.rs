//! PUCCH Allocator
//!
//! HARQ-ACK resources of the common PUCCH resource set (TS 38.213 §9.2.1)
//! for UEs without dedicated PUCCH configuration.

use crate::config::CellConfiguration;
use crate::grid::{GrantInfo, LinkDirection, SlotRecord, SlotResourceAllocator, SlotRing};
use crate::{ControlChannel, SchedulerError};
use common::{CrbInterval, Rnti, SlotPoint, SubcarrierSpacing};
use std::sync::Arc;
use tracing::trace;

/// Resources in the common PUCCH resource set
pub const NOF_COMMON_PUCCH_RESOURCES: u8 = 16;

/// Values of the 3-bit PUCCH resource indicator
pub const NOF_PRI_VALUES: u8 = 8;

/// Common PUCCH resource assigned to a HARQ-ACK
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PucchAllocation {
    pub resource_index: u8,
    pub pri: u8,
    pub region: GrantInfo,
}

#[derive(Debug)]
struct PucchSlotRecord {
    slot: SlotPoint,
    used_resources: u16,
    allocs: Vec<(Rnti, u8)>,
}

impl SlotRecord for PucchSlotRecord {
    fn slot(&self) -> SlotPoint {
        self.slot
    }

    fn reset(&mut self, slot: SlotPoint) {
        self.slot = slot;
        self.used_resources = 0;
        self.allocs.clear();
    }
}

/// PUCCH allocator of one cell
pub struct PucchAllocator {
    cfg: Arc<CellConfiguration>,
    ring: SlotRing<PucchSlotRecord>,
}

impl PucchAllocator {
    pub fn new(cfg: Arc<CellConfiguration>, ring_size: usize) -> Self {
        let origin = SlotPoint::zero(SubcarrierSpacing::Scs15);
        Self {
            cfg,
            ring: SlotRing::new(ring_size, || PucchSlotRecord { slot: origin, used_resources: 0, allocs: Vec::new() }),
        }
    }

    pub fn slot_indication(&mut self, sl_tx: SlotPoint) -> Result<(), SchedulerError> {
        self.ring.slot_indication(sl_tx).map(|_| ())
    }

    /// PRB and symbols of common resource `r_pucch` (first hop)
    pub fn resource_region(&self, r_pucch: u8) -> GrantInfo {
        let pucch = &self.cfg.pucch;
        let n_cs = pucch.nof_cyclic_shifts as u16;
        let prb = if r_pucch < NOF_COMMON_PUCCH_RESOURCES / 2 {
            pucch.rb_offset + r_pucch as u16 / n_cs
        } else {
            let r = (r_pucch - NOF_COMMON_PUCCH_RESOURCES / 2) as u16;
            self.cfg.nof_prbs - 1 - pucch.rb_offset - r / n_cs
        };
        GrantInfo::new(pucch.symbols, CrbInterval::new(prb, prb + 1))
    }

    /// Resource index selected by `pri` for a DCI at `cce_index`
    pub fn resource_index(cce_index: u8, nof_cces: u8, pri: u8) -> u8 {
        let cce_part = (2 * cce_index as u32 / nof_cces.max(1) as u32) as u8;
        cce_part + 2 * pri
    }

    /// Allocate the HARQ-ACK resource of a DCI 1_0 whose PDCCH starts at
    /// `cce_index`, in the slot of `slot_alloc`.
    pub fn alloc_common_harq_ack(
        &mut self,
        slot_alloc: &mut SlotResourceAllocator,
        rnti: Rnti,
        cce_index: u8,
        nof_cces: u8,
    ) -> Result<PucchAllocation, SchedulerError> {
        let slot = slot_alloc.slot();
        let no_candidate = SchedulerError::NoCandidateAvailable { slot, channel: ControlChannel::Pucch };
        if !self.cfg.ul_symbols(slot).contains(&self.cfg.pucch.symbols) || self.cfg.is_csi_rs_slot(slot) {
            return Err(no_candidate);
        }

        let regions: Vec<GrantInfo> = (0..NOF_COMMON_PUCCH_RESOURCES).map(|r| self.resource_region(r)).collect();
        let record = self.ring.find_mut(slot).ok_or(SchedulerError::SlotOutOfWindow(slot))?;
        // A UE reports at most one HARQ-ACK bit per slot on the common resources
        if record.allocs.iter().any(|(r, _)| *r == rnti) {
            trace!("rnti={} already has a common PUCCH in slot {}", rnti, slot);
            return Err(no_candidate);
        }

        for pri in 0..NOF_PRI_VALUES {
            let r_pucch = Self::resource_index(cce_index, nof_cces, pri);
            if r_pucch >= NOF_COMMON_PUCCH_RESOURCES || record.used_resources & (1 << r_pucch) != 0 {
                continue;
            }
            let region = regions[r_pucch as usize];
            let prb_in_use = (0..NOF_COMMON_PUCCH_RESOURCES)
                .any(|r| record.used_resources & (1 << r) != 0 && regions[r as usize] == region);
            if !prb_in_use {
                if slot_alloc.ul_grid.collides(&region) {
                    continue;
                }
                slot_alloc.reserve(LinkDirection::Uplink, region)?;
            }
            record.used_resources |= 1 << r_pucch;
            record.allocs.push((rnti, r_pucch));
            trace!("PUCCH for rnti={} at resource {} (pri={}) in slot {}", rnti, r_pucch, pri, slot);
            return Ok(PucchAllocation { resource_index: r_pucch, pri, region });
        }
        Err(no_candidate)
    }

    /// Cancel the PUCCH of `rnti` in the slot of `slot_alloc`
    pub fn release(&mut self, slot_alloc: &mut SlotResourceAllocator, rnti: Rnti) -> Option<u8> {
        let regions: Vec<GrantInfo> = (0..NOF_COMMON_PUCCH_RESOURCES).map(|r| self.resource_region(r)).collect();
        let record = self.ring.find_mut(slot_alloc.slot())?;
        let pos = record.allocs.iter().rposition(|(r, _)| *r == rnti)?;
        let (_, r_pucch) = record.allocs.swap_remove(pos);
        record.used_resources &= !(1 << r_pucch);
        let region = regions[r_pucch as usize];
        let prb_in_use = (0..NOF_COMMON_PUCCH_RESOURCES)
            .any(|r| record.used_resources & (1 << r) != 0 && regions[r as usize] == region);
        if !prb_in_use {
            slot_alloc.release(LinkDirection::Uplink, region);
        }
        Some(r_pucch)
    }
}
