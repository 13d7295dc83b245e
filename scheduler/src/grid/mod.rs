//! Cell Resource Grid
//!
//! Rolling window of per-slot DL/UL occupancy bitmaps and scheduling results.
//! Offset 0 is the slot being finalized in the current tick; later offsets are
//! slots scheduled ahead of time.

pub mod bitmap;
pub mod ring;

pub use bitmap::{CrbBitmap, SlotGridBitmap};
pub use ring::{SlotRecord, SlotRing};

use crate::result::SchedResult;
use crate::SchedulerError;
use common::{CrbInterval, OfdmSymbolRange, SlotPoint, SubcarrierSpacing};
use serde::Serialize;
use std::fmt;
use std::ops::{Index, IndexMut, Range};
use tracing::trace;

/// Grid direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LinkDirection {
    Downlink,
    Uplink,
}

impl fmt::Display for LinkDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkDirection::Downlink => write!(f, "DL"),
            LinkDirection::Uplink => write!(f, "UL"),
        }
    }
}

/// Time-frequency region of one slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct GrantInfo {
    pub symbols: OfdmSymbolRange,
    pub crbs: CrbInterval,
}

impl GrantInfo {
    pub fn new(symbols: OfdmSymbolRange, crbs: CrbInterval) -> Self {
        Self { symbols, crbs }
    }

    pub fn overlaps(&self, other: &GrantInfo) -> bool {
        self.symbols.overlaps(&other.symbols) && self.crbs.overlaps(&other.crbs)
    }
}

impl fmt::Display for GrantInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "crbs={} symbols={}", self.crbs, self.symbols)
    }
}

/// Occupancy and decisions of one slot
#[derive(Debug, Clone)]
pub struct SlotResourceAllocator {
    slot: SlotPoint,
    pub dl_grid: SlotGridBitmap,
    pub ul_grid: SlotGridBitmap,
    pub result: SchedResult,
}

impl SlotResourceAllocator {
    fn new(nof_prbs: u16) -> Self {
        let slot = SlotPoint::zero(SubcarrierSpacing::Scs15);
        Self {
            slot,
            dl_grid: SlotGridBitmap::new(nof_prbs),
            ul_grid: SlotGridBitmap::new(nof_prbs),
            result: SchedResult::new(slot),
        }
    }

    pub fn slot(&self) -> SlotPoint {
        self.slot
    }

    pub fn grid(&self, direction: LinkDirection) -> &SlotGridBitmap {
        match direction {
            LinkDirection::Downlink => &self.dl_grid,
            LinkDirection::Uplink => &self.ul_grid,
        }
    }

    fn grid_mut(&mut self, direction: LinkDirection) -> &mut SlotGridBitmap {
        match direction {
            LinkDirection::Downlink => &mut self.dl_grid,
            LinkDirection::Uplink => &mut self.ul_grid,
        }
    }

    /// Mark `region` busy, failing if any part of it is already taken
    pub fn reserve(&mut self, direction: LinkDirection, region: GrantInfo) -> Result<(), SchedulerError> {
        let slot = self.slot;
        let grid = self.grid_mut(direction);
        if !grid.in_bounds(&region) {
            return Err(SchedulerError::RegionOutOfBounds { region, nof_prbs: grid.nof_rbs() });
        }
        if grid.collides(&region) {
            return Err(SchedulerError::AllocationConflict { slot, direction, region });
        }
        grid.fill(&region);
        trace!("Reserved {} {} in slot {}", direction, region, slot);
        Ok(())
    }

    /// Undo a reservation
    pub fn release(&mut self, direction: LinkDirection, region: GrantInfo) {
        self.grid_mut(direction).clear(&region);
        trace!("Released {} {} in slot {}", direction, region, self.slot);
    }

    /// Mark `region` busy regardless of current occupancy
    pub fn fill(&mut self, direction: LinkDirection, region: GrantInfo) {
        self.grid_mut(direction).fill(&region);
    }

    /// CRBs free in all of `symbols`
    pub fn query_free(&self, direction: LinkDirection, symbols: OfdmSymbolRange) -> CrbBitmap {
        self.grid(direction).free_crbs(symbols)
    }
}

impl SlotRecord for SlotResourceAllocator {
    fn slot(&self) -> SlotPoint {
        self.slot
    }

    fn reset(&mut self, slot: SlotPoint) {
        self.slot = slot;
        self.dl_grid.reset();
        self.ul_grid.reset();
        self.result.reset(slot);
    }
}

/// Resource grid of the cell across the scheduling window
#[derive(Debug, Clone)]
pub struct CellResourceAllocator {
    ring: SlotRing<SlotResourceAllocator>,
}

impl CellResourceAllocator {
    pub fn new(nof_prbs: u16, ring_size: usize) -> Self {
        Self { ring: SlotRing::new(ring_size, || SlotResourceAllocator::new(nof_prbs)) }
    }

    pub fn ring_size(&self) -> usize {
        self.ring.len()
    }

    pub fn slot_tx(&self) -> Option<SlotPoint> {
        self.ring.slot_tx()
    }

    /// Advance the window; returns the offsets of the slots that entered it
    pub fn slot_indication(&mut self, sl_tx: SlotPoint) -> Result<Range<usize>, SchedulerError> {
        self.ring.slot_indication(sl_tx)
    }

    pub fn get(&self, offset: usize) -> Option<&SlotResourceAllocator> {
        self.ring.get(offset)
    }

    pub fn get_mut(&mut self, offset: usize) -> Option<&mut SlotResourceAllocator> {
        self.ring.get_mut(offset)
    }

    pub fn offset_of(&self, slot: SlotPoint) -> Option<usize> {
        self.ring.offset_of(slot)
    }

    pub fn reserve(
        &mut self,
        offset: usize,
        direction: LinkDirection,
        region: GrantInfo,
    ) -> Result<(), SchedulerError> {
        self.slot_at_mut(offset)?.reserve(direction, region)
    }

    pub fn release(&mut self, offset: usize, direction: LinkDirection, region: GrantInfo) -> Result<(), SchedulerError> {
        self.slot_at_mut(offset)?.release(direction, region);
        Ok(())
    }

    pub fn fill(&mut self, offset: usize, direction: LinkDirection, region: GrantInfo) -> Result<(), SchedulerError> {
        self.slot_at_mut(offset)?.fill(direction, region);
        Ok(())
    }

    pub fn query_free(
        &self,
        offset: usize,
        direction: LinkDirection,
        symbols: OfdmSymbolRange,
    ) -> Result<CrbBitmap, SchedulerError> {
        match self.ring.get(offset) {
            Some(slot_alloc) => Ok(slot_alloc.query_free(direction, symbols)),
            None => Err(self.out_of_window(offset)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &SlotResourceAllocator> {
        self.ring.iter()
    }

    fn slot_at_mut(&mut self, offset: usize) -> Result<&mut SlotResourceAllocator, SchedulerError> {
        let err = self.out_of_window(offset);
        self.ring.get_mut(offset).ok_or(err)
    }

    fn out_of_window(&self, offset: usize) -> SchedulerError {
        let base = self.ring.slot_tx().unwrap_or_else(|| SlotPoint::zero(SubcarrierSpacing::Scs15));
        SchedulerError::SlotOutOfWindow(base + offset as u32)
    }
}

impl Index<usize> for CellResourceAllocator {
    type Output = SlotResourceAllocator;

    fn index(&self, offset: usize) -> &SlotResourceAllocator {
        match self.ring.get(offset) {
            Some(slot_alloc) => slot_alloc,
            None => panic!("slot offset {} outside the scheduling window", offset),
        }
    }
}

impl IndexMut<usize> for CellResourceAllocator {
    fn index_mut(&mut self, offset: usize) -> &mut SlotResourceAllocator {
        match self.ring.get_mut(offset) {
            Some(slot_alloc) => slot_alloc,
            None => panic!("slot offset {} outside the scheduling window", offset),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(crbs: (u16, u16), symbols: (u8, u8)) -> GrantInfo {
        GrantInfo::new(OfdmSymbolRange::new(symbols.0, symbols.1), CrbInterval::new(crbs.0, crbs.1))
    }

    fn started_grid() -> CellResourceAllocator {
        let mut grid = CellResourceAllocator::new(52, 10);
        grid.slot_indication(SlotPoint::new(0, 0).unwrap()).unwrap();
        grid
    }

    #[test]
    fn test_reserve_conflict() {
        let mut grid = started_grid();
        grid.reserve(2, LinkDirection::Downlink, region((0, 10), (2, 14))).unwrap();

        let err = grid.reserve(2, LinkDirection::Downlink, region((5, 15), (4, 6))).unwrap_err();
        assert!(matches!(err, SchedulerError::AllocationConflict { direction: LinkDirection::Downlink, .. }));
        assert!(err.is_fatal());

        // Other direction, symbols and slots are independent
        grid.reserve(2, LinkDirection::Uplink, region((5, 15), (4, 6))).unwrap();
        grid.reserve(2, LinkDirection::Downlink, region((5, 15), (0, 2))).unwrap();
        grid.reserve(3, LinkDirection::Downlink, region((0, 10), (2, 14))).unwrap();
    }

    #[test]
    fn test_reserve_out_of_bounds() {
        let mut grid = started_grid();
        let err = grid.reserve(0, LinkDirection::Uplink, region((50, 53), (0, 14))).unwrap_err();
        assert!(matches!(err, SchedulerError::RegionOutOfBounds { nof_prbs: 52, .. }));
        assert!(matches!(
            grid.reserve(10, LinkDirection::Uplink, region((0, 1), (0, 14))),
            Err(SchedulerError::SlotOutOfWindow(_))
        ));
    }

    #[test]
    fn test_reserve_release_restores_free_set() {
        let mut grid = started_grid();
        grid.fill(1, LinkDirection::Downlink, region((20, 30), (0, 2))).unwrap();
        let symbols = OfdmSymbolRange::new(0, 14);
        let before = grid.query_free(1, LinkDirection::Downlink, symbols).unwrap();

        let pdsch = region((0, 12), (2, 14));
        grid.reserve(1, LinkDirection::Downlink, pdsch).unwrap();
        assert_ne!(grid.query_free(1, LinkDirection::Downlink, symbols).unwrap(), before);

        grid.release(1, LinkDirection::Downlink, pdsch).unwrap();
        assert_eq!(grid.query_free(1, LinkDirection::Downlink, symbols).unwrap(), before);
    }

    #[test]
    fn test_window_advance_clears_entering_slot() {
        let mut grid = started_grid();
        let start = grid.slot_tx().unwrap();
        grid.reserve(9, LinkDirection::Downlink, region((0, 52), (0, 14))).unwrap();
        assert_eq!(grid.slot_indication(start + 1u32).unwrap(), 9..10);
        assert!(!grid[8].dl_grid.is_empty());
        assert!(grid[9].dl_grid.is_empty());
        assert_eq!(grid[9].slot(), start + 10u32);
        assert_eq!(grid[9].result.slot, start + 10u32);
    }
}
