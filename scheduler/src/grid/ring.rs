//! Rolling window of per-slot records

use crate::SchedulerError;
use common::SlotPoint;
use std::ops::Range;

/// A record bound to one slot of the window
pub trait SlotRecord {
    fn slot(&self) -> SlotPoint;

    /// Clear the record and rebind it to `slot`
    fn reset(&mut self, slot: SlotPoint);
}

/// Ring of `len` slot records; offset 0 is the current slot
#[derive(Debug, Clone)]
pub struct SlotRing<T> {
    entries: Vec<T>,
    head: usize,
    slot_tx: Option<SlotPoint>,
}

impl<T: SlotRecord> SlotRing<T> {
    pub fn new(len: usize, make: impl FnMut() -> T) -> Self {
        let len = len.max(1);
        Self {
            entries: std::iter::repeat_with(make).take(len).collect(),
            head: 0,
            slot_tx: None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Current slot, `None` before the first indication
    pub fn slot_tx(&self) -> Option<SlotPoint> {
        self.slot_tx
    }

    /// Advance the window to `sl_tx`.
    ///
    /// Returns the offsets of the records that entered the window and were
    /// reset. Skipped slots are cleared as well.
    pub fn slot_indication(&mut self, sl_tx: SlotPoint) -> Result<Range<usize>, SchedulerError> {
        let len = self.entries.len();
        let advance = match self.slot_tx {
            None => len,
            Some(last) => {
                let advance = sl_tx - last;
                if advance <= 0 {
                    return Err(SchedulerError::InvalidSlotIndication { last, received: sl_tx });
                }
                advance as usize
            }
        };

        if advance >= len {
            for (i, entry) in self.entries.iter_mut().enumerate() {
                entry.reset(sl_tx + i as u32);
            }
            self.head = 0;
        } else {
            for _ in 0..advance {
                let entry = &mut self.entries[self.head];
                let next = entry.slot() + len as u32;
                entry.reset(next);
                self.head = (self.head + 1) % len;
            }
        }
        self.slot_tx = Some(sl_tx);
        Ok(len - advance.min(len)..len)
    }

    /// Record at `offset` slots from the current slot
    pub fn get(&self, offset: usize) -> Option<&T> {
        if offset >= self.entries.len() || self.slot_tx.is_none() {
            return None;
        }
        Some(&self.entries[(self.head + offset) % self.entries.len()])
    }

    pub fn get_mut(&mut self, offset: usize) -> Option<&mut T> {
        if offset >= self.entries.len() || self.slot_tx.is_none() {
            return None;
        }
        let len = self.entries.len();
        Some(&mut self.entries[(self.head + offset) % len])
    }

    /// Offset of `slot` within the window
    pub fn offset_of(&self, slot: SlotPoint) -> Option<usize> {
        let distance = slot - self.slot_tx?;
        (distance >= 0 && (distance as usize) < self.entries.len()).then_some(distance as usize)
    }

    pub fn find(&self, slot: SlotPoint) -> Option<&T> {
        self.get(self.offset_of(slot)?)
    }

    pub fn find_mut(&mut self, slot: SlotPoint) -> Option<&mut T> {
        let offset = self.offset_of(slot)?;
        self.get_mut(offset)
    }

    /// Records in window order
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        (0..self.entries.len()).filter_map(move |offset| self.get(offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Counter {
        slot: SlotPoint,
        value: u32,
    }

    impl SlotRecord for Counter {
        fn slot(&self) -> SlotPoint {
            self.slot
        }

        fn reset(&mut self, slot: SlotPoint) {
            self.slot = slot;
            self.value = 0;
        }
    }

    fn ring(len: usize) -> SlotRing<Counter> {
        SlotRing::new(len, || Counter { slot: SlotPoint::new(0, 0).unwrap(), value: 0 })
    }

    #[test]
    fn test_first_indication_binds_all_slots() {
        let mut ring = ring(4);
        assert!(ring.get(0).is_none());
        let start = SlotPoint::new(0, 100).unwrap();
        assert_eq!(ring.slot_indication(start).unwrap(), 0..4);
        for offset in 0..4 {
            assert_eq!(ring.get(offset).unwrap().slot(), start + offset as u32);
        }
        assert!(ring.get(4).is_none());
    }

    #[test]
    fn test_advance_resets_entering_slot_only() {
        let mut ring = ring(4);
        let start = SlotPoint::new(0, 0).unwrap();
        ring.slot_indication(start).unwrap();
        ring.get_mut(1).unwrap().value = 7;
        ring.get_mut(0).unwrap().value = 3;

        assert_eq!(ring.slot_indication(start + 1u32).unwrap(), 3..4);
        assert_eq!(ring.get(0).unwrap().value, 7);
        assert_eq!(ring.get(3).unwrap().slot(), start + 4u32);
        assert_eq!(ring.get(3).unwrap().value, 0);
        assert_eq!(ring.find(start + 2u32).unwrap().slot(), start + 2u32);
        assert!(ring.find(start).is_none());
    }

    #[test]
    fn test_skipped_slots_are_cleared() {
        let mut ring = ring(4);
        let start = SlotPoint::new(0, 0).unwrap();
        ring.slot_indication(start).unwrap();
        ring.get_mut(3).unwrap().value = 5;
        assert_eq!(ring.slot_indication(start + 2u32).unwrap(), 2..4);
        assert_eq!(ring.get(1).unwrap().value, 5);

        assert_eq!(ring.slot_indication(start + 10u32).unwrap(), 0..4);
        assert!(ring.iter().all(|c| c.value == 0));
        assert_eq!(ring.get(0).unwrap().slot(), start + 10u32);
    }

    #[test]
    fn test_non_increasing_slot_rejected() {
        let mut ring = ring(4);
        let start = SlotPoint::new(1, 20).unwrap();
        ring.slot_indication(start).unwrap();
        assert!(matches!(
            ring.slot_indication(start),
            Err(SchedulerError::InvalidSlotIndication { .. })
        ));
        assert!(ring.slot_indication(start - 1u32).is_err());
    }

    #[test]
    fn test_wraparound() {
        let mut ring = ring(8);
        let last = SlotPoint::from_sfn_slot(0, 1023, 8).unwrap();
        ring.slot_indication(last).unwrap();
        ring.slot_indication(last + 1u32).unwrap();
        assert_eq!(ring.get(7).unwrap().slot().sfn(), 0);
        assert_eq!(ring.offset_of(SlotPoint::from_sfn_slot(0, 0, 3).unwrap()), Some(4));
    }
}
