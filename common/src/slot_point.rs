//! Slot Point
//!
//! A slot identifier with numerology, wrapping at the end of the SFN period
//! (1024 frames). Arithmetic and ordering are defined through the signed
//! distance between two points, which is exact as long as both points lie
//! within half an SFN period of each other.

use crate::types::{SubcarrierSpacing, TypeError};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, AddAssign, Sub};

/// Number of system frames before the SFN wraps around
pub const NOF_SFNS: u32 = 1024;

/// Number of subframes (1 ms) in a frame
pub const NOF_SUBFRAMES_PER_FRAME: u32 = 10;

/// Slot identifier (numerology + slot count within the SFN period)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotPoint {
    numerology: u8,
    count: u32,
}

impl SlotPoint {
    /// Create a slot point from a count, wrapped into the SFN period
    pub fn new(numerology: u8, count: u32) -> Result<Self, TypeError> {
        if numerology > 4 {
            return Err(TypeError::InvalidNumerology(numerology));
        }
        let period = Self::period_for(numerology);
        Ok(Self { numerology, count: count % period })
    }

    /// Create a slot point from SFN and slot index within the frame
    pub fn from_sfn_slot(numerology: u8, sfn: u32, slot_index: u32) -> Result<Self, TypeError> {
        if numerology > 4 {
            return Err(TypeError::InvalidNumerology(numerology));
        }
        let slots_per_frame = NOF_SUBFRAMES_PER_FRAME << numerology;
        Self::new(numerology, (sfn % NOF_SFNS) * slots_per_frame + slot_index % slots_per_frame)
    }

    /// First slot of the SFN period for a subcarrier spacing
    pub fn zero(scs: SubcarrierSpacing) -> Self {
        Self { numerology: scs.numerology(), count: 0 }
    }

    fn period_for(numerology: u8) -> u32 {
        NOF_SFNS * (NOF_SUBFRAMES_PER_FRAME << numerology)
    }

    /// Number of slots in one SFN period
    pub fn period(&self) -> u32 {
        Self::period_for(self.numerology)
    }

    pub fn numerology(&self) -> u8 {
        self.numerology
    }

    /// Slot count within the SFN period
    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn nof_slots_per_frame(&self) -> u32 {
        NOF_SUBFRAMES_PER_FRAME << self.numerology
    }

    /// System frame number
    pub fn sfn(&self) -> u32 {
        self.count / self.nof_slots_per_frame()
    }

    /// Slot index within the frame
    pub fn slot_index(&self) -> u32 {
        self.count % self.nof_slots_per_frame()
    }

    /// Signed distance `self - other` in slots
    pub fn distance(&self, other: &SlotPoint) -> i32 {
        debug_assert_eq!(self.numerology, other.numerology, "comparing slots of different numerologies");
        let period = self.period() as i64;
        let mut diff = (self.count as i64 - other.count as i64).rem_euclid(period);
        if diff >= period / 2 {
            diff -= period;
        }
        diff as i32
    }

    fn offset(&self, slots: i64) -> SlotPoint {
        let period = self.period() as i64;
        let count = (self.count as i64 + slots).rem_euclid(period);
        SlotPoint { numerology: self.numerology, count: count as u32 }
    }
}

impl Add<u32> for SlotPoint {
    type Output = SlotPoint;

    fn add(self, rhs: u32) -> SlotPoint {
        self.offset(rhs as i64)
    }
}

impl Add<i32> for SlotPoint {
    type Output = SlotPoint;

    fn add(self, rhs: i32) -> SlotPoint {
        self.offset(rhs as i64)
    }
}

impl AddAssign<u32> for SlotPoint {
    fn add_assign(&mut self, rhs: u32) {
        *self = *self + rhs;
    }
}

impl Sub<u32> for SlotPoint {
    type Output = SlotPoint;

    fn sub(self, rhs: u32) -> SlotPoint {
        self.offset(-(rhs as i64))
    }
}

impl Sub<SlotPoint> for SlotPoint {
    type Output = i32;

    fn sub(self, rhs: SlotPoint) -> i32 {
        self.distance(&rhs)
    }
}

impl PartialOrd for SlotPoint {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.numerology != other.numerology {
            return None;
        }
        Some(self.distance(other).cmp(&0))
    }
}

impl fmt::Display for SlotPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.sfn(), self.slot_index())
    }
}
