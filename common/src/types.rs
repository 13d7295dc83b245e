//! Common Types for 5G GNodeB
//!
//! Defines fundamental types used throughout the MAC scheduler

use serde::{Deserialize, Serialize};
use num_derive::{FromPrimitive, ToPrimitive};
use std::fmt;
use thiserror::Error;

/// Number of OFDM symbols in a slot with normal cyclic prefix
pub const NOF_OFDM_SYMBOLS_PER_SLOT: u8 = 14;

/// Maximum number of PRBs in a carrier (TS 38.101-1, 275 RBs)
pub const MAX_NOF_PRBS: u16 = 275;

/// Errors raised when building common radio types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TypeError {
    #[error("Invalid numerology: {0}")]
    InvalidNumerology(u8),

    #[error("Invalid bandwidth: {0} MHz")]
    InvalidBandwidth(u32),

    #[error("Invalid TDD pattern: {0}")]
    InvalidTddPattern(String),
}

/// Radio Network Temporary Identifier (RNTI)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Rnti(pub u16);

impl Rnti {
    /// Create a new RNTI
    pub fn new(value: u16) -> Self {
        Self(value)
    }

    /// Get the RNTI value
    pub fn value(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for Rnti {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04x}", self.0)
    }
}

/// Cell Identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellId(pub u16);

/// Physical Cell Identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pci(pub u16);

impl Pci {
    /// Maximum valid PCI value (0-1007)
    pub const MAX: u16 = 1007;

    /// Create a new PCI with validation
    pub fn new(value: u16) -> Option<Self> {
        if value <= Self::MAX {
            Some(Self(value))
        } else {
            None
        }
    }
}

/// DU-local UE index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UeIndex(pub u16);

impl fmt::Display for UeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Logical channel identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Lcid(pub u8);

impl Lcid {
    /// SRB0, carries CCCH messages before the UE is configured
    pub const SRB0: Self = Self(0);
    /// SRB1
    pub const SRB1: Self = Self(1);
    /// SRB2
    pub const SRB2: Self = Self(2);
    /// Number of LCIDs addressable by DL logical channels (TS 38.321 Table 6.2.1-1)
    pub const MAX_NOF_RB_LCIDS: usize = 33;
}

/// HARQ process identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HarqId(pub u8);

impl fmt::Display for HarqId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Subcarrier spacing values in kHz
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive, Serialize, Deserialize)]
pub enum SubcarrierSpacing {
    /// 15 kHz
    Scs15 = 15,
    /// 30 kHz
    Scs30 = 30,
    /// 60 kHz
    Scs60 = 60,
    /// 120 kHz
    Scs120 = 120,
    /// 240 kHz
    Scs240 = 240,
}

impl SubcarrierSpacing {
    /// Numerology index µ (TS 38.211 Table 4.2-1)
    pub fn numerology(&self) -> u8 {
        match self {
            SubcarrierSpacing::Scs15 => 0,
            SubcarrierSpacing::Scs30 => 1,
            SubcarrierSpacing::Scs60 => 2,
            SubcarrierSpacing::Scs120 => 3,
            SubcarrierSpacing::Scs240 => 4,
        }
    }

    /// Subcarrier spacing for a numerology index
    pub fn from_numerology(numerology: u8) -> Result<Self, TypeError> {
        match numerology {
            0 => Ok(SubcarrierSpacing::Scs15),
            1 => Ok(SubcarrierSpacing::Scs30),
            2 => Ok(SubcarrierSpacing::Scs60),
            3 => Ok(SubcarrierSpacing::Scs120),
            4 => Ok(SubcarrierSpacing::Scs240),
            _ => Err(TypeError::InvalidNumerology(numerology)),
        }
    }

    /// Subcarrier spacing in kHz
    pub fn khz(&self) -> u16 {
        *self as u16
    }
}

/// Bandwidth values in MHz
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bandwidth {
    /// 5 MHz
    Bw5,
    /// 10 MHz
    Bw10,
    /// 15 MHz
    Bw15,
    /// 20 MHz
    Bw20,
    /// 25 MHz
    Bw25,
    /// 30 MHz
    Bw30,
    /// 40 MHz
    Bw40,
    /// 50 MHz
    Bw50,
    /// 60 MHz
    Bw60,
    /// 80 MHz
    Bw80,
    /// 100 MHz
    Bw100,
}

impl Bandwidth {
    /// Parse a channel bandwidth given in MHz
    pub fn from_mhz(mhz: u32) -> Result<Self, TypeError> {
        match mhz {
            5 => Ok(Bandwidth::Bw5),
            10 => Ok(Bandwidth::Bw10),
            15 => Ok(Bandwidth::Bw15),
            20 => Ok(Bandwidth::Bw20),
            25 => Ok(Bandwidth::Bw25),
            30 => Ok(Bandwidth::Bw30),
            40 => Ok(Bandwidth::Bw40),
            50 => Ok(Bandwidth::Bw50),
            60 => Ok(Bandwidth::Bw60),
            80 => Ok(Bandwidth::Bw80),
            100 => Ok(Bandwidth::Bw100),
            _ => Err(TypeError::InvalidBandwidth(mhz)),
        }
    }

    /// Get bandwidth in MHz
    pub fn as_mhz(&self) -> u32 {
        match self {
            Bandwidth::Bw5 => 5,
            Bandwidth::Bw10 => 10,
            Bandwidth::Bw15 => 15,
            Bandwidth::Bw20 => 20,
            Bandwidth::Bw25 => 25,
            Bandwidth::Bw30 => 30,
            Bandwidth::Bw40 => 40,
            Bandwidth::Bw50 => 50,
            Bandwidth::Bw60 => 60,
            Bandwidth::Bw80 => 80,
            Bandwidth::Bw100 => 100,
        }
    }
}

/// Modulation schemes used by PDSCH
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModulationScheme {
    Qpsk,
    Qam16,
    Qam64,
    Qam256,
}

impl ModulationScheme {
    /// Modulation order Qm (bits per symbol)
    pub fn bits_per_symbol(&self) -> u32 {
        match self {
            ModulationScheme::Qpsk => 2,
            ModulationScheme::Qam16 => 4,
            ModulationScheme::Qam64 => 6,
            ModulationScheme::Qam256 => 8,
        }
    }
}

/// TDD UL/DL pattern (TS 38.331 TDD-UL-DL-Pattern)
///
/// Within a period the slots are laid out as: full DL slots, one optional
/// special slot starting with `nof_dl_symbols` DL symbols and ending with
/// `nof_ul_symbols` UL symbols, then full UL slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TddPattern {
    /// Pattern periodicity in slots
    pub period_slots: u16,
    /// Number of full DL slots at the start of the period
    pub nof_dl_slots: u16,
    /// DL symbols at the start of the slot following the full DL slots
    pub nof_dl_symbols: u8,
    /// Number of full UL slots at the end of the period
    pub nof_ul_slots: u16,
    /// UL symbols at the end of the slot preceding the full UL slots
    pub nof_ul_symbols: u8,
}

impl TddPattern {
    /// Validate the pattern layout
    pub fn validate(&self) -> Result<(), TypeError> {
        if self.period_slots == 0 {
            return Err(TypeError::InvalidTddPattern("period must be positive".into()));
        }
        if self.nof_dl_slots + self.nof_ul_slots > self.period_slots {
            return Err(TypeError::InvalidTddPattern(format!(
                "{} DL + {} UL slots exceed period of {}",
                self.nof_dl_slots, self.nof_ul_slots, self.period_slots
            )));
        }
        if self.nof_dl_symbols >= NOF_OFDM_SYMBOLS_PER_SLOT
            || self.nof_ul_symbols >= NOF_OFDM_SYMBOLS_PER_SLOT
        {
            return Err(TypeError::InvalidTddPattern(
                "special slot symbols must be below 14".into(),
            ));
        }
        let nof_special = self.period_slots - self.nof_dl_slots - self.nof_ul_slots;
        let has_partial = self.nof_dl_symbols > 0 || self.nof_ul_symbols > 0;
        if has_partial && nof_special == 0 {
            return Err(TypeError::InvalidTddPattern(
                "partial symbols require a special slot".into(),
            ));
        }
        if nof_special == 1
            && self.nof_dl_symbols + self.nof_ul_symbols > NOF_OFDM_SYMBOLS_PER_SLOT
        {
            return Err(TypeError::InvalidTddPattern(
                "special slot DL and UL symbols overlap".into(),
            ));
        }
        Ok(())
    }

    /// DL symbols of the slot at `index` within the period
    pub fn dl_symbols(&self, index: u16) -> OfdmSymbolRange {
        let index = index % self.period_slots;
        if index < self.nof_dl_slots {
            OfdmSymbolRange::new(0, NOF_OFDM_SYMBOLS_PER_SLOT)
        } else if index == self.nof_dl_slots {
            OfdmSymbolRange::new(0, self.nof_dl_symbols)
        } else {
            OfdmSymbolRange::new(0, 0)
        }
    }

    /// UL symbols of the slot at `index` within the period
    pub fn ul_symbols(&self, index: u16) -> OfdmSymbolRange {
        let index = index % self.period_slots;
        let first_ul_slot = self.period_slots - self.nof_ul_slots;
        if index >= first_ul_slot {
            OfdmSymbolRange::new(0, NOF_OFDM_SYMBOLS_PER_SLOT)
        } else if index + 1 == first_ul_slot && self.nof_ul_symbols > 0 {
            OfdmSymbolRange::new(NOF_OFDM_SYMBOLS_PER_SLOT - self.nof_ul_symbols, NOF_OFDM_SYMBOLS_PER_SLOT)
        } else {
            OfdmSymbolRange::new(0, 0)
        }
    }
}

/// Duplex mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DuplexMode {
    /// Frequency Division Duplex
    Fdd,
    /// Time Division Duplex
    Tdd(TddPattern),
}

/// Interval of common resource blocks, `[start, stop)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct CrbInterval {
    pub start: u16,
    pub stop: u16,
}

impl CrbInterval {
    pub fn new(start: u16, stop: u16) -> Self {
        debug_assert!(start <= stop, "invalid CRB interval [{}, {})", start, stop);
        Self { start, stop }
    }

    pub fn length(&self) -> u16 {
        self.stop - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.stop
    }

    pub fn overlaps(&self, other: &CrbInterval) -> bool {
        self.start < other.stop && other.start < self.stop
    }

    /// Whether `other` lies fully inside this interval
    pub fn contains(&self, other: &CrbInterval) -> bool {
        other.start >= self.start && other.stop <= self.stop
    }

    pub fn intersect(&self, other: &CrbInterval) -> CrbInterval {
        let start = self.start.max(other.start);
        let stop = self.stop.min(other.stop);
        if start >= stop {
            CrbInterval::new(start, start)
        } else {
            CrbInterval::new(start, stop)
        }
    }
}

impl fmt::Display for CrbInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.stop)
    }
}

/// Range of OFDM symbols within a slot, `[start, stop)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct OfdmSymbolRange {
    pub start: u8,
    pub stop: u8,
}

impl OfdmSymbolRange {
    pub fn new(start: u8, stop: u8) -> Self {
        debug_assert!(start <= stop, "invalid symbol range [{}, {})", start, stop);
        Self { start, stop }
    }

    pub fn length(&self) -> u8 {
        self.stop - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.stop
    }

    pub fn overlaps(&self, other: &OfdmSymbolRange) -> bool {
        self.start < other.stop && other.start < self.stop
    }

    pub fn contains(&self, other: &OfdmSymbolRange) -> bool {
        other.is_empty() || (other.start >= self.start && other.stop <= self.stop)
    }
}

impl fmt::Display for OfdmSymbolRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.stop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_traits::FromPrimitive;

    #[test]
    fn test_pci_validation() {
        assert!(Pci::new(0).is_some());
        assert!(Pci::new(1007).is_some());
        assert!(Pci::new(1008).is_none());
    }

    #[test]
    fn test_scs_conversion() {
        assert_eq!(SubcarrierSpacing::from_u32(30), Some(SubcarrierSpacing::Scs30));
        assert_eq!(SubcarrierSpacing::from_u32(45), None);
        assert_eq!(SubcarrierSpacing::Scs30.numerology(), 1);
        assert_eq!(SubcarrierSpacing::from_numerology(2).unwrap(), SubcarrierSpacing::Scs60);
        assert!(SubcarrierSpacing::from_numerology(5).is_err());
    }

    #[test]
    fn test_bandwidth_conversion() {
        assert_eq!(Bandwidth::from_mhz(20).unwrap(), Bandwidth::Bw20);
        assert_eq!(Bandwidth::Bw100.as_mhz(), 100);
        assert!(Bandwidth::from_mhz(7).is_err());
    }

    #[test]
    fn test_tdd_pattern_symbols() {
        let pattern = TddPattern {
            period_slots: 10,
            nof_dl_slots: 6,
            nof_dl_symbols: 8,
            nof_ul_slots: 3,
            nof_ul_symbols: 0,
        };
        assert!(pattern.validate().is_ok());
        assert_eq!(pattern.dl_symbols(0).length(), 14);
        assert_eq!(pattern.dl_symbols(6), OfdmSymbolRange::new(0, 8));
        assert!(pattern.dl_symbols(7).is_empty());
        assert!(pattern.ul_symbols(6).is_empty());
        assert_eq!(pattern.ul_symbols(17).length(), 14);
    }

    #[test]
    fn test_tdd_pattern_rejects_overflow() {
        let pattern = TddPattern {
            period_slots: 5,
            nof_dl_slots: 4,
            nof_dl_symbols: 0,
            nof_ul_slots: 2,
            nof_ul_symbols: 0,
        };
        assert!(pattern.validate().is_err());
    }

    #[test]
    fn test_crb_interval_ops() {
        let a = CrbInterval::new(0, 10);
        let b = CrbInterval::new(5, 20);
        assert!(a.overlaps(&b));
        assert_eq!(a.intersect(&b), CrbInterval::new(5, 10));
        assert!(!a.overlaps(&CrbInterval::new(10, 12)));
        assert!(a.intersect(&CrbInterval::new(12, 14)).is_empty());
        assert_eq!(format!("{}", a), "[0, 10)");
    }

    #[test]
    fn test_rnti_display() {
        assert_eq!(Rnti::new(0x4601).to_string(), "0x4601");
    }
}
