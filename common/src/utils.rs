//! Common Utilities
//!
//! Provides utility functions used across the GNodeB implementation

use crate::types::{Bandwidth, SubcarrierSpacing, TypeError};
use tracing::trace;

/// Transmission bandwidth configuration N_RB for FR1 (TS 38.101-1 Table 5.3.2-1)
pub fn nof_prbs(bandwidth: Bandwidth, scs: SubcarrierSpacing) -> Result<u16, TypeError> {
    // Columns: 15 kHz, 30 kHz, 60 kHz. Zero marks an invalid combination.
    let row: [u16; 3] = match bandwidth {
        Bandwidth::Bw5 => [25, 11, 0],
        Bandwidth::Bw10 => [52, 24, 11],
        Bandwidth::Bw15 => [79, 38, 18],
        Bandwidth::Bw20 => [106, 51, 24],
        Bandwidth::Bw25 => [133, 65, 31],
        Bandwidth::Bw30 => [160, 78, 38],
        Bandwidth::Bw40 => [216, 106, 51],
        Bandwidth::Bw50 => [270, 133, 65],
        Bandwidth::Bw60 => [0, 162, 79],
        Bandwidth::Bw80 => [0, 217, 107],
        Bandwidth::Bw100 => [0, 273, 135],
    };

    let nrb = match scs {
        SubcarrierSpacing::Scs15 => row[0],
        SubcarrierSpacing::Scs30 => row[1],
        SubcarrierSpacing::Scs60 => row[2],
        _ => 0,
    };

    if nrb == 0 {
        return Err(TypeError::InvalidBandwidth(bandwidth.as_mhz()));
    }

    trace!("{} RBs for {} MHz bandwidth with {} kHz SCS", nrb, bandwidth.as_mhz(), scs.khz());
    Ok(nrb)
}

/// Time utilities for slot/frame calculations
pub mod time {
    use crate::types::SubcarrierSpacing;
    use std::time::Duration;

    /// Slot duration in microseconds for different SCS
    pub fn slot_duration_us(scs: SubcarrierSpacing) -> u32 {
        match scs {
            SubcarrierSpacing::Scs15 => 1000,  // 1 ms
            SubcarrierSpacing::Scs30 => 500,   // 0.5 ms
            SubcarrierSpacing::Scs60 => 250,   // 0.25 ms
            SubcarrierSpacing::Scs120 => 125,  // 0.125 ms
            SubcarrierSpacing::Scs240 => 62,   // 0.0625 ms (approximated)
        }
    }

    /// Slot duration as a [`Duration`], exact for every numerology
    pub fn slot_duration(scs: SubcarrierSpacing) -> Duration {
        Duration::from_nanos(1_000_000 >> scs.numerology())
    }

    /// Number of slots per frame (10ms)
    pub fn slots_per_frame(scs: SubcarrierSpacing) -> u16 {
        10 << scs.numerology()
    }
}
