//! PDSCH MCS table (TS 38.214 Table 5.1.3.1-1, qam64)

use common::ModulationScheme;
use serde::Serialize;

/// Highest MCS index of the qam64 table (29..31 are reserved for retransmissions)
pub const MAX_MCS_INDEX: u8 = 28;

/// Modulation order and target code rate of an MCS index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct McsDescriptor {
    pub modulation: ModulationScheme,
    /// Target code rate R x 1024
    pub target_code_rate: u16,
}

impl McsDescriptor {
    /// Look up an MCS index, `None` above [`MAX_MCS_INDEX`]
    pub fn from_index(mcs: u8) -> Option<Self> {
        let (qm, rate) = *MCS_TABLE_QAM64.get(mcs as usize)?;
        let modulation = match qm {
            2 => ModulationScheme::Qpsk,
            4 => ModulationScheme::Qam16,
            _ => ModulationScheme::Qam64,
        };
        Some(Self { modulation, target_code_rate: rate })
    }

    /// Code rate as a fraction
    pub fn code_rate(&self) -> f64 {
        self.target_code_rate as f64 / 1024.0
    }
}

const MCS_TABLE_QAM64: [(u8, u16); 29] = [
    (2, 120), (2, 157), (2, 193), (2, 251), (2, 308), (2, 379), (2, 449), (2, 526),
    (2, 602), (2, 679), (4, 340), (4, 378), (4, 434), (4, 490), (4, 553), (4, 616),
    (4, 658), (6, 438), (6, 466), (6, 517), (6, 567), (6, 616), (6, 666), (6, 719),
    (6, 772), (6, 822), (6, 873), (6, 910), (6, 948),
];
