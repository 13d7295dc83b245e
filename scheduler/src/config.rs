//! Cell and scheduler configuration
//!
//! The cell configuration is validated once, then shared read-only through an
//! `Arc` by every component of the cell scheduler.

use crate::grid::GrantInfo;
use crate::support::MAX_MCS_INDEX;
use crate::SchedulerError;
use common::{
    nof_prbs, Bandwidth, CellId, CrbInterval, DuplexMode, OfdmSymbolRange, Pci, SlotPoint,
    SubcarrierSpacing, TddPattern, NOF_OFDM_SYMBOLS_PER_SLOT,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Maximum number of HARQ processes a UE cell can hold
pub const MAX_NOF_HARQS: u8 = 16;

/// DCI 1_0 PDSCH-to-HARQ feedback timing values (TS 38.213 §9.2.3)
pub const DCI_1_0_K1_VALUES: [u8; 5] = [4, 5, 6, 7, 8];

/// CORESET#0 (RBs, symbols) per table index, TS 38.213 Table 13-1 with
/// {SSB, PDCCH} SCS of {15, 15} kHz
#[rustfmt::skip]
const CORESET0_TABLE: [(u16, u8); 15] = [
    (24, 2), (24, 2), (24, 2),
    (24, 3), (24, 3), (24, 3),
    (48, 1), (48, 1), (48, 2),
    (48, 2), (48, 3), (48, 3),
    (96, 1), (96, 2), (96, 3),
];

/// CORESET geometry in the cell grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoresetConfig {
    pub start_crb: u16,
    pub nof_rbs: u16,
    pub nof_symbols: u8,
}

impl CoresetConfig {
    /// CORESET#0 from its table index, placed at `start_crb`
    pub fn coreset0(index: u8, start_crb: u16) -> Result<Self, SchedulerError> {
        let (nof_rbs, nof_symbols) = CORESET0_TABLE
            .get(index as usize)
            .copied()
            .ok_or_else(|| SchedulerError::InvalidConfiguration(format!("Invalid CORESET#0 index: {}", index)))?;
        Ok(Self { start_crb, nof_rbs, nof_symbols })
    }

    pub fn crbs(&self) -> CrbInterval {
        CrbInterval::new(self.start_crb, self.start_crb + self.nof_rbs)
    }

    pub fn symbols(&self) -> OfdmSymbolRange {
        OfdmSymbolRange::new(0, self.nof_symbols)
    }

    /// Number of CCEs (6 REGs each, one REG = 1 RB x 1 symbol)
    pub fn nof_cces(&self) -> u8 {
        (self.nof_rbs as u32 * self.nof_symbols as u32 / 6) as u8
    }

    /// Grid region covered by `aggregation_level` CCEs starting at `cce_index`
    pub fn cce_region(&self, cce_index: u8, aggregation_level: u8) -> GrantInfo {
        let rbs_per_cce = |cces: u32| cces * 6 / self.nof_symbols as u32;
        let start = self.start_crb + rbs_per_cce(cce_index as u32) as u16;
        let stop = self.start_crb + rbs_per_cce(cce_index as u32 + aggregation_level as u32) as u16;
        GrantInfo::new(self.symbols(), CrbInterval::new(start, stop))
    }
}

/// Common search space used for DCI 1_0 with C-RNTI before dedicated configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchSpaceConfig {
    pub aggregation_level: u8,
    pub nof_candidates: u8,
}

impl Default for SearchSpaceConfig {
    fn default() -> Self {
        Self { aggregation_level: 4, nof_candidates: 2 }
    }
}

/// PDSCH-TimeDomainResourceAllocation entry (mapping type A)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PdschTimeDomainResource {
    pub k0: u8,
    pub symbols: OfdmSymbolRange,
}

/// PUCCH resources of the common set (TS 38.213 §9.2.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PucchCommonConfig {
    /// RB_offset of the common PUCCH resource set
    pub rb_offset: u16,
    /// Number of initial cyclic shifts N_CS sharing one PRB
    pub nof_cyclic_shifts: u8,
    pub symbols: OfdmSymbolRange,
}

impl Default for PucchCommonConfig {
    fn default() -> Self {
        Self { rb_offset: 0, nof_cyclic_shifts: 4, symbols: OfdmSymbolRange::new(0, NOF_OFDM_SYMBOLS_PER_SLOT) }
    }
}

/// Periodic CSI-RS occupying the whole bandwidth
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsiRsConfig {
    pub period_slots: u16,
    pub offset_slots: u16,
    pub symbols: OfdmSymbolRange,
}

impl Default for CsiRsConfig {
    fn default() -> Self {
        Self { period_slots: 20, offset_slots: 2, symbols: OfdmSymbolRange::new(4, 5) }
    }
}

/// Cell configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellConfiguration {
    pub cell_id: CellId,
    pub pci: Pci,
    pub scs: SubcarrierSpacing,
    pub nof_prbs: u16,
    pub duplex: DuplexMode,
    pub coreset0: CoresetConfig,
    pub search_space: SearchSpaceConfig,
    pub pdsch_td_alloc_list: Vec<PdschTimeDomainResource>,
    pub pusch_k2: Vec<u8>,
    /// k1 candidates of DCI 1_0, ascending
    pub dl_data_to_ul_ack: Vec<u8>,
    pub pucch: PucchCommonConfig,
    pub csi_rs: Option<CsiRsConfig>,
}

impl CellConfiguration {
    /// Check the configuration for consistency
    pub fn validate(&self) -> Result<(), SchedulerError> {
        let invalid = |msg: String| Err(SchedulerError::InvalidConfiguration(msg));
        let full_slot = OfdmSymbolRange::new(0, NOF_OFDM_SYMBOLS_PER_SLOT);
        let slot_period = SlotPoint::zero(self.scs).period();

        if self.nof_prbs == 0 || self.nof_prbs > common::MAX_NOF_PRBS {
            return invalid(format!("Invalid number of PRBs: {}", self.nof_prbs));
        }

        if let DuplexMode::Tdd(pattern) = &self.duplex {
            pattern.validate()?;
            if slot_period % pattern.period_slots as u32 != 0 {
                return invalid(format!("TDD period of {} slots does not divide the SFN period", pattern.period_slots));
            }
        }

        let cs = &self.coreset0;
        if !self.bwp_crbs().contains(&cs.crbs()) {
            return invalid(format!("CORESET#0 {} outside the cell bandwidth", cs.crbs()));
        }
        if cs.nof_symbols == 0 || cs.nof_symbols > 3 {
            return invalid(format!("Invalid CORESET#0 duration: {}", cs.nof_symbols));
        }
        if cs.nof_cces() == 0 || cs.nof_cces() > 64 {
            return invalid(format!("Invalid number of CCEs: {}", cs.nof_cces()));
        }

        let ss = &self.search_space;
        if ![1, 2, 4, 8, 16].contains(&ss.aggregation_level) || ss.aggregation_level > cs.nof_cces() {
            return invalid(format!("Invalid aggregation level: {}", ss.aggregation_level));
        }
        if ss.nof_candidates == 0 || ss.nof_candidates > cs.nof_cces() / ss.aggregation_level {
            return invalid(format!("Invalid number of PDCCH candidates: {}", ss.nof_candidates));
        }

        if self.pdsch_td_alloc_list.is_empty() {
            return invalid("Empty PDSCH time domain list".into());
        }
        for td in &self.pdsch_td_alloc_list {
            if td.symbols.is_empty() || !full_slot.contains(&td.symbols) {
                return invalid(format!("Invalid PDSCH symbols {}", td.symbols));
            }
            if td.symbols.start < cs.nof_symbols {
                return invalid(format!("PDSCH symbols {} overlap CORESET#0", td.symbols));
            }
            if td.k0 > 32 {
                return invalid(format!("Invalid k0: {}", td.k0));
            }
        }

        if self.dl_data_to_ul_ack.is_empty() || self.dl_data_to_ul_ack.iter().any(|k1| *k1 == 0 || *k1 > 15) {
            return invalid(format!("Invalid k1 list: {:?}", self.dl_data_to_ul_ack));
        }
        if self.dl_data_to_ul_ack.windows(2).any(|w| w[0] >= w[1]) {
            return invalid(format!("k1 list not ascending: {:?}", self.dl_data_to_ul_ack));
        }
        if self.pusch_k2.is_empty() || self.pusch_k2.iter().any(|k2| *k2 > 32) {
            return invalid(format!("Invalid k2 list: {:?}", self.pusch_k2));
        }

        let pucch = &self.pucch;
        if pucch.symbols.is_empty() || !full_slot.contains(&pucch.symbols) {
            return invalid(format!("Invalid PUCCH symbols {}", pucch.symbols));
        }
        if pucch.nof_cyclic_shifts == 0 || pucch.nof_cyclic_shifts > 12 {
            return invalid(format!("Invalid number of cyclic shifts: {}", pucch.nof_cyclic_shifts));
        }
        let prbs_per_edge = 8u16.div_ceil(pucch.nof_cyclic_shifts as u16);
        if 2 * (pucch.rb_offset + prbs_per_edge) > self.nof_prbs {
            return invalid(format!("Common PUCCH resources do not fit in {} PRBs", self.nof_prbs));
        }

        if let Some(csi) = &self.csi_rs {
            if csi.period_slots == 0 || csi.offset_slots >= csi.period_slots {
                return invalid(format!("Invalid CSI-RS period {} / offset {}", csi.period_slots, csi.offset_slots));
            }
            if slot_period % csi.period_slots as u32 != 0 {
                return invalid(format!("CSI-RS period {} does not divide the SFN period", csi.period_slots));
            }
            if csi.symbols.is_empty() || !full_slot.contains(&csi.symbols) || csi.symbols.overlaps(&cs.symbols()) {
                return invalid(format!("Invalid CSI-RS symbols {}", csi.symbols));
            }
            if let DuplexMode::Tdd(pattern) = &self.duplex {
                if csi.period_slots % pattern.period_slots != 0 {
                    return invalid("CSI-RS period must be a multiple of the TDD period".into());
                }
                if !pattern.dl_symbols(csi.offset_slots).contains(&csi.symbols) {
                    return invalid(format!("CSI-RS slot offset {} is not a DL slot", csi.offset_slots));
                }
            }
        }

        Ok(())
    }

    /// CRBs of the (initial) bandwidth part
    pub fn bwp_crbs(&self) -> CrbInterval {
        CrbInterval::new(0, self.nof_prbs)
    }

    /// CRB limits of PDSCH scheduled by DCI 1_0 in the common search space
    pub fn fallback_crb_limits(&self) -> CrbInterval {
        self.coreset0.crbs().intersect(&self.bwp_crbs())
    }

    fn tdd_index(pattern: &TddPattern, slot: SlotPoint) -> u16 {
        (slot.count() % pattern.period_slots as u32) as u16
    }

    /// DL symbols of a slot
    pub fn dl_symbols(&self, slot: SlotPoint) -> OfdmSymbolRange {
        match &self.duplex {
            DuplexMode::Fdd => OfdmSymbolRange::new(0, NOF_OFDM_SYMBOLS_PER_SLOT),
            DuplexMode::Tdd(pattern) => pattern.dl_symbols(Self::tdd_index(pattern, slot)),
        }
    }

    /// UL symbols of a slot
    pub fn ul_symbols(&self, slot: SlotPoint) -> OfdmSymbolRange {
        match &self.duplex {
            DuplexMode::Fdd => OfdmSymbolRange::new(0, NOF_OFDM_SYMBOLS_PER_SLOT),
            DuplexMode::Tdd(pattern) => pattern.ul_symbols(Self::tdd_index(pattern, slot)),
        }
    }

    pub fn is_dl_enabled(&self, slot: SlotPoint) -> bool {
        !self.dl_symbols(slot).is_empty()
    }

    pub fn is_fully_dl_enabled(&self, slot: SlotPoint) -> bool {
        self.dl_symbols(slot).length() == NOF_OFDM_SYMBOLS_PER_SLOT
    }

    pub fn is_ul_enabled(&self, slot: SlotPoint) -> bool {
        !self.ul_symbols(slot).is_empty()
    }

    pub fn is_csi_rs_slot(&self, slot: SlotPoint) -> bool {
        self.csi_rs
            .as_ref()
            .is_some_and(|csi| slot.count() % csi.period_slots as u32 == csi.offset_slots as u32)
    }

    pub fn max_k0(&self) -> u8 {
        self.pdsch_td_alloc_list.iter().map(|td| td.k0).max().unwrap_or(0)
    }

    pub fn max_k1(&self) -> u8 {
        self.dl_data_to_ul_ack.iter().copied().max().unwrap_or(0)
    }

    pub fn max_k2(&self) -> u8 {
        self.pusch_k2.iter().copied().max().unwrap_or(0)
    }

    /// Number of slots the resource grid must hold
    pub fn ring_size(&self, expert: &SchedulerExpertConfig) -> usize {
        expert.max_dl_slots_ahead as usize
            + self.max_k0() as usize
            + self.max_k1().max(self.max_k2()) as usize
            + 1
    }
}

/// Default PDSCH time domain list: one full-slot entry starting after
/// CORESET#0, plus a shorter entry for the partial DL slot of a TDD pattern.
pub fn make_pdsch_time_domain_resources(coreset0: &CoresetConfig, duplex: &DuplexMode) -> Vec<PdschTimeDomainResource> {
    let start = coreset0.nof_symbols;
    let mut list = vec![PdschTimeDomainResource {
        k0: 0,
        symbols: OfdmSymbolRange::new(start, NOF_OFDM_SYMBOLS_PER_SLOT),
    }];
    if let DuplexMode::Tdd(pattern) = duplex {
        if pattern.nof_dl_symbols > start {
            list.push(PdschTimeDomainResource { k0: 0, symbols: OfdmSymbolRange::new(start, pattern.nof_dl_symbols) });
        }
    }
    list
}

/// Scheduler tuning parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerExpertConfig {
    /// Highest MCS index used for SRB0 messages
    pub max_msg4_mcs: u8,
    pub max_nof_harq_retxs: u8,
    /// Active DL HARQ processes per UE cell
    pub nof_dl_harqs: u8,
    /// Slots after the expected feedback slot before the HARQ-ACK counts as missed
    pub harq_ack_timeout_slots: u16,
    /// How far ahead of the current slot fallback PDCCHs may be placed
    pub max_dl_slots_ahead: u16,
}

impl Default for SchedulerExpertConfig {
    fn default() -> Self {
        Self {
            max_msg4_mcs: 9,
            max_nof_harq_retxs: 4,
            nof_dl_harqs: 8,
            harq_ack_timeout_slots: 8,
            max_dl_slots_ahead: 20,
        }
    }
}

impl SchedulerExpertConfig {
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.max_msg4_mcs > MAX_MCS_INDEX {
            return Err(SchedulerError::InvalidConfiguration(format!(
                "Invalid max MSG4 MCS: {}",
                self.max_msg4_mcs
            )));
        }
        if self.nof_dl_harqs == 0 || self.nof_dl_harqs > MAX_NOF_HARQS {
            return Err(SchedulerError::InvalidConfiguration(format!(
                "Invalid number of DL HARQs: {}",
                self.nof_dl_harqs
            )));
        }
        Ok(())
    }
}

/// Builds a [`CellConfiguration`] from a few high level parameters
#[derive(Debug, Clone)]
pub struct CellConfigBuilder {
    pub cell_id: CellId,
    pub pci: Pci,
    pub scs: SubcarrierSpacing,
    pub bandwidth: Bandwidth,
    pub duplex: DuplexMode,
    pub coreset0_index: u8,
    pub coreset0_start_crb: u16,
    pub search_space: SearchSpaceConfig,
    pub pucch: PucchCommonConfig,
    pub csi_rs: Option<CsiRsConfig>,
}

impl Default for CellConfigBuilder {
    fn default() -> Self {
        Self {
            cell_id: CellId(1),
            pci: Pci(1),
            scs: SubcarrierSpacing::Scs15,
            bandwidth: Bandwidth::Bw10,
            duplex: DuplexMode::Fdd,
            coreset0_index: 8,
            coreset0_start_crb: 0,
            search_space: SearchSpaceConfig::default(),
            pucch: PucchCommonConfig::default(),
            csi_rs: Some(CsiRsConfig::default()),
        }
    }
}

impl CellConfigBuilder {
    /// TDD defaults: 30 kHz, 20 MHz, 6 DL slots + special slot + 3 UL slots
    pub fn tdd() -> Self {
        Self {
            scs: SubcarrierSpacing::Scs30,
            bandwidth: Bandwidth::Bw20,
            duplex: DuplexMode::Tdd(TddPattern {
                period_slots: 10,
                nof_dl_slots: 6,
                nof_dl_symbols: 8,
                nof_ul_slots: 3,
                nof_ul_symbols: 0,
            }),
            ..Self::default()
        }
    }

    pub fn build(&self) -> Result<CellConfiguration, SchedulerError> {
        let nof_prbs = nof_prbs(self.bandwidth, self.scs)?;
        let coreset0 = CoresetConfig::coreset0(self.coreset0_index, self.coreset0_start_crb)?;
        let cfg = CellConfiguration {
            cell_id: self.cell_id,
            pci: self.pci,
            scs: self.scs,
            nof_prbs,
            duplex: self.duplex,
            coreset0,
            search_space: self.search_space,
            pdsch_td_alloc_list: make_pdsch_time_domain_resources(&coreset0, &self.duplex),
            pusch_k2: vec![4],
            dl_data_to_ul_ack: DCI_1_0_K1_VALUES.to_vec(),
            pucch: self.pucch,
            csi_rs: self.csi_rs,
        };
        cfg.validate()?;
        debug!(
            "Cell config: cell_id={:?}, scs={:?}, nof_prbs={}, duplex={:?}",
            cfg.cell_id, cfg.scs, cfg.nof_prbs, cfg.duplex
        );
        Ok(cfg)
    }
}
