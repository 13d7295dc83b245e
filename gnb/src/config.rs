//! YAML configuration of the scheduler simulator
//!
//! Follows the srsRAN gNB layout for the cell section (`cell_cfg`), plus the
//! scheduler expert parameters, the simulated traffic and logging.

use anyhow::{anyhow, Context};
use common::{Bandwidth, CellId, DuplexMode, OfdmSymbolRange, Pci, SubcarrierSpacing, TddPattern};
use num_traits::FromPrimitive;
use scheduler::config::{CsiRsConfig, PucchCommonConfig, SearchSpaceConfig};
use scheduler::{CellConfigBuilder, CellConfiguration, SchedulerExpertConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimConfig {
    /// Cell configuration
    pub cell_cfg: CellConfig,
    /// Scheduler expert configuration
    #[serde(default)]
    pub scheduler: SchedulerExpertConfig,
    /// Simulated traffic and feedback
    #[serde(default)]
    pub sim: TrafficConfig,
    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

/// Cell configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CellConfig {
    /// Physical Cell ID
    pub pci: u16,
    #[serde(default = "default_cell_id")]
    pub cell_id: u16,
    /// Channel bandwidth in MHz
    #[serde(rename = "channel_bandwidth_MHz")]
    pub channel_bandwidth_mhz: u32,
    /// Common subcarrier spacing in kHz
    pub common_scs: u32,
    /// TDD pattern; FDD when absent
    #[serde(default)]
    pub tdd_ul_dl_cfg: Option<TddConfig>,
    /// PDCCH configuration
    #[serde(default)]
    pub pdcch: PdcchConfig,
    /// PUCCH common resources
    #[serde(default)]
    pub pucch: PucchConfig,
    /// Periodic CSI-RS
    #[serde(default)]
    pub csi: CsiConfig,
}

fn default_cell_id() -> u16 {
    1
}

/// TDD UL/DL pattern
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TddConfig {
    /// Pattern period in slots
    pub dl_ul_tx_period: u16,
    pub nof_dl_slots: u16,
    pub nof_dl_symbols: u8,
    pub nof_ul_slots: u16,
    #[serde(default)]
    pub nof_ul_symbols: u8,
}

/// PDCCH configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PdcchConfig {
    /// CORESET#0 index (TS 38.213 Table 13-1)
    #[serde(default = "default_coreset0_index")]
    pub coreset0_index: u8,
    /// First CRB of CORESET#0
    #[serde(default)]
    pub coreset0_start_crb: u16,
    /// Aggregation level of the common search space
    #[serde(default = "default_aggregation_level")]
    pub aggregation_level: u8,
    #[serde(default = "default_nof_candidates")]
    pub nof_candidates: u8,
}

fn default_coreset0_index() -> u8 {
    8
}

fn default_aggregation_level() -> u8 {
    SearchSpaceConfig::default().aggregation_level
}

fn default_nof_candidates() -> u8 {
    SearchSpaceConfig::default().nof_candidates
}

impl Default for PdcchConfig {
    fn default() -> Self {
        Self {
            coreset0_index: default_coreset0_index(),
            coreset0_start_crb: 0,
            aggregation_level: default_aggregation_level(),
            nof_candidates: default_nof_candidates(),
        }
    }
}

/// PUCCH common resource configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct PucchConfig {
    /// PRB offset from the band edges
    #[serde(default)]
    pub rb_offset: u16,
    /// Cyclic shifts per PRB
    #[serde(default)]
    pub nof_cyclic_shifts: Option<u8>,
}

/// CSI-RS configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CsiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Period in slots
    #[serde(default = "default_csi_period")]
    pub period: u16,
    /// Slot offset within the period
    #[serde(default = "default_csi_offset")]
    pub offset: u16,
}

fn default_true() -> bool {
    true
}

fn default_csi_period() -> u16 {
    CsiRsConfig::default().period_slots
}

fn default_csi_offset() -> u16 {
    CsiRsConfig::default().offset_slots
}

impl Default for CsiConfig {
    fn default() -> Self {
        Self { enabled: true, period: default_csi_period(), offset: default_csi_offset() }
    }
}

/// Simulated upper layer and PHY
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TrafficConfig {
    /// UEs registered in fallback mode at start
    pub nof_ues: u16,
    /// Slots to run; 0 runs until Ctrl-C
    pub nof_slots: u64,
    /// SRB0 message size in bytes
    pub srb0_bytes: u32,
    /// Slots between two SRB0 messages of a UE
    pub traffic_period_slots: u32,
    /// Probability of a HARQ ACK
    pub ack_probability: f64,
    /// Probability of a missing HARQ-ACK report (DTX)
    pub dtx_probability: f64,
    /// Pace ticks at the slot duration
    pub realtime: bool,
    /// Seed of the random generator
    pub seed: u64,
}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            nof_ues: 4,
            nof_slots: 0,
            srb0_bytes: 128,
            traffic_period_slots: 40,
            ack_probability: 0.9,
            dtx_probability: 0.0,
            realtime: true,
            seed: 0,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// Log level of all layers
    #[serde(default = "default_log_level")]
    pub all_level: String,
    /// Log scheduler events one by one
    #[serde(default)]
    pub log_events: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { all_level: default_log_level(), log_events: false }
    }
}

impl SimConfig {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let config: SimConfig =
            serde_yaml::from_str(&contents).with_context(|| format!("parsing {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let sim = &self.sim;
        if !(0.0..=1.0).contains(&sim.ack_probability) || !(0.0..=1.0).contains(&sim.dtx_probability) {
            return Err(anyhow!("Feedback probabilities must lie in [0, 1]"));
        }
        if sim.traffic_period_slots == 0 {
            return Err(anyhow!("traffic_period_slots must be positive"));
        }
        self.scheduler.validate()?;
        Ok(())
    }

    /// Build the cell configuration of the scheduler
    pub fn to_cell_config(&self) -> anyhow::Result<CellConfiguration> {
        let cell = &self.cell_cfg;
        let pci = Pci::new(cell.pci).ok_or_else(|| anyhow!("Invalid PCI: {}", cell.pci))?;
        let scs = SubcarrierSpacing::from_u32(cell.common_scs)
            .ok_or_else(|| anyhow!("Invalid subcarrier spacing: {} kHz", cell.common_scs))?;
        let bandwidth = Bandwidth::from_mhz(cell.channel_bandwidth_mhz)?;
        let duplex = match &cell.tdd_ul_dl_cfg {
            None => DuplexMode::Fdd,
            Some(tdd) => DuplexMode::Tdd(TddPattern {
                period_slots: tdd.dl_ul_tx_period,
                nof_dl_slots: tdd.nof_dl_slots,
                nof_dl_symbols: tdd.nof_dl_symbols,
                nof_ul_slots: tdd.nof_ul_slots,
                nof_ul_symbols: tdd.nof_ul_symbols,
            }),
        };
        let defaults = PucchCommonConfig::default();
        let builder = CellConfigBuilder {
            cell_id: CellId(cell.cell_id),
            pci,
            scs,
            bandwidth,
            duplex,
            coreset0_index: cell.pdcch.coreset0_index,
            coreset0_start_crb: cell.pdcch.coreset0_start_crb,
            search_space: SearchSpaceConfig {
                aggregation_level: cell.pdcch.aggregation_level,
                nof_candidates: cell.pdcch.nof_candidates,
            },
            pucch: PucchCommonConfig {
                rb_offset: cell.pucch.rb_offset,
                nof_cyclic_shifts: cell.pucch.nof_cyclic_shifts.unwrap_or(defaults.nof_cyclic_shifts),
                symbols: defaults.symbols,
            },
            csi_rs: cell.csi.enabled.then(|| CsiRsConfig {
                period_slots: cell.csi.period,
                offset_slots: cell.csi.offset,
                symbols: OfdmSymbolRange::new(4, 5),
            }),
        };
        Ok(builder.build()?)
    }
}
