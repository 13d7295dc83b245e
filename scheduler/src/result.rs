//! Scheduling decisions of one slot

use crate::grid::GrantInfo;
use common::{HarqId, Lcid, ModulationScheme, Rnti, SlotPoint, UeIndex};
use serde::Serialize;

/// DCI format 1_0 fields scheduling a PDSCH (TS 38.212 §7.3.1.2.1)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dci10 {
    pub time_resource: u8,
    pub k1: u8,
    pub mcs: u8,
    pub harq_id: HarqId,
    pub ndi: bool,
    pub rv: u8,
    pub pucch_resource_indicator: u8,
}

/// PDCCH carrying a DL assignment
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PdcchDlInfo {
    pub rnti: Rnti,
    pub cce_index: u8,
    pub aggregation_level: u8,
    pub region: GrantInfo,
    pub dci: Dci10,
}

/// PDSCH grant
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DlGrant {
    pub pdsch_slot: SlotPoint,
    pub ue_index: UeIndex,
    pub rnti: Rnti,
    pub region: GrantInfo,
    pub mcs: u8,
    pub modulation: ModulationScheme,
    pub tbs_bytes: u32,
    pub harq_id: HarqId,
    pub ndi: bool,
    pub rv: u8,
    pub is_retx: bool,
    pub lcid: Lcid,
    /// UE Contention Resolution Identity MAC CE carried
    pub con_res_id: bool,
    /// MAC SDU bytes carried, 0 for retransmissions
    pub sdu_bytes: u32,
    /// Slot where the HARQ-ACK is expected
    pub uci_slot: SlotPoint,
    pub pucch_resource: u8,
}

/// CSI-RS occasion
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CsiRsInfo {
    pub region: GrantInfo,
}

/// PUCCH carrying HARQ-ACK bits
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PucchInfo {
    pub ue_index: UeIndex,
    pub rnti: Rnti,
    pub resource_index: u8,
    pub region: GrantInfo,
    pub harq_ack_bits: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DlSchedResult {
    pub pdcchs: Vec<PdcchDlInfo>,
    pub grants: Vec<DlGrant>,
    pub csi_rs: Vec<CsiRsInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UlSchedResult {
    pub pucchs: Vec<PucchInfo>,
}

/// Everything decided for one slot, handed to the PHY once finalized
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchedResult {
    pub slot: SlotPoint,
    pub dl: DlSchedResult,
    pub ul: UlSchedResult,
}

impl SchedResult {
    pub fn new(slot: SlotPoint) -> Self {
        Self { slot, dl: DlSchedResult::default(), ul: UlSchedResult::default() }
    }

    /// Clear the decisions, keeping allocated capacity
    pub fn reset(&mut self, slot: SlotPoint) {
        self.slot = slot;
        self.dl.pdcchs.clear();
        self.dl.grants.clear();
        self.dl.csi_rs.clear();
        self.ul.pucchs.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.dl.pdcchs.is_empty()
            && self.dl.grants.is_empty()
            && self.dl.csi_rs.is_empty()
            && self.ul.pucchs.is_empty()
    }
}
