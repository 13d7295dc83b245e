//! UE context and repository

use crate::config::{CellConfiguration, SchedulerExpertConfig};
use crate::harq::{DlHarqEntity, HarqAckOutcome, HarqAckStatus};
use crate::SchedulerError;
use common::{CellId, Lcid, Rnti, SlotPoint, UeIndex};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Request to create a UE in the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UeCreationRequest {
    pub ue_index: UeIndex,
    pub crnti: Rnti,
    /// UE has no dedicated configuration yet and is served by DCI 1_0 / SRB0
    pub starts_in_fallback: bool,
}

/// DL RLC buffer occupancy of one logical channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DlBufferStateIndication {
    pub ue_index: UeIndex,
    pub lcid: Lcid,
    pub bytes: u32,
}

/// HARQ-ACK feedback decoded by the PHY
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UciIndication {
    pub ue_index: UeIndex,
    /// Slot of the PUCCH carrying the feedback
    pub slot: SlotPoint,
    pub tb_index: u8,
    pub status: HarqAckStatus,
}

/// MAC subheader size for a DL MAC SDU (TS 38.321 §6.1.2)
pub fn mac_sdu_subheader_size(sdu_bytes: u32) -> u32 {
    if sdu_bytes == 0 {
        0
    } else if sdu_bytes <= 255 {
        2
    } else {
        3
    }
}

/// UE Contention Resolution Identity MAC CE: 1 byte subheader and the
/// 48-bit UL CCCH SDU prefix (TS 38.321 §6.1.3.3)
pub const CON_RES_ID_SUBPDU_BYTES: u32 = 7;

/// Pending DL bytes per logical channel
#[derive(Debug, Clone)]
pub struct DlLogicalChannelManager {
    pending_bytes: [u32; Lcid::MAX_NOF_RB_LCIDS],
    con_res_id_pending: bool,
}

impl Default for DlLogicalChannelManager {
    fn default() -> Self {
        Self { pending_bytes: [0; Lcid::MAX_NOF_RB_LCIDS], con_res_id_pending: false }
    }
}

impl DlLogicalChannelManager {
    pub fn set_con_res_id_pending(&mut self, pending: bool) {
        self.con_res_id_pending = pending;
    }

    pub fn is_con_res_id_pending(&self) -> bool {
        self.con_res_id_pending
    }

    pub fn handle_dl_buffer_status(&mut self, lcid: Lcid, bytes: u32) {
        if let Some(pending) = self.pending_bytes.get_mut(lcid.0 as usize) {
            *pending = bytes;
        }
    }

    pub fn pending_bytes(&self, lcid: Lcid) -> u32 {
        self.pending_bytes.get(lcid.0 as usize).copied().unwrap_or(0)
    }

    /// Pending bytes including the MAC subheader
    pub fn pending_bytes_with_subheader(&self, lcid: Lcid) -> u32 {
        let sdu = self.pending_bytes(lcid);
        sdu + mac_sdu_subheader_size(sdu)
    }

    pub fn has_pending_bytes(&self) -> bool {
        self.con_res_id_pending || self.pending_bytes.iter().any(|b| *b > 0)
    }

    /// Take the whole buffer of `lcid` into one MAC SDU
    pub fn consume(&mut self, lcid: Lcid) -> u32 {
        match self.pending_bytes.get_mut(lcid.0 as usize) {
            Some(pending) => std::mem::take(pending),
            None => 0,
        }
    }
}

/// MAC subPDUs of a fallback transport block
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FallbackTbContents {
    /// UE Contention Resolution Identity MAC CE included
    pub con_res_id: bool,
    /// SRB0 SDU bytes, MAC subheader excluded
    pub sdu_bytes: u32,
}

impl FallbackTbContents {
    /// Bytes taken from the transport block, subheaders included
    pub fn nof_bytes(&self) -> u32 {
        let ce = if self.con_res_id { CON_RES_ID_SUBPDU_BYTES } else { 0 };
        ce + self.sdu_bytes + mac_sdu_subheader_size(self.sdu_bytes)
    }
}

/// Per-cell state of a UE
#[derive(Debug, Clone)]
pub struct UeCell {
    cell_id: CellId,
    pub harqs: DlHarqEntity,
    in_fallback: bool,
    last_pdsch_slot: Option<SlotPoint>,
}

impl UeCell {
    pub fn cell_id(&self) -> CellId {
        self.cell_id
    }

    pub fn is_in_fallback(&self) -> bool {
        self.in_fallback
    }

    pub fn last_pdsch_slot(&self) -> Option<SlotPoint> {
        self.last_pdsch_slot
    }

    pub fn set_last_pdsch_slot(&mut self, slot: SlotPoint) {
        self.last_pdsch_slot = Some(slot);
    }
}

/// UE context
#[derive(Debug, Clone)]
pub struct Ue {
    ue_index: UeIndex,
    crnti: Rnti,
    dl_lc: DlLogicalChannelManager,
    cells: Vec<UeCell>,
}

impl Ue {
    pub fn new(req: &UeCreationRequest, cell_cfg: &CellConfiguration, expert: &SchedulerExpertConfig) -> Self {
        let pcell = UeCell {
            cell_id: cell_cfg.cell_id,
            harqs: DlHarqEntity::new(expert.nof_dl_harqs, expert.max_nof_harq_retxs, expert.harq_ack_timeout_slots),
            in_fallback: req.starts_in_fallback,
            last_pdsch_slot: None,
        };
        let mut dl_lc = DlLogicalChannelManager::default();
        // A UE created in fallback still has to complete contention resolution
        dl_lc.set_con_res_id_pending(req.starts_in_fallback);
        Self { ue_index: req.ue_index, crnti: req.crnti, dl_lc, cells: vec![pcell] }
    }

    pub fn ue_index(&self) -> UeIndex {
        self.ue_index
    }

    pub fn crnti(&self) -> Rnti {
        self.crnti
    }

    pub fn pcell(&self) -> &UeCell {
        &self.cells[0]
    }

    pub fn pcell_mut(&mut self) -> &mut UeCell {
        &mut self.cells[0]
    }

    pub fn dl_logical_channels(&self) -> &DlLogicalChannelManager {
        &self.dl_lc
    }

    pub fn handle_dl_buffer_state_indication(&mut self, ind: &DlBufferStateIndication) {
        self.dl_lc.handle_dl_buffer_status(ind.lcid, ind.bytes);
    }

    /// SRB0 bytes awaiting a first transmission, MAC subheader and a
    /// pending ConRes MAC CE included. 0 when no SRB0 SDU is pending.
    pub fn pending_dl_srb0_newtx_bytes(&self) -> u32 {
        let sdu = self.dl_lc.pending_bytes_with_subheader(Lcid::SRB0);
        if sdu == 0 {
            return 0;
        }
        let ce = if self.dl_lc.is_con_res_id_pending() { CON_RES_ID_SUBPDU_BYTES } else { 0 };
        sdu + ce
    }

    /// Fill a transport block of `tbs_bytes` with the pending ConRes MAC CE
    /// and the SRB0 SDU. SRB0 is never segmented: it is left out when it does
    /// not fit in the remaining bytes.
    pub fn build_dl_srb0_transport_block(&mut self, tbs_bytes: u32) -> FallbackTbContents {
        let mut contents = FallbackTbContents::default();
        if self.dl_lc.is_con_res_id_pending() && tbs_bytes >= CON_RES_ID_SUBPDU_BYTES {
            self.dl_lc.set_con_res_id_pending(false);
            contents.con_res_id = true;
        }
        let remaining = tbs_bytes - contents.nof_bytes();
        let srb0 = self.dl_lc.pending_bytes_with_subheader(Lcid::SRB0);
        if srb0 > 0 && srb0 <= remaining {
            contents.sdu_bytes = self.dl_lc.consume(Lcid::SRB0);
        }
        contents
    }

    pub fn is_in_fallback(&self) -> bool {
        self.pcell().in_fallback
    }

    pub fn set_fallback_state(&mut self, in_fallback: bool) {
        if self.pcell().in_fallback != in_fallback {
            info!("UE {} rnti={} fallback state: {}", self.ue_index, self.crnti, in_fallback);
        }
        self.pcell_mut().in_fallback = in_fallback;
    }

    /// Per-slot update. `horizon` bounds how long the last PDSCH slot is
    /// remembered.
    ///
    /// Returns a `DeadlineMissed` for each HARQ-ACK that did not arrive in
    /// time, followed by `RetransmissionLimitExceeded` when that implicit
    /// NACK dropped the transport block.
    pub fn slot_indication(&mut self, sl_tx: SlotPoint, horizon: u32) -> Vec<SchedulerError> {
        let mut reports = Vec::new();
        for cell in &mut self.cells {
            if let Some(last) = cell.last_pdsch_slot {
                if sl_tx - last > horizon as i32 {
                    cell.last_pdsch_slot = None;
                }
            }
            for timeout in cell.harqs.slot_indication(sl_tx) {
                reports.push(SchedulerError::DeadlineMissed {
                    ue_index: self.ue_index,
                    harq_id: timeout.harq_id,
                    ack_slot: timeout.ack_slot,
                });
                if timeout.outcome == HarqAckOutcome::Discarded {
                    reports.push(SchedulerError::RetransmissionLimitExceeded {
                        ue_index: self.ue_index,
                        harq_id: timeout.harq_id,
                        nof_retxs: timeout.nof_retxs,
                    });
                }
            }
        }
        reports
    }
}

/// UEs of the scheduler, ordered by UE index
#[derive(Debug, Default)]
pub struct UeRepository {
    ues: BTreeMap<UeIndex, Ue>,
}

impl UeRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_ue(&mut self, ue: Ue) -> Result<(), SchedulerError> {
        if self.ues.contains_key(&ue.ue_index) || self.find_by_rnti(ue.crnti).is_some() {
            return Err(SchedulerError::DuplicateUe { ue_index: ue.ue_index, rnti: ue.crnti });
        }
        debug!("Added UE {} rnti={}", ue.ue_index, ue.crnti);
        self.ues.insert(ue.ue_index, ue);
        Ok(())
    }

    pub fn remove_ue(&mut self, ue_index: UeIndex) -> Option<Ue> {
        self.ues.remove(&ue_index)
    }

    pub fn contains(&self, ue_index: UeIndex) -> bool {
        self.ues.contains_key(&ue_index)
    }

    pub fn get(&self, ue_index: UeIndex) -> Option<&Ue> {
        self.ues.get(&ue_index)
    }

    pub fn get_mut(&mut self, ue_index: UeIndex) -> Option<&mut Ue> {
        self.ues.get_mut(&ue_index)
    }

    pub fn find_by_rnti(&self, rnti: Rnti) -> Option<&Ue> {
        self.ues.values().find(|ue| ue.crnti == rnti)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Ue> {
        self.ues.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Ue> {
        self.ues.values_mut()
    }

    pub fn len(&self) -> usize {
        self.ues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ues.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{fdd_cell_config, ue_request};

    #[test]
    fn test_mac_subheader() {
        assert_eq!(mac_sdu_subheader_size(0), 0);
        assert_eq!(mac_sdu_subheader_size(255), 2);
        assert_eq!(mac_sdu_subheader_size(256), 3);
    }

    #[test]
    fn test_srb0_transport_block() {
        let cfg = fdd_cell_config();
        let mut ue = Ue::new(&ue_request(0), &cfg, &SchedulerExpertConfig::default());
        ue.handle_dl_buffer_state_indication(&DlBufferStateIndication {
            ue_index: UeIndex(0),
            lcid: Lcid::SRB0,
            bytes: 101,
        });
        // SDU, 2 byte subheader and the ConRes MAC CE of the first message
        assert_eq!(ue.pending_dl_srb0_newtx_bytes(), 110);
        let contents = ue.build_dl_srb0_transport_block(112);
        assert_eq!(contents, FallbackTbContents { con_res_id: true, sdu_bytes: 101 });
        assert_eq!(contents.nof_bytes(), 110);
        assert_eq!(ue.pending_dl_srb0_newtx_bytes(), 0);
        assert!(!ue.dl_logical_channels().has_pending_bytes());

        // Later messages carry no ConRes MAC CE
        ue.handle_dl_buffer_state_indication(&DlBufferStateIndication {
            ue_index: UeIndex(0),
            lcid: Lcid::SRB0,
            bytes: 300,
        });
        assert_eq!(ue.pending_dl_srb0_newtx_bytes(), 303);
        assert_eq!(ue.build_dl_srb0_transport_block(302), FallbackTbContents::default());
        assert_eq!(ue.build_dl_srb0_transport_block(303).sdu_bytes, 300);
    }

    #[test]
    fn test_srb0_left_out_when_it_does_not_fit() {
        let cfg = fdd_cell_config();
        let mut ue = Ue::new(&ue_request(0), &cfg, &SchedulerExpertConfig::default());
        ue.handle_dl_buffer_state_indication(&DlBufferStateIndication {
            ue_index: UeIndex(0),
            lcid: Lcid::SRB0,
            bytes: 101,
        });
        let contents = ue.build_dl_srb0_transport_block(109);
        assert_eq!(contents, FallbackTbContents { con_res_id: true, sdu_bytes: 0 });
        assert_eq!(ue.pending_dl_srb0_newtx_bytes(), 103);
    }

    #[test]
    fn test_connected_ue_has_no_con_res_id() {
        let cfg = fdd_cell_config();
        let req = UeCreationRequest { starts_in_fallback: false, ..ue_request(0) };
        let ue = Ue::new(&req, &cfg, &SchedulerExpertConfig::default());
        assert!(!ue.dl_logical_channels().is_con_res_id_pending());
        assert!(!ue.dl_logical_channels().has_pending_bytes());
    }

    #[test]
    fn test_last_pdsch_slot_expires() {
        let cfg = fdd_cell_config();
        let mut ue = Ue::new(&ue_request(0), &cfg, &SchedulerExpertConfig::default());
        let slot = SlotPoint::new(0, 100).unwrap();
        ue.pcell_mut().set_last_pdsch_slot(slot);
        ue.slot_indication(slot + 29u32, 29);
        assert_eq!(ue.pcell().last_pdsch_slot(), Some(slot));
        ue.slot_indication(slot + 30u32, 29);
        assert_eq!(ue.pcell().last_pdsch_slot(), None);
    }

    #[test]
    fn test_repository_duplicates() {
        let cfg = fdd_cell_config();
        let expert = SchedulerExpertConfig::default();
        let mut repo = UeRepository::new();
        repo.add_ue(Ue::new(&ue_request(0), &cfg, &expert)).unwrap();
        assert!(repo.add_ue(Ue::new(&ue_request(0), &cfg, &expert)).is_err());

        let same_rnti = UeCreationRequest { ue_index: UeIndex(5), ..ue_request(0) };
        assert!(matches!(
            repo.add_ue(Ue::new(&same_rnti, &cfg, &expert)),
            Err(SchedulerError::DuplicateUe { .. })
        ));

        assert_eq!(repo.find_by_rnti(Rnti(0x4601)).map(Ue::ue_index), Some(UeIndex(0)));
        assert!(repo.find_by_rnti(Rnti(0x4602)).is_none());
        assert!(repo.remove_ue(UeIndex(0)).is_some());
        assert!(repo.is_empty());
    }
}
