//! DL HARQ processes
//!
//! Each UE cell owns a fixed arena of HARQ processes. A process is `Empty`,
//! `WaitingAck` for the feedback of its last transmission, or `PendingRetx`
//! after a NACK (explicit, DTX or missed deadline).

use crate::config::MAX_NOF_HARQS;
use crate::SchedulerError;
use common::{HarqId, OfdmSymbolRange, SlotPoint};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Redundancy version sequence across (re)transmissions
pub const RV_SEQUENCE: [u8; 4] = [0, 2, 3, 1];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HarqState {
    Empty,
    WaitingAck,
    PendingRetx,
}

/// HARQ-ACK value reported by the PHY
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HarqAckStatus {
    Ack,
    Nack,
    Dtx,
}

/// Effect of HARQ feedback on a process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HarqAckOutcome {
    /// Transport block delivered, process freed
    Acked,
    /// Process waits for a retransmission
    Retransmit,
    /// Retransmission limit reached, transport block dropped
    Discarded,
}

/// Transport block parameters kept for retransmissions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DlTbInfo {
    pub mcs: u8,
    pub nof_prbs: u16,
    pub symbols: OfdmSymbolRange,
    pub tbs_bytes: u32,
    /// ConRes MAC CE carried in the transport block
    pub con_res_id: bool,
}

#[derive(Debug, Clone)]
pub struct DlHarqProcess {
    id: HarqId,
    state: HarqState,
    ndi: bool,
    nof_retxs: u8,
    max_nof_retxs: u8,
    pdsch_slot: Option<SlotPoint>,
    ack_slot: Option<SlotPoint>,
    tb: Option<DlTbInfo>,
}

impl DlHarqProcess {
    fn new(id: HarqId, max_nof_retxs: u8) -> Self {
        Self {
            id,
            state: HarqState::Empty,
            ndi: false,
            nof_retxs: 0,
            max_nof_retxs,
            pdsch_slot: None,
            ack_slot: None,
            tb: None,
        }
    }

    pub fn id(&self) -> HarqId {
        self.id
    }

    pub fn state(&self) -> HarqState {
        self.state
    }

    pub fn is_empty(&self) -> bool {
        self.state == HarqState::Empty
    }

    pub fn ndi(&self) -> bool {
        self.ndi
    }

    /// Redundancy version of the current transmission
    pub fn rv(&self) -> u8 {
        RV_SEQUENCE[self.nof_retxs as usize % RV_SEQUENCE.len()]
    }

    pub fn nof_retxs(&self) -> u8 {
        self.nof_retxs
    }

    pub fn pdsch_slot(&self) -> Option<SlotPoint> {
        self.pdsch_slot
    }

    pub fn ack_slot(&self) -> Option<SlotPoint> {
        self.ack_slot
    }

    pub fn tb(&self) -> Option<&DlTbInfo> {
        self.tb.as_ref()
    }

    /// Start a new transmission; toggles the NDI
    pub fn new_tx(&mut self, pdsch_slot: SlotPoint, ack_slot: SlotPoint, tb: DlTbInfo) -> Result<(), SchedulerError> {
        if self.state != HarqState::Empty {
            return Err(SchedulerError::InvalidHarqState { harq_id: self.id, reason: "new transmission on busy process" });
        }
        self.state = HarqState::WaitingAck;
        self.ndi = !self.ndi;
        self.nof_retxs = 0;
        self.pdsch_slot = Some(pdsch_slot);
        self.ack_slot = Some(ack_slot);
        self.tb = Some(tb);
        Ok(())
    }

    /// Retransmit the stored transport block
    pub fn new_retx(&mut self, pdsch_slot: SlotPoint, ack_slot: SlotPoint) -> Result<(), SchedulerError> {
        if self.state != HarqState::PendingRetx {
            return Err(SchedulerError::InvalidHarqState { harq_id: self.id, reason: "no retransmission pending" });
        }
        self.state = HarqState::WaitingAck;
        self.nof_retxs += 1;
        self.pdsch_slot = Some(pdsch_slot);
        self.ack_slot = Some(ack_slot);
        Ok(())
    }

    /// Apply HARQ-ACK feedback. DTX counts as NACK.
    pub fn ack_info(&mut self, tb_index: u8, status: HarqAckStatus) -> Result<HarqAckOutcome, SchedulerError> {
        if tb_index != 0 {
            return Err(SchedulerError::InvalidTransportBlock(tb_index));
        }
        if self.state != HarqState::WaitingAck {
            return Err(SchedulerError::InvalidHarqState { harq_id: self.id, reason: "not waiting for HARQ-ACK" });
        }
        let outcome = match status {
            HarqAckStatus::Ack => {
                self.reset();
                HarqAckOutcome::Acked
            }
            HarqAckStatus::Nack | HarqAckStatus::Dtx if self.nof_retxs >= self.max_nof_retxs => {
                self.reset();
                HarqAckOutcome::Discarded
            }
            HarqAckStatus::Nack | HarqAckStatus::Dtx => {
                self.state = HarqState::PendingRetx;
                HarqAckOutcome::Retransmit
            }
        };
        Ok(outcome)
    }

    /// Free the process; the NDI is kept so the next transmission toggles it
    pub fn reset(&mut self) {
        self.state = HarqState::Empty;
        self.nof_retxs = 0;
        self.pdsch_slot = None;
        self.ack_slot = None;
        self.tb = None;
    }
}

/// HARQ-ACK deadline expiry of one process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HarqTimeout {
    pub harq_id: HarqId,
    pub ack_slot: SlotPoint,
    pub nof_retxs: u8,
    pub outcome: HarqAckOutcome,
}

/// DL HARQ processes of one UE cell
#[derive(Debug, Clone)]
pub struct DlHarqEntity {
    procs: Vec<DlHarqProcess>,
    nof_active: usize,
    ack_timeout_slots: u16,
}

impl DlHarqEntity {
    /// `nof_harqs` of the [`MAX_NOF_HARQS`] processes are used
    pub fn new(nof_harqs: u8, max_nof_retxs: u8, ack_timeout_slots: u16) -> Self {
        let procs = (0..MAX_NOF_HARQS).map(|id| DlHarqProcess::new(HarqId(id), max_nof_retxs)).collect();
        Self {
            procs,
            nof_active: nof_harqs.clamp(1, MAX_NOF_HARQS) as usize,
            ack_timeout_slots,
        }
    }

    pub fn nof_harqs(&self) -> usize {
        self.nof_active
    }

    pub fn iter(&self) -> impl Iterator<Item = &DlHarqProcess> {
        self.procs[..self.nof_active].iter()
    }

    pub fn get(&self, id: HarqId) -> Option<&DlHarqProcess> {
        self.procs[..self.nof_active].get(id.0 as usize)
    }

    pub fn get_mut(&mut self, id: HarqId) -> Option<&mut DlHarqProcess> {
        self.procs[..self.nof_active].get_mut(id.0 as usize)
    }

    pub fn find_empty_dl_harq(&self) -> Option<HarqId> {
        self.iter().find(|h| h.is_empty()).map(DlHarqProcess::id)
    }

    /// Oldest process waiting for a retransmission
    pub fn find_pending_retx(&self) -> Option<HarqId> {
        self.iter()
            .filter(|h| h.state == HarqState::PendingRetx)
            .min_by(|a, b| match (a.pdsch_slot, b.pdsch_slot) {
                (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal),
                _ => std::cmp::Ordering::Equal,
            })
            .map(DlHarqProcess::id)
    }

    /// Process expecting its HARQ-ACK in `ack_slot`
    pub fn find_waiting_ack(&self, ack_slot: SlotPoint) -> Option<HarqId> {
        self.iter()
            .find(|h| h.state == HarqState::WaitingAck && h.ack_slot == Some(ack_slot))
            .map(DlHarqProcess::id)
    }

    /// Apply feedback to the process waiting in `ack_slot`
    pub fn ack_info(
        &mut self,
        ack_slot: SlotPoint,
        tb_index: u8,
        status: HarqAckStatus,
    ) -> Result<(HarqId, HarqAckOutcome), SchedulerError> {
        if tb_index != 0 {
            return Err(SchedulerError::InvalidTransportBlock(tb_index));
        }
        let Some(id) = self.find_waiting_ack(ack_slot) else {
            return Err(SchedulerError::InvalidHarqState {
                harq_id: HarqId(0),
                reason: "no process waiting for HARQ-ACK in this slot",
            });
        };
        let outcome = self.procs[id.0 as usize].ack_info(tb_index, status)?;
        debug!("HARQ {} feedback {:?} at slot {}: {:?}", id, status, ack_slot, outcome);
        Ok((id, outcome))
    }

    /// Expire processes whose HARQ-ACK deadline has passed
    pub fn slot_indication(&mut self, sl_tx: SlotPoint) -> Vec<HarqTimeout> {
        let mut timeouts = Vec::new();
        let timeout = self.ack_timeout_slots as i32;
        for h in self.procs[..self.nof_active].iter_mut() {
            let Some(ack_slot) = h.ack_slot else { continue };
            if h.state != HarqState::WaitingAck || sl_tx - ack_slot <= timeout {
                continue;
            }
            let nof_retxs = h.nof_retxs;
            match h.ack_info(0, HarqAckStatus::Dtx) {
                Ok(outcome) => {
                    warn!("HARQ {} missed HARQ-ACK expected at slot {}", h.id, ack_slot);
                    timeouts.push(HarqTimeout { harq_id: h.id, ack_slot, nof_retxs, outcome });
                }
                Err(e) => warn!("HARQ {} timeout handling failed: {}", h.id, e),
            }
        }
        timeouts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(count: u32) -> SlotPoint {
        SlotPoint::new(0, count).unwrap()
    }

    fn tb() -> DlTbInfo {
        DlTbInfo { mcs: 5, nof_prbs: 10, symbols: OfdmSymbolRange::new(2, 14), tbs_bytes: 120, con_res_id: false }
    }

    #[test]
    fn test_ack_frees_process() {
        let mut harqs = DlHarqEntity::new(8, 4, 8);
        let id = harqs.find_empty_dl_harq().unwrap();
        harqs.get_mut(id).unwrap().new_tx(slot(10), slot(14), tb()).unwrap();
        assert_eq!(harqs.find_empty_dl_harq(), Some(HarqId(1)));
        assert!(harqs.get(id).unwrap().ndi());

        assert_eq!(harqs.ack_info(slot(14), 0, HarqAckStatus::Ack).unwrap(), (id, HarqAckOutcome::Acked));
        assert!(harqs.get(id).unwrap().is_empty());
        assert_eq!(harqs.find_empty_dl_harq(), Some(id));

        // Next new transmission toggles the NDI back
        harqs.get_mut(id).unwrap().new_tx(slot(20), slot(24), tb()).unwrap();
        assert!(!harqs.get(id).unwrap().ndi());
    }

    #[test]
    fn test_nack_until_discarded() {
        let mut harqs = DlHarqEntity::new(8, 2, 8);
        let id = HarqId(0);
        harqs.get_mut(id).unwrap().new_tx(slot(0), slot(4), tb()).unwrap();
        let ndi = harqs.get(id).unwrap().ndi();

        let mut ack_slot = slot(4);
        for retx in 1..=2u8 {
            let (_, outcome) = harqs.ack_info(ack_slot, 0, HarqAckStatus::Nack).unwrap();
            assert_eq!(outcome, HarqAckOutcome::Retransmit);
            assert_eq!(harqs.find_pending_retx(), Some(id));
            ack_slot = ack_slot + 10u32;
            harqs.get_mut(id).unwrap().new_retx(ack_slot - 4u32, ack_slot).unwrap();
            let h = harqs.get(id).unwrap();
            assert_eq!(h.nof_retxs(), retx);
            assert_eq!(h.rv(), RV_SEQUENCE[retx as usize]);
            assert_eq!(h.ndi(), ndi);
        }
        let (_, outcome) = harqs.ack_info(ack_slot, 0, HarqAckStatus::Dtx).unwrap();
        assert_eq!(outcome, HarqAckOutcome::Discarded);
        assert!(harqs.get(id).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_feedback() {
        let mut harqs = DlHarqEntity::new(8, 4, 8);
        assert!(matches!(
            harqs.ack_info(slot(4), 1, HarqAckStatus::Ack),
            Err(SchedulerError::InvalidTransportBlock(1))
        ));
        assert!(matches!(
            harqs.ack_info(slot(4), 0, HarqAckStatus::Ack),
            Err(SchedulerError::InvalidHarqState { .. })
        ));
        let h = harqs.get_mut(HarqId(0)).unwrap();
        assert!(h.new_retx(slot(0), slot(4)).is_err());
        h.new_tx(slot(0), slot(4), tb()).unwrap();
        assert!(h.new_tx(slot(1), slot(5), tb()).is_err());
    }

    #[test]
    fn test_deadline_missed_is_implicit_nack() {
        let mut harqs = DlHarqEntity::new(8, 4, 3);
        harqs.get_mut(HarqId(2)).unwrap().new_tx(slot(0), slot(5), tb()).unwrap();
        harqs.get_mut(HarqId(0)).unwrap().new_tx(slot(0), slot(4), tb()).unwrap();
        harqs.get_mut(HarqId(1)).unwrap().new_tx(slot(1), slot(5), tb()).unwrap();

        assert!(harqs.slot_indication(slot(7)).is_empty());
        let timeouts = harqs.slot_indication(slot(8));
        assert_eq!(timeouts.len(), 1);
        assert_eq!(timeouts[0].harq_id, HarqId(0));
        assert_eq!(timeouts[0].outcome, HarqAckOutcome::Retransmit);
        assert_eq!(harqs.find_pending_retx(), Some(HarqId(0)));

        assert_eq!(harqs.slot_indication(slot(9)).len(), 2);
        assert_eq!(harqs.iter().filter(|h| h.state() == HarqState::PendingRetx).count(), 3);
    }

    #[test]
    fn test_exhausted_pool() {
        let mut harqs = DlHarqEntity::new(2, 4, 8);
        for count in 0..2 {
            let id = harqs.find_empty_dl_harq().unwrap();
            harqs.get_mut(id).unwrap().new_tx(slot(count), slot(count + 4), tb()).unwrap();
        }
        assert_eq!(harqs.find_empty_dl_harq(), None);
        assert!(harqs.get(HarqId(2)).is_none());
    }
}
