//! Scheduler events
//!
//! Structured notifications of grants, failures and HARQ outcomes, delivered
//! synchronously from the tick to a [`SchedulerEventNotifier`].

use crate::SchedulerError;
use common::{HarqId, Rnti, SlotPoint, UeIndex};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Why a pending transmission got no grant in this tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AllocationFailureCause {
    /// Message larger than the biggest transport block at the highest allowed MCS
    MessageTooLarge { pending_bytes: u32, max_tbs_bytes: u32 },
    /// No slot in the look-ahead horizon had room for PDSCH, PDCCH and PUCCH
    NoResourcesInHorizon,
    /// Every HARQ process of the UE is busy
    HarqExhausted,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SchedulerEvent {
    GrantProduced {
        /// Tick in which the decision was made
        decision_slot: SlotPoint,
        pdsch_slot: SlotPoint,
        uci_slot: SlotPoint,
        ue_index: UeIndex,
        rnti: Rnti,
        harq_id: HarqId,
        mcs: u8,
        tbs_bytes: u32,
        is_retx: bool,
    },
    AllocationFailed {
        slot: SlotPoint,
        ue_index: UeIndex,
        rnti: Rnti,
        cause: AllocationFailureCause,
    },
    FeedbackDeadlineMissed {
        slot: SlotPoint,
        ue_index: UeIndex,
        rnti: Rnti,
        harq_id: HarqId,
        ack_slot: SlotPoint,
    },
    RetransmissionLimitExceeded {
        slot: SlotPoint,
        ue_index: UeIndex,
        rnti: Rnti,
        harq_id: HarqId,
        nof_retxs: u8,
    },
}

impl SchedulerEvent {
    /// Event reporting a recoverable per-UE error raised while serving `rnti`
    /// in `slot`. `None` for errors that are not reported as events.
    pub fn from_error(slot: SlotPoint, rnti: Rnti, err: &SchedulerError) -> Option<Self> {
        match *err {
            SchedulerError::HarqExhausted(ue_index) => Some(Self::AllocationFailed {
                slot,
                ue_index,
                rnti,
                cause: AllocationFailureCause::HarqExhausted,
            }),
            SchedulerError::DeadlineMissed { ue_index, harq_id, ack_slot } => {
                Some(Self::FeedbackDeadlineMissed { slot, ue_index, rnti, harq_id, ack_slot })
            }
            SchedulerError::RetransmissionLimitExceeded { ue_index, harq_id, nof_retxs } => {
                Some(Self::RetransmissionLimitExceeded { slot, ue_index, rnti, harq_id, nof_retxs })
            }
            _ => None,
        }
    }
}

/// Receiver of scheduler events
pub trait SchedulerEventNotifier: Send {
    fn on_event(&mut self, event: &SchedulerEvent);
}

impl<F> SchedulerEventNotifier for F
where
    F: FnMut(&SchedulerEvent) + Send,
{
    fn on_event(&mut self, event: &SchedulerEvent) {
        self(event)
    }
}

/// Logs every event through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventNotifier;

impl SchedulerEventNotifier for TracingEventNotifier {
    fn on_event(&mut self, event: &SchedulerEvent) {
        match event {
            SchedulerEvent::GrantProduced { decision_slot, pdsch_slot, uci_slot, ue_index, rnti, harq_id, mcs, tbs_bytes, is_retx } => {
                debug!(
                    "slot={}: {} grant ue={} rnti={} h_id={} pdsch_slot={} uci_slot={} mcs={} tbs={}",
                    decision_slot,
                    if *is_retx { "reTx" } else { "newTx" },
                    ue_index,
                    rnti,
                    harq_id,
                    pdsch_slot,
                    uci_slot,
                    mcs,
                    tbs_bytes
                );
            }
            SchedulerEvent::AllocationFailed { slot, ue_index, rnti, cause } => {
                debug!("slot={}: no grant for ue={} rnti={}: {:?}", slot, ue_index, rnti, cause);
            }
            SchedulerEvent::FeedbackDeadlineMissed { slot, ue_index, rnti, harq_id, ack_slot } => {
                warn!(
                    "slot={}: HARQ-ACK of ue={} rnti={} h_id={} expected at {} missing",
                    slot, ue_index, rnti, harq_id, ack_slot
                );
            }
            SchedulerEvent::RetransmissionLimitExceeded { slot, ue_index, rnti, harq_id, nof_retxs } => {
                info!(
                    "slot={}: ue={} rnti={} h_id={} discarded after {} retransmissions",
                    slot, ue_index, rnti, harq_id, nof_retxs
                );
            }
        }
    }
}
