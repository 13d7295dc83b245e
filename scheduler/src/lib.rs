//! 5G NR MAC Scheduler Library
//!
//! Slot-synchronous scheduler core of the gNodeB MAC layer (TS 38.321,
//! TS 38.213, TS 38.214): rolling resource grid, PDCCH/PUCCH allocators,
//! DL HARQ processes and the fallback (SRB0) scheduler, driven once per slot
//! by [`CellScheduler::run_slot`].

pub mod cell;
pub mod config;
pub mod csi_rs;
pub mod events;
pub mod fallback;
pub mod grid;
pub mod harq;
pub mod pdcch;
pub mod pucch;
pub mod result;
pub mod support;
pub mod ue;
pub mod validator;

#[cfg(test)]
pub(crate) mod test_utils;

pub use cell::{CellScheduler, SchedulerContext, SchedulerHandle, SchedulerRequest, UeDataScheduler};
pub use config::{CellConfigBuilder, CellConfiguration, SchedulerExpertConfig};
pub use events::{AllocationFailureCause, SchedulerEvent, SchedulerEventNotifier, TracingEventNotifier};
pub use grid::{CellResourceAllocator, GrantInfo, LinkDirection, SlotResourceAllocator};
pub use harq::{DlHarqEntity, HarqAckOutcome, HarqAckStatus, HarqState};
pub use result::{DlGrant, PdcchDlInfo, PucchInfo, SchedResult};
pub use ue::{DlBufferStateIndication, Ue, UeCreationRequest, UeRepository, UciIndication};

use common::{HarqId, Rnti, SlotPoint, TypeError, UeIndex};
use std::fmt;
use thiserror::Error;

/// Control channel collision domains
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlChannel {
    Pdcch,
    Pucch,
}

impl fmt::Display for ControlChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlChannel::Pdcch => write!(f, "PDCCH"),
            ControlChannel::Pucch => write!(f, "PUCCH"),
        }
    }
}

/// Scheduler errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchedulerError {
    #[error("Allocation conflict in slot {slot}: {direction} region {region} overlaps an existing reservation")]
    AllocationConflict {
        slot: SlotPoint,
        direction: LinkDirection,
        region: GrantInfo,
    },

    #[error("Region {region} exceeds the {nof_prbs} RBs of the cell")]
    RegionOutOfBounds { region: GrantInfo, nof_prbs: u16 },

    #[error("No {channel} candidate available in slot {slot}")]
    NoCandidateAvailable { slot: SlotPoint, channel: ControlChannel },

    #[error("All HARQ processes of UE {0} are busy")]
    HarqExhausted(UeIndex),

    #[error("UE {ue_index} HARQ {harq_id} discarded after {nof_retxs} retransmissions")]
    RetransmissionLimitExceeded {
        ue_index: UeIndex,
        harq_id: HarqId,
        nof_retxs: u8,
    },

    #[error("HARQ-ACK for UE {ue_index} HARQ {harq_id} not received by slot {ack_slot}")]
    DeadlineMissed {
        ue_index: UeIndex,
        harq_id: HarqId,
        ack_slot: SlotPoint,
    },

    #[error("Slot indication {received} does not advance past {last}")]
    InvalidSlotIndication { last: SlotPoint, received: SlotPoint },

    #[error("Slot {0} lies outside the scheduling window")]
    SlotOutOfWindow(SlotPoint),

    #[error("Inconsistent scheduling result in slot {slot}: {reason}")]
    InconsistentResult { slot: SlotPoint, reason: String },

    #[error("Scheduler halted after a fatal error")]
    Halted,

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Unknown UE {0}")]
    UnknownUe(UeIndex),

    #[error("UE {ue_index} with RNTI {rnti} clashes with an existing UE")]
    DuplicateUe { ue_index: UeIndex, rnti: Rnti },

    #[error("HARQ {harq_id} in invalid state: {reason}")]
    InvalidHarqState { harq_id: HarqId, reason: &'static str },

    #[error("Invalid transport block index {0}")]
    InvalidTransportBlock(u8),
}

impl SchedulerError {
    /// Whether the error reveals a defect that must stop the scheduler.
    ///
    /// Transient conditions only defer one UE's grant to a later tick.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SchedulerError::AllocationConflict { .. }
                | SchedulerError::RegionOutOfBounds { .. }
                | SchedulerError::InconsistentResult { .. }
                | SchedulerError::Halted
        )
    }
}

impl From<TypeError> for SchedulerError {
    fn from(err: TypeError) -> Self {
        SchedulerError::InvalidConfiguration(err.to_string())
    }
}
