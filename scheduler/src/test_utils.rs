//! Shared fixtures of the unit tests

use crate::cell::CellScheduler;
use crate::config::{CellConfigBuilder, CellConfiguration, CsiRsConfig, SchedulerExpertConfig};
use crate::events::{SchedulerEvent, SchedulerEventNotifier};
use crate::harq::{HarqAckOutcome, HarqAckStatus};
use crate::result::SchedResult;
use crate::ue::{DlBufferStateIndication, UciIndication, UeCreationRequest};
use common::{Lcid, OfdmSymbolRange, Rnti, SlotPoint, SubcarrierSpacing, TddPattern, UeIndex};
use common::{Bandwidth, DuplexMode};
use std::sync::{Arc, Mutex};

/// FDD, 15 kHz, 52 PRBs, CORESET#0 of 48 RBs
pub(crate) fn fdd_cell_config() -> CellConfiguration {
    CellConfigBuilder::default().build().unwrap()
}

/// TDD, 30 kHz, 51 PRBs, DDDDDDSUUU
pub(crate) fn tdd_cell_config() -> CellConfiguration {
    CellConfigBuilder::tdd().build().unwrap()
}

/// TDD with a DL-heavy special slot: DDSUU, 8 DL symbols in slot 2
pub(crate) fn tdd_partial_slot_cell_config() -> CellConfiguration {
    CellConfigBuilder {
        scs: SubcarrierSpacing::Scs30,
        bandwidth: Bandwidth::Bw20,
        duplex: DuplexMode::Tdd(TddPattern {
            period_slots: 5,
            nof_dl_slots: 2,
            nof_dl_symbols: 8,
            nof_ul_slots: 2,
            nof_ul_symbols: 0,
        }),
        csi_rs: Some(CsiRsConfig { period_slots: 20, offset_slots: 0, symbols: OfdmSymbolRange::new(4, 5) }),
        ..CellConfigBuilder::default()
    }
    .build()
    .unwrap()
}

pub(crate) fn ue_request(index: u16) -> UeCreationRequest {
    UeCreationRequest { ue_index: UeIndex(index), crnti: Rnti(0x4601 + index), starts_in_fallback: true }
}

pub(crate) type EventLog = Arc<Mutex<Vec<SchedulerEvent>>>;

/// Notifier that stores every event
pub(crate) fn recording_notifier() -> (Box<dyn SchedulerEventNotifier>, EventLog) {
    let events = EventLog::default();
    let sink = events.clone();
    let notifier = move |event: &SchedulerEvent| sink.lock().unwrap().push(event.clone());
    (Box::new(notifier), events)
}

/// Scheduler driven slot by slot, with its events recorded
pub(crate) struct TestBench {
    pub sched: CellScheduler,
    pub events: EventLog,
    pub next_slot: SlotPoint,
}

impl TestBench {
    pub fn new(cfg: CellConfiguration, expert: SchedulerExpertConfig) -> Self {
        let next_slot = SlotPoint::zero(cfg.scs);
        let (notifier, events) = recording_notifier();
        let sched = CellScheduler::new(cfg, expert, notifier).unwrap();
        Self { sched, events, next_slot }
    }

    pub fn cfg(&self) -> &CellConfiguration {
        self.sched.config()
    }

    /// Slot handled by the last [`TestBench::run_slot`]
    pub fn current_slot(&self) -> SlotPoint {
        self.next_slot - 1u32
    }

    pub fn run_slot(&mut self) -> SchedResult {
        let slot = self.next_slot;
        self.next_slot += 1u32;
        self.sched.run_slot(slot).unwrap().clone()
    }

    pub fn add_ue(&mut self, index: u16) {
        self.sched.add_ue(&ue_request(index)).unwrap();
    }

    pub fn push_srb0(&mut self, index: u16, bytes: u32) {
        let ind = DlBufferStateIndication { ue_index: UeIndex(index), lcid: Lcid::SRB0, bytes };
        self.sched.handle_dl_buffer_state(&ind).unwrap();
    }

    /// Report `status` for every PUCCH of `result`
    pub fn feedback(&mut self, result: &SchedResult, status: HarqAckStatus) -> Vec<HarqAckOutcome> {
        result
            .ul
            .pucchs
            .iter()
            .map(|pucch| {
                let ind = UciIndication { ue_index: pucch.ue_index, slot: result.slot, tb_index: 0, status };
                self.sched.handle_uci(&ind).unwrap()
            })
            .collect()
    }

    pub fn take_events(&self) -> Vec<SchedulerEvent> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }
}
