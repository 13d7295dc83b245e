//! Cell Scheduler
//!
//! Owns the resource grid, the control channel allocators and the UE
//! repository of one cell, and drives them once per slot. Requests from other
//! tasks arrive through a [`SchedulerHandle`] and are applied at the start of
//! the next tick, so the tick itself never blocks.

use crate::config::{CellConfiguration, SchedulerExpertConfig};
use crate::csi_rs::CsiRsScheduler;
use crate::events::{SchedulerEvent, SchedulerEventNotifier};
use crate::fallback::UeFallbackScheduler;
use crate::grid::{CellResourceAllocator, LinkDirection};
use crate::harq::HarqAckOutcome;
use crate::pdcch::PdcchResourceAllocator;
use crate::pucch::PucchAllocator;
use crate::result::SchedResult;
use crate::ue::{DlBufferStateIndication, Ue, UeCreationRequest, UeRepository, UciIndication};
use crate::validator::validate_slot_result;
use crate::SchedulerError;
use common::{HarqId, Lcid, SlotPoint, UeIndex};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

/// Mutable view of the cell resources handed to the UE schedulers
pub struct SchedulerContext<'a> {
    pub cfg: &'a CellConfiguration,
    pub res_grid: &'a mut CellResourceAllocator,
    pub pdcch: &'a mut PdcchResourceAllocator,
    pub pucch: &'a mut PucchAllocator,
    pub ues: &'a mut UeRepository,
}

/// Hook for a scheduler of dedicated UE data, run after the fallback scheduler
pub trait UeDataScheduler: Send {
    fn run_slot(&mut self, ctx: &mut SchedulerContext<'_>) -> Result<(), SchedulerError>;
}

/// Requests applied by the scheduler at the start of a tick
#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerRequest {
    AddUe(UeCreationRequest),
    RemoveUe(UeIndex),
    SetFallback { ue_index: UeIndex, fallback: bool },
    DlBufferState(DlBufferStateIndication),
    Uci(UciIndication),
}

/// Cloneable sender of [`SchedulerRequest`]s
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    tx: mpsc::UnboundedSender<SchedulerRequest>,
}

impl SchedulerHandle {
    /// Queue a request for the next tick. Fails once the scheduler is gone.
    pub fn send(&self, request: SchedulerRequest) -> Result<(), SchedulerError> {
        self.tx.send(request).map_err(|_| SchedulerError::Halted)
    }

    pub fn add_ue(&self, req: UeCreationRequest) -> Result<(), SchedulerError> {
        self.send(SchedulerRequest::AddUe(req))
    }

    pub fn remove_ue(&self, ue_index: UeIndex) -> Result<(), SchedulerError> {
        self.send(SchedulerRequest::RemoveUe(ue_index))
    }

    pub fn set_fallback(&self, ue_index: UeIndex, fallback: bool) -> Result<(), SchedulerError> {
        self.send(SchedulerRequest::SetFallback { ue_index, fallback })
    }

    pub fn dl_buffer_state(&self, ind: DlBufferStateIndication) -> Result<(), SchedulerError> {
        self.send(SchedulerRequest::DlBufferState(ind))
    }

    pub fn uci(&self, ind: UciIndication) -> Result<(), SchedulerError> {
        self.send(SchedulerRequest::Uci(ind))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Scheduler of one cell
pub struct CellScheduler {
    cfg: Arc<CellConfiguration>,
    expert: SchedulerExpertConfig,
    res_grid: CellResourceAllocator,
    pdcch: PdcchResourceAllocator,
    pucch: PucchAllocator,
    csi_rs: CsiRsScheduler,
    ues: UeRepository,
    fallback: UeFallbackScheduler,
    data_sched: Option<Box<dyn UeDataScheduler>>,
    notifier: Box<dyn SchedulerEventNotifier>,
    inbox: mpsc::UnboundedReceiver<SchedulerRequest>,
    inbox_tx: mpsc::UnboundedSender<SchedulerRequest>,
    /// Slot whose result was last handed out
    last_finalized: Option<SlotPoint>,
    halted: bool,
}

impl CellScheduler {
    pub fn new(
        cfg: CellConfiguration,
        expert: SchedulerExpertConfig,
        notifier: Box<dyn SchedulerEventNotifier>,
    ) -> Result<Self, SchedulerError> {
        cfg.validate()?;
        expert.validate()?;
        let cfg = Arc::new(cfg);
        let ring_size = cfg.ring_size(&expert);
        let (inbox_tx, inbox) = mpsc::unbounded_channel();
        info!(
            "Cell {:?} scheduler: {} PRBs, window of {} slots, {} DL HARQs",
            cfg.cell_id, cfg.nof_prbs, ring_size, expert.nof_dl_harqs
        );
        Ok(Self {
            res_grid: CellResourceAllocator::new(cfg.nof_prbs, ring_size),
            pdcch: PdcchResourceAllocator::new(cfg.clone(), ring_size),
            pucch: PucchAllocator::new(cfg.clone(), ring_size),
            csi_rs: CsiRsScheduler::new(cfg.clone()),
            fallback: UeFallbackScheduler::new(cfg.clone(), expert.clone()),
            ues: UeRepository::new(),
            data_sched: None,
            notifier,
            inbox,
            inbox_tx,
            last_finalized: None,
            halted: false,
            cfg,
            expert,
        })
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle { tx: self.inbox_tx.clone() }
    }

    pub fn set_data_scheduler(&mut self, data_sched: Box<dyn UeDataScheduler>) {
        self.data_sched = Some(data_sched);
    }

    pub fn config(&self) -> &CellConfiguration {
        &self.cfg
    }

    pub fn expert_config(&self) -> &SchedulerExpertConfig {
        &self.expert
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn ue(&self, ue_index: UeIndex) -> Option<&Ue> {
        self.ues.get(ue_index)
    }

    pub fn ues(&self) -> &UeRepository {
        &self.ues
    }

    /// Result of the last completed tick
    pub fn last_result(&self) -> Option<&SchedResult> {
        let slot = self.last_finalized?;
        self.res_grid.get(0).filter(|s| s.slot() == slot).map(|s| &s.result)
    }

    pub fn add_ue(&mut self, req: &UeCreationRequest) -> Result<(), SchedulerError> {
        self.ues.add_ue(Ue::new(req, &self.cfg, &self.expert))?;
        info!("UE {} rnti={} created, fallback={}", req.ue_index, req.crnti, req.starts_in_fallback);
        Ok(())
    }

    /// Remove a UE and cancel its allocations in slots not yet handed out
    pub fn remove_ue(&mut self, ue_index: UeIndex) -> Result<(), SchedulerError> {
        let ue = self.ues.remove_ue(ue_index).ok_or(SchedulerError::UnknownUe(ue_index))?;
        let rnti = ue.crnti();
        self.fallback.handle_ue_removal(ue_index);

        let first_open = match (self.last_finalized, self.res_grid.slot_tx()) {
            (Some(finalized), Some(current)) if finalized == current => 1,
            _ => 0,
        };
        let mut nof_released = 0;
        for offset in first_open..self.res_grid.ring_size() {
            let slot_alloc = &mut self.res_grid[offset];
            let grants: Vec<_> = slot_alloc
                .result
                .dl
                .grants
                .iter()
                .filter(|g| g.ue_index == ue_index)
                .map(|g| g.region)
                .collect();
            for region in grants {
                slot_alloc.release(LinkDirection::Downlink, region);
                nof_released += 1;
            }
            slot_alloc.result.dl.grants.retain(|g| g.ue_index != ue_index);

            while self.pdcch.release(slot_alloc, rnti).is_some() {}
            slot_alloc.result.dl.pdcchs.retain(|p| p.rnti != rnti);

            while self.pucch.release(slot_alloc, rnti).is_some() {}
            slot_alloc.result.ul.pucchs.retain(|p| p.ue_index != ue_index);
        }
        info!("UE {} rnti={} removed, {} pending PDSCHs cancelled", ue_index, rnti, nof_released);
        Ok(())
    }

    pub fn handle_dl_buffer_state(&mut self, ind: &DlBufferStateIndication) -> Result<(), SchedulerError> {
        let ue = self.ues.get_mut(ind.ue_index).ok_or(SchedulerError::UnknownUe(ind.ue_index))?;
        ue.handle_dl_buffer_state_indication(ind);
        trace!("ue={} lcid={:?} DL buffer: {} bytes", ind.ue_index, ind.lcid, ind.bytes);
        if ind.lcid == Lcid::SRB0 && ue.is_in_fallback() && ind.bytes > 0 {
            self.fallback.handle_dl_buffer_state_indication_srb(ind.ue_index);
        }
        Ok(())
    }

    /// Apply HARQ-ACK feedback.
    ///
    /// Only slots already handed out by [`CellScheduler::run_slot`] can carry
    /// feedback. A report for a later slot is rejected and leaves the HARQ
    /// process untouched.
    pub fn handle_uci(&mut self, ind: &UciIndication) -> Result<HarqAckOutcome, SchedulerError> {
        let last_finalized = self.last_finalized;
        let ue = self.ues.get_mut(ind.ue_index).ok_or(SchedulerError::UnknownUe(ind.ue_index))?;
        let rnti = ue.crnti();
        let harqs = &mut ue.pcell_mut().harqs;
        let waiting = harqs.find_waiting_ack(ind.slot);
        if !last_finalized.is_some_and(|last| ind.slot <= last) {
            debug!("ue={}: HARQ-ACK for slot {} not yet transmitted", ind.ue_index, ind.slot);
            return Err(SchedulerError::InvalidHarqState {
                harq_id: waiting.unwrap_or(HarqId(0)),
                reason: "HARQ-ACK for a slot not yet transmitted",
            });
        }
        let nof_retxs = waiting.and_then(|id| harqs.get(id)).map_or(0, |h| h.nof_retxs());
        let (harq_id, outcome) = harqs.ack_info(ind.slot, ind.tb_index, ind.status)?;
        if outcome == HarqAckOutcome::Discarded {
            let err = SchedulerError::RetransmissionLimitExceeded { ue_index: ind.ue_index, harq_id, nof_retxs };
            let slot = self.res_grid.slot_tx().unwrap_or(ind.slot);
            if let Some(event) = SchedulerEvent::from_error(slot, rnti, &err) {
                self.notifier.on_event(&event);
            }
        }
        Ok(outcome)
    }

    pub fn set_fallback_state(&mut self, ue_index: UeIndex, fallback: bool) -> Result<(), SchedulerError> {
        let ue = self.ues.get_mut(ue_index).ok_or(SchedulerError::UnknownUe(ue_index))?;
        ue.set_fallback_state(fallback);
        if !fallback {
            self.fallback.handle_ue_removal(ue_index);
        } else if ue.pending_dl_srb0_newtx_bytes() > 0 {
            self.fallback.handle_dl_buffer_state_indication_srb(ue_index);
        }
        Ok(())
    }

    fn apply_request(&mut self, request: SchedulerRequest) -> Result<(), SchedulerError> {
        match request {
            SchedulerRequest::AddUe(req) => self.add_ue(&req),
            SchedulerRequest::RemoveUe(ue_index) => self.remove_ue(ue_index),
            SchedulerRequest::SetFallback { ue_index, fallback } => self.set_fallback_state(ue_index, fallback),
            SchedulerRequest::DlBufferState(ind) => self.handle_dl_buffer_state(&ind),
            SchedulerRequest::Uci(ind) => self.handle_uci(&ind).map(|_| ()),
        }
    }

    fn halt(&mut self, err: SchedulerError) -> SchedulerError {
        error!("Scheduler halted: {}", err);
        self.halted = true;
        err
    }

    /// Run one tick for `sl_tx` and return the decisions for that slot
    pub fn run_slot(&mut self, sl_tx: SlotPoint) -> Result<&SchedResult, SchedulerError> {
        if self.halted {
            return Err(SchedulerError::Halted);
        }

        let new_slots = self.res_grid.slot_indication(sl_tx)?;
        self.pdcch.slot_indication(sl_tx)?;
        self.pucch.slot_indication(sl_tx)?;
        for offset in new_slots {
            if let Err(e) = self.csi_rs.run_slot(&mut self.res_grid[offset]) {
                return Err(self.halt(e));
            }
        }

        while let Ok(request) = self.inbox.try_recv() {
            if let Err(e) = self.apply_request(request) {
                warn!("slot={}: request rejected: {}", sl_tx, e);
            }
        }

        let horizon = self.res_grid.ring_size() as u32;
        for ue in self.ues.iter_mut() {
            for err in ue.slot_indication(sl_tx, horizon) {
                trace!("slot={}: {}", sl_tx, err);
                if let Some(event) = SchedulerEvent::from_error(sl_tx, ue.crnti(), &err) {
                    self.notifier.on_event(&event);
                }
            }
        }

        let mut ctx = SchedulerContext {
            cfg: &self.cfg,
            res_grid: &mut self.res_grid,
            pdcch: &mut self.pdcch,
            pucch: &mut self.pucch,
            ues: &mut self.ues,
        };
        let mut outcome = self.fallback.run_slot(&mut ctx, self.notifier.as_mut());
        if outcome.is_ok() {
            if let Some(data_sched) = self.data_sched.as_mut() {
                outcome = data_sched.run_slot(&mut ctx);
            }
        }
        match outcome {
            Err(e) if e.is_fatal() => return Err(self.halt(e)),
            Err(e) => warn!("slot={}: {}", sl_tx, e),
            Ok(()) => {}
        }

        if let Err(e) = validate_slot_result(&self.cfg, &self.res_grid[0], &self.ues) {
            return Err(self.halt(e));
        }
        self.last_finalized = Some(sl_tx);

        let result = &self.res_grid[0].result;
        if !result.is_empty() {
            debug!(
                "slot={}: {} PDCCH, {} PDSCH, {} PUCCH",
                sl_tx,
                result.dl.pdcchs.len(),
                result.dl.grants.len(),
                result.ul.pucchs.len()
            );
        }
        Ok(result)
    }

    #[cfg(test)]
    pub(crate) fn res_grid_mut(&mut self) -> &mut CellResourceAllocator {
        &mut self.res_grid
    }

    #[cfg(test)]
    pub(crate) fn res_grid(&self) -> &CellResourceAllocator {
        &self.res_grid
    }
}
