//! UE Fallback Scheduler
//!
//! Schedules SRB0 messages (and their retransmissions) with DCI 1_0 for UEs
//! that have no dedicated configuration yet. When the current slot has no
//! room, the PDCCH is placed ahead of time in a later slot of the window.

use crate::cell::SchedulerContext;
use crate::config::{CellConfiguration, PdschTimeDomainResource, SchedulerExpertConfig};
use crate::events::{AllocationFailureCause, SchedulerEvent, SchedulerEventNotifier};
use crate::grid::{GrantInfo, LinkDirection};
use crate::harq::DlTbInfo;
use crate::result::{Dci10, DlGrant, PdcchDlInfo, PucchInfo};
use crate::support::dmrs::nof_dmrs_res_per_prb;
use crate::support::{compute_tbs_bits, nof_prbs_for_bytes, McsDescriptor, TbsParams};
use crate::SchedulerError;
use common::{CrbInterval, HarqId, Lcid, Rnti, SlotPoint, UeIndex};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy)]
struct PendingSrb0 {
    ue_index: UeIndex,
    /// A new-tx failure of the current message was already notified
    failure_reported: bool,
}

#[derive(Debug, Clone, Copy)]
enum Srb0Tx {
    NewTx { harq_id: HarqId, pending_bytes: u32 },
    Retx { harq_id: HarqId, tb: DlTbInfo },
}

/// MCS and PRBs chosen for a new transmission
#[derive(Debug, Clone, Copy)]
struct McsSelection {
    mcs: u8,
    desc: McsDescriptor,
    nof_prbs: u16,
    tbs_bytes: u32,
}

/// Scheduler of SRB0 traffic for UEs in fallback mode
pub struct UeFallbackScheduler {
    cfg: Arc<CellConfiguration>,
    expert: SchedulerExpertConfig,
    pending: VecDeque<PendingSrb0>,
    max_tbs_bytes: u32,
}

impl UeFallbackScheduler {
    pub fn new(cfg: Arc<CellConfiguration>, expert: SchedulerExpertConfig) -> Self {
        let max_tbs_bytes = max_srb0_tbs_bytes(&cfg, expert.max_msg4_mcs);
        debug!("SRB0 max TBS at MCS {}: {} bytes", expert.max_msg4_mcs, max_tbs_bytes);
        Self { cfg, expert, pending: VecDeque::new(), max_tbs_bytes }
    }

    /// Largest SRB0 message (MAC subheader included) a single grant can carry
    pub fn max_tbs_bytes(&self) -> u32 {
        self.max_tbs_bytes
    }

    /// Register new SRB0 data of a UE
    pub fn handle_dl_buffer_state_indication_srb(&mut self, ue_index: UeIndex) {
        match self.pending.iter_mut().find(|p| p.ue_index == ue_index) {
            Some(entry) => entry.failure_reported = false,
            None => self.pending.push_back(PendingSrb0 { ue_index, failure_reported: false }),
        }
    }

    pub fn handle_ue_removal(&mut self, ue_index: UeIndex) {
        self.pending.retain(|p| p.ue_index != ue_index);
    }

    /// Schedule retransmissions, then pending SRB0 messages, for the current slot
    pub fn run_slot(
        &mut self,
        ctx: &mut SchedulerContext<'_>,
        notifier: &mut dyn SchedulerEventNotifier,
    ) -> Result<(), SchedulerError> {
        let Some(sl_tx) = ctx.res_grid.slot_tx() else {
            return Ok(());
        };
        let mut scheduled: Vec<UeIndex> = Vec::new();

        let retxs: Vec<(UeIndex, Rnti, HarqId, DlTbInfo)> = ctx
            .ues
            .iter()
            .filter(|ue| ue.is_in_fallback())
            .filter_map(|ue| {
                let harq_id = ue.pcell().harqs.find_pending_retx()?;
                let tb = *ue.pcell().harqs.get(harq_id)?.tb()?;
                Some((ue.ue_index(), ue.crnti(), harq_id, tb))
            })
            .collect();
        for (ue_index, rnti, harq_id, tb) in retxs {
            match self.schedule_srb0(ctx, ue_index, Srb0Tx::Retx { harq_id, tb })? {
                Some(grant) => {
                    scheduled.push(ue_index);
                    notifier.on_event(&grant_event(sl_tx, &grant));
                }
                None => notifier.on_event(&SchedulerEvent::AllocationFailed {
                    slot: sl_tx,
                    ue_index,
                    rnti,
                    cause: AllocationFailureCause::NoResourcesInHorizon,
                }),
            }
        }

        let mut idx = 0;
        while idx < self.pending.len() {
            let entry = self.pending[idx];
            let Some(ue) = ctx.ues.get(entry.ue_index) else {
                self.pending.remove(idx);
                continue;
            };
            let pending_bytes = ue.pending_dl_srb0_newtx_bytes();
            if !ue.is_in_fallback() || pending_bytes == 0 {
                self.pending.remove(idx);
                continue;
            }
            let rnti = ue.crnti();
            if scheduled.contains(&entry.ue_index) {
                idx += 1;
                continue;
            }

            if pending_bytes > self.max_tbs_bytes {
                if !entry.failure_reported {
                    debug!(
                        "SRB0 of ue={} rnti={}: {} bytes exceed the max TBS of {} bytes",
                        entry.ue_index, rnti, pending_bytes, self.max_tbs_bytes
                    );
                    notifier.on_event(&SchedulerEvent::AllocationFailed {
                        slot: sl_tx,
                        ue_index: entry.ue_index,
                        rnti,
                        cause: AllocationFailureCause::MessageTooLarge {
                            pending_bytes,
                            max_tbs_bytes: self.max_tbs_bytes,
                        },
                    });
                    self.pending[idx].failure_reported = true;
                }
                idx += 1;
                continue;
            }

            let harq_id = match ue.pcell().harqs.find_empty_dl_harq() {
                Some(harq_id) => harq_id,
                None => {
                    let err = SchedulerError::HarqExhausted(entry.ue_index);
                    trace!("{}", err);
                    if let Some(event) = SchedulerEvent::from_error(sl_tx, rnti, &err) {
                        notifier.on_event(&event);
                    }
                    idx += 1;
                    continue;
                }
            };

            match self.schedule_srb0(ctx, entry.ue_index, Srb0Tx::NewTx { harq_id, pending_bytes })? {
                Some(grant) => {
                    scheduled.push(entry.ue_index);
                    notifier.on_event(&grant_event(sl_tx, &grant));
                    self.pending.remove(idx);
                }
                None => {
                    if !entry.failure_reported {
                        notifier.on_event(&SchedulerEvent::AllocationFailed {
                            slot: sl_tx,
                            ue_index: entry.ue_index,
                            rnti,
                            cause: AllocationFailureCause::NoResourcesInHorizon,
                        });
                        self.pending[idx].failure_reported = true;
                    }
                    idx += 1;
                }
            }
        }
        Ok(())
    }

    /// Search the window for the first slot that fits the transmission
    fn schedule_srb0(
        &self,
        ctx: &mut SchedulerContext<'_>,
        ue_index: UeIndex,
        tx: Srb0Tx,
    ) -> Result<Option<DlGrant>, SchedulerError> {
        let ue = ctx.ues.get(ue_index).ok_or(SchedulerError::UnknownUe(ue_index))?;
        let last_pdsch_slot = ue.pcell().last_pdsch_slot();
        let ring_size = ctx.res_grid.ring_size();

        for pdcch_offset in 0..=self.expert.max_dl_slots_ahead as usize {
            if pdcch_offset >= ring_size {
                break;
            }
            let pdcch_slot = ctx.res_grid[pdcch_offset].slot();
            if !self.cfg.is_dl_enabled(pdcch_slot) {
                continue;
            }
            for (td_index, td) in self.cfg.pdsch_td_alloc_list.iter().enumerate() {
                let pdsch_offset = pdcch_offset + td.k0 as usize;
                if pdsch_offset >= ring_size {
                    continue;
                }
                let pdsch_slot = ctx.res_grid[pdsch_offset].slot();
                if !self.cfg.dl_symbols(pdsch_slot).contains(&td.symbols) || self.cfg.is_csi_rs_slot(pdsch_slot) {
                    continue;
                }
                if last_pdsch_slot.is_some_and(|last| pdsch_slot <= last) {
                    continue;
                }
                if let Srb0Tx::Retx { tb, .. } = &tx {
                    if tb.symbols != td.symbols {
                        continue;
                    }
                }
                if let Some(grant) = self.alloc_in_slot(ctx, ue_index, tx, pdcch_offset, td_index as u8, td)? {
                    return Ok(Some(grant));
                }
            }
        }
        trace!("No room for ue={} within {} slots", ue_index, self.expert.max_dl_slots_ahead);
        Ok(None)
    }

    /// Try one PDCCH slot / time domain entry. Nothing stays reserved on failure.
    fn alloc_in_slot(
        &self,
        ctx: &mut SchedulerContext<'_>,
        ue_index: UeIndex,
        tx: Srb0Tx,
        pdcch_offset: usize,
        td_index: u8,
        td: &PdschTimeDomainResource,
    ) -> Result<Option<DlGrant>, SchedulerError> {
        let pdsch_offset = pdcch_offset + td.k0 as usize;
        let ring_size = ctx.res_grid.ring_size();
        let rnti = ctx.ues.get(ue_index).ok_or(SchedulerError::UnknownUe(ue_index))?.crnti();

        let free = ctx.res_grid[pdsch_offset]
            .query_free(LinkDirection::Downlink, td.symbols)
            .longest_set_run(self.cfg.fallback_crb_limits());
        let selection = match &tx {
            Srb0Tx::NewTx { pending_bytes, .. } => match self.select_mcs(*pending_bytes, td, free.length()) {
                Some(selection) => selection,
                None => return Ok(None),
            },
            Srb0Tx::Retx { tb, .. } => {
                if free.length() < tb.nof_prbs {
                    return Ok(None);
                }
                let Some(desc) = McsDescriptor::from_index(tb.mcs) else {
                    return Ok(None);
                };
                McsSelection { mcs: tb.mcs, desc, nof_prbs: tb.nof_prbs, tbs_bytes: tb.tbs_bytes }
            }
        };
        let region = GrantInfo::new(td.symbols, CrbInterval::new(free.start, free.start + selection.nof_prbs));

        let pdcch = match ctx.pdcch.alloc_dl_pdcch_common(&mut ctx.res_grid[pdcch_offset], rnti) {
            Ok(pdcch) => pdcch,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                trace!("ue={}: {}", ue_index, e);
                return Ok(None);
            }
        };

        let nof_cces = ctx.pdcch.nof_cces();
        let mut uci = None;
        for &k1 in &self.cfg.dl_data_to_ul_ack {
            let uci_offset = pdsch_offset + k1 as usize;
            if uci_offset >= ring_size {
                break;
            }
            match ctx.pucch.alloc_common_harq_ack(&mut ctx.res_grid[uci_offset], rnti, pdcch.cce_index, nof_cces) {
                Ok(pucch) => {
                    uci = Some((k1, uci_offset, pucch));
                    break;
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(_) => continue,
            }
        }
        let Some((k1, uci_offset, pucch)) = uci else {
            trace!("ue={}: no PUCCH for PDSCH at offset {}", ue_index, pdsch_offset);
            ctx.pdcch.release(&mut ctx.res_grid[pdcch_offset], rnti);
            return Ok(None);
        };

        ctx.res_grid[pdsch_offset].reserve(LinkDirection::Downlink, region)?;

        let pdsch_slot = ctx.res_grid[pdsch_offset].slot();
        let uci_slot = ctx.res_grid[uci_offset].slot();
        let ue = ctx.ues.get_mut(ue_index).ok_or(SchedulerError::UnknownUe(ue_index))?;
        let (harq_id, con_res_id, sdu_bytes, is_retx) = match tx {
            Srb0Tx::NewTx { harq_id, .. } => {
                let contents = ue.build_dl_srb0_transport_block(selection.tbs_bytes);
                let tb = DlTbInfo {
                    mcs: selection.mcs,
                    nof_prbs: selection.nof_prbs,
                    symbols: td.symbols,
                    tbs_bytes: selection.tbs_bytes,
                    con_res_id: contents.con_res_id,
                };
                harq_mut(ue, harq_id)?.new_tx(pdsch_slot, uci_slot, tb)?;
                (harq_id, contents.con_res_id, contents.sdu_bytes, false)
            }
            Srb0Tx::Retx { harq_id, tb } => {
                harq_mut(ue, harq_id)?.new_retx(pdsch_slot, uci_slot)?;
                (harq_id, tb.con_res_id, 0, true)
            }
        };
        ue.pcell_mut().set_last_pdsch_slot(pdsch_slot);
        let harq = harq_mut(ue, harq_id)?;
        let (ndi, rv) = (harq.ndi(), harq.rv());

        let grant = DlGrant {
            pdsch_slot,
            ue_index,
            rnti,
            region,
            mcs: selection.mcs,
            modulation: selection.desc.modulation,
            tbs_bytes: selection.tbs_bytes,
            harq_id,
            ndi,
            rv,
            is_retx,
            lcid: Lcid::SRB0,
            con_res_id,
            sdu_bytes,
            uci_slot,
            pucch_resource: pucch.resource_index,
        };
        ctx.res_grid[pdcch_offset].result.dl.pdcchs.push(PdcchDlInfo {
            rnti,
            cce_index: pdcch.cce_index,
            aggregation_level: pdcch.aggregation_level,
            region: pdcch.region,
            dci: Dci10 {
                time_resource: td_index,
                k1,
                mcs: selection.mcs,
                harq_id,
                ndi,
                rv,
                pucch_resource_indicator: pucch.pri,
            },
        });
        ctx.res_grid[pdsch_offset].result.dl.grants.push(grant.clone());
        ctx.res_grid[uci_offset].result.ul.pucchs.push(PucchInfo {
            ue_index,
            rnti,
            resource_index: pucch.resource_index,
            region: pucch.region,
            harq_ack_bits: 1,
        });

        debug!(
            "SRB0 {} for ue={} rnti={}: pdcch_slot={} pdsch_slot={} crbs={} mcs={} tbs={} k1={}",
            if is_retx { "reTx" } else { "newTx" },
            ue_index,
            rnti,
            ctx.res_grid[pdcch_offset].slot(),
            pdsch_slot,
            region.crbs,
            selection.mcs,
            selection.tbs_bytes,
            k1
        );
        Ok(Some(grant))
    }

    /// Lowest MCS whose TBS carries `pending_bytes` within `max_prbs`
    fn select_mcs(&self, pending_bytes: u32, td: &PdschTimeDomainResource, max_prbs: u16) -> Option<McsSelection> {
        if max_prbs == 0 {
            return None;
        }
        (0..=self.expert.max_msg4_mcs).find_map(|mcs| {
            let desc = McsDescriptor::from_index(mcs)?;
            let res = nof_prbs_for_bytes(pending_bytes, desc, td.symbols, max_prbs)?;
            Some(McsSelection { mcs, desc, nof_prbs: res.nof_prbs, tbs_bytes: res.tbs_bytes })
        })
    }
}

fn harq_mut(ue: &mut crate::ue::Ue, harq_id: HarqId) -> Result<&mut crate::harq::DlHarqProcess, SchedulerError> {
    ue.pcell_mut()
        .harqs
        .get_mut(harq_id)
        .ok_or(SchedulerError::InvalidHarqState { harq_id, reason: "unknown HARQ process" })
}

fn grant_event(decision_slot: SlotPoint, grant: &DlGrant) -> SchedulerEvent {
    SchedulerEvent::GrantProduced {
        decision_slot,
        pdsch_slot: grant.pdsch_slot,
        uci_slot: grant.uci_slot,
        ue_index: grant.ue_index,
        rnti: grant.rnti,
        harq_id: grant.harq_id,
        mcs: grant.mcs,
        tbs_bytes: grant.tbs_bytes,
        is_retx: grant.is_retx,
    }
}

/// Largest SRB0 TBS in bytes at `max_mcs` over the fallback CRB limits
pub fn max_srb0_tbs_bytes(cfg: &CellConfiguration, max_mcs: u8) -> u32 {
    let Some(mcs) = McsDescriptor::from_index(max_mcs) else {
        return 0;
    };
    let nof_prbs = cfg.fallback_crb_limits().length();
    cfg.pdsch_td_alloc_list
        .iter()
        .map(|td| {
            compute_tbs_bits(&TbsParams {
                mcs,
                nof_prbs,
                nof_symbols: td.symbols.length(),
                nof_dmrs_res_per_prb: nof_dmrs_res_per_prb(td.symbols),
                nof_oh_res_per_prb: 0,
                nof_layers: 1,
            }) / 8
        })
        .max()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harq::{HarqAckOutcome, HarqAckStatus};
    use crate::result::SchedResult;
    use crate::test_utils::{fdd_cell_config, tdd_cell_config, tdd_partial_slot_cell_config, TestBench};
    use crate::ue::CON_RES_ID_SUBPDU_BYTES;
    use common::OfdmSymbolRange;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn expert(max_msg4_mcs: u8) -> SchedulerExpertConfig {
        SchedulerExpertConfig { max_msg4_mcs, ..SchedulerExpertConfig::default() }
    }

    fn grants(events: &[SchedulerEvent]) -> Vec<(UeIndex, SlotPoint, bool)> {
        events
            .iter()
            .filter_map(|e| match e {
                SchedulerEvent::GrantProduced { ue_index, pdsch_slot, is_retx, .. } => {
                    Some((*ue_index, *pdsch_slot, *is_retx))
                }
                _ => None,
            })
            .collect()
    }

    fn failures(events: &[SchedulerEvent]) -> Vec<AllocationFailureCause> {
        events
            .iter()
            .filter_map(|e| match e {
                SchedulerEvent::AllocationFailed { cause, .. } => Some(*cause),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_max_tbs() {
        let cfg = fdd_cell_config();
        assert_eq!(max_srb0_tbs_bytes(&cfg, 0), 153);
        assert_eq!(max_srb0_tbs_bytes(&cfg, 3), 317);
    }

    #[test]
    fn test_srb0_fits_in_one_grant() {
        for (max_mcs, sdu_bytes) in [(2, 101), (27, 458)] {
            let mut bench = TestBench::new(fdd_cell_config(), expert(max_mcs));
            bench.add_ue(0);
            bench.push_srb0(0, sdu_bytes);
            let result = bench.run_slot();

            assert_eq!(result.dl.pdcchs.len(), 1);
            assert_eq!(result.dl.grants.len(), 1);
            let grant = &result.dl.grants[0];
            assert!(grant.mcs <= max_mcs);
            assert_eq!(grant.sdu_bytes, sdu_bytes);
            assert!(grant.con_res_id);
            assert!(grant.tbs_bytes >= sdu_bytes + mac_sdu_subheader(sdu_bytes) + CON_RES_ID_SUBPDU_BYTES);
            assert!(bench.cfg().fallback_crb_limits().contains(&grant.region.crbs));
            assert_eq!(grant.rv, 0);
            assert_eq!(result.dl.pdcchs[0].dci.harq_id, grant.harq_id);
            assert_eq!(bench.sched.ue(UeIndex(0)).unwrap().pending_dl_srb0_newtx_bytes(), 0);
        }
    }

    fn mac_sdu_subheader(sdu_bytes: u32) -> u32 {
        crate::ue::mac_sdu_subheader_size(sdu_bytes)
    }

    #[test]
    fn test_srb0_too_large_is_deferred() {
        for (max_mcs, sdu_bytes) in [(0, 350), (3, 360)] {
            let mut bench = TestBench::new(fdd_cell_config(), expert(max_mcs));
            bench.add_ue(0);
            bench.push_srb0(0, sdu_bytes);
            for _ in 0..3 {
                let result = bench.run_slot();
                assert!(result.dl.pdcchs.is_empty());
                assert!(result.dl.grants.is_empty());
            }
            let events = bench.take_events();
            assert_eq!(events.len(), 1, "oversize reported once per buffer update");
            assert!(matches!(
                failures(&events)[0],
                AllocationFailureCause::MessageTooLarge { pending_bytes, .. }
                    if pending_bytes == sdu_bytes + 3 + CON_RES_ID_SUBPDU_BYTES
            ));

            // A smaller message replaces the pending one
            bench.push_srb0(0, 40);
            let result = bench.run_slot();
            assert_eq!(result.dl.grants.len(), 1);
            assert_eq!(result.dl.grants[0].sdu_bytes, 40);
            assert!(result.dl.grants[0].con_res_id);
        }
    }

    #[test]
    fn test_tdd_slot_legality() {
        let mut bench = TestBench::new(tdd_cell_config(), expert(1));
        for ue in 0..4 {
            bench.add_ue(ue);
            bench.push_srb0(ue, 129);
        }
        let mut served = Vec::new();
        for _ in 0..40 {
            let result = bench.run_slot();
            let slot = result.slot;
            if !bench.cfg().is_dl_enabled(slot) {
                assert!(result.dl.pdcchs.is_empty(), "PDCCH in UL slot {}", slot);
                assert!(result.dl.grants.is_empty(), "PDSCH in UL slot {}", slot);
            }
            if !bench.cfg().is_ul_enabled(slot) {
                assert!(result.ul.pucchs.is_empty(), "PUCCH in DL slot {}", slot);
            }
            served.extend(result.dl.grants.iter().map(|g| g.ue_index));
            bench.feedback(&result, HarqAckStatus::Ack);
        }
        served.sort();
        assert_eq!(served, (0..4).map(UeIndex).collect::<Vec<_>>());
        assert!(bench.take_events().iter().all(|e| matches!(e, SchedulerEvent::GrantProduced { .. })));
    }

    #[test]
    fn test_partial_slot_allocation() {
        let mut bench = TestBench::new(tdd_partial_slot_cell_config(), expert(8));
        bench.add_ue(0);
        bench.run_slot();
        bench.run_slot();

        // Slot 2 only has 8 DL symbols
        bench.push_srb0(0, 129);
        let result = bench.run_slot();
        assert_eq!(result.slot.slot_index(), 2);
        assert_eq!(result.dl.pdcchs.len(), 1);
        assert_eq!(result.dl.grants.len(), 1);
        assert_eq!(result.dl.grants[0].region.symbols, OfdmSymbolRange::new(2, 8));
        assert_eq!(result.dl.pdcchs[0].dci.time_resource, 1);
        assert!(bench.cfg().is_ul_enabled(result.dl.grants[0].uci_slot));
    }

    /// First slot where a DCI 1_0 grant with k0 = 0 fits
    fn expected_pdsch_slot(cfg: &CellConfiguration, from: SlotPoint, busy: &[SlotPoint]) -> SlotPoint {
        let mut slot = from;
        loop {
            let feasible = !busy.contains(&slot)
                && !cfg.is_csi_rs_slot(slot)
                && cfg.pdsch_td_alloc_list.iter().any(|td| cfg.dl_symbols(slot).contains(&td.symbols))
                && cfg.dl_data_to_ul_ack.iter().any(|k1| {
                    let uci = slot + *k1 as u32;
                    cfg.ul_symbols(uci).contains(&cfg.pucch.symbols) && !cfg.is_csi_rs_slot(uci)
                });
            if feasible {
                return slot;
            }
            slot += 1u32;
        }
    }

    #[test]
    fn test_scheduling_ahead_of_busy_slots() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..10 {
            let mut bench = TestBench::new(tdd_cell_config(), expert(8));
            bench.add_ue(0);
            let traffic_count: u32 = rng.gen_range(20..=30);
            let nof_busy: usize = rng.gen_range(1..=5);
            while bench.next_slot.count() < traffic_count {
                let result = bench.run_slot();
                bench.feedback(&result, HarqAckStatus::Ack);
            }

            let traffic_slot = bench.next_slot;
            let busy: Vec<SlotPoint> = (0..)
                .map(|i: u32| traffic_slot + i)
                .filter(|s| bench.cfg().is_dl_enabled(*s))
                .take(nof_busy)
                .collect();
            let nof_prbs = bench.cfg().nof_prbs;
            let full = GrantInfo::new(OfdmSymbolRange::new(0, 14), CrbInterval::new(0, nof_prbs));
            for slot in &busy {
                let offset = bench.sched.res_grid().offset_of(*slot).unwrap();
                bench.sched.res_grid_mut()[offset].fill(LinkDirection::Downlink, full);
            }

            bench.push_srb0(0, 128);
            bench.run_slot();
            let expected = expected_pdsch_slot(bench.cfg(), traffic_slot, &busy);
            assert_eq!(grants(&bench.take_events()), vec![(UeIndex(0), expected, false)]);
        }
    }

    #[test]
    fn test_pdcch_exhaustion_moves_to_next_slot() {
        let mut bench = TestBench::new(fdd_cell_config(), expert(9));
        for ue in 0..3 {
            bench.add_ue(ue);
            bench.push_srb0(ue, 50);
        }
        let result = bench.run_slot();
        assert_eq!(result.dl.grants.len(), 2);
        assert!(!result.dl.grants[0].region.overlaps(&result.dl.grants[1].region));
        let slot0 = result.slot;
        assert_eq!(
            grants(&bench.take_events()),
            vec![(UeIndex(0), slot0, false), (UeIndex(1), slot0, false), (UeIndex(2), slot0 + 1u32, false)]
        );
        // The PDCCHs hit different candidates and hence different PUCCH resources
        let uci = result.dl.grants[0].uci_slot;
        let offset = bench.sched.res_grid().offset_of(uci).unwrap();
        let pucchs = &bench.sched.res_grid()[offset].result.ul.pucchs;
        assert_eq!(pucchs.len(), 2);
        assert_ne!(pucchs[0].resource_index, pucchs[1].resource_index);
    }

    fn run_until_pucch(bench: &mut TestBench) -> SchedResult {
        loop {
            let result = bench.run_slot();
            if !result.ul.pucchs.is_empty() {
                return result;
            }
        }
    }

    #[test]
    fn test_nack_retransmission_and_limit() {
        let expert = SchedulerExpertConfig { max_nof_harq_retxs: 1, ..expert(9) };
        let mut bench = TestBench::new(fdd_cell_config(), expert);
        bench.add_ue(0);
        bench.push_srb0(0, 101);
        let first = bench.run_slot().dl.grants[0].clone();

        let result = run_until_pucch(&mut bench);
        assert_eq!(result.slot, first.uci_slot);
        assert_eq!(bench.feedback(&result, HarqAckStatus::Nack), vec![HarqAckOutcome::Retransmit]);

        let retx = bench.run_slot().dl.grants[0].clone();
        assert!(retx.is_retx);
        assert_eq!(retx.harq_id, first.harq_id);
        assert_eq!(retx.ndi, first.ndi);
        assert_eq!(retx.rv, 2);
        assert_eq!((retx.mcs, retx.tbs_bytes), (first.mcs, first.tbs_bytes));
        assert_eq!(retx.region.crbs.length(), first.region.crbs.length());
        assert_eq!(retx.sdu_bytes, 0);
        assert!(retx.con_res_id);

        let result = run_until_pucch(&mut bench);
        assert_eq!(bench.feedback(&result, HarqAckStatus::Dtx), vec![HarqAckOutcome::Discarded]);
        let events = bench.take_events();
        assert!(matches!(
            events.last(),
            Some(SchedulerEvent::RetransmissionLimitExceeded { nof_retxs: 1, .. })
        ));
        for _ in 0..20 {
            assert!(bench.run_slot().dl.grants.is_empty());
        }
    }

    #[test]
    fn test_missing_feedback_triggers_retransmission() {
        let mut bench = TestBench::new(fdd_cell_config(), expert(9));
        bench.add_ue(0);
        bench.push_srb0(0, 30);
        let first = bench.run_slot().dl.grants[0].clone();
        let timeout = bench.sched.expert_config().harq_ack_timeout_slots as u32;

        let mut retx = None;
        for _ in 0..30 {
            let result = bench.run_slot();
            if let Some(grant) = result.dl.grants.first() {
                retx = Some((result.slot, grant.clone()));
                break;
            }
        }
        let (slot, grant) = retx.unwrap();
        assert!(grant.is_retx);
        assert_eq!(slot, first.uci_slot + timeout + 1u32);
        let events = bench.take_events();
        assert!(events
            .iter()
            .any(|e| matches!(e, SchedulerEvent::FeedbackDeadlineMissed { ack_slot, .. } if *ack_slot == first.uci_slot)));
    }

    #[test]
    fn test_harq_exhausted() {
        let expert = SchedulerExpertConfig { nof_dl_harqs: 1, ..expert(9) };
        let mut bench = TestBench::new(fdd_cell_config(), expert);
        bench.add_ue(0);
        bench.push_srb0(0, 30);
        assert_eq!(bench.run_slot().dl.grants.len(), 1);
        bench.take_events();

        bench.push_srb0(0, 30);
        assert!(bench.run_slot().dl.grants.is_empty());
        assert_eq!(failures(&bench.take_events()), vec![AllocationFailureCause::HarqExhausted]);

        let result = run_until_pucch(&mut bench);
        bench.feedback(&result, HarqAckStatus::Ack);
        assert_eq!(bench.run_slot().dl.grants.len(), 1);
    }

    #[test]
    fn test_no_resources_in_horizon() {
        let mut bench = TestBench::new(fdd_cell_config(), expert(9));
        bench.add_ue(0);
        bench.run_slot();
        let full = GrantInfo::new(OfdmSymbolRange::new(0, 14), CrbInterval::new(0, 52));
        let ring_size = bench.sched.res_grid().ring_size();
        for offset in 0..ring_size {
            bench.sched.res_grid_mut()[offset].fill(LinkDirection::Downlink, full);
        }
        bench.push_srb0(0, 30);
        assert!(bench.run_slot().dl.grants.is_empty());
        assert_eq!(failures(&bench.take_events()), vec![AllocationFailureCause::NoResourcesInHorizon]);
        assert!(bench.sched.ue(UeIndex(0)).unwrap().pending_dl_srb0_newtx_bytes() > 0);

        // Reported once per message, not once per tick
        for _ in 0..3 {
            for offset in 0..ring_size {
                bench.sched.res_grid_mut()[offset].fill(LinkDirection::Downlink, full);
            }
            assert!(bench.run_slot().dl.grants.is_empty());
        }
        assert!(bench.take_events().is_empty());

        bench.push_srb0(0, 40);
        for offset in 0..ring_size {
            bench.sched.res_grid_mut()[offset].fill(LinkDirection::Downlink, full);
        }
        assert!(bench.run_slot().dl.grants.is_empty());
        assert_eq!(failures(&bench.take_events()), vec![AllocationFailureCause::NoResourcesInHorizon]);
    }

    #[test]
    fn test_consecutive_messages_keep_order() {
        let mut bench = TestBench::new(fdd_cell_config(), expert(9));
        bench.add_ue(0);
        bench.push_srb0(0, 30);
        assert!(bench.run_slot().dl.grants[0].con_res_id);
        // A second message while the first is in flight goes to a later slot
        bench.push_srb0(0, 30);
        let result = bench.run_slot();
        let events = grants(&bench.take_events());
        assert_eq!(events.len(), 2);
        assert!(events[1].1 > events[0].1);
        assert_eq!(result.dl.grants.len(), 1);
        // Contention resolution only goes with the first message
        assert!(!result.dl.grants[0].con_res_id);
        assert_eq!(result.dl.grants[0].sdu_bytes, 30);
    }

    #[test]
    fn test_back_to_back_messages_use_distinct_pucch_slots() {
        let mut bench = TestBench::new(tdd_cell_config(), expert(9));
        bench.add_ue(0);
        let mut uci_slots = Vec::new();
        let mut acked = 0;
        for tick in 0..40 {
            if tick < 2 {
                bench.push_srb0(0, 30);
            }
            let result = bench.run_slot();
            uci_slots.extend(result.dl.grants.iter().map(|g| g.uci_slot));
            assert!(result.ul.pucchs.len() <= 1, "two PUCCHs of one UE in slot {}", result.slot);
            acked += bench
                .feedback(&result, HarqAckStatus::Ack)
                .into_iter()
                .filter(|o| *o == HarqAckOutcome::Acked)
                .count();
        }
        assert_eq!(uci_slots.len(), 2);
        assert_ne!(uci_slots[0], uci_slots[1]);
        assert_eq!(acked, 2);
        assert!(bench.sched.ue(UeIndex(0)).unwrap().pcell().harqs.iter().all(|h| h.is_empty()));
    }

    #[test]
    fn test_scheduling_across_sfn_wrap() {
        let mut bench = TestBench::new(fdd_cell_config(), expert(9));
        let period = bench.next_slot.period();
        bench.next_slot = SlotPoint::new(0, period - 3).unwrap();
        bench.add_ue(0);
        bench.run_slot();

        // The two slots before the wrap are busy: the grant lands in slot 0
        let full = GrantInfo::new(OfdmSymbolRange::new(0, 14), CrbInterval::new(0, 52));
        for offset in 1..=2 {
            bench.sched.res_grid_mut()[offset].fill(LinkDirection::Downlink, full);
        }
        bench.push_srb0(0, 30);
        bench.run_slot();
        bench.push_srb0(0, 30);
        bench.run_slot();
        let events = bench.take_events();
        let produced: Vec<(SlotPoint, SlotPoint)> = events
            .iter()
            .filter_map(|e| match e {
                SchedulerEvent::GrantProduced { pdsch_slot, uci_slot, .. } => Some((*pdsch_slot, *uci_slot)),
                _ => None,
            })
            .collect();
        assert_eq!(produced.len(), 2);
        let (first_pdsch, first_uci) = produced[0];
        let (second_pdsch, second_uci) = produced[1];
        assert_eq!(first_pdsch.count(), 0);
        assert_eq!(first_uci, first_pdsch + 4u32);
        assert_eq!(second_pdsch.count(), 1);
        assert!(second_pdsch > first_pdsch);
        assert_ne!(second_uci, first_uci);

        let mut acked = 0;
        for _ in 0..8 {
            let result = bench.run_slot();
            acked += bench.feedback(&result, HarqAckStatus::Ack).len();
        }
        assert_eq!(acked, 2);
        assert!(bench.sched.ue(UeIndex(0)).unwrap().pcell().harqs.iter().all(|h| h.is_empty()));
        assert!(bench.take_events().is_empty());
    }
}
