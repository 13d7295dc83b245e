//! Albor Space MAC Scheduler Simulator
//!
//! Drives one cell scheduler slot by slot, with simulated SRB0 traffic from
//! the upper layers and simulated HARQ feedback from the PHY.

mod config;

use anyhow::{anyhow, Result};
use clap::Parser;
use common::time::slot_duration;
use common::{Lcid, Rnti, SlotPoint, UeIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use scheduler::events::AllocationFailureCause;
use scheduler::{
    CellScheduler, DlBufferStateIndication, HarqAckStatus, SchedulerEvent, SchedulerEventNotifier,
    SchedulerHandle, TracingEventNotifier, UciIndication, UeCreationRequest,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use config::{SimConfig, TrafficConfig};

/// Albor Space MAC scheduler simulator
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "gnb/configs/sched_sim.yml")]
    config: String,

    /// Log level (trace, debug, info, warn, error), overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,

    /// Number of slots to run (0 runs until Ctrl-C), overrides the config file
    #[arg(long)]
    slots: Option<u64>,

    /// Run slots back to back instead of at the slot rate
    #[arg(long)]
    unpaced: bool,

    /// Print every non-empty slot result as a JSON line on stdout
    #[arg(long)]
    json: bool,
}

/// Counters reported when the simulation ends
#[derive(Debug, Default)]
struct SimStats {
    slots: u64,
    new_txs: u64,
    retxs: u64,
    scheduled_bytes: u64,
    too_large: u64,
    no_resources: u64,
    harq_exhausted: u64,
    deadline_missed: u64,
    discarded: u64,
    acks: u64,
    nacks: u64,
    dtxs: u64,
}

impl SimStats {
    fn on_event(&mut self, event: &SchedulerEvent) {
        match event {
            SchedulerEvent::GrantProduced { is_retx: true, .. } => self.retxs += 1,
            SchedulerEvent::GrantProduced { tbs_bytes, .. } => {
                self.new_txs += 1;
                self.scheduled_bytes += *tbs_bytes as u64;
            }
            SchedulerEvent::AllocationFailed { cause, .. } => match cause {
                AllocationFailureCause::MessageTooLarge { .. } => self.too_large += 1,
                AllocationFailureCause::NoResourcesInHorizon => self.no_resources += 1,
                AllocationFailureCause::HarqExhausted => self.harq_exhausted += 1,
            },
            SchedulerEvent::FeedbackDeadlineMissed { .. } => self.deadline_missed += 1,
            SchedulerEvent::RetransmissionLimitExceeded { .. } => self.discarded += 1,
        }
    }

    fn on_feedback(&mut self, status: HarqAckStatus) {
        match status {
            HarqAckStatus::Ack => self.acks += 1,
            HarqAckStatus::Nack => self.nacks += 1,
            HarqAckStatus::Dtx => self.dtxs += 1,
        }
    }

    fn log_summary(&self) {
        info!("Simulation summary after {} slots:", self.slots);
        info!("  Grants: {} newTx ({} bytes), {} reTx", self.new_txs, self.scheduled_bytes, self.retxs);
        info!("  Feedback: {} ACK, {} NACK, {} DTX", self.acks, self.nacks, self.dtxs);
        info!("  Missed HARQ-ACK deadlines: {}, discarded TBs: {}", self.deadline_missed, self.discarded);
        info!(
            "  Deferred: {} too large, {} no resources, {} HARQ exhausted",
            self.too_large, self.no_resources, self.harq_exhausted
        );
    }
}

/// HARQ-ACK value the simulated PHY decodes
fn draw_feedback(rng: &mut StdRng, sim: &TrafficConfig) -> HarqAckStatus {
    let draw: f64 = rng.gen();
    if draw < sim.dtx_probability {
        HarqAckStatus::Dtx
    } else if draw < sim.dtx_probability + (1.0 - sim.dtx_probability) * sim.ack_probability {
        HarqAckStatus::Ack
    } else {
        HarqAckStatus::Nack
    }
}

/// Upper layer traffic: one SRB0 message per UE and traffic period, at a
/// random phase per UE
async fn run_traffic(handle: SchedulerHandle, mut slots: mpsc::UnboundedReceiver<SlotPoint>, sim: TrafficConfig) {
    let mut rng = StdRng::seed_from_u64(sim.seed.wrapping_add(1));
    let phases: Vec<u32> = (0..sim.nof_ues).map(|_| rng.gen_range(0..sim.traffic_period_slots)).collect();
    while let Some(slot) = slots.recv().await {
        for (ue, phase) in phases.iter().enumerate() {
            if slot.count() % sim.traffic_period_slots != *phase {
                continue;
            }
            let ind = DlBufferStateIndication { ue_index: UeIndex(ue as u16), lcid: Lcid::SRB0, bytes: sim.srb0_bytes };
            if handle.dl_buffer_state(ind).is_err() {
                return;
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let cfg = SimConfig::from_yaml_file(&args.config)?;

    // Initialize logging
    let level = args.log_level.clone().unwrap_or_else(|| cfg.log.all_level.clone());
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));
    fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("Starting Albor Space MAC scheduler simulator");
    info!("Configuration file: {}", args.config);

    let cell_cfg = cfg.to_cell_config()?;
    let scs = cell_cfg.scs;
    let sim = cfg.sim.clone();
    let nof_slots = args.slots.unwrap_or(sim.nof_slots);
    let realtime = sim.realtime && !args.unpaced;
    info!("Cell configuration:");
    info!("  PCI: {}, Cell ID: {}", cell_cfg.pci.0, cell_cfg.cell_id.0);
    info!("  Subcarrier spacing: {} kHz, {} PRBs", scs.khz(), cell_cfg.nof_prbs);
    info!("  Duplex: {:?}", cell_cfg.duplex);
    info!("Traffic: {} UEs, {} bytes every {} slots", sim.nof_ues, sim.srb0_bytes, sim.traffic_period_slots);

    let stats = Arc::new(Mutex::new(SimStats::default()));
    let notifier = {
        let stats = stats.clone();
        let log_events = cfg.log.log_events;
        let mut tracing_notifier = TracingEventNotifier;
        move |event: &SchedulerEvent| {
            if log_events {
                tracing_notifier.on_event(event);
            }
            if let Ok(mut stats) = stats.lock() {
                stats.on_event(event);
            }
        }
    };
    let mut sched = CellScheduler::new(cell_cfg, cfg.scheduler.clone(), Box::new(notifier))?;
    let handle = sched.handle();

    for i in 0..sim.nof_ues {
        handle.add_ue(UeCreationRequest {
            ue_index: UeIndex(i),
            crnti: Rnti(0x4601 + i),
            starts_in_fallback: true,
        })?;
    }

    let (slot_tx, slot_rx) = mpsc::unbounded_channel();
    let traffic_handle = tokio::spawn(run_traffic(handle.clone(), slot_rx, sim.clone()));

    let running = Arc::new(AtomicBool::new(true));
    tokio::spawn({
        let running = running.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received shutdown signal");
                running.store(false, Ordering::SeqCst);
            }
        }
    });

    let mut interval = tokio::time::interval(slot_duration(scs));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut rng = StdRng::seed_from_u64(sim.seed);
    let mut slot = SlotPoint::zero(scs);
    let mut nof_run: u64 = 0;
    let mut failure = None;

    while running.load(Ordering::SeqCst) && (nof_slots == 0 || nof_run < nof_slots) {
        if realtime {
            interval.tick().await;
        } else {
            tokio::task::yield_now().await;
        }

        let result = match sched.run_slot(slot) {
            Ok(result) => result,
            Err(e) => {
                error!("slot={}: {}", slot, e);
                failure = Some(e);
                break;
            }
        };
        if args.json && !result.is_empty() {
            println!("{}", serde_json::to_string(result)?);
        }

        for pucch in &result.ul.pucchs {
            let status = draw_feedback(&mut rng, &sim);
            if let Ok(mut stats) = stats.lock() {
                stats.on_feedback(status);
            }
            // A DTX is never reported; the HARQ-ACK deadline catches it
            if status == HarqAckStatus::Dtx {
                continue;
            }
            handle.uci(UciIndication { ue_index: pucch.ue_index, slot: result.slot, tb_index: 0, status })?;
        }

        if slot_tx.send(slot).is_err() {
            warn!("Traffic generator stopped");
        }
        slot += 1u32;
        nof_run += 1;
    }

    info!("Shutting down scheduler simulator");
    drop(slot_tx);
    drop(sched);
    match tokio::time::timeout(tokio::time::Duration::from_secs(5), traffic_handle).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Traffic generator task failed: {}", e),
        Err(_) => warn!("Traffic generator did not stop within 5 s"),
    }

    if let Ok(mut stats) = stats.lock() {
        stats.slots = nof_run;
        stats.log_summary();
    }
    match failure {
        Some(e) => Err(anyhow!("scheduler stopped: {}", e)),
        None => Ok(()),
    }
}
