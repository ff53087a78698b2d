//! Scheduler loop implementation

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::domain::{Command, CommandId, CommandStatus, SessionStatus, Sim, SimId};
use crate::engine::{ExecutionEngine, Trigger};
use crate::error::{Result, UssdError};
use crate::matcher::{self, Eligibility};
use crate::queue::{CommandFilter, CommandQueue, INTERRUPTED};
use crate::registry::{SimRegistry, today};

use super::config::SchedulerConfig;
use super::stats::{CycleReport, SchedulerStats};

/// Inputs the loop watches while it runs
pub struct RunContext {
    /// Dispatch happens only while this reads `true`
    pub auto_execute: watch::Receiver<bool>,
    /// Any message, or the sender dropping, stops the loop
    pub shutdown: mpsc::Receiver<()>,
}

/// Control side of a [`RunContext`]
#[derive(Clone)]
pub struct RunHandle {
    auto_execute: Arc<watch::Sender<bool>>,
    shutdown: mpsc::Sender<()>,
}

impl RunHandle {
    /// Turn automatic dispatch on or off; in-flight executions are unaffected
    pub fn set_auto_execute(&self, enabled: bool) {
        debug!(enabled, "RunHandle::set_auto_execute: called");
        self.auto_execute.send_replace(enabled);
    }

    pub fn auto_execute(&self) -> bool {
        *self.auto_execute.borrow()
    }

    /// Ask the loop to stop after its current cycle
    pub async fn shutdown(&self) {
        debug!("RunHandle::shutdown: called");
        // Loop already gone is fine
        let _ = self.shutdown.send(()).await;
    }
}

/// Create a linked run context and handle
pub fn run_context(auto_execute: bool) -> (RunHandle, RunContext) {
    let (auto_tx, auto_rx) = watch::channel(auto_execute);
    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
    (
        RunHandle {
            auto_execute: Arc::new(auto_tx),
            shutdown: shutdown_tx,
        },
        RunContext {
            auto_execute: auto_rx,
            shutdown: shutdown_rx,
        },
    )
}

/// Work picked for one command during a cycle
#[derive(Debug, Clone, Copy)]
enum Job {
    /// Run it; at most one per SIM per cycle
    Execute(CommandId),
    /// Finalize it as `quota_exceeded`; never dials
    Reject(CommandId),
}

impl Job {
    fn id(self) -> CommandId {
        match self {
            Self::Execute(id) | Self::Reject(id) => id,
        }
    }
}

/// Periodically dispatches eligible pending commands to the engine
///
/// Each cycle starts at most one execution per SIM, in queue order, and runs
/// executions for distinct SIMs concurrently up to `max-concurrent`.
pub struct Scheduler {
    config: SchedulerConfig,
    registry: Arc<SimRegistry>,
    queue: Arc<CommandQueue>,
    engine: Arc<ExecutionEngine>,
    stats: Mutex<SchedulerStats>,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        registry: Arc<SimRegistry>,
        queue: Arc<CommandQueue>,
        engine: Arc<ExecutionEngine>,
    ) -> Self {
        debug!(?config, "Scheduler::new: called");
        Self {
            config,
            registry,
            queue,
            engine,
            stats: Mutex::new(SchedulerStats::default()),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Run until shutdown, dispatching a cycle on every tick while enabled
    pub async fn run(&self, mut ctx: RunContext) {
        info!(tick_ms = self.config.tick_ms, "Scheduler starting");
        let mut interval = tokio::time::interval(self.config.tick());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut enabled = *ctx.auto_execute.borrow();

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let now_enabled = *ctx.auto_execute.borrow_and_update();
                    if now_enabled != enabled {
                        info!(enabled = now_enabled, "Automatic execution toggled");
                        enabled = now_enabled;
                    }
                    if !enabled {
                        debug!("Scheduler::run: automatic execution disabled, skipping cycle");
                        continue;
                    }
                    let report = self.run_cycle().await;
                    if !report.is_idle() {
                        info!(?report, "Scheduler cycle finished");
                    }
                }
                _ = ctx.shutdown.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        info!("Scheduler stopped");
    }

    /// One pass over the pending queue
    pub async fn run_cycle(&self) -> CycleReport {
        debug!("Scheduler::run_cycle: called");
        let mut report = CycleReport::default();

        match self.registry.reset_daily(today()).await {
            Ok(reset) => report.reset = reset,
            Err(e) => warn!(error = %e, "Daily reset failed"),
        }
        report.orphans = self.sweep_orphans().await;

        let pending = self.queue.pending().await;
        report.scanned = pending.len();
        let sims: HashMap<SimId, Sim> = self
            .registry
            .list_sims()
            .await
            .into_iter()
            .map(|s| (s.id.clone(), s))
            .collect();

        let mut claimed: HashSet<&str> = HashSet::new();
        let mut jobs: Vec<Job> = Vec::new();
        for command in &pending {
            let Some(sim) = sims.get(&command.sim_id) else {
                warn!(id = command.id, sim_id = %command.sim_id, "Pending command targets unknown SIM");
                continue;
            };
            match matcher::evaluate(command, sim) {
                Eligibility::Eligible => {
                    if claimed.insert(sim.id.as_str()) {
                        jobs.push(Job::Execute(command.id));
                    } else {
                        debug!(id = command.id, sim_id = %sim.id, "Scheduler::run_cycle: SIM already dispatched this cycle");
                    }
                }
                Eligibility::QuotaExhausted => jobs.push(Job::Reject(command.id)),
                reason => debug!(id = command.id, %reason, "Scheduler::run_cycle: not eligible"),
            }
        }
        report.dispatched = jobs.len();

        let results: Vec<(Job, Result<Option<Command>>)> = stream::iter(jobs)
            .map(|job| async move {
                let result = match job {
                    Job::Execute(id) => self.engine.execute(id, Trigger::Automatic).await.map(Some),
                    Job::Reject(id) => self.engine.reject_exhausted(id, Trigger::Automatic).await,
                };
                (job, result)
            })
            .buffer_unordered(self.config.concurrency())
            .collect()
            .await;

        for (job, result) in results {
            let id = job.id();
            match result {
                Ok(Some(command)) => match command.status {
                    CommandStatus::Success => report.succeeded += 1,
                    CommandStatus::QuotaExceeded => report.quota_exceeded += 1,
                    _ => report.failed += 1,
                },
                Ok(None) => {
                    debug!(id, "Scheduler::run_cycle: quota available again, left pending");
                    report.dispatched -= 1;
                }
                Err(e) if e.is_invalid_transition() => {
                    debug!(id, "Scheduler::run_cycle: claimed elsewhere");
                    report.races_lost += 1;
                }
                Err(e) => {
                    warn!(id, error = %e, "Automatic execution failed");
                    report.errors += 1;
                }
            }
        }

        self.stats.lock().await.record(&report);
        report
    }

    /// Fail claimed work whose SIM lease nobody holds
    ///
    /// An execution claims and settles its command (or session) while
    /// holding the SIM's lease, so a record still `executing` (or `running`)
    /// with a free lease lost its final write and has no executor left.
    async fn sweep_orphans(&self) -> usize {
        let mut swept = 0;

        for command in self.queue.list(&CommandFilter::status(CommandStatus::Executing)).await {
            if !self.lease_free(&command.sim_id).await {
                continue;
            }
            match self
                .queue
                .mark_terminal(command.id, CommandStatus::Failed, Some(INTERRUPTED.to_string()))
                .await
            {
                Ok(_) => {
                    warn!(id = command.id, sim_id = %command.sim_id, "Failed orphaned command");
                    swept += 1;
                }
                Err(e) if e.is_invalid_transition() => {
                    debug!(id = command.id, "Scheduler::sweep_orphans: settled meanwhile");
                }
                Err(e) => warn!(id = command.id, error = %e, "Orphaned command not settled"),
            }
        }

        let running = self
            .queue
            .list_sessions()
            .await
            .into_iter()
            .filter(|s| s.status == SessionStatus::Running);
        for session in running {
            if !self.lease_free(&session.sim_id).await {
                continue;
            }
            match self.queue.update_session(&session.id, |s| s.abort(INTERRUPTED)).await {
                Ok(_) => {
                    warn!(session_id = %session.id, sim_id = %session.sim_id, "Failed orphaned session");
                    swept += 1;
                }
                Err(UssdError::Session(_)) => {
                    debug!(session_id = %session.id, "Scheduler::sweep_orphans: session settled meanwhile");
                }
                Err(e) => warn!(session_id = %session.id, error = %e, "Orphaned session not settled"),
            }
        }

        swept
    }

    async fn lease_free(&self, sim_id: &str) -> bool {
        matches!(self.registry.is_leased(sim_id).await, Ok(false))
    }

    pub async fn stats(&self) -> SchedulerStats {
        debug!("Scheduler::stats: called");
        self.stats.lock().await.clone()
    }
}
