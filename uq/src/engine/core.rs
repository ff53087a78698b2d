//! Execution engine implementation

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::domain::{Command, CommandId, CommandStatus, Session, SessionStatus, SessionStepError, Sim};
use crate::error::{Result, UssdError};
use crate::queue::CommandQueue;
use crate::registry::{SimRegistry, today};

use super::transport::{UssdRequest, UssdTransport};

/// Attempts for a write that settles claimed work
const SETTLE_ATTEMPTS: u32 = 3;

/// Delay before the first retry of a settling write; doubles per attempt
const SETTLE_BACKOFF_MS: u64 = 50;

/// Run a store write, retrying while the store itself fails
///
/// Other errors (an invalid transition, a missing record) return at once.
async fn settle<T, F, Fut>(what: &'static str, mut write: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match write().await {
            Err(e) if e.is_store_failure() && attempt < SETTLE_ATTEMPTS => {
                let backoff = SETTLE_BACKOFF_MS * 2u64.pow(attempt - 1);
                warn!(what, attempt, backoff_ms = backoff, error = %e, "Store write failed, retrying");
                tokio::time::sleep(Duration::from_millis(backoff)).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}

/// Who asked for an execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// "Execute now" from a client
    Manual,
    /// Dispatched by the scheduler loop
    Automatic,
}

impl Trigger {
    pub fn is_automatic(self) -> bool {
        self == Self::Automatic
    }
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Manual => write!(f, "manual"),
            Self::Automatic => write!(f, "automatic"),
        }
    }
}

/// Drives commands and sessions through their state machines
///
/// Every execution holds the target SIM's lease from eligibility check to
/// final status, so executions on one SIM never overlap while executions on
/// distinct SIMs run in parallel.
pub struct ExecutionEngine {
    registry: Arc<SimRegistry>,
    queue: Arc<CommandQueue>,
    transport: Arc<dyn UssdTransport>,
    timeout: Duration,
}

impl ExecutionEngine {
    pub fn new(
        registry: Arc<SimRegistry>,
        queue: Arc<CommandQueue>,
        transport: Arc<dyn UssdTransport>,
        timeout: Duration,
    ) -> Self {
        debug!(?timeout, "ExecutionEngine::new: called");
        Self {
            registry,
            queue,
            transport,
            timeout,
        }
    }

    /// Run one command to a terminal state
    ///
    /// Returns the finalized command. A command whose SIM is out of quota
    /// finalizes as `quota_exceeded` without dialing. Fails with
    /// `InvalidTransition` when the command is no longer pending (another
    /// execution claimed it) and `NotEligible` when it can never run on its
    /// SIM.
    pub async fn execute(&self, id: CommandId, trigger: Trigger) -> Result<Command> {
        debug!(id, %trigger, "ExecutionEngine::execute: called");
        let command = self.queue.get(id).await?;
        let _lease = self.registry.lease(&command.sim_id).await?;
        let sim = self.registry.refresh_sim(&command.sim_id, today()).await?;
        let auto = trigger.is_automatic();

        let command = match self.queue.begin_execution(id, &sim, auto).await {
            Ok(command) => command,
            Err(UssdError::QuotaExceeded { used, quota, .. }) => {
                info!(id, sim_id = %sim.id, used, quota, %trigger, "Command rejected: daily quota reached");
                return self.queue.reject_over_quota(id, &sim, auto).await;
            }
            Err(e) => {
                debug!(id, error = %e, "ExecutionEngine::execute: not started");
                return Err(e);
            }
        };
        info!(id, code = %command.code, sim_id = %sim.id, %trigger, "Executing command");

        let request = UssdRequest {
            sim_id: sim.id.clone(),
            phone_number: sim.phone_number.clone(),
            carrier: sim.carrier,
            input: command.code.clone(),
            command_type: Some(command.command_type),
        };

        let (status, result) = match self.dial(&request).await {
            Ok(response) => match self.registry.record_usage(&sim.id).await {
                Ok(updated) => {
                    debug!(id, used_today = updated.used_today, "ExecutionEngine::execute: usage recorded");
                    (CommandStatus::Success, response)
                }
                Err(UssdError::QuotaExceeded { used, quota, .. }) => {
                    warn!(id, sim_id = %sim.id, "Quota consumed by a concurrent execution");
                    (
                        CommandStatus::QuotaExceeded,
                        format!("Daily quota reached ({}/{})", used, quota),
                    )
                }
                Err(e) => (CommandStatus::Failed, format!("Usage not recorded: {}", e)),
            },
            Err(reason) => (CommandStatus::Failed, reason),
        };

        // The command is claimed; only a store outage outlasting the retries
        // leaves it executing, and the scheduler's sweep settles it then
        let finished = settle("command result", || self.queue.mark_terminal(id, status, Some(result.clone()))).await?;
        match finished.status {
            CommandStatus::Success => info!(id, sim_id = %sim.id, "Command succeeded"),
            status => warn!(id, sim_id = %sim.id, %status, result = ?finished.result, "Command did not succeed"),
        }
        Ok(finished)
    }

    /// Finalize a pending command whose SIM is out of quota, without dialing
    ///
    /// Returns `None` and leaves the command pending when the SIM has quota
    /// again by the time its lease is held (the date rolled over). Never
    /// starts an execution, so the caller's one-per-SIM dispatch budget is
    /// unaffected.
    pub async fn reject_exhausted(&self, id: CommandId, trigger: Trigger) -> Result<Option<Command>> {
        debug!(id, %trigger, "ExecutionEngine::reject_exhausted: called");
        let command = self.queue.get(id).await?;
        let _lease = self.registry.lease(&command.sim_id).await?;
        let sim = self.registry.refresh_sim(&command.sim_id, today()).await?;
        if sim.has_quota() {
            debug!(id, sim_id = %sim.id, "ExecutionEngine::reject_exhausted: quota available again");
            return Ok(None);
        }

        let rejected = self.queue.reject_over_quota(id, &sim, trigger.is_automatic()).await?;
        info!(id, sim_id = %sim.id, used = sim.used_today, quota = sim.daily_quota, %trigger, "Command rejected: daily quota reached");
        Ok(Some(rejected))
    }

    /// Run a pending session step by step, halting on the first failure
    ///
    /// The session reserves one unit of its SIM's quota before the first
    /// step. A SIM out of quota refuses the session with `QuotaExceeded` and
    /// leaves it pending; a reservation lost after the session started fails
    /// it at its first step, so a unit is never spent on a session that did
    /// not start.
    pub async fn run_session(&self, id: &str) -> Result<Session> {
        debug!(%id, "ExecutionEngine::run_session: called");
        let session = self.queue.get_session(id).await?;
        let _lease = self.registry.lease(&session.sim_id).await?;

        // Re-read under the lease; another run may have started it meanwhile
        let session = self.queue.get_session(id).await?;
        if session.status != SessionStatus::Pending {
            return Err(SessionStepError::NotPending(session.status).into());
        }

        let sim = self.registry.refresh_sim(&session.sim_id, today()).await?;
        if !sim.has_quota() {
            info!(%id, sim_id = %sim.id, used = sim.used_today, quota = sim.daily_quota, "Session refused: daily quota reached");
            return Err(UssdError::QuotaExceeded {
                sim_id: sim.id.clone(),
                used: sim.used_today,
                quota: sim.daily_quota,
            });
        }

        let mut session = settle("session start", || self.queue.update_session(id, |s| s.begin())).await?;
        if let Err(e) = self.registry.record_usage(&sim.id).await {
            warn!(%id, sim_id = %sim.id, error = %e, "Session quota reservation failed");
            let reason = e.to_string();
            settle("session abort", || {
                let reason = reason.clone();
                self.queue.update_session(id, move |s| s.abort(reason))
            })
            .await?;
            return Err(e);
        }
        info!(%id, sim_id = %sim.id, steps = session.steps.len(), "Session started");

        while session.status == SessionStatus::Running {
            session = settle("session step", || {
                self.queue.update_session(id, |s| s.start_step().map(|_| ()))
            })
            .await?;
            let index = session.current_step;
            let input = session
                .steps
                .get(index)
                .map(|step| step.input.clone())
                .ok_or(SessionStepError::Exhausted)?;

            let request = Self::step_request(&sim, input);
            session = match self.dial(&request).await {
                Ok(response) => {
                    debug!(%id, index, "ExecutionEngine::run_session: step completed");
                    settle("session step", || {
                        let response = response.clone();
                        self.queue.update_session(id, move |s| s.complete_step(response))
                    })
                    .await?
                }
                Err(reason) => {
                    warn!(%id, index, %reason, "Session step failed");
                    settle("session step", || {
                        let reason = reason.clone();
                        self.queue.update_session(id, move |s| s.fail_step(reason))
                    })
                    .await?
                }
            };
        }

        info!(%id, status = %session.status, "Session finished");
        Ok(session)
    }

    fn step_request(sim: &Sim, input: String) -> UssdRequest {
        UssdRequest {
            sim_id: sim.id.clone(),
            phone_number: sim.phone_number.clone(),
            carrier: sim.carrier,
            input,
            command_type: None,
        }
    }

    /// Dial with the execution timeout; errors come back as result text
    async fn dial(&self, request: &UssdRequest) -> std::result::Result<String, String> {
        match tokio::time::timeout(self.timeout, self.transport.dial(request)).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("Timed out after {}ms", self.timeout.as_millis())),
        }
    }
}
