//! Command queue implementation

use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};

use chrono::Utc;
use regex::Regex;
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, info, warn};

use crate::domain::{
    Command, CommandId, CommandRequest, CommandStatus, Session, SessionId, SessionStatus, SessionStepError, Sim,
};
use crate::error::{Result, UssdError};
use crate::matcher::{self, Eligibility};
use crate::registry::SimRegistry;
use crate::state::StateManager;

use super::filter::CommandFilter;

/// A dialable USSD string: `*`, then digits/`*`/`#`, ending in `#`
static USSD_CODE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\*[0-9*#]*#$").expect("static regex"));

/// Default capacity of the queue event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Result text of work failed because its executor went away
pub(crate) const INTERRUPTED: &str = "Interrupted before completion";

/// Change notification for observers of the queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEvent {
    Submitted {
        id: CommandId,
        sim_id: String,
    },
    StatusChanged {
        id: CommandId,
        from: CommandStatus,
        to: CommandStatus,
    },
    SessionUpdated {
        id: SessionId,
        status: SessionStatus,
    },
}

/// Counts from startup recovery
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryStats {
    pub commands_failed: usize,
    pub sessions_failed: usize,
}

impl std::fmt::Display for RecoveryStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "commands: {}, sessions: {}",
            self.commands_failed, self.sessions_failed
        )
    }
}

struct QueueInner {
    commands: BTreeMap<CommandId, Command>,
    sessions: BTreeMap<SessionId, Session>,
    next_id: CommandId,
}

/// Ordered queue of commands and sessions
///
/// All status changes pass through one lock, which makes every transition
/// (and in particular `pending -> executing`) a single atomic step. The lock
/// is never held while a command executes.
pub struct CommandQueue {
    inner: Mutex<QueueInner>,
    registry: Arc<SimRegistry>,
    state: StateManager,
    events: broadcast::Sender<QueueEvent>,
}

impl CommandQueue {
    /// Create an empty queue
    pub fn new(registry: Arc<SimRegistry>, state: StateManager) -> Self {
        Self::from_records(registry, state, Vec::new(), Vec::new())
    }

    /// Create a queue hydrated from stored records
    pub fn from_records(
        registry: Arc<SimRegistry>,
        state: StateManager,
        commands: Vec<Command>,
        sessions: Vec<Session>,
    ) -> Self {
        debug!(
            command_count = commands.len(),
            session_count = sessions.len(),
            "CommandQueue::from_records: called"
        );
        let next_id = commands.iter().map(|c| c.id).max().unwrap_or(0) + 1;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Mutex::new(QueueInner {
                commands: commands.into_iter().map(|c| (c.id, c)).collect(),
                sessions: sessions.into_iter().map(|s| (s.id.clone(), s)).collect(),
                next_id,
            }),
            registry,
            state,
            events,
        }
    }

    /// Subscribe to queue change events
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: QueueEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Check that `sim_id` exists and belongs to `device_id`
    async fn target_sim(&self, device_id: &str, sim_id: &str) -> Result<Sim> {
        self.registry.get_device(device_id).await?;
        let sim = self.registry.get_sim(sim_id).await?;
        if sim.device_id != device_id {
            return Err(UssdError::InvalidInput(format!(
                "SIM {} does not belong to device {}",
                sim_id, device_id
            )));
        }
        Ok(sim)
    }

    // === Commands ===

    /// Queue a new pending command
    pub async fn submit(&self, request: CommandRequest) -> Result<Command> {
        debug!(code = %request.code, sim_id = %request.sim_id, "CommandQueue::submit: called");
        let code = request.code.trim();
        if !USSD_CODE.is_match(code) {
            return Err(UssdError::InvalidInput(format!("not a USSD code: {:?}", request.code)));
        }
        let request = CommandRequest {
            code: code.to_string(),
            ..request
        };

        let sim = self.target_sim(&request.device_id, &request.sim_id).await?;
        if sim.carrier != request.carrier {
            warn!(
                sim_id = %sim.id,
                sim_carrier = %sim.carrier,
                command_carrier = %request.carrier,
                "Submitted command carrier does not match SIM; it will never run"
            );
        }

        let mut inner = self.inner.lock().await;
        let id = inner.next_id;
        inner.next_id += 1;

        let command = Command::new(id, request);
        self.state.persist_command(command.clone()).await?;
        inner.commands.insert(id, command.clone());
        drop(inner);

        info!(command_id = id, code = %command.code, sim_id = %command.sim_id, "Command queued");
        self.emit(QueueEvent::Submitted {
            id,
            sim_id: command.sim_id.clone(),
        });
        Ok(command)
    }

    /// Commands matching `filter`, in ascending id (queue) order
    pub async fn list(&self, filter: &CommandFilter) -> Vec<Command> {
        debug!(?filter, "CommandQueue::list: called");
        self.inner
            .lock()
            .await
            .commands
            .values()
            .filter(|c| filter.matches(c))
            .cloned()
            .collect()
    }

    /// Pending commands in queue order
    pub async fn pending(&self) -> Vec<Command> {
        self.list(&CommandFilter::status(CommandStatus::Pending)).await
    }

    pub async fn get(&self, id: CommandId) -> Result<Command> {
        debug!(id, "CommandQueue::get: called");
        self.inner
            .lock()
            .await
            .commands
            .get(&id)
            .cloned()
            .ok_or_else(|| UssdError::not_found("command", id))
    }

    /// Claim a command for execution (`pending -> executing`)
    pub async fn mark_executing(&self, id: CommandId) -> Result<Command> {
        debug!(id, "CommandQueue::mark_executing: called");
        let mut inner = self.inner.lock().await;
        self.transition(&mut inner, id, CommandStatus::Executing, None, None).await
    }

    /// Finalize a command; a second call on the same id is an invalid transition
    pub async fn mark_terminal(&self, id: CommandId, status: CommandStatus, result: Option<String>) -> Result<Command> {
        debug!(id, %status, "CommandQueue::mark_terminal: called");
        let mut inner = self.inner.lock().await;
        if !status.is_terminal() {
            let from = inner
                .commands
                .get(&id)
                .map(|c| c.status)
                .ok_or_else(|| UssdError::not_found("command", id))?;
            return Err(UssdError::InvalidTransition { id, from, to: status });
        }
        self.transition(&mut inner, id, status, result, None).await
    }

    /// Re-check eligibility against `sim` and claim the command, atomically
    ///
    /// Exactly one concurrent caller wins; the rest observe
    /// `InvalidTransition`. A command whose SIM is out of quota yields
    /// `QuotaExceeded`; any other failing predicate yields `NotEligible`.
    pub async fn begin_execution(&self, id: CommandId, sim: &Sim, auto: bool) -> Result<Command> {
        debug!(id, sim_id = %sim.id, auto, "CommandQueue::begin_execution: called");
        let mut inner = self.inner.lock().await;
        let command = inner
            .commands
            .get(&id)
            .ok_or_else(|| UssdError::not_found("command", id))?;

        match matcher::evaluate(command, sim) {
            Eligibility::Eligible => {
                self.transition(&mut inner, id, CommandStatus::Executing, None, Some(auto))
                    .await
            }
            Eligibility::NotPending => Err(UssdError::InvalidTransition {
                id,
                from: command.status,
                to: CommandStatus::Executing,
            }),
            Eligibility::QuotaExhausted => Err(UssdError::QuotaExceeded {
                sim_id: sim.id.clone(),
                used: sim.used_today,
                quota: sim.daily_quota,
            }),
            reason => Err(UssdError::NotEligible { id, reason }),
        }
    }

    /// Reject a pending command whose SIM has no quota left (`pending -> quota_exceeded`)
    pub async fn reject_over_quota(&self, id: CommandId, sim: &Sim, auto: bool) -> Result<Command> {
        debug!(id, sim_id = %sim.id, "CommandQueue::reject_over_quota: called");
        let mut inner = self.inner.lock().await;
        let command = inner
            .commands
            .get(&id)
            .ok_or_else(|| UssdError::not_found("command", id))?;

        match matcher::evaluate(command, sim) {
            Eligibility::QuotaExhausted => {
                let result = format!("Daily quota reached ({}/{})", sim.used_today, sim.daily_quota);
                self.transition(&mut inner, id, CommandStatus::QuotaExceeded, Some(result), Some(auto))
                    .await
            }
            Eligibility::NotPending => Err(UssdError::InvalidTransition {
                id,
                from: command.status,
                to: CommandStatus::QuotaExceeded,
            }),
            reason => Err(UssdError::NotEligible { id, reason }),
        }
    }

    /// Apply one lifecycle edge; persists before the in-memory record changes
    async fn transition(
        &self,
        inner: &mut QueueInner,
        id: CommandId,
        to: CommandStatus,
        result: Option<String>,
        auto: Option<bool>,
    ) -> Result<Command> {
        let current = inner
            .commands
            .get(&id)
            .ok_or_else(|| UssdError::not_found("command", id))?;
        let from = current.status;
        if !from.can_transition_to(to) {
            debug!(id, %from, %to, "CommandQueue::transition: rejected");
            return Err(UssdError::InvalidTransition { id, from, to });
        }

        let mut next = current.clone();
        next.status = to;
        if let Some(auto) = auto {
            next.auto_executed = auto;
        }
        if from == CommandStatus::Pending {
            next.executed_at = Some(Utc::now());
        }
        if to.is_terminal() {
            next.result = result;
        }

        if to == CommandStatus::Executing || auto.is_some() {
            self.state.persist_command(next.clone()).await?;
        } else {
            self.state
                .persist_command_status(id, to, next.result.clone(), next.executed_at)
                .await?;
        }
        inner.commands.insert(id, next.clone());

        debug!(id, %from, %to, "Command transitioned");
        self.emit(QueueEvent::StatusChanged { id, from, to });
        Ok(next)
    }

    // === Sessions ===

    /// Queue a multi-step session; the first input must be a USSD code
    pub async fn open_session(&self, device_id: &str, sim_id: &str, inputs: Vec<String>) -> Result<Session> {
        debug!(%device_id, %sim_id, step_count = inputs.len(), "CommandQueue::open_session: called");
        let inputs: Vec<String> = inputs.into_iter().map(|i| i.trim().to_string()).collect();
        match inputs.first() {
            None => return Err(UssdError::InvalidInput("session needs at least one step".to_string())),
            Some(first) if !USSD_CODE.is_match(first) => {
                return Err(UssdError::InvalidInput(format!("not a USSD code: {:?}", first)));
            }
            Some(_) => {}
        }
        if inputs.iter().any(|i| i.is_empty()) {
            return Err(UssdError::InvalidInput("session steps must not be empty".to_string()));
        }

        self.target_sim(device_id, sim_id).await?;

        let session = Session::new(device_id, sim_id, inputs);
        let mut inner = self.inner.lock().await;
        self.state.persist_session(session.clone()).await?;
        inner.sessions.insert(session.id.clone(), session.clone());
        drop(inner);

        info!(session_id = %session.id, %sim_id, steps = session.steps.len(), "Session queued");
        self.emit(QueueEvent::SessionUpdated {
            id: session.id.clone(),
            status: session.status,
        });
        Ok(session)
    }

    pub async fn get_session(&self, id: &str) -> Result<Session> {
        debug!(%id, "CommandQueue::get_session: called");
        self.inner
            .lock()
            .await
            .sessions
            .get(id)
            .cloned()
            .ok_or_else(|| UssdError::not_found("session", id))
    }

    /// All sessions, oldest first
    pub async fn list_sessions(&self) -> Vec<Session> {
        debug!("CommandQueue::list_sessions: called");
        let mut sessions: Vec<Session> = self.inner.lock().await.sessions.values().cloned().collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        sessions
    }

    /// Apply a state change to a session, persist it, then commit it
    pub(crate) async fn update_session<F>(&self, id: &str, change: F) -> Result<Session>
    where
        F: FnOnce(&mut Session) -> std::result::Result<(), SessionStepError>,
    {
        let mut inner = self.inner.lock().await;
        let current = inner
            .sessions
            .get(id)
            .ok_or_else(|| UssdError::not_found("session", id))?;

        let mut next = current.clone();
        change(&mut next)?;
        self.state.persist_session(next.clone()).await?;
        inner.sessions.insert(next.id.clone(), next.clone());
        drop(inner);

        self.emit(QueueEvent::SessionUpdated {
            id: next.id.clone(),
            status: next.status,
        });
        Ok(next)
    }

    // === Recovery ===

    /// Fail work left in flight by a previous process
    ///
    /// A command still `executing` at startup has no executor; leaving it
    /// would block it forever.
    pub async fn recover_interrupted(&self) -> Result<RecoveryStats> {
        debug!("CommandQueue::recover_interrupted: called");
        let mut stats = RecoveryStats::default();

        let executing: Vec<CommandId> = self
            .list(&CommandFilter::status(CommandStatus::Executing))
            .await
            .into_iter()
            .map(|c| c.id)
            .collect();
        for id in executing {
            self.mark_terminal(id, CommandStatus::Failed, Some(INTERRUPTED.to_string()))
                .await?;
            stats.commands_failed += 1;
        }

        let running: Vec<SessionId> = self
            .list_sessions()
            .await
            .into_iter()
            .filter(|s| s.status == SessionStatus::Running)
            .map(|s| s.id)
            .collect();
        for id in running {
            self.update_session(&id, |s| s.abort(INTERRUPTED)).await?;
            stats.sessions_failed += 1;
        }

        if stats.commands_failed + stats.sessions_failed > 0 {
            warn!(%stats, "Recovered interrupted work");
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Carrier, CommandType, Device};
    use crate::registry::{RegistryConfig, today};

    async fn setup() -> (CommandQueue, Arc<SimRegistry>, Device, Sim) {
        let state = StateManager::spawn_memory();
        let registry = Arc::new(SimRegistry::new(RegistryConfig::default(), state.clone()));
        let (device, _) = registry.register_device("Device-01", Some(0)).await.unwrap();
        let sim = registry
            .add_sim(&device.id, "+212600000001", Carrier::Inwi, Some(20))
            .await
            .unwrap();
        let queue = CommandQueue::new(registry.clone(), state);
        (queue, registry, device, sim)
    }

    fn request(sim: &Sim, code: &str) -> CommandRequest {
        CommandRequest {
            code: code.to_string(),
            command_type: CommandType::Check,
            carrier: sim.carrier,
            device_id: sim.device_id.clone(),
            sim_id: sim.id.clone(),
        }
    }

    #[tokio::test]
    async fn test_submit_round_trips_through_list() {
        let (queue, _, _, sim) = setup().await;
        let submitted = queue.submit(request(&sim, "*123#")).await.unwrap();

        let listed = queue.list(&CommandFilter::all()).await;
        assert_eq!(listed.len(), 1);
        let got = &listed[0];
        assert_eq!(got.id, submitted.id);
        assert_eq!(got.code, "*123#");
        assert_eq!(got.command_type, CommandType::Check);
        assert_eq!(got.carrier, Carrier::Inwi);
        assert_eq!(got.device_id, sim.device_id);
        assert_eq!(got.sim_id, sim.id);
        assert_eq!(got.status, CommandStatus::Pending);
    }

    #[tokio::test]
    async fn test_ids_are_ascending() {
        let (queue, _, _, sim) = setup().await;
        for code in ["*1#", "*2#", "*3#"] {
            queue.submit(request(&sim, code)).await.unwrap();
        }
        let ids: Vec<_> = queue.list(&CommandFilter::all()).await.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_submit_validation() {
        let (queue, _, _, sim) = setup().await;

        assert!(matches!(
            queue.submit(request(&sim, "123")).await,
            Err(UssdError::InvalidInput(_))
        ));

        let mut unknown_sim = request(&sim, "*123#");
        unknown_sim.sim_id = "sim-ghost".to_string();
        assert!(matches!(
            queue.submit(unknown_sim).await,
            Err(UssdError::NotFound { kind: "SIM", .. })
        ));

        let mut unknown_device = request(&sim, "*123#");
        unknown_device.device_id = "dev-ghost".to_string();
        assert!(matches!(
            queue.submit(unknown_device).await,
            Err(UssdError::NotFound { kind: "device", .. })
        ));
    }

    #[tokio::test]
    async fn test_carrier_mismatch_is_accepted_at_submit() {
        let (queue, _, _, sim) = setup().await;
        let mut req = request(&sim, "*123#");
        req.carrier = Carrier::Orange;
        let command = queue.submit(req).await.unwrap();
        assert_eq!(command.status, CommandStatus::Pending);
    }

    #[tokio::test]
    async fn test_mark_terminal_twice_keeps_first() {
        let (queue, _, _, sim) = setup().await;
        let command = queue.submit(request(&sim, "*123#")).await.unwrap();
        queue.mark_executing(command.id).await.unwrap();

        queue
            .mark_terminal(command.id, CommandStatus::Success, Some("Balance: 10 MAD".to_string()))
            .await
            .unwrap();
        let second = queue
            .mark_terminal(command.id, CommandStatus::Failed, Some("late".to_string()))
            .await;

        assert!(matches!(second, Err(UssdError::InvalidTransition { .. })));
        let stored = queue.get(command.id).await.unwrap();
        assert_eq!(stored.status, CommandStatus::Success);
        assert_eq!(stored.result.as_deref(), Some("Balance: 10 MAD"));
    }

    #[tokio::test]
    async fn test_mark_terminal_requires_terminal_status() {
        let (queue, _, _, sim) = setup().await;
        let command = queue.submit(request(&sim, "*123#")).await.unwrap();
        assert!(matches!(
            queue.mark_terminal(command.id, CommandStatus::Executing, None).await,
            Err(UssdError::InvalidTransition { .. })
        ));
        assert!(matches!(
            queue.mark_terminal(command.id, CommandStatus::Success, None).await,
            Err(UssdError::InvalidTransition { .. })
        ));
        assert_eq!(queue.get(command.id).await.unwrap().status, CommandStatus::Pending);
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let (queue, _, _, _) = setup().await;
        assert!(matches!(
            queue.mark_executing(42).await,
            Err(UssdError::NotFound { kind: "command", .. })
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_begin_execution_single_flight() {
        let (queue, registry, _, sim) = setup().await;
        let queue = Arc::new(queue);
        let command = queue.submit(request(&sim, "*123#")).await.unwrap();
        let snapshot = registry.get_sim(&sim.id).await.unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let queue = queue.clone();
                let snapshot = snapshot.clone();
                tokio::spawn(async move { queue.begin_execution(command.id, &snapshot, i % 2 == 0).await })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => winners += 1,
                Err(e) => assert!(e.is_invalid_transition(), "unexpected error: {}", e),
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(queue.get(command.id).await.unwrap().status, CommandStatus::Executing);
    }

    #[tokio::test]
    async fn test_reject_over_quota() {
        let (queue, registry, _, sim) = setup().await;
        let command = queue.submit(request(&sim, "*123#")).await.unwrap();
        for _ in 0..20 {
            registry.record_usage_on(&sim.id, today()).await.unwrap();
        }
        let exhausted = registry.get_sim(&sim.id).await.unwrap();

        assert!(matches!(
            queue.begin_execution(command.id, &exhausted, true).await,
            Err(UssdError::QuotaExceeded { .. })
        ));
        let rejected = queue.reject_over_quota(command.id, &exhausted, true).await.unwrap();
        assert_eq!(rejected.status, CommandStatus::QuotaExceeded);
        assert!(rejected.executed_at.is_some());
    }

    #[tokio::test]
    async fn test_events_are_broadcast() {
        let (queue, _, _, sim) = setup().await;
        let mut rx = queue.subscribe();

        let command = queue.submit(request(&sim, "*123#")).await.unwrap();
        queue.mark_executing(command.id).await.unwrap();

        assert_eq!(
            rx.recv().await.unwrap(),
            QueueEvent::Submitted {
                id: command.id,
                sim_id: sim.id.clone()
            }
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            QueueEvent::StatusChanged {
                id: command.id,
                from: CommandStatus::Pending,
                to: CommandStatus::Executing
            }
        );
    }

    #[tokio::test]
    async fn test_open_session_validation() {
        let (queue, _, _, sim) = setup().await;
        assert!(queue.open_session(&sim.device_id, &sim.id, vec![]).await.is_err());
        assert!(
            queue
                .open_session(&sim.device_id, &sim.id, vec!["1".to_string()])
                .await
                .is_err()
        );
        let session = queue
            .open_session(&sim.device_id, &sim.id, vec!["*100#".to_string(), "1".to_string()])
            .await
            .unwrap();
        assert_eq!(session.status, SessionStatus::Pending);
        assert_eq!(queue.list_sessions().await.len(), 1);
    }

    #[tokio::test]
    async fn test_recover_interrupted() {
        let (queue, _, _, sim) = setup().await;
        let stuck = queue.submit(request(&sim, "*123#")).await.unwrap();
        let waiting = queue.submit(request(&sim, "*124#")).await.unwrap();
        queue.mark_executing(stuck.id).await.unwrap();

        let session = queue
            .open_session(&sim.device_id, &sim.id, vec!["*100#".to_string()])
            .await
            .unwrap();
        queue.update_session(&session.id, |s| s.begin()).await.unwrap();

        let stats = queue.recover_interrupted().await.unwrap();
        assert_eq!(
            stats,
            RecoveryStats {
                commands_failed: 1,
                sessions_failed: 1
            }
        );
        assert_eq!(queue.get(stuck.id).await.unwrap().status, CommandStatus::Failed);
        assert_eq!(queue.get(waiting.id).await.unwrap().status, CommandStatus::Pending);
        assert_eq!(
            queue.get_session(&session.id).await.unwrap().status,
            SessionStatus::Failed
        );
    }
}
