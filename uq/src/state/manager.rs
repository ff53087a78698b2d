//! StateManager - actor that owns the Store
//!
//! Processes commands via channels for thread-safe access to persistent state.

use std::path::Path;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::domain::{Command, CommandId, CommandStatus, Device, Session, Sim};

use super::messages::{Snapshot, StateCommand, StateError, StateResponse};
use super::sqlite::SqliteStore;
use super::store::{MemoryStore, Store, StoreError};

/// Handle to send commands to the StateManager
#[derive(Clone)]
pub struct StateManager {
    tx: mpsc::Sender<StateCommand>,
}

impl StateManager {
    /// Spawn a new StateManager actor owning `store`
    pub fn spawn(store: Box<dyn Store>) -> Self {
        debug!("spawn: called");
        let (tx, rx) = mpsc::channel(256);

        tokio::spawn(actor_loop(store, rx));

        info!("StateManager spawned");
        Self { tx }
    }

    /// Spawn over a SQLite database file
    pub fn spawn_sqlite(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        debug!(path = %path.as_ref().display(), "spawn_sqlite: called");
        let store = SqliteStore::open(path)?;
        Ok(Self::spawn(Box::new(store)))
    }

    /// Spawn over a fresh in-memory store
    pub fn spawn_memory() -> Self {
        debug!("spawn_memory: called");
        Self::spawn(Box::new(MemoryStore::new()))
    }

    async fn call<T>(&self, build: impl FnOnce(oneshot::Sender<StateResponse<T>>) -> StateCommand) -> StateResponse<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| StateError::ChannelError)?;
        reply_rx.await.map_err(|_| StateError::ChannelError)?
    }

    /// Read every stored record
    pub async fn load(&self) -> StateResponse<Snapshot> {
        debug!("load: called");
        self.call(|reply| StateCommand::Load { reply }).await
    }

    pub async fn persist_device(&self, device: Device) -> StateResponse<()> {
        debug!(device_id = %device.id, "persist_device: called");
        self.call(|reply| StateCommand::PersistDevice { device, reply }).await
    }

    pub async fn persist_sim(&self, sim: Sim) -> StateResponse<()> {
        debug!(sim_id = %sim.id, used_today = sim.used_today, "persist_sim: called");
        self.call(|reply| StateCommand::PersistSim { sim, reply }).await
    }

    pub async fn persist_sim_usage(&self, sim_id: &str, used_today: u32) -> StateResponse<()> {
        debug!(%sim_id, used_today, "persist_sim_usage: called");
        let sim_id = sim_id.to_string();
        self.call(|reply| StateCommand::PersistSimUsage {
            sim_id,
            used_today,
            reply,
        })
        .await
    }

    pub async fn persist_command(&self, command: Command) -> StateResponse<()> {
        debug!(command_id = command.id, status = %command.status, "persist_command: called");
        self.call(|reply| StateCommand::PersistCommand { command, reply }).await
    }

    pub async fn persist_command_status(
        &self,
        id: CommandId,
        status: CommandStatus,
        result: Option<String>,
        executed_at: Option<DateTime<Utc>>,
    ) -> StateResponse<()> {
        debug!(command_id = id, %status, "persist_command_status: called");
        self.call(|reply| StateCommand::PersistCommandStatus {
            id,
            status,
            result,
            executed_at,
            reply,
        })
        .await
    }

    pub async fn persist_session(&self, session: Session) -> StateResponse<()> {
        debug!(session_id = %session.id, status = %session.status, "persist_session: called");
        self.call(|reply| StateCommand::PersistSession { session, reply }).await
    }

    /// Stop the actor; pending replies are still delivered
    pub async fn shutdown(&self) {
        debug!("shutdown: called");
        if self.tx.send(StateCommand::Shutdown).await.is_err() {
            debug!("shutdown: actor already gone");
        }
    }
}

fn load_snapshot(store: &dyn Store) -> Result<Snapshot, StoreError> {
    Ok(Snapshot {
        devices: store.load_devices()?,
        sims: store.load_sims()?,
        commands: store.load_commands()?,
        sessions: store.load_sessions()?,
    })
}

fn to_state<T>(result: Result<T, StoreError>) -> StateResponse<T> {
    result.map_err(|e| {
        warn!(error = %e, "store operation failed");
        StateError::StoreError(e.to_string())
    })
}

async fn actor_loop(mut store: Box<dyn Store>, mut rx: mpsc::Receiver<StateCommand>) {
    debug!("StateManager actor started");

    while let Some(cmd) = rx.recv().await {
        match cmd {
            StateCommand::Load { reply } => {
                debug!("actor_loop: Load command");
                let _ = reply.send(to_state(load_snapshot(store.as_ref())));
            }

            StateCommand::PersistDevice { device, reply } => {
                debug!(device_id = %device.id, "actor_loop: PersistDevice command");
                let _ = reply.send(to_state(store.persist_device(&device)));
            }

            StateCommand::PersistSim { sim, reply } => {
                debug!(sim_id = %sim.id, "actor_loop: PersistSim command");
                let _ = reply.send(to_state(store.persist_sim(&sim)));
            }

            StateCommand::PersistSimUsage {
                sim_id,
                used_today,
                reply,
            } => {
                debug!(%sim_id, used_today, "actor_loop: PersistSimUsage command");
                let _ = reply.send(to_state(store.persist_sim_usage(&sim_id, used_today)));
            }

            StateCommand::PersistCommand { command, reply } => {
                debug!(command_id = command.id, "actor_loop: PersistCommand command");
                let _ = reply.send(to_state(store.persist_command(&command)));
            }

            StateCommand::PersistCommandStatus {
                id,
                status,
                result,
                executed_at,
                reply,
            } => {
                debug!(command_id = id, %status, "actor_loop: PersistCommandStatus command");
                let _ = reply.send(to_state(store.persist_command_status(
                    id,
                    status,
                    result.as_deref(),
                    executed_at,
                )));
            }

            StateCommand::PersistSession { session, reply } => {
                debug!(session_id = %session.id, "actor_loop: PersistSession command");
                let _ = reply.send(to_state(store.persist_session(&session)));
            }

            StateCommand::Shutdown => {
                info!("StateManager shutting down");
                break;
            }
        }
    }

    debug!("StateManager actor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Carrier;
    use chrono::NaiveDate;

    #[tokio::test]
    async fn test_persist_then_load() {
        let store = MemoryStore::new();
        let state = StateManager::spawn(Box::new(store.clone()));

        let device = Device::new("Device-01", 1);
        let sim = Sim::new(
            device.id.clone(),
            "+212600000001",
            Carrier::Inwi,
            20,
            NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
        );
        state.persist_device(device.clone()).await.unwrap();
        state.persist_sim(sim.clone()).await.unwrap();
        state.persist_sim_usage(&sim.id, 3).await.unwrap();

        let snapshot = state.load().await.unwrap();
        assert_eq!(snapshot.devices, vec![device]);
        assert_eq!(snapshot.sims[0].used_today, 3);
        assert!(snapshot.commands.is_empty());
    }

    #[tokio::test]
    async fn test_store_errors_are_surfaced() {
        let state = StateManager::spawn_memory();
        let err = state.persist_sim_usage("sim-missing", 1).await.unwrap_err();
        assert!(matches!(err, StateError::StoreError(_)));
    }

    #[tokio::test]
    async fn test_calls_after_shutdown_fail() {
        let state = StateManager::spawn_memory();
        state.shutdown().await;
        tokio::task::yield_now().await;

        let err = state.load().await.unwrap_err();
        assert!(matches!(err, StateError::ChannelError));
    }
}
