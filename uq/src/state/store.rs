//! Storage boundary
//!
//! The scheduler core is storage-agnostic: it hydrates from a [`Store`] at
//! startup and writes through it after every transition. Any transactional
//! row store can implement the trait; [`MemoryStore`] backs tests and
//! ephemeral runs.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::{Command, CommandId, CommandStatus, Device, Session, Sim};

/// Errors raised by a store implementation
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("{kind} {id} does not exist in store")]
    Missing { kind: &'static str, id: String },

    #[error("Corrupt row in {table}: {reason}")]
    Corrupt { table: &'static str, reason: String },

    #[error("Store lock poisoned")]
    Poisoned,
}

/// Durable collaborator of the scheduler core
pub trait Store: Send {
    fn load_devices(&self) -> Result<Vec<Device>, StoreError>;
    fn load_sims(&self) -> Result<Vec<Sim>, StoreError>;
    fn load_commands(&self) -> Result<Vec<Command>, StoreError>;
    fn load_sessions(&self) -> Result<Vec<Session>, StoreError>;

    /// Insert or replace a device
    fn persist_device(&mut self, device: &Device) -> Result<(), StoreError>;
    /// Insert or replace a SIM
    fn persist_sim(&mut self, sim: &Sim) -> Result<(), StoreError>;
    fn persist_sim_usage(&mut self, sim_id: &str, used_today: u32) -> Result<(), StoreError>;
    /// Insert or replace a command
    fn persist_command(&mut self, command: &Command) -> Result<(), StoreError>;
    fn persist_command_status(
        &mut self,
        id: CommandId,
        status: CommandStatus,
        result: Option<&str>,
        executed_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError>;
    /// Insert or replace a session with all its steps
    fn persist_session(&mut self, session: &Session) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
struct MemoryTables {
    devices: BTreeMap<String, Device>,
    sims: BTreeMap<String, Sim>,
    commands: BTreeMap<CommandId, Command>,
    sessions: BTreeMap<String, Session>,
}

/// In-memory store; clones share the same tables
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<MemoryTables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut MemoryTables) -> Result<T, StoreError>) -> Result<T, StoreError> {
        let mut tables = self.tables.lock().map_err(|_| StoreError::Poisoned)?;
        f(&mut tables)
    }
}

impl Store for MemoryStore {
    fn load_devices(&self) -> Result<Vec<Device>, StoreError> {
        self.with(|t| Ok(t.devices.values().cloned().collect()))
    }

    fn load_sims(&self) -> Result<Vec<Sim>, StoreError> {
        self.with(|t| Ok(t.sims.values().cloned().collect()))
    }

    fn load_commands(&self) -> Result<Vec<Command>, StoreError> {
        self.with(|t| Ok(t.commands.values().cloned().collect()))
    }

    fn load_sessions(&self) -> Result<Vec<Session>, StoreError> {
        self.with(|t| Ok(t.sessions.values().cloned().collect()))
    }

    fn persist_device(&mut self, device: &Device) -> Result<(), StoreError> {
        self.with(|t| {
            t.devices.insert(device.id.clone(), device.clone());
            Ok(())
        })
    }

    fn persist_sim(&mut self, sim: &Sim) -> Result<(), StoreError> {
        self.with(|t| {
            t.sims.insert(sim.id.clone(), sim.clone());
            Ok(())
        })
    }

    fn persist_sim_usage(&mut self, sim_id: &str, used_today: u32) -> Result<(), StoreError> {
        self.with(|t| {
            let sim = t.sims.get_mut(sim_id).ok_or_else(|| StoreError::Missing {
                kind: "sim",
                id: sim_id.to_string(),
            })?;
            sim.used_today = used_today;
            Ok(())
        })
    }

    fn persist_command(&mut self, command: &Command) -> Result<(), StoreError> {
        self.with(|t| {
            t.commands.insert(command.id, command.clone());
            Ok(())
        })
    }

    fn persist_command_status(
        &mut self,
        id: CommandId,
        status: CommandStatus,
        result: Option<&str>,
        executed_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        self.with(|t| {
            let command = t.commands.get_mut(&id).ok_or_else(|| StoreError::Missing {
                kind: "command",
                id: id.to_string(),
            })?;
            command.status = status;
            command.result = result.map(str::to_string);
            command.executed_at = executed_at;
            Ok(())
        })
    }

    fn persist_session(&mut self, session: &Session) -> Result<(), StoreError> {
        self.with(|t| {
            t.sessions.insert(session.id.clone(), session.clone());
            Ok(())
        })
    }
}
