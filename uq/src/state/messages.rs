//! State manager messages
//!
//! Commands and responses for the actor pattern.

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::oneshot;

use crate::domain::{Command, CommandId, CommandStatus, Device, Session, Sim};

/// Errors from state operations
#[derive(Debug, Error)]
pub enum StateError {
    #[error("Store error: {0}")]
    StoreError(String),

    #[error("Channel error")]
    ChannelError,
}

/// Response from state operations
pub type StateResponse<T> = Result<T, StateError>;

/// Everything the store holds, read in one pass at startup
#[derive(Debug, Default)]
pub struct Snapshot {
    pub devices: Vec<Device>,
    pub sims: Vec<Sim>,
    pub commands: Vec<Command>,
    pub sessions: Vec<Session>,
}

/// Commands sent to the StateManager actor
#[derive(Debug)]
pub enum StateCommand {
    Load {
        reply: oneshot::Sender<StateResponse<Snapshot>>,
    },

    PersistDevice {
        device: Device,
        reply: oneshot::Sender<StateResponse<()>>,
    },
    PersistSim {
        sim: Sim,
        reply: oneshot::Sender<StateResponse<()>>,
    },
    PersistSimUsage {
        sim_id: String,
        used_today: u32,
        reply: oneshot::Sender<StateResponse<()>>,
    },
    PersistCommand {
        command: Command,
        reply: oneshot::Sender<StateResponse<()>>,
    },
    PersistCommandStatus {
        id: CommandId,
        status: CommandStatus,
        result: Option<String>,
        executed_at: Option<DateTime<Utc>>,
        reply: oneshot::Sender<StateResponse<()>>,
    },
    PersistSession {
        session: Session,
        reply: oneshot::Sender<StateResponse<()>>,
    },

    // Shutdown
    Shutdown,
}
