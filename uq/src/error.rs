//! Scheduler error taxonomy

use thiserror::Error;

use crate::domain::{CommandId, CommandStatus, SessionStepError};
use crate::matcher::Eligibility;
use crate::state::StateError;

/// Errors surfaced by the registry, queue, engine and scheduler
#[derive(Debug, Error)]
pub enum UssdError {
    /// Referenced command, SIM, device or session is absent
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Requested state change is not an edge of the lifecycle
    #[error("Invalid transition for command {id}: {from} -> {to}")]
    InvalidTransition {
        id: CommandId,
        from: CommandStatus,
        to: CommandStatus,
    },

    /// SIM has no daily quota left
    #[error("Daily quota exceeded for SIM {sim_id} ({used}/{quota})")]
    QuotaExceeded { sim_id: String, used: u32, quota: u32 },

    /// Command cannot start for a reason other than quota
    #[error("Command {id} is not eligible: {reason}")]
    NotEligible { id: CommandId, reason: Eligibility },

    /// Transport or simulation failure
    #[error("Execution failed: {0}")]
    ExecutionFailure(String),

    /// Rejected submission
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Session driven out of order
    #[error("Session error: {0}")]
    Session(#[from] SessionStepError),

    #[error(transparent)]
    State(#[from] StateError),
}

impl UssdError {
    pub(crate) fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// True for errors automatic paths swallow (a lost race)
    pub fn is_invalid_transition(&self) -> bool {
        matches!(self, Self::InvalidTransition { .. })
    }

    /// True when the store rejected or never received a write
    pub fn is_store_failure(&self) -> bool {
        matches!(self, Self::State(_))
    }
}

pub type Result<T, E = UssdError> = std::result::Result<T, E>;
