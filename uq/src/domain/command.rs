//! Command domain type and its lifecycle

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::carrier::{Carrier, CommandType};
use super::id::{CommandId, DeviceId, SimId};

/// Command lifecycle status
///
/// ```text
/// pending ──> executing ──> success
///    │            ├───────> failed
///    │            └───────> quota_exceeded
///    └──────────────────────> quota_exceeded
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    /// Queued, waiting for an eligible slot
    #[default]
    Pending,
    /// Claimed by exactly one executor
    Executing,
    Success,
    Failed,
    /// Rejected or rolled back because the SIM ran out of daily quota
    QuotaExceeded,
}

impl CommandStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::QuotaExceeded)
    }

    /// Whether `self -> next` is an edge of the lifecycle graph
    pub fn can_transition_to(self, next: CommandStatus) -> bool {
        use CommandStatus::*;
        matches!(
            (self, next),
            (Pending, Executing)
                | (Pending, QuotaExceeded)
                | (Executing, Success)
                | (Executing, Failed)
                | (Executing, QuotaExceeded)
        )
    }
}

impl std::fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Executing => write!(f, "executing"),
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
            Self::QuotaExceeded => write!(f, "quota_exceeded"),
        }
    }
}

impl std::str::FromStr for CommandStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "executing" => Ok(Self::Executing),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            "quota_exceeded" | "quota-exceeded" => Ok(Self::QuotaExceeded),
            _ => Err(format!("Unknown command status: {}", s)),
        }
    }
}

/// Fields supplied when submitting a command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRequest {
    pub code: String,
    #[serde(rename = "type")]
    pub command_type: CommandType,
    pub carrier: Carrier,
    pub device_id: DeviceId,
    pub sim_id: SimId,
}

/// A USSD command queued against one SIM
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub id: CommandId,
    pub code: String,
    #[serde(rename = "type")]
    pub command_type: CommandType,
    pub carrier: Carrier,
    pub device_id: DeviceId,
    pub sim_id: SimId,
    pub status: CommandStatus,
    /// Set when the scheduler (not a user) started the execution
    pub auto_executed: bool,
    pub result: Option<String>,
    pub executed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Command {
    /// Create a pending command with the given sequence number
    pub fn new(id: CommandId, request: CommandRequest) -> Self {
        Self {
            id,
            code: request.code,
            command_type: request.command_type,
            carrier: request.carrier,
            device_id: request.device_id,
            sim_id: request.sim_id,
            status: CommandStatus::Pending,
            auto_executed: false,
            result: None,
            executed_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Case-insensitive match against code, result and SIM id
    pub fn matches_search(&self, needle: &str) -> bool {
        let needle = needle.to_lowercase();
        self.code.to_lowercase().contains(&needle)
            || self.sim_id.to_lowercase().contains(&needle)
            || self
                .result
                .as_deref()
                .map(|r| r.to_lowercase().contains(&needle))
                .unwrap_or(false)
    }
}
