//! Multi-step USSD session
//!
//! A session is an ordered list of inputs sent over one USSD dialogue
//! (`*100#` → menu → `1` → menu → `2` → final response). Steps run strictly
//! in order and the first failure halts the session; later steps stay
//! `Pending` and are never attempted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::{DeviceId, SessionId, SimId, generate_id};

/// State of one session step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StepState {
    #[default]
    Pending,
    Executing,
    Completed { response: String },
    Failed { reason: String },
}

impl StepState {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Executing => "executing",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
        }
    }
}

/// One input of a session and what became of it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStep {
    pub input: String,
    pub state: StepState,
}

/// Aggregate session status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Errors from driving a session out of order
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionStepError {
    #[error("session is {0}, not pending")]
    NotPending(SessionStatus),

    #[error("session is {0}, not running")]
    NotRunning(SessionStatus),

    #[error("step {0} is not executing")]
    StepNotExecuting(usize),

    #[error("session has no steps left")]
    Exhausted,
}

/// An ordered multi-step USSD interaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub device_id: DeviceId,
    pub sim_id: SimId,
    pub steps: Vec<SessionStep>,
    pub status: SessionStatus,
    /// Index of the step being (or next to be) executed
    pub current_step: usize,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(device_id: impl Into<DeviceId>, sim_id: impl Into<SimId>, inputs: Vec<String>) -> Self {
        Self {
            id: generate_id("ses", None),
            device_id: device_id.into(),
            sim_id: sim_id.into(),
            steps: inputs
                .into_iter()
                .map(|input| SessionStep {
                    input,
                    state: StepState::Pending,
                })
                .collect(),
            status: SessionStatus::Pending,
            current_step: 0,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Move a pending session to running
    pub fn begin(&mut self) -> Result<(), SessionStepError> {
        match self.status {
            SessionStatus::Pending => {
                self.status = SessionStatus::Running;
                Ok(())
            }
            other => Err(SessionStepError::NotPending(other)),
        }
    }

    /// Mark the current step executing and return its index and input
    pub fn start_step(&mut self) -> Result<(usize, String), SessionStepError> {
        if self.status != SessionStatus::Running {
            return Err(SessionStepError::NotRunning(self.status));
        }
        let index = self.current_step;
        let step = self.steps.get_mut(index).ok_or(SessionStepError::Exhausted)?;
        step.state = StepState::Executing;
        Ok((index, step.input.clone()))
    }

    /// Complete the executing step; completes the session after the last one
    pub fn complete_step(&mut self, response: impl Into<String>) -> Result<(), SessionStepError> {
        let index = self.executing_index()?;
        self.steps[index].state = StepState::Completed {
            response: response.into(),
        };
        self.current_step = index + 1;
        if self.current_step == self.steps.len() {
            self.finish(SessionStatus::Completed);
        }
        Ok(())
    }

    /// Fail the executing step and halt the session
    pub fn fail_step(&mut self, reason: impl Into<String>) -> Result<(), SessionStepError> {
        let index = self.executing_index()?;
        self.steps[index].state = StepState::Failed { reason: reason.into() };
        self.finish(SessionStatus::Failed);
        Ok(())
    }

    /// Fail a running session at its current step, whatever that step's state
    pub fn abort(&mut self, reason: impl Into<String>) -> Result<(), SessionStepError> {
        if self.status != SessionStatus::Running {
            return Err(SessionStepError::NotRunning(self.status));
        }
        if let Some(step) = self.steps.get_mut(self.current_step) {
            step.state = StepState::Failed { reason: reason.into() };
        }
        self.finish(SessionStatus::Failed);
        Ok(())
    }

    /// Response of the last completed step, if any
    pub fn last_response(&self) -> Option<&str> {
        self.steps.iter().rev().find_map(|s| match &s.state {
            StepState::Completed { response } => Some(response.as_str()),
            _ => None,
        })
    }

    fn executing_index(&self) -> Result<usize, SessionStepError> {
        if self.status != SessionStatus::Running {
            return Err(SessionStepError::NotRunning(self.status));
        }
        match self.steps.get(self.current_step) {
            Some(step) if step.state == StepState::Executing => Ok(self.current_step),
            _ => Err(SessionStepError::StepNotExecuting(self.current_step)),
        }
    }

    fn finish(&mut self, status: SessionStatus) {
        self.status = status;
        self.finished_at = Some(Utc::now());
    }
}
