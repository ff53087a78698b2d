//! Eligibility matching
//!
//! Pure decision of whether a command may start on a SIM right now. The
//! scheduler and the manual execute path both go through [`evaluate`], so
//! the trigger source never changes the answer.

use serde::Serialize;

use crate::domain::{Command, CommandStatus, Sim};

/// Outcome of an eligibility check; the first failing predicate wins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Eligibility {
    Eligible,
    /// Command already claimed or finished
    NotPending,
    /// SIM is not the command's target
    WrongSim,
    /// SIM carrier differs from the command's carrier; never resolves
    CarrierMismatch,
    /// Daily quota used up; the command is rejected rather than retried
    QuotaExhausted,
}

impl Eligibility {
    pub fn is_eligible(self) -> bool {
        self == Self::Eligible
    }
}

impl std::fmt::Display for Eligibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Eligible => write!(f, "eligible"),
            Self::NotPending => write!(f, "command is not pending"),
            Self::WrongSim => write!(f, "SIM is not the command's target"),
            Self::CarrierMismatch => write!(f, "SIM carrier does not match command carrier"),
            Self::QuotaExhausted => write!(f, "SIM daily quota exhausted"),
        }
    }
}

/// Evaluate every eligibility predicate in order
pub fn evaluate(command: &Command, sim: &Sim) -> Eligibility {
    if command.status != CommandStatus::Pending {
        Eligibility::NotPending
    } else if sim.id != command.sim_id {
        Eligibility::WrongSim
    } else if sim.carrier != command.carrier {
        Eligibility::CarrierMismatch
    } else if sim.used_today >= sim.daily_quota {
        Eligibility::QuotaExhausted
    } else {
        Eligibility::Eligible
    }
}

/// True iff `command` may start on `sim` now
pub fn is_eligible(command: &Command, sim: &Sim) -> bool {
    evaluate(command, sim).is_eligible()
}
