//! Dashboard overview statistics

use chrono::{Local, NaiveDate};
use serde::Serialize;

use crate::domain::{Command, CommandStatus, Device, Sim};

/// Counts shown on the dashboard overview
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct Overview {
    pub total_devices: usize,
    /// Devices currently online
    pub active_devices: usize,
    /// SIMs on online devices
    pub connected_sims: usize,
    pub total_sims: usize,
    /// SIMs with no quota left today
    pub exhausted_sims: usize,
    /// SIMs whose usage ran past the quota
    pub overrun_sims: usize,
    /// Commands currently executing
    pub running_commands: usize,
    /// Successful commands executed today (local date)
    pub completed_today: usize,
    pub pending: usize,
    pub failed: usize,
    pub quota_exceeded: usize,
    pub total_commands: usize,
}

impl Overview {
    pub fn compute(devices: &[Device], sims: &[Sim], commands: &[Command], today: NaiveDate) -> Self {
        let online: Vec<&str> = devices
            .iter()
            .filter(|d| d.is_online())
            .map(|d| d.id.as_str())
            .collect();
        let count = |status: CommandStatus| commands.iter().filter(|c| c.status == status).count();

        Self {
            total_devices: devices.len(),
            active_devices: online.len(),
            connected_sims: sims
                .iter()
                .filter(|s| online.contains(&s.device_id.as_str()))
                .count(),
            total_sims: sims.len(),
            exhausted_sims: sims.iter().filter(|s| !s.has_quota()).count(),
            overrun_sims: sims.iter().filter(|s| s.overrun() > 0).count(),
            running_commands: count(CommandStatus::Executing),
            completed_today: commands
                .iter()
                .filter(|c| c.status == CommandStatus::Success)
                .filter(|c| c.executed_at.is_some_and(|at| at.with_timezone(&Local).date_naive() == today))
                .count(),
            pending: count(CommandStatus::Pending),
            failed: count(CommandStatus::Failed),
            quota_exceeded: count(CommandStatus::QuotaExceeded),
            total_commands: commands.len(),
        }
    }
}
