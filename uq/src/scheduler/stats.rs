//! Per-cycle and cumulative scheduler statistics

use serde::Serialize;

/// What one scheduler cycle did
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    /// SIMs whose daily counter was reset at the start of the cycle
    pub reset: usize,
    /// Pending commands considered
    pub scanned: usize,
    /// Executions started (including over-quota rejections)
    pub dispatched: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub quota_exceeded: usize,
    /// Commands claimed by another execution first
    pub races_lost: usize,
    /// Executions that ended in an unexpected error
    pub errors: usize,
    /// Orphaned commands and sessions failed by the sweep
    pub orphans: usize,
}

impl CycleReport {
    pub fn is_idle(&self) -> bool {
        self.dispatched == 0 && self.reset == 0 && self.orphans == 0
    }
}

/// Totals across every cycle since the scheduler was created
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub cycles: u64,
    pub total_dispatched: u64,
    pub total_succeeded: u64,
    pub total_failed: u64,
    pub total_quota_exceeded: u64,
    pub total_races_lost: u64,
    pub total_errors: u64,
    pub total_orphans: u64,
    pub peak_dispatched: usize,
}

impl SchedulerStats {
    pub fn record(&mut self, report: &CycleReport) {
        self.cycles += 1;
        self.total_dispatched += report.dispatched as u64;
        self.total_succeeded += report.succeeded as u64;
        self.total_failed += report.failed as u64;
        self.total_quota_exceeded += report.quota_exceeded as u64;
        self.total_races_lost += report.races_lost as u64;
        self.total_errors += report.errors as u64;
        self.total_orphans += report.orphans as u64;
        self.peak_dispatched = self.peak_dispatched.max(report.dispatched);
    }
}
