//! Scheduler loop
//!
//! Polls the pending queue on a fixed tick, matches commands against their
//! SIMs and hands eligible ones to the execution engine, one per SIM per
//! cycle, concurrently across SIMs.

mod config;
mod core;
mod stats;

pub use config::SchedulerConfig;
pub use core::{RunContext, RunHandle, Scheduler, run_context};
pub use stats::{CycleReport, SchedulerStats};
