//! ussdq - USSD command scheduler
//!
//! Queues USSD (carrier menu) commands against a pool of SIMs, each bound to
//! a carrier and capped by a daily usage quota, and decides which queued
//! command may run next.
//!
//! # Core Concepts
//!
//! - **Single-flight per command**: `pending -> executing` is one atomic step;
//!   concurrent claimants observe `InvalidTransition`
//! - **Single writer per SIM**: usage increments and daily resets share the
//!   SIM's lock, and executions hold a per-SIM lease
//! - **Increment is authoritative**: a success that cannot record usage
//!   finalizes as `quota_exceeded`
//! - **Sessions halt on first failure**: later steps are never attempted
//!
//! # Modules
//!
//! - [`domain`] - Devices, SIMs, commands and sessions
//! - [`registry`] - SIM registry with per-SIM quota state
//! - [`queue`] - Ordered command queue and sessions
//! - [`matcher`] - Pure eligibility decision
//! - [`engine`] - Command and session execution over a transport
//! - [`scheduler`] - Periodic dispatch loop
//! - [`state`] - Store actor and store implementations
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod app;
pub mod cli;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod matcher;
pub mod overview;
pub mod queue;
pub mod registry;
pub mod scheduler;
pub mod state;

// Re-export commonly used types
pub use app::App;
pub use config::{Config, StorageConfig};
pub use domain::{
    Carrier, Command, CommandId, CommandRequest, CommandStatus, CommandType, Device, DeviceStatus, Session,
    SessionStatus, Sim, StepState,
};
pub use engine::{ExecutionEngine, SimulatedTransport, TransportConfig, Trigger, UssdTransport};
pub use error::{Result, UssdError};
pub use matcher::{Eligibility, evaluate, is_eligible};
pub use overview::Overview;
pub use queue::{CommandFilter, CommandQueue, QueueEvent};
pub use registry::{RegistryConfig, SimRegistry};
pub use scheduler::{CycleReport, RunContext, RunHandle, Scheduler, SchedulerConfig, SchedulerStats, run_context};
pub use state::{MemoryStore, SqliteStore, StateManager, Store};
