//! SIM registry
//!
//! Holds devices and per-SIM quota state. Usage increments and daily resets
//! take the SIM's own lock; executions additionally hold a per-SIM lease.

mod config;
mod core;

pub use config::RegistryConfig;
pub use core::{SimRegistry, today};
