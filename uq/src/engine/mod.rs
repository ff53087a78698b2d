//! Execution engine
//!
//! Drives a single command, or a multi-step session, from pending to a
//! terminal state through a [`UssdTransport`].

mod config;
mod core;
pub(crate) mod transport;

pub use config::TransportConfig;
pub use core::{ExecutionEngine, Trigger};
pub use transport::{SimulatedTransport, TransportError, UssdRequest, UssdTransport};
