//! Command queue
//!
//! Owns every submitted command and session. Commands are kept in ascending
//! id order, which is the order the scheduler considers them in.

mod core;
mod filter;

pub(crate) use core::INTERRUPTED;
pub use core::{CommandQueue, EVENT_CHANNEL_CAPACITY, QueueEvent, RecoveryStats};
pub use filter::CommandFilter;
