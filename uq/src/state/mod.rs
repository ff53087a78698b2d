//! State management with actor pattern
//!
//! StateManager owns the Store and processes messages via channels,
//! providing thread-safe access to persistent state.

mod manager;
mod messages;
mod sqlite;
mod store;

pub use manager::StateManager;
pub use messages::{Snapshot, StateCommand, StateError, StateResponse};
pub use sqlite::SqliteStore;
pub use store::{MemoryStore, Store, StoreError};
