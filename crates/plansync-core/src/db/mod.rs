//! Database layer for Plansync

mod connection;
mod entity_store;
mod migrations;
mod queue;

pub use connection::Database;
pub use entity_store::{LocalStore, SqliteLocalStore};
pub use queue::{OperationQueue, SqliteOperationQueue, DEFAULT_MAX_RETRIES};
