//! plansync-core - Core library for Plansync
//!
//! Local-first sync for a coaching practice planner: every write lands in the
//! local store immediately and is mirrored into a durable queue; a background
//! engine drains the queue to a pluggable remote backend with deduplication,
//! dependency ordering, and retry backoff. Reads never wait on the network.

pub mod classify;
pub mod db;
pub mod engine;
pub mod error;
pub mod executor;
pub mod models;
pub mod store;
mod util;

pub use db::{Database, LocalStore, OperationQueue, SqliteLocalStore, SqliteOperationQueue};
pub use engine::{EngineConfig, SyncEngine};
pub use error::{Error, RemoteError, Result};
pub use executor::RemoteExecutor;
pub use models::{
    EntityKind, EntityRecord, OperationId, OperationKind, OperationStatus, SyncOperation,
    SyncState, SyncStatusInfo,
};
pub use store::{PushReport, SyncedStore};
