//! Data models for Plansync

mod entity;
mod operation;
mod status;

pub use entity::{EntityKind, EntityRecord};
pub use operation::{OperationId, OperationKind, OperationStatus, SyncOperation};
pub use status::{SyncState, SyncStatusInfo};
