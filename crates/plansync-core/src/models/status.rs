//! Derived sync status surface

use serde::{Deserialize, Serialize};
use std::fmt;

/// Aggregate sync state exposed to status consumers (a UI, a CLI, metrics)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// Queue is empty and the engine is at rest
    Idle,
    /// Operations are queued but no drain is in flight
    Pending,
    /// A drain cycle is in flight
    Syncing,
    /// At least one entry is parked as failed
    Error,
    /// Connectivity is down; the engine is waiting for an online signal
    Offline,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Pending => "pending",
            Self::Syncing => "syncing",
            Self::Error => "error",
            Self::Offline => "offline",
        };
        f.write_str(label)
    }
}

/// Snapshot of sync health, recomputed from queue contents and engine state.
///
/// Pure function of its inputs; never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatusInfo {
    pub state: SyncState,
    pub pending_count: u64,
    pub failed_count: u64,
    /// Completion time of the last successful remote apply (Unix ms)
    pub last_synced_at: Option<i64>,
    pub is_online: bool,
    /// Whether the most recent remote contact succeeded
    pub cloud_connected: bool,
    pub is_paused: bool,
}

impl SyncStatusInfo {
    /// Derive the aggregate state from queue counts and engine flags
    #[must_use]
    pub const fn derive_state(
        is_online: bool,
        is_draining: bool,
        pending_count: u64,
        failed_count: u64,
    ) -> SyncState {
        if !is_online {
            SyncState::Offline
        } else if is_draining {
            SyncState::Syncing
        } else if failed_count > 0 {
            SyncState::Error
        } else if pending_count > 0 {
            SyncState::Pending
        } else {
            SyncState::Idle
        }
    }
}
