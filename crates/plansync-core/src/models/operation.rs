//! Queued sync operation model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::Error;
use crate::models::EntityKind;

/// A unique identifier for a queue entry, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationId(Uuid);

impl OperationId {
    /// Create a new unique operation ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OperationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// The kind of mutation a queue entry carries to the remote
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl OperationKind {
    /// Stable string tag used in the database
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(Error::InvalidInput(format!("unknown operation: {other}"))),
        }
    }
}

/// Queue entry status. Successful entries are deleted, never marked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    Syncing,
    Failed,
}

impl OperationStatus {
    /// Stable string tag used in the database
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Syncing => "syncing",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "syncing" => Ok(Self::Syncing),
            "failed" => Ok(Self::Failed),
            other => Err(Error::InvalidInput(format!("unknown status: {other}"))),
        }
    }
}

/// One row in the durable sync queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOperation {
    /// Unique queue entry identifier
    pub id: OperationId,
    /// Collection the operation targets
    pub entity_kind: EntityKind,
    /// Identifier of the affected entity within its collection
    pub entity_id: String,
    /// Mutation kind carried to the remote
    pub operation: OperationKind,
    /// Full entity payload for create/update; `None` for delete
    pub data: Option<serde_json::Value>,
    /// Current queue status
    pub status: OperationStatus,
    /// Last mutation to this entry (Unix ms); refreshed on merge
    pub timestamp: i64,
    /// First enqueue time (Unix ms); immutable across merges
    pub created_at: i64,
    /// Number of recorded failed attempts
    pub retry_count: u32,
    /// Retry budget before the entry is parked as failed
    pub max_retries: u32,
    /// Message from the most recent failed attempt
    pub last_error: Option<String>,
    /// Time of the most recent attempt (Unix ms)
    pub last_attempt: Option<i64>,
}

impl SyncOperation {
    /// Age of the entry since first enqueue, in milliseconds
    #[must_use]
    pub const fn age_ms(&self, now: i64) -> i64 {
        now - self.created_at
    }

    /// Whether the entry still has automatic-retry budget left
    #[must_use]
    pub const fn has_retry_budget(&self) -> bool {
        self.retry_count < self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_id_unique() {
        assert_ne!(OperationId::new(), OperationId::new());
    }

    #[test]
    fn test_operation_id_parse() {
        let id = OperationId::new();
        let parsed: OperationId = id.as_str().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_kind_and_status_round_trip() {
        for kind in [
            OperationKind::Create,
            OperationKind::Update,
            OperationKind::Delete,
        ] {
            assert_eq!(kind.as_str().parse::<OperationKind>().unwrap(), kind);
        }
        for status in [
            OperationStatus::Pending,
            OperationStatus::Syncing,
            OperationStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<OperationStatus>().unwrap(), status);
        }
    }
}
