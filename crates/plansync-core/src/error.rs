//! Error types for plansync-core

use thiserror::Error;

/// Result type alias using plansync-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in plansync-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// `SQLite` error from the durable queue or local store
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Entity or queue entry not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The local write succeeded but the sync queue rejected the operation.
    /// The caller's data is safe locally; sync may fall behind until the
    /// queue storage recovers.
    #[error("Local write succeeded but sync enqueue failed: {0}")]
    Enqueue(String),
}

/// Errors surfaced by a [`RemoteExecutor`](crate::executor::RemoteExecutor).
///
/// The engine classifies these into transient (retry), neutral (requeue
/// without penalty), and permanent (park as failed) outcomes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Connection-level failure before an HTTP status was obtained
    #[error("Network error: {0}")]
    Network(String),

    /// HTTP-like failure with a status code
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// The remote rejected the payload
    #[error("Validation error: {0}")]
    Validation(String),

    /// The remote detected a conflicting concurrent change
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The remote has no such entity
    #[error("Remote entity not found: {0}")]
    NotFound(String),

    /// The session is not authorized for this operation
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The request was cancelled (engine stopped mid-flight)
    #[error("Request cancelled")]
    Cancelled,

    /// The per-operation timeout fired
    #[error("Request timed out")]
    Timeout,

    /// The engine started before the identity/session was ready
    #[error("Identity not ready")]
    IdentityNotReady,

    /// Anything else the executor could not classify
    #[error("{0}")]
    Other(String),
}

impl RemoteError {
    /// Neutral outcomes are requeued without touching the retry count —
    /// they say nothing about the operation itself.
    #[must_use]
    pub const fn is_neutral(&self) -> bool {
        matches!(
            self,
            Self::Cancelled | Self::Timeout | Self::IdentityNotReady
        )
    }
}
