//! Remote executor boundary

use async_trait::async_trait;

use crate::error::RemoteError;
use crate::models::SyncOperation;

/// The single function the engine needs from the remote backend.
///
/// Protocol-agnostic by design: REST, RPC, or anything else. Implementations
/// must be idempotent-friendly (safe to retry the same logical operation) and
/// surface failures as [`RemoteError`] so the engine can classify them.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Apply one queued operation to the remote backend
    async fn apply(&self, operation: &SyncOperation) -> Result<(), RemoteError>;
}
