//! Durable operation queue over `SQLite`

use rusqlite::{params, types::Type, Row, Transaction};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::models::{EntityKind, OperationId, OperationKind, OperationStatus, SyncOperation};
use crate::util::now_ms;

use super::Database;

/// Default retry budget for new queue entries
pub const DEFAULT_MAX_RETRIES: u32 = 5;

const COLUMNS: &str = "id, entity_kind, entity_id, operation, data, status, \
                       timestamp, created_at, retry_count, max_retries, last_error, last_attempt";

/// Trait for the durable, per-identity queue of pending mutations
pub trait OperationQueue: Send + Sync {
    /// Enqueue a mutation, merging into any existing pending entry for the
    /// same entity. Returns the id of the surviving entry (or of the removed
    /// one when a create/delete pair cancels out).
    fn enqueue(
        &self,
        kind: EntityKind,
        entity_id: &str,
        operation: OperationKind,
        data: Option<Value>,
    ) -> Result<OperationId>;

    /// All pending entries, oldest first
    fn pending(&self) -> Result<Vec<SyncOperation>>;

    /// All failed entries, oldest first
    fn failed(&self) -> Result<Vec<SyncOperation>>;

    /// Every entry regardless of status, oldest first
    fn all(&self) -> Result<Vec<SyncOperation>>;

    /// (pending, failed) entry counts
    fn counts(&self) -> Result<(u64, u64)>;

    /// Most recent entry for an entity, any status
    fn find_by_entity(&self, kind: EntityKind, entity_id: &str) -> Result<Option<SyncOperation>>;

    /// Transition an entry to syncing before the remote call
    fn mark_syncing(&self, id: &OperationId) -> Result<()>;

    /// Remove an entry after a successful remote apply
    fn mark_completed(&self, id: &OperationId) -> Result<()>;

    /// Record a transient failure: back to pending with `retry_count + 1`
    fn mark_retry(&self, id: &OperationId, error: &str) -> Result<()>;

    /// Park an entry as failed; `retry_count` is left untouched
    fn mark_failed(&self, id: &OperationId, error: &str) -> Result<()>;

    /// Neutral reset to pending with no retry bookkeeping (cancellation,
    /// timeout, identity-not-ready)
    fn requeue(&self, id: &OperationId) -> Result<()>;

    /// Reset every syncing entry to pending; returns how many were reset.
    /// Used on offline aborts and on startup after a crash.
    fn requeue_in_flight(&self) -> Result<u64>;

    /// Operator requeue of a failed entry with a fresh retry budget
    fn requeue_failed(&self, id: &OperationId) -> Result<()>;

    /// Operator requeue of every failed entry; returns how many moved
    fn requeue_all_failed(&self) -> Result<u64>;

    /// Remove an entry regardless of status
    fn remove(&self, id: &OperationId) -> Result<()>;

    /// Drop every entry for this owner; returns how many were removed
    fn clear(&self) -> Result<u64>;
}

/// `SQLite` implementation of [`OperationQueue`], scoped to one owner identity
pub struct SqliteOperationQueue {
    db: Database,
    owner: String,
    max_retries: u32,
}

impl SqliteOperationQueue {
    /// Create a queue view for the given owner identity
    pub fn new(db: Database, owner: impl Into<String>) -> Self {
        Self {
            db,
            owner: owner.into(),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Override the retry budget assigned to new entries
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// The owner identity this view is scoped to
    pub fn owner(&self) -> &str {
        &self.owner
    }

    fn insert_new(
        &self,
        tx: &Transaction<'_>,
        kind: EntityKind,
        entity_id: &str,
        operation: OperationKind,
        data: Option<&Value>,
    ) -> Result<OperationId> {
        let id = OperationId::new();
        let now = now_ms();
        tx.execute(
            "INSERT INTO sync_queue
                (id, owner, entity_kind, entity_id, operation, data, status,
                 timestamp, created_at, retry_count, max_retries)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', ?7, ?7, 0, ?8)",
            params![
                id.as_str(),
                self.owner,
                kind.as_str(),
                entity_id,
                operation.as_str(),
                data,
                now,
                self.max_retries,
            ],
        )?;
        Ok(id)
    }

    fn merge_into(
        &self,
        tx: &Transaction<'_>,
        existing: &SyncOperation,
        incoming: OperationKind,
        data: Option<&Value>,
    ) -> Result<OperationId> {
        let (operation, data) = match (existing.operation, incoming) {
            // Entity never reached the remote; keep it a create with the
            // freshest payload
            (OperationKind::Create, OperationKind::Update | OperationKind::Create) => {
                (OperationKind::Create, data)
            }
            // Create followed by delete cancels out entirely
            (OperationKind::Create, OperationKind::Delete) => {
                tx.execute(
                    "DELETE FROM sync_queue WHERE id = ?1 AND owner = ?2",
                    params![existing.id.as_str(), self.owner],
                )?;
                return Ok(existing.id);
            }
            (OperationKind::Update, OperationKind::Update | OperationKind::Create) => {
                (OperationKind::Update, data)
            }
            (OperationKind::Update, OperationKind::Delete) => (OperationKind::Delete, None),
            // Recreating an entity with a pending delete is a known footgun
            // in the source design; the incoming operation replaces the entry
            (OperationKind::Delete, _) => {
                tracing::warn!(
                    entity_kind = %existing.entity_kind,
                    entity_id = %existing.entity_id,
                    incoming = %incoming,
                    "replacing pending delete; remote may already be deleting this entity"
                );
                (incoming, data)
            }
        };

        tx.execute(
            "UPDATE sync_queue
             SET operation = ?1, data = ?2, timestamp = ?3
             WHERE id = ?4 AND owner = ?5",
            params![
                operation.as_str(),
                data,
                now_ms(),
                existing.id.as_str(),
                self.owner
            ],
        )?;
        Ok(existing.id)
    }

    fn list_by_status(&self, status: OperationStatus) -> Result<Vec<SyncOperation>> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM sync_queue
             WHERE owner = ?1 AND status = ?2
             ORDER BY created_at ASC, rowid ASC"
        ))?;
        let rows = stmt
            .query_map(params![self.owner, status.as_str()], parse_operation)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

impl OperationQueue for SqliteOperationQueue {
    fn enqueue(
        &self,
        kind: EntityKind,
        entity_id: &str,
        operation: OperationKind,
        data: Option<Value>,
    ) -> Result<OperationId> {
        let mut conn = self.db.lock()?;
        let tx = conn.transaction()?;

        let existing = tx
            .query_row(
                &format!(
                    "SELECT {COLUMNS} FROM sync_queue
                     WHERE owner = ?1 AND entity_kind = ?2 AND entity_id = ?3
                       AND status = 'pending'"
                ),
                params![self.owner, kind.as_str(), entity_id],
                parse_operation,
            )
            .map(Some)
            .or_else(|err| match err {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        let id = match existing {
            Some(entry) => self.merge_into(&tx, &entry, operation, data.as_ref())?,
            None => self.insert_new(&tx, kind, entity_id, operation, data.as_ref())?,
        };

        tx.commit()?;
        tracing::debug!(%kind, entity_id, %operation, "enqueued sync operation");
        Ok(id)
    }

    fn pending(&self) -> Result<Vec<SyncOperation>> {
        self.list_by_status(OperationStatus::Pending)
    }

    fn failed(&self) -> Result<Vec<SyncOperation>> {
        self.list_by_status(OperationStatus::Failed)
    }

    fn all(&self) -> Result<Vec<SyncOperation>> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM sync_queue WHERE owner = ?1 ORDER BY created_at ASC, rowid ASC"
        ))?;
        let rows = stmt
            .query_map(params![self.owner], parse_operation)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn counts(&self) -> Result<(u64, u64)> {
        let conn = self.db.lock()?;
        let (pending, failed) = conn.query_row(
            "SELECT
                COUNT(*) FILTER (WHERE status = 'pending'),
                COUNT(*) FILTER (WHERE status = 'failed')
             FROM sync_queue WHERE owner = ?1",
            params![self.owner],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
        )?;
        Ok((
            u64::try_from(pending).unwrap_or(0),
            u64::try_from(failed).unwrap_or(0),
        ))
    }

    fn find_by_entity(&self, kind: EntityKind, entity_id: &str) -> Result<Option<SyncOperation>> {
        let conn = self.db.lock()?;
        let result = conn.query_row(
            &format!(
                "SELECT {COLUMNS} FROM sync_queue
                 WHERE owner = ?1 AND entity_kind = ?2 AND entity_id = ?3
                 ORDER BY timestamp DESC LIMIT 1"
            ),
            params![self.owner, kind.as_str(), entity_id],
            parse_operation,
        );
        match result {
            Ok(entry) => Ok(Some(entry)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn mark_syncing(&self, id: &OperationId) -> Result<()> {
        let conn = self.db.lock()?;
        conn.execute(
            "UPDATE sync_queue SET status = 'syncing' WHERE id = ?1 AND owner = ?2",
            params![id.as_str(), self.owner],
        )?;
        Ok(())
    }

    fn mark_completed(&self, id: &OperationId) -> Result<()> {
        let conn = self.db.lock()?;
        conn.execute(
            "DELETE FROM sync_queue WHERE id = ?1 AND owner = ?2",
            params![id.as_str(), self.owner],
        )?;
        Ok(())
    }

    fn mark_retry(&self, id: &OperationId, error: &str) -> Result<()> {
        let conn = self.db.lock()?;
        conn.execute(
            "UPDATE sync_queue
             SET status = 'pending', retry_count = retry_count + 1,
                 last_error = ?1, last_attempt = ?2
             WHERE id = ?3 AND owner = ?4",
            params![error, now_ms(), id.as_str(), self.owner],
        )?;
        Ok(())
    }

    fn mark_failed(&self, id: &OperationId, error: &str) -> Result<()> {
        let conn = self.db.lock()?;
        conn.execute(
            "UPDATE sync_queue
             SET status = 'failed', last_error = ?1, last_attempt = ?2
             WHERE id = ?3 AND owner = ?4",
            params![error, now_ms(), id.as_str(), self.owner],
        )?;
        Ok(())
    }

    fn requeue(&self, id: &OperationId) -> Result<()> {
        let conn = self.db.lock()?;
        conn.execute(
            "UPDATE sync_queue SET status = 'pending' WHERE id = ?1 AND owner = ?2",
            params![id.as_str(), self.owner],
        )?;
        Ok(())
    }

    fn requeue_in_flight(&self) -> Result<u64> {
        let conn = self.db.lock()?;
        let reset = conn.execute(
            "UPDATE sync_queue SET status = 'pending' WHERE owner = ?1 AND status = 'syncing'",
            params![self.owner],
        )?;
        Ok(reset as u64)
    }

    fn requeue_failed(&self, id: &OperationId) -> Result<()> {
        let mut conn = self.db.lock()?;
        let tx = conn.transaction()?;

        let entry = tx
            .query_row(
                &format!(
                    "SELECT {COLUMNS} FROM sync_queue
                     WHERE id = ?1 AND owner = ?2 AND status = 'failed'"
                ),
                params![id.as_str(), self.owner],
                parse_operation,
            )
            .map_err(|err| match err {
                rusqlite::Error::QueryReturnedNoRows => {
                    Error::NotFound(format!("no failed queue entry {id}"))
                }
                other => other.into(),
            })?;

        // A newer pending entry for the same entity supersedes the failed one
        let superseded: bool = tx.query_row(
            "SELECT EXISTS(
                SELECT 1 FROM sync_queue
                WHERE owner = ?1 AND entity_kind = ?2 AND entity_id = ?3
                  AND status = 'pending')",
            params![self.owner, entry.entity_kind.as_str(), entry.entity_id],
            |row| row.get::<_, i32>(0).map(|v| v != 0),
        )?;

        if superseded {
            tx.execute(
                "DELETE FROM sync_queue WHERE id = ?1 AND owner = ?2",
                params![id.as_str(), self.owner],
            )?;
        } else {
            tx.execute(
                "UPDATE sync_queue
                 SET status = 'pending', retry_count = 0, last_error = NULL
                 WHERE id = ?1 AND owner = ?2",
                params![id.as_str(), self.owner],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    fn requeue_all_failed(&self) -> Result<u64> {
        let ids: Vec<OperationId> = self.failed()?.into_iter().map(|entry| entry.id).collect();
        let mut moved = 0;
        for id in ids {
            self.requeue_failed(&id)?;
            moved += 1;
        }
        Ok(moved)
    }

    fn remove(&self, id: &OperationId) -> Result<()> {
        let conn = self.db.lock()?;
        let removed = conn.execute(
            "DELETE FROM sync_queue WHERE id = ?1 AND owner = ?2",
            params![id.as_str(), self.owner],
        )?;
        if removed == 0 {
            return Err(Error::NotFound(format!("no queue entry {id}")));
        }
        Ok(())
    }

    fn clear(&self) -> Result<u64> {
        let conn = self.db.lock()?;
        let removed = conn.execute(
            "DELETE FROM sync_queue WHERE owner = ?1",
            params![self.owner],
        )?;
        Ok(removed as u64)
    }
}

/// Parse a queue entry from a database row
fn parse_operation(row: &Row<'_>) -> rusqlite::Result<SyncOperation> {
    let id: String = row.get(0)?;
    let kind: String = row.get(1)?;
    let operation: String = row.get(3)?;
    let status: String = row.get(5)?;
    Ok(SyncOperation {
        id: id.parse().map_err(|e| conversion_error(0, e))?,
        entity_kind: kind.parse().map_err(|e| conversion_error(1, e))?,
        entity_id: row.get(2)?,
        operation: operation.parse().map_err(|e| conversion_error(3, e))?,
        data: row.get(4)?,
        status: status.parse().map_err(|e| conversion_error(5, e))?,
        timestamp: row.get(6)?,
        created_at: row.get(7)?,
        retry_count: u32::try_from(row.get::<_, i64>(8)?).unwrap_or(0),
        max_retries: u32::try_from(row.get::<_, i64>(9)?).unwrap_or(DEFAULT_MAX_RETRIES),
        last_error: row.get(10)?,
        last_attempt: row.get(11)?,
    })
}

fn conversion_error(
    index: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(err))
}
