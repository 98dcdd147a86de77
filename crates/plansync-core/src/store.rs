//! Synced store facade
//!
//! The component application code talks to. Reads are served from the local
//! store only and never block on sync state; writes land locally first, then
//! enqueue a sync operation and nudge the engine.

use std::sync::Arc;

use serde_json::Value;
use tokio::task::JoinSet;

use crate::db::{LocalStore, OperationQueue};
use crate::engine::SyncEngine;
use crate::error::{Error, Result};
use crate::executor::RemoteExecutor;
use crate::models::{
    EntityKind, EntityRecord, OperationId, OperationKind, OperationStatus, SyncOperation,
};
use crate::util::now_ms;

/// Outcome of an initial bulk push (enabling sync on a local-only dataset)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushReport {
    /// Entities applied to the remote on the fast path
    pub pushed: u64,
    /// Entities that fell back into the durable queue
    pub queued: u64,
}

/// Local-first store that mirrors every write into the sync queue
pub struct SyncedStore<L: LocalStore> {
    local: Arc<L>,
    queue: Arc<dyn OperationQueue>,
    engine: Arc<SyncEngine>,
}

impl<L: LocalStore> SyncedStore<L> {
    /// Build the facade from its collaborators
    pub fn new(local: Arc<L>, queue: Arc<dyn OperationQueue>, engine: Arc<SyncEngine>) -> Self {
        Self {
            local,
            queue,
            engine,
        }
    }

    /// All records in a collection. Never touches the network.
    pub fn list(&self, kind: EntityKind) -> Result<Vec<EntityRecord>> {
        self.local.list(kind)
    }

    /// Look up one record. Never touches the network.
    pub fn get(&self, kind: EntityKind, id: &str) -> Result<Option<EntityRecord>> {
        self.local.get(kind, id)
    }

    /// Create an entity: local write first, then enqueue the post-write state
    pub fn create(&self, kind: EntityKind, data: Value) -> Result<EntityRecord> {
        let record = self.local.create(kind, data)?;
        self.enqueue(kind, &record.id, OperationKind::Create, Some(record.data.clone()))?;
        self.engine.nudge();
        Ok(record)
    }

    /// Update an entity: local write first, then enqueue the post-write state
    pub fn update(&self, kind: EntityKind, id: &str, data: Value) -> Result<EntityRecord> {
        let record = self.local.update(kind, id, data)?;
        self.enqueue(kind, id, OperationKind::Update, Some(record.data.clone()))?;
        self.engine.nudge();
        Ok(record)
    }

    /// Delete an entity locally and enqueue the removal
    pub fn delete(&self, kind: EntityKind, id: &str) -> Result<()> {
        self.local.delete(kind, id)?;
        self.enqueue(kind, id, OperationKind::Delete, None)?;
        self.engine.nudge();
        Ok(())
    }

    /// Current sync health
    pub fn status(&self) -> Result<crate::models::SyncStatusInfo> {
        self.engine.status()
    }

    /// The local write has already succeeded when this runs; a queue failure
    /// must surface as its own error kind, never as a rolled-back write.
    fn enqueue(
        &self,
        kind: EntityKind,
        entity_id: &str,
        operation: OperationKind,
        data: Option<Value>,
    ) -> Result<()> {
        self.queue
            .enqueue(kind, entity_id, operation, data)
            .map_err(|err| Error::Enqueue(err.to_string()))?;
        Ok(())
    }

    /// Push every local entity to the remote, in dependency order.
    ///
    /// Within one kind, up to `batch_size` entities are applied concurrently
    /// (they don't reference each other); the next kind never starts before
    /// the previous kind's batch settles. Entities the fast path could not
    /// apply fall back into the durable queue for the engine to retry.
    pub async fn push_all(
        &self,
        executor: Arc<dyn RemoteExecutor>,
        batch_size: usize,
    ) -> Result<PushReport> {
        let batch_size = batch_size.max(1);
        let mut report = PushReport::default();

        for kind in EntityKind::ALL {
            let records = self.local.list(kind)?;
            for chunk in records.chunks(batch_size) {
                let mut batch: JoinSet<(SyncOperation, std::result::Result<(), crate::error::RemoteError>)> =
                    JoinSet::new();
                for record in chunk {
                    let op = bulk_create_operation(kind, record);
                    let executor = Arc::clone(&executor);
                    batch.spawn(async move {
                        let outcome = executor.apply(&op).await;
                        (op, outcome)
                    });
                }
                while let Some(joined) = batch.join_next().await {
                    let (op, outcome) = joined
                        .map_err(|err| Error::Database(format!("push task failed: {err}")))?;
                    match outcome {
                        Ok(()) => report.pushed += 1,
                        Err(err) => {
                            tracing::warn!(
                                entity_kind = %kind,
                                entity_id = %op.entity_id,
                                error = %err,
                                "bulk push failed, queueing for retry"
                            );
                            self.enqueue(kind, &op.entity_id, OperationKind::Create, op.data)?;
                            report.queued += 1;
                        }
                    }
                }
            }
        }

        if report.queued > 0 {
            self.engine.nudge();
        }
        Ok(report)
    }
}

/// Ad-hoc create operation for the bulk-push fast path; never stored
fn bulk_create_operation(kind: EntityKind, record: &EntityRecord) -> SyncOperation {
    let now = now_ms();
    SyncOperation {
        id: OperationId::new(),
        entity_kind: kind,
        entity_id: record.id.clone(),
        operation: OperationKind::Create,
        data: Some(record.data.clone()),
        status: OperationStatus::Pending,
        timestamp: now,
        created_at: now,
        retry_count: 0,
        max_retries: crate::db::DEFAULT_MAX_RETRIES,
        last_error: None,
        last_attempt: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, SqliteLocalStore, SqliteOperationQueue};
    use crate::engine::EngineConfig;
    use crate::error::RemoteError;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tokio::sync::watch;

    struct CountingExecutor {
        ok: bool,
        calls: AtomicU64,
    }

    #[async_trait]
    impl RemoteExecutor for CountingExecutor {
        async fn apply(&self, _op: &SyncOperation) -> std::result::Result<(), RemoteError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.ok {
                Ok(())
            } else {
                Err(RemoteError::Network("unreachable".to_string()))
            }
        }
    }

    fn setup(ok: bool) -> (SyncedStore<SqliteLocalStore>, Arc<SqliteOperationQueue>, Arc<CountingExecutor>) {
        let db = Database::open_in_memory().unwrap();
        let local = Arc::new(SqliteLocalStore::new(db.clone()));
        let queue = Arc::new(SqliteOperationQueue::new(db, "u1"));
        let executor = Arc::new(CountingExecutor {
            ok,
            calls: AtomicU64::new(0),
        });
        let (_online_tx, online_rx) = watch::channel(true);
        let engine = Arc::new(SyncEngine::new(
            Arc::clone(&queue) as Arc<dyn OperationQueue>,
            Arc::clone(&executor) as Arc<dyn RemoteExecutor>,
            online_rx,
            EngineConfig::default(),
        ));
        let store = SyncedStore::new(local, Arc::clone(&queue) as Arc<dyn OperationQueue>, engine);
        (store, queue, executor)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_create_is_readable_immediately() {
        let (store, _queue, _executor) = setup(true);
        let record = store
            .create(EntityKind::Player, json!({"name": "Alice"}))
            .unwrap();

        // Round trip works regardless of network or engine state
        let fetched = store.get(EntityKind::Player, &record.id).unwrap().unwrap();
        assert_eq!(fetched, record);
        assert_eq!(store.list(EntityKind::Player).unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_write_enqueues_post_write_state() {
        let (store, queue, _executor) = setup(true);
        let record = store
            .create(EntityKind::Player, json!({"name": "Alice"}))
            .unwrap();

        let entry = queue
            .find_by_entity(EntityKind::Player, &record.id)
            .unwrap()
            .unwrap();
        assert_eq!(entry.operation, OperationKind::Create);
        assert_eq!(entry.data, Some(json!({"name": "Alice"})));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_create_then_update_keeps_one_create_entry() {
        let (store, queue, _executor) = setup(true);
        let record = store
            .create(EntityKind::Player, json!({"name": "Alice"}))
            .unwrap();
        store
            .update(EntityKind::Player, &record.id, json!({"name": "Alicia"}))
            .unwrap();

        let entries = queue.pending().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].operation, OperationKind::Create);
        assert_eq!(entries[0].data, Some(json!({"name": "Alicia"})));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_create_then_delete_cancels_out() {
        let (store, queue, _executor) = setup(true);
        let record = store
            .create(EntityKind::Player, json!({"name": "Alice"}))
            .unwrap();
        store.delete(EntityKind::Player, &record.id).unwrap();

        assert!(store.get(EntityKind::Player, &record.id).unwrap().is_none());
        assert_eq!(queue.counts().unwrap(), (0, 0));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_local_write_failure_enqueues_nothing() {
        let (store, queue, _executor) = setup(true);
        assert!(store
            .update(EntityKind::Player, "ghost", json!({"name": "x"}))
            .is_err());
        assert_eq!(queue.counts().unwrap(), (0, 0));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_push_all_fast_path() {
        let (store, queue, executor) = setup(true);
        // Seed the local store directly; nothing queued yet
        for i in 0..5 {
            store
                .local
                .create(EntityKind::Player, json!({"name": format!("p{i}")}))
                .unwrap();
        }
        store
            .local
            .create(EntityKind::Session, json!({"title": "practice"}))
            .unwrap();

        let report = store
            .push_all(Arc::clone(&executor) as Arc<dyn RemoteExecutor>, 3)
            .await
            .unwrap();

        assert_eq!(report, PushReport { pushed: 6, queued: 0 });
        assert_eq!(executor.calls.load(Ordering::SeqCst), 6);
        assert_eq!(queue.counts().unwrap(), (0, 0));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_push_all_falls_back_to_queue() {
        let (store, queue, executor) = setup(false);
        store
            .local
            .create(EntityKind::Player, json!({"name": "Alice"}))
            .unwrap();

        let report = store
            .push_all(Arc::clone(&executor) as Arc<dyn RemoteExecutor>, 4)
            .await
            .unwrap();

        assert_eq!(report, PushReport { pushed: 0, queued: 1 });
        assert_eq!(queue.counts().unwrap(), (1, 0));
    }
}
