//! Background sync engine
//!
//! One engine instance per synced store: a single cooperative drain loop that
//! consumes the durable queue sequentially, applies each entry through the
//! remote executor, and reacts to connectivity changes. Constructed with
//! explicit references to its collaborators; lifecycle is owned by whoever
//! builds it.

mod backoff;

pub use backoff::{backoff_delay, jitter};

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;

use crate::classify;
use crate::db::OperationQueue;
use crate::error::{RemoteError, Result};
use crate::executor::RemoteExecutor;
use crate::models::{SyncOperation, SyncState, SyncStatusInfo};
use crate::util::now_ms;

/// Engine tuning knobs. All delays are configuration, not hardcoded.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Base delay for the first retry
    pub base_delay: Duration,
    /// Upper bound on the exponential backoff
    pub cap_delay: Duration,
    /// Maximum random jitter added on top of the backoff
    pub jitter: Duration,
    /// Bound on a single remote-executor invocation
    pub op_timeout: Duration,
    /// Cadence of drain attempts when no nudge arrives
    pub poll_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            cap_delay: Duration::from_secs(300),
            jitter: Duration::from_millis(1000),
            op_timeout: Duration::from_secs(90),
            poll_interval: Duration::from_secs(30),
        }
    }
}

impl EngineConfig {
    /// Set the base retry delay
    #[must_use]
    pub const fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Set the backoff cap
    #[must_use]
    pub const fn with_cap_delay(mut self, cap_delay: Duration) -> Self {
        self.cap_delay = cap_delay;
        self
    }

    /// Set the maximum jitter
    #[must_use]
    pub const fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Set the per-operation timeout
    #[must_use]
    pub const fn with_op_timeout(mut self, op_timeout: Duration) -> Self {
        self.op_timeout = op_timeout;
        self
    }

    /// Set the poll interval
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

struct EngineInner {
    queue: Arc<dyn OperationQueue>,
    executor: Arc<dyn RemoteExecutor>,
    config: EngineConfig,
    online_rx: watch::Receiver<bool>,
    shutdown_rx: watch::Receiver<bool>,
    nudge: Notify,
    /// Serializes drain cycles between the background loop and `sync_now`
    drain_lock: Mutex<()>,
    paused: AtomicBool,
    draining: AtomicBool,
    state_tx: watch::Sender<SyncState>,
    /// Unix ms of the last successful remote apply; 0 = never
    last_synced_at: AtomicI64,
    cloud_connected: AtomicBool,
}

/// Queue-draining background processor
pub struct SyncEngine {
    inner: Arc<EngineInner>,
    shutdown_tx: watch::Sender<bool>,
    task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl SyncEngine {
    /// Build an engine from its collaborators.
    ///
    /// `online_rx` is the connectivity signal; send `true`/`false` on the
    /// paired sender as the network comes and goes.
    pub fn new(
        queue: Arc<dyn OperationQueue>,
        executor: Arc<dyn RemoteExecutor>,
        online_rx: watch::Receiver<bool>,
        config: EngineConfig,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (state_tx, _) = watch::channel(SyncState::Idle);
        Self {
            inner: Arc::new(EngineInner {
                queue,
                executor,
                config,
                online_rx,
                shutdown_rx,
                nudge: Notify::new(),
                drain_lock: Mutex::new(()),
                paused: AtomicBool::new(false),
                draining: AtomicBool::new(false),
                state_tx,
                last_synced_at: AtomicI64::new(0),
                cloud_connected: AtomicBool::new(false),
            }),
            shutdown_tx,
            task: std::sync::Mutex::new(None),
        }
    }

    /// Spawn the background drain loop. No-op if already started.
    pub fn start(&self) {
        let mut task = match self.task.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if task.is_some() {
            return;
        }
        let inner = Arc::clone(&self.inner);
        *task = Some(tokio::spawn(inner.run()));
        tracing::debug!("sync engine started");
    }

    /// Stop the engine: cancel any in-flight remote call, release the drain
    /// loop, and leave no queue entry stuck in syncing. Terminal — build a
    /// new engine to sync again (e.g. after an identity switch).
    pub async fn stop(&self) {
        self.shutdown_tx.send(true).ok();
        let task = match self.task.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(task) = task {
            task.await.ok();
        }
        if let Err(err) = self.inner.queue.requeue_in_flight() {
            tracing::warn!(error = %err, "failed to requeue in-flight entries on stop");
        }
        tracing::debug!("sync engine stopped");
    }

    /// Request an immediate drain attempt outside the polling cadence.
    /// Called by the facade right after a local write so sync feels prompt.
    pub fn nudge(&self) {
        self.inner.nudge.notify_one();
    }

    /// Suspend automatic draining until [`resume`](Self::resume)
    pub fn pause(&self) {
        self.inner.paused.store(true, Ordering::SeqCst);
    }

    /// Resume automatic draining and nudge once
    pub fn resume(&self) {
        self.inner.paused.store(false, Ordering::SeqCst);
        self.nudge();
    }

    /// Whether automatic draining is currently suspended
    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::SeqCst)
    }

    /// Run one drain cycle inline and wait for it to finish.
    ///
    /// Respects connectivity and pause state like the background loop. At
    /// most one drain cycle runs at a time; a call overlapping the background
    /// loop waits for the running cycle before starting its own.
    pub async fn sync_now(&self) -> Result<()> {
        let mut online_rx = self.inner.online_rx.clone();
        let mut shutdown_rx = self.inner.shutdown_rx.clone();
        self.inner.drain(&mut online_rx, &mut shutdown_rx).await
    }

    /// Subscribe to aggregate state changes
    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.inner.state_tx.subscribe()
    }

    /// Snapshot of sync health, recomputed from the queue and engine flags
    pub fn status(&self) -> Result<SyncStatusInfo> {
        let (pending_count, failed_count) = self.inner.queue.counts()?;
        let is_online = *self.inner.online_rx.borrow();
        let is_draining = self.inner.draining.load(Ordering::SeqCst);
        let last = self.inner.last_synced_at.load(Ordering::SeqCst);
        Ok(SyncStatusInfo {
            state: SyncStatusInfo::derive_state(is_online, is_draining, pending_count, failed_count),
            pending_count,
            failed_count,
            last_synced_at: (last > 0).then_some(last),
            is_online,
            cloud_connected: self.inner.cloud_connected.load(Ordering::SeqCst),
            is_paused: self.is_paused(),
        })
    }
}

impl EngineInner {
    async fn run(self: Arc<Self>) {
        let mut online_rx = self.online_rx.clone();
        let mut shutdown_rx = self.shutdown_rx.clone();

        // Recover rows a previous process left mid-flight
        if let Err(err) = self.queue.requeue_in_flight() {
            tracing::warn!(error = %err, "startup requeue failed");
        }

        loop {
            if *shutdown_rx.borrow() {
                break;
            }
            if let Err(err) = self.drain(&mut online_rx, &mut shutdown_rx).await {
                tracing::warn!(error = %err, "drain cycle failed");
            }
            if *shutdown_rx.borrow() {
                break;
            }
            tokio::select! {
                () = self.nudge.notified() => {}
                changed = online_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                () = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        if let Err(err) = self.queue.requeue_in_flight() {
            tracing::warn!(error = %err, "shutdown requeue failed");
        }
        self.state_tx.send_replace(SyncState::Idle);
    }

    async fn drain(
        &self,
        online_rx: &mut watch::Receiver<bool>,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        // Only one cycle may touch the queue at a time, or a dependent kind
        // could reach the remote while its referent is still in flight
        let _cycle = self.drain_lock.lock().await;

        if !*online_rx.borrow() {
            self.state_tx.send_replace(SyncState::Offline);
            return Ok(());
        }
        if self.paused.load(Ordering::SeqCst) {
            self.publish_state(*online_rx.borrow());
            return Ok(());
        }

        let due = self.due_entries()?;
        if due.is_empty() {
            self.publish_state(*online_rx.borrow());
            return Ok(());
        }

        tracing::debug!(entries = due.len(), "draining sync queue");
        self.draining.store(true, Ordering::SeqCst);
        self.state_tx.send_replace(SyncState::Syncing);
        let result = self.process(due, online_rx, shutdown_rx).await;
        self.draining.store(false, Ordering::SeqCst);
        self.publish_state(*online_rx.borrow());
        result
    }

    /// Pending entries due for an attempt, in dependency-priority order then
    /// oldest first
    fn due_entries(&self) -> Result<Vec<SyncOperation>> {
        let now = now_ms();
        let mut due: Vec<SyncOperation> = self
            .queue
            .pending()?
            .into_iter()
            .filter(|op| self.is_due(op, now))
            .collect();
        // Stable sort keeps enqueue order within equal (priority, created_at)
        due.sort_by_key(|op| (op.entity_kind.priority(), op.created_at));
        Ok(due)
    }

    fn is_due(&self, op: &SyncOperation, now: i64) -> bool {
        if op.retry_count == 0 {
            return true;
        }
        let Some(last_attempt) = op.last_attempt else {
            return true;
        };
        let delay = backoff_delay(op.retry_count, self.config.base_delay, self.config.cap_delay)
            + jitter(self.config.jitter);
        let delay_ms = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
        now >= last_attempt.saturating_add(delay_ms)
    }

    async fn process(
        &self,
        due: Vec<SyncOperation>,
        online_rx: &mut watch::Receiver<bool>,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        for op in due {
            if *shutdown_rx.borrow() || !*online_rx.borrow() {
                return Ok(());
            }

            self.queue.mark_syncing(&op.id)?;
            let outcome = tokio::select! {
                result = tokio::time::timeout(self.config.op_timeout, self.executor.apply(&op)) => {
                    result.unwrap_or(Err(RemoteError::Timeout))
                }
                _ = online_rx.wait_for(|online| !*online) => Err(RemoteError::Cancelled),
                _ = shutdown_rx.wait_for(|stop| *stop) => Err(RemoteError::Cancelled),
            };
            self.settle(&op, outcome)?;

            if *shutdown_rx.borrow() || !*online_rx.borrow() {
                // Abort mid-cycle; remaining entries stay pending
                return Ok(());
            }
        }
        Ok(())
    }

    fn settle(&self, op: &SyncOperation, outcome: std::result::Result<(), RemoteError>) -> Result<()> {
        match outcome {
            Ok(()) => {
                self.queue.mark_completed(&op.id)?;
                self.cloud_connected.store(true, Ordering::SeqCst);
                self.last_synced_at.store(now_ms(), Ordering::SeqCst);
                tracing::debug!(
                    entity_kind = %op.entity_kind,
                    entity_id = %op.entity_id,
                    operation = %op.operation,
                    "synced"
                );
            }
            Err(err) if err.is_neutral() => {
                // Not a real failure; no retry budget spent
                tracing::debug!(
                    entity_kind = %op.entity_kind,
                    entity_id = %op.entity_id,
                    error = %err,
                    "neutral reset, requeueing"
                );
                self.queue.requeue(&op.id)?;
            }
            Err(err) if classify::is_transient(&err) => {
                if matches!(err, RemoteError::Network(_)) {
                    self.cloud_connected.store(false, Ordering::SeqCst);
                }
                if op.has_retry_budget() {
                    tracing::warn!(
                        entity_kind = %op.entity_kind,
                        entity_id = %op.entity_id,
                        retry_count = op.retry_count + 1,
                        error = %err,
                        "transient failure, will retry"
                    );
                    self.queue.mark_retry(&op.id, &err.to_string())?;
                } else {
                    tracing::warn!(
                        entity_kind = %op.entity_kind,
                        entity_id = %op.entity_id,
                        error = %err,
                        "retry budget exhausted, parking entry"
                    );
                    self.queue.mark_failed(&op.id, &err.to_string())?;
                }
            }
            Err(err) => {
                tracing::warn!(
                    entity_kind = %op.entity_kind,
                    entity_id = %op.entity_id,
                    error = %err,
                    "permanent failure, parking entry"
                );
                self.queue.mark_failed(&op.id, &err.to_string())?;
            }
        }
        Ok(())
    }

    fn publish_state(&self, is_online: bool) {
        let state = match self.queue.counts() {
            Ok((pending, failed)) => {
                SyncStatusInfo::derive_state(is_online, false, pending, failed)
            }
            Err(_) => SyncState::Idle,
        };
        self.state_tx.send_replace(state);
    }
}
