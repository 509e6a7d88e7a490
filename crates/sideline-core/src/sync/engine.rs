//! Drains the sync queue against a remote store.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::models::{
    ConflictId, ConflictRecord, ConflictStrategy, SessionId, SessionSnapshot, SyncOpKind,
    SyncOperation,
};
use crate::store::{LocalStore, SyncMeta, ValidityToken};

use super::merge::merge_snapshots;
use super::status::StatusTracker;
use super::{RemoteStore, SyncQueue, SyncStatus, UpsertOutcome};

const RECONCILED_CHANNEL_CAPACITY: usize = 64;

/// What one drain pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrainReport {
    pub completed: usize,
    pub failed: usize,
    pub conflicts: usize,
    /// The pass was skipped because the device is offline
    pub offline: bool,
}

enum OpOutcome {
    Completed,
    Conflict,
}

/// Pushes queued local changes to the remote, merging when the remote moved.
pub struct RemoteSyncEngine {
    store: Arc<LocalStore>,
    queue: Arc<SyncQueue>,
    remote: Arc<dyn RemoteStore>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    online: watch::Receiver<bool>,
    status: StatusTracker,
    reconciled: broadcast::Sender<SessionId>,
    drain_lock: Mutex<()>,
}

impl RemoteSyncEngine {
    pub fn new(
        store: Arc<LocalStore>,
        queue: Arc<SyncQueue>,
        remote: Arc<dyn RemoteStore>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
        online: watch::Receiver<bool>,
    ) -> Self {
        let (reconciled, _) = broadcast::channel(RECONCILED_CHANNEL_CAPACITY);
        Self {
            store,
            queue,
            remote,
            clock,
            config,
            online,
            status: StatusTracker::default(),
            reconciled,
            drain_lock: Mutex::new(()),
        }
    }

    /// Session ids whose local copy was replaced by a merge.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionId> {
        self.reconciled.subscribe()
    }

    pub fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    pub async fn status(&self) -> Result<SyncStatus> {
        let ops = self.queue.list().await?;
        let max_attempts = ops.iter().map(|op| op.attempts).max().unwrap_or(0);
        let mut status = self.status.status(
            self.is_online(),
            ops.len(),
            max_attempts,
            self.config.degraded_after_attempts,
        );
        // Failures from earlier processes only survive on the queued ops.
        if status.last_error.is_none() {
            status.last_error = ops.iter().find_map(|op| op.last_error.clone());
        }
        Ok(status)
    }

    /// Process every operation that is due now. Does nothing while offline.
    ///
    /// Remote failures are recorded on the operation and retried later; only
    /// local storage errors are returned.
    pub async fn drain(&self) -> Result<DrainReport> {
        let _drain = self.drain_lock.lock().await;
        let mut report = DrainReport::default();
        if !self.is_online() {
            report.offline = true;
            return Ok(report);
        }

        self.status.set_syncing(true);
        let result = self.drain_batches(&mut report).await;
        self.status.set_syncing(false);
        result?;

        if report.completed > 0 || report.failed > 0 {
            tracing::info!(
                completed = report.completed,
                failed = report.failed,
                conflicts = report.conflicts,
                "Sync drain finished"
            );
        }
        Ok(report)
    }

    async fn drain_batches(&self, report: &mut DrainReport) -> Result<()> {
        loop {
            let batch = self
                .queue
                .peek_batch(self.config.batch_size, self.clock.now_ms())
                .await?;
            if batch.is_empty() {
                return Ok(());
            }

            let mut progressed = false;
            for op in batch {
                if !self.is_online() {
                    report.offline = true;
                    return Ok(());
                }
                match self.process(&op).await {
                    Ok(outcome) => {
                        self.queue.mark_completed(op.op_id).await?;
                        self.status.record_success(self.clock.now_ms());
                        report.completed += 1;
                        if matches!(outcome, OpOutcome::Conflict) {
                            report.conflicts += 1;
                        }
                        progressed = true;
                    }
                    Err(error) if error.is_retryable() => {
                        let message = error.to_string();
                        self.queue
                            .mark_failed(op.op_id, &message, self.clock.now_ms())
                            .await?;
                        self.status.record_error(&message);
                        report.failed += 1;
                    }
                    Err(error) => return Err(error),
                }
            }
            // Failed heads are now backing off; stop instead of spinning.
            if !progressed {
                return Ok(());
            }
        }
    }

    async fn process(&self, op: &SyncOperation) -> Result<OpOutcome> {
        match op.kind {
            SyncOpKind::Delete => {
                self.remote_call(self.remote.delete(op.session_id)).await?;
                tracing::debug!(session_id = %op.session_id, "Deleted remote session");
                Ok(OpOutcome::Completed)
            }
            SyncOpKind::Upsert => {
                let Some(payload) = op.payload.as_ref() else {
                    tracing::warn!(op_id = op.op_id, "Upsert without payload, dropping");
                    return Ok(OpOutcome::Completed);
                };
                self.push(op, payload).await
            }
        }
    }

    async fn push(&self, op: &SyncOperation, payload: &SessionSnapshot) -> Result<OpOutcome> {
        let session_id = payload.id;
        let token = self.store.validity_token(session_id);
        if !self.store.session_exists(session_id).await? {
            tracing::debug!(%session_id, "Session deleted before sync, skipping upsert");
            return Ok(OpOutcome::Completed);
        }
        // Payloads are whole snapshots; a later upsert carries this one's
        // changes as well.
        if self.queue.has_later_upsert(session_id, op.op_id).await? {
            tracing::debug!(%session_id, op_id = op.op_id, "Upsert superseded, skipping");
            return Ok(OpOutcome::Completed);
        }

        let meta = self.store.sync_meta(session_id).await?;
        let base = op.base_revision.max(meta.remote_revision);
        let mut outcome = OpOutcome::Completed;

        for _ in 0..=self.config.max_conflict_retries {
            let remote = self.remote_call(self.remote.fetch(session_id)).await?;

            let (to_push, expected, strategy) = match remote {
                Some(record) if record.revision == base => (payload.clone(), base, None),
                None if base == 0 => (payload.clone(), 0, None),
                None => (payload.clone(), 0, Some(ConflictStrategy::RecreateRemote)),
                Some(record) => {
                    let mut theirs = record.snapshot;
                    theirs.revision = record.revision;
                    (
                        merge_snapshots(payload, &theirs),
                        record.revision,
                        Some(ConflictStrategy::FieldMerge),
                    )
                }
            };

            if !self.store.is_valid(&token) {
                return Ok(OpOutcome::Completed);
            }
            match self.remote_call(self.remote.upsert(&to_push, expected)).await? {
                UpsertOutcome::Applied { new_revision } => {
                    if let Some(strategy) = strategy {
                        let record = ConflictRecord {
                            id: ConflictId::new(),
                            session_id,
                            local_revision: payload.revision,
                            remote_revision: expected,
                            strategy,
                            resolved_at: self.clock.now_ms(),
                        };
                        if !self.store.record_conflict(&record, &token).await? {
                            return Ok(OpOutcome::Completed);
                        }
                        outcome = OpOutcome::Conflict;
                    }
                    self.acknowledge(&token, op, &to_push, strategy, new_revision)
                        .await?;
                    return Ok(outcome);
                }
                UpsertOutcome::Conflict { current_revision } => {
                    tracing::debug!(
                        %session_id,
                        expected,
                        current_revision,
                        "Remote moved during sync, retrying"
                    );
                }
            }
        }

        Err(Error::Sync(format!(
            "remote session {session_id} kept changing during sync"
        )))
    }

    /// Record the new remote revision, and write merged results locally
    /// unless the session changed or was deleted meanwhile.
    ///
    /// The acknowledged revision is the base for later fast paths, so it only
    /// moves when local writes from here on build on what was pushed.
    async fn acknowledge(
        &self,
        token: &ValidityToken,
        op: &SyncOperation,
        pushed: &SessionSnapshot,
        strategy: Option<ConflictStrategy>,
        new_revision: u64,
    ) -> Result<()> {
        let now = self.clock.now_ms();
        let meta = SyncMeta {
            remote_revision: new_revision,
            last_synced_at: Some(now),
        };

        if strategy == Some(ConflictStrategy::FieldMerge) {
            let adopted = self
                .store
                .write_remote_origin(pushed, token, op.write_seq, &meta)
                .await?;
            if adopted {
                // No subscribers is fine.
                let _ = self.reconciled.send(pushed.id);
                return Ok(());
            }
            // Newer local writes lack the merged state; their ops merge again.
            let previous = self.store.sync_meta(pushed.id).await?;
            let meta = SyncMeta {
                last_synced_at: Some(now),
                ..previous
            };
            self.store.update_sync_meta(token, &meta).await?;
            return Ok(());
        }

        self.store.update_sync_meta(token, &meta).await?;
        Ok(())
    }

    async fn remote_call<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.config.remote_timeout(), call)
            .await
            .map_err(|_| {
                Error::Sync(format!(
                    "remote call timed out after {}s",
                    self.config.remote_timeout_secs
                ))
            })?
    }

    /// Run the engine in the background until `shutdown` flips to `true`.
    ///
    /// The worker wakes on enqueue notifications, connectivity changes, and
    /// when the earliest backed-off operation becomes due. It never polls
    /// while offline.
    pub fn spawn_worker(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let notify = self.queue.notifier();
            let mut online = self.online.clone();
            tracing::info!("Sync worker started");

            loop {
                if *shutdown.borrow() {
                    break;
                }

                let mut wait = None;
                if *online.borrow() {
                    if let Err(error) = self.drain().await {
                        tracing::warn!(%error, "Sync drain failed");
                        self.status.record_error(&error.to_string());
                    }
                    wait = match self.queue.next_due_at().await {
                        Ok(Some(due)) => Some(delay_until(due, self.clock.now_ms())),
                        Ok(None) => None,
                        Err(error) => {
                            tracing::warn!(%error, "Could not read sync queue");
                            Some(self.config.backoff().max)
                        }
                    };
                }

                let sleep = async {
                    match wait {
                        Some(duration) => tokio::time::sleep(duration).await,
                        None => std::future::pending::<()>().await,
                    }
                };

                tokio::select! {
                    () = notify.notified() => {}
                    changed = online.changed() => {
                        if changed.is_err() {
                            tracing::debug!("Connectivity signal closed, stopping sync worker");
                            break;
                        }
                        if *online.borrow() {
                            tracing::info!("Back online, resuming sync");
                        }
                    }
                    () = sleep => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
            tracing::info!("Sync worker stopped");
        })
    }
}

#[allow(clippy::cast_sign_loss)]
fn delay_until(due_ms: i64, now_ms: i64) -> Duration {
    Duration::from_millis(due_ms.saturating_sub(now_ms).max(0) as u64)
}
