//! Durable FIFO of pending remote operations.
//!
//! Operations live in the key-value store under `syncop/{op_id:020}`, so key
//! order is enqueue order and a restart picks up where it left off.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};

use crate::error::Result;
use crate::kv::KeyValueStore;
use crate::models::{SessionId, SyncOpKind, SyncOperation};

use super::BackoffPolicy;

const OP_PREFIX: &str = "syncop/";
const NEXT_OP_ID_KEY: &str = "meta/next_op_id";

fn op_key(op_id: u64) -> String {
    format!("{OP_PREFIX}{op_id:020}")
}

/// Persistent sync queue with per-session ordering.
pub struct SyncQueue {
    kv: Arc<dyn KeyValueStore>,
    backoff: BackoffPolicy,
    /// Serializes mutations; holds the next op id once loaded.
    writer: Mutex<Option<u64>>,
    notify: Arc<Notify>,
}

impl SyncQueue {
    pub fn new(kv: Arc<dyn KeyValueStore>, backoff: BackoffPolicy) -> Self {
        Self {
            kv,
            backoff,
            writer: Mutex::new(None),
            notify: Arc::new(Notify::new()),
        }
    }

    pub const fn backoff(&self) -> &BackoffPolicy {
        &self.backoff
    }

    /// Signalled after every enqueue.
    pub fn notifier(&self) -> Arc<Notify> {
        Arc::clone(&self.notify)
    }

    /// Append an operation, assigning the next op id. Durable on return.
    pub async fn enqueue(&self, op: SyncOperation) -> Result<u64> {
        self.enqueue_with(op, Vec::new()).await
    }

    /// Append an operation together with other entries, in one backend
    /// write. Either the operation and every entry land, or none do.
    pub async fn enqueue_with(
        &self,
        mut op: SyncOperation,
        mut entries: Vec<(String, String)>,
    ) -> Result<u64> {
        let mut next = self.writer.lock().await;
        let op_id = match *next {
            Some(id) => id,
            None => self.load_next_op_id().await?,
        };
        op.op_id = op_id;
        entries.push((op_key(op_id), serde_json::to_string(&op)?));
        entries.push((NEXT_OP_ID_KEY.to_string(), (op_id + 1).to_string()));
        self.kv.set_many(&entries).await?;
        *next = Some(op_id + 1);
        drop(next);

        tracing::debug!(
            op_id,
            session_id = %op.session_id,
            kind = ?op.kind,
            "Enqueued sync operation"
        );
        self.notify.notify_one();
        Ok(op_id)
    }

    /// Counter from the store, bumped past any op that outlived it.
    async fn load_next_op_id(&self) -> Result<u64> {
        let stored = self
            .kv
            .get(NEXT_OP_ID_KEY)
            .await?
            .and_then(|raw| raw.parse::<u64>().ok())
            .unwrap_or(1);
        let after_last = self
            .kv
            .keys(OP_PREFIX)
            .await?
            .last()
            .and_then(|key| key.strip_prefix(OP_PREFIX))
            .and_then(|id| id.parse::<u64>().ok())
            .map_or(1, |id| id + 1);
        Ok(stored.max(after_last))
    }

    /// All queued operations in op-id order.
    pub async fn list(&self) -> Result<Vec<SyncOperation>> {
        let mut ops = Vec::new();
        for key in self.kv.keys(OP_PREFIX).await? {
            if let Some(raw) = self.kv.get(&key).await? {
                ops.push(serde_json::from_str::<SyncOperation>(&raw)?);
            }
        }
        Ok(ops)
    }

    pub async fn get(&self, op_id: u64) -> Result<Option<SyncOperation>> {
        match self.kv.get(&op_key(op_id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Up to `max` operations ready at `now_ms`, in op-id order.
    ///
    /// Only the head operation of each session is eligible, and only when it
    /// is due; a session waiting on backoff holds back its later operations.
    pub async fn peek_batch(&self, max: usize, now_ms: i64) -> Result<Vec<SyncOperation>> {
        let mut seen: HashSet<SessionId> = HashSet::new();
        let mut batch = Vec::new();
        for op in self.list().await? {
            if batch.len() >= max {
                break;
            }
            if !seen.insert(op.session_id) {
                continue;
            }
            if op.is_due(now_ms) {
                batch.push(op);
            }
        }
        Ok(batch)
    }

    /// Whether an upsert for `session_id` was queued after `op_id`.
    pub async fn has_later_upsert(&self, session_id: SessionId, op_id: u64) -> Result<bool> {
        Ok(self.list().await?.iter().any(|op| {
            op.session_id == session_id && op.op_id > op_id && op.kind == SyncOpKind::Upsert
        }))
    }

    /// Remove a finished operation. Unknown ids are ignored.
    pub async fn mark_completed(&self, op_id: u64) -> Result<()> {
        let _writer = self.writer.lock().await;
        self.kv.delete(&op_key(op_id)).await?;
        tracing::debug!(op_id, "Completed sync operation");
        Ok(())
    }

    /// Record a failed attempt and schedule the retry.
    ///
    /// Returns the updated operation, or `None` if it was removed meanwhile.
    pub async fn mark_failed(
        &self,
        op_id: u64,
        error: &str,
        now_ms: i64,
    ) -> Result<Option<SyncOperation>> {
        let _writer = self.writer.lock().await;
        let Some(mut op) = self.get(op_id).await? else {
            return Ok(None);
        };
        op.attempts = op.attempts.saturating_add(1);
        op.last_error = Some(error.to_string());
        op.next_attempt_at = self.backoff.next_attempt_at(now_ms, op.attempts);
        self.kv
            .set(&op_key(op_id), &serde_json::to_string(&op)?)
            .await?;

        tracing::warn!(
            op_id,
            session_id = %op.session_id,
            attempts = op.attempts,
            retry_in_ms = op.next_attempt_at - now_ms,
            error,
            "Sync operation failed, will retry"
        );
        Ok(Some(op))
    }

    pub async fn pending_count(&self) -> Result<usize> {
        Ok(self.kv.keys(OP_PREFIX).await?.len())
    }

    /// Earliest `next_attempt_at` among session heads.
    pub async fn next_due_at(&self) -> Result<Option<i64>> {
        let mut seen: HashSet<SessionId> = HashSet::new();
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|op| seen.insert(op.session_id))
            .map(|op| op.next_attempt_at)
            .min())
    }

    /// Drop every queued operation for a session. Returns how many went.
    pub async fn remove_session(&self, session_id: SessionId) -> Result<usize> {
        let _writer = self.writer.lock().await;
        let mut removed = 0;
        for op in self.list().await? {
            if op.session_id == session_id {
                self.kv.delete(&op_key(op.op_id)).await?;
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::debug!(%session_id, removed, "Removed queued sync operations");
        }
        Ok(removed)
    }
}
