//! Queued sync operation model

use serde::{Deserialize, Serialize};

use super::ids::SessionId;
use super::session::SessionSnapshot;

/// Kind of remote change to propagate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOpKind {
    Upsert,
    Delete,
}

/// A durable, queued intent to propagate a local change to the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncOperation {
    /// Monotonic, assigned by the queue
    pub op_id: u64,
    pub session_id: SessionId,
    pub kind: SyncOpKind,
    /// Snapshot as of enqueue time; `None` for deletes
    #[serde(default)]
    pub payload: Option<SessionSnapshot>,
    /// Remote revision the local write was based on (0 when never synced)
    pub base_revision: u64,
    /// Local store write sequence of `payload` (0 for deletes)
    #[serde(default)]
    pub write_seq: u64,
    pub created_at: i64,
    pub attempts: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    /// Unix ms before which the operation is not retried
    pub next_attempt_at: i64,
}

impl SyncOperation {
    pub fn upsert(snapshot: SessionSnapshot, base_revision: u64, now_ms: i64) -> Self {
        Self {
            op_id: 0,
            session_id: snapshot.id,
            kind: SyncOpKind::Upsert,
            payload: Some(snapshot),
            base_revision,
            write_seq: 0,
            created_at: now_ms,
            attempts: 0,
            last_error: None,
            next_attempt_at: now_ms,
        }
    }

    pub const fn delete(session_id: SessionId, base_revision: u64, now_ms: i64) -> Self {
        Self {
            op_id: 0,
            session_id,
            kind: SyncOpKind::Delete,
            payload: None,
            base_revision,
            write_seq: 0,
            created_at: now_ms,
            attempts: 0,
            last_error: None,
            next_attempt_at: now_ms,
        }
    }

    #[must_use]
    pub const fn with_write_seq(mut self, write_seq: u64) -> Self {
        self.write_seq = write_seq;
        self
    }

    pub const fn is_due(&self, now_ms: i64) -> bool {
        self.next_attempt_at <= now_ms
    }
}
