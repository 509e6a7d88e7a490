//! Durable local store for sessions and everything hanging off them.
//!
//! Key layout in the backing [`KeyValueStore`]:
//!
//! | key                          | value                      |
//! |------------------------------|----------------------------|
//! | `session/{id}`               | `StoredSession`            |
//! | `history/{id}`               | `PersistedHistory`         |
//! | `catalog/{id}`               | `SessionSummary` (saved)   |
//! | `syncmeta/{id}`              | `SyncMeta`                 |
//! | `conflict/{id}/{conflict}`   | `ConflictRecord`           |
//! | `meta/current_session`       | session id                 |
//!
//! Each snapshot is written as one value under one key, so a reader never
//! observes a partially written session. A local write and its queued sync
//! operation go to the backend in a single `set_many`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::history::PersistedHistory;
use crate::kv::KeyValueStore;
use crate::models::{ConflictRecord, SessionId, SessionSnapshot, SessionSummary, SyncOperation};
use crate::sync::SyncQueue;

const SESSION_PREFIX: &str = "session/";
const HISTORY_PREFIX: &str = "history/";
const CATALOG_PREFIX: &str = "catalog/";
const SYNC_META_PREFIX: &str = "syncmeta/";
const CONFLICT_PREFIX: &str = "conflict/";
const CURRENT_SESSION_KEY: &str = "meta/current_session";

fn session_key(id: SessionId) -> String {
    format!("{SESSION_PREFIX}{id}")
}

fn history_key(id: SessionId) -> String {
    format!("{HISTORY_PREFIX}{id}")
}

fn catalog_key(id: SessionId) -> String {
    format!("{CATALOG_PREFIX}{id}")
}

fn sync_meta_key(id: SessionId) -> String {
    format!("{SYNC_META_PREFIX}{id}")
}

fn conflict_prefix(id: SessionId) -> String {
    format!("{CONFLICT_PREFIX}{id}/")
}

/// What the local side knows about a session's remote copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SyncMeta {
    /// Last remote revision acknowledged for this session (0 = never synced)
    pub remote_revision: u64,
    pub last_synced_at: Option<i64>,
}

/// A session as held locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSession {
    /// Bumped on every write of this session, local or reconciled. Unlike
    /// the snapshot revision it never repeats, even after an undo.
    pub write_seq: u64,
    pub snapshot: SessionSnapshot,
}

/// Proof that a session has not been deleted since the token was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidityToken {
    pub session_id: SessionId,
    generation: u64,
}

/// Local persistence over a key-value backend, optionally feeding a sync queue.
pub struct LocalStore {
    kv: Arc<dyn KeyValueStore>,
    queue: Option<Arc<SyncQueue>>,
    clock: Arc<dyn Clock>,
    generations: Mutex<HashMap<SessionId, u64>>,
    /// Serializes session writes so revision checks and writes are atomic.
    write_lock: tokio::sync::Mutex<()>,
}

impl LocalStore {
    /// A store that never enqueues remote operations.
    pub fn local_only(kv: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            kv,
            queue: None,
            clock,
            generations: Mutex::new(HashMap::new()),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// A store that enqueues one operation per session write or delete.
    pub fn with_sync(
        kv: Arc<dyn KeyValueStore>,
        queue: Arc<SyncQueue>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            kv,
            queue: Some(queue),
            clock,
            generations: Mutex::new(HashMap::new()),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn queue(&self) -> Option<&Arc<SyncQueue>> {
        self.queue.as_ref()
    }

    pub const fn sync_enabled(&self) -> bool {
        self.queue.is_some()
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.kv.get(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn set_json<T: Serialize + Sync>(&self, key: &str, value: &T) -> Result<()> {
        self.kv.set(key, &serde_json::to_string(value)?).await
    }

    pub async fn read_session(&self, id: SessionId) -> Result<SessionSnapshot> {
        Ok(self.read_stored(id).await?.snapshot)
    }

    /// The stored snapshot together with its write sequence.
    pub async fn read_stored(&self, id: SessionId) -> Result<StoredSession> {
        self.get_json(&session_key(id))
            .await?
            .ok_or_else(|| Error::NotFound(format!("session {id}")))
    }

    pub async fn session_exists(&self, id: SessionId) -> Result<bool> {
        Ok(self.kv.get(&session_key(id)).await?.is_some())
    }

    /// Persist a locally produced snapshot and enqueue its upsert, as one
    /// backend write. Returns the new write sequence.
    pub async fn write_session(&self, snapshot: &SessionSnapshot) -> Result<u64> {
        let _guard = self.write_lock.lock().await;
        self.put_local(snapshot).await
    }

    /// Like [`Self::write_session`], but only if the stored write sequence is
    /// still `expected_write_seq`. Returns `None` without writing otherwise,
    /// which means a reconciled snapshot landed in between.
    pub async fn replace_session(
        &self,
        snapshot: &SessionSnapshot,
        expected_write_seq: u64,
    ) -> Result<Option<u64>> {
        let _guard = self.write_lock.lock().await;
        if let Some(stored) = self.stored_write_seq(snapshot.id).await? {
            if stored != expected_write_seq {
                tracing::debug!(
                    session_id = %snapshot.id,
                    stored,
                    expected_write_seq,
                    "Stored session moved on, not replacing"
                );
                return Ok(None);
            }
        }
        self.put_local(snapshot).await.map(Some)
    }

    async fn put_local(&self, snapshot: &SessionSnapshot) -> Result<u64> {
        let write_seq = self.stored_write_seq(snapshot.id).await?.unwrap_or(0) + 1;
        let entries = self.session_entries(snapshot, write_seq).await?;
        match &self.queue {
            Some(queue) => {
                let meta = self.sync_meta(snapshot.id).await?;
                let op = SyncOperation::upsert(
                    snapshot.clone(),
                    meta.remote_revision,
                    self.clock.now_ms(),
                )
                .with_write_seq(write_seq);
                queue.enqueue_with(op, entries).await?;
            }
            None => self.kv.set_many(&entries).await?,
        }
        tracing::debug!(
            session_id = %snapshot.id,
            revision = snapshot.revision,
            write_seq,
            "Wrote session snapshot"
        );
        Ok(write_seq)
    }

    /// Persist a snapshot that came from reconciliation with the remote,
    /// together with the remote revision it now reflects.
    ///
    /// Never enqueues. Returns `false` without writing if the session was
    /// deleted since `token` was taken or the stored write sequence is no
    /// longer `expected_write_seq`.
    pub async fn write_remote_origin(
        &self,
        snapshot: &SessionSnapshot,
        token: &ValidityToken,
        expected_write_seq: u64,
        meta: &SyncMeta,
    ) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        if !self.is_valid(token) {
            tracing::debug!(session_id = %snapshot.id, "Skipping write for deleted session");
            return Ok(false);
        }
        if self.stored_write_seq(snapshot.id).await? != Some(expected_write_seq) {
            tracing::debug!(
                session_id = %snapshot.id,
                "Local session changed during reconciliation, keeping it"
            );
            return Ok(false);
        }
        let mut entries = self
            .session_entries(snapshot, expected_write_seq + 1)
            .await?;
        entries.push((sync_meta_key(snapshot.id), serde_json::to_string(meta)?));
        self.kv.set_many(&entries).await?;
        tracing::debug!(
            session_id = %snapshot.id,
            revision = snapshot.revision,
            remote_revision = meta.remote_revision,
            "Wrote reconciled session snapshot"
        );
        Ok(true)
    }

    async fn stored_write_seq(&self, id: SessionId) -> Result<Option<u64>> {
        Ok(self
            .get_json::<StoredSession>(&session_key(id))
            .await?
            .map(|stored| stored.write_seq))
    }

    /// The session entry, plus the catalog entry for saved sessions.
    async fn session_entries(
        &self,
        snapshot: &SessionSnapshot,
        write_seq: u64,
    ) -> Result<Vec<(String, String)>> {
        let stored = StoredSession {
            write_seq,
            snapshot: snapshot.clone(),
        };
        let mut entries = vec![(session_key(snapshot.id), serde_json::to_string(&stored)?)];
        if self.kv.get(&catalog_key(snapshot.id)).await?.is_some() {
            entries.push((
                catalog_key(snapshot.id),
                serde_json::to_string(&snapshot.summary())?,
            ));
        }
        Ok(entries)
    }

    /// Add a session to the saved-sessions catalog.
    pub async fn archive_session(&self, id: SessionId) -> Result<SessionSummary> {
        let snapshot = self.read_session(id).await?;
        let summary = snapshot.summary();
        self.set_json(&catalog_key(id), &summary).await?;
        tracing::info!(session_id = %id, "Saved session to catalog");
        Ok(summary)
    }

    /// Saved sessions, most recently modified first.
    pub async fn list_sessions(&self) -> Result<Vec<SessionSummary>> {
        let mut summaries = Vec::new();
        for key in self.kv.keys(CATALOG_PREFIX).await? {
            if let Some(summary) = self.get_json::<SessionSummary>(&key).await? {
                summaries.push(summary);
            }
        }
        summaries.sort_by(|a, b| {
            b.last_modified
                .cmp(&a.last_modified)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(summaries)
    }

    /// Remove a session and everything that belongs to it, then enqueue the
    /// remote delete.
    pub async fn delete_session(&self, id: SessionId) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let Some(stored) = self.get_json::<StoredSession>(&session_key(id)).await? else {
            return Err(Error::NotFound(format!("session {id}")));
        };
        self.invalidate(id);

        let meta = self.sync_meta(id).await?;
        if let Some(queue) = &self.queue {
            queue.remove_session(id).await?;
        }
        for key in self.kv.keys(&conflict_prefix(id)).await? {
            self.kv.delete(&key).await?;
        }
        self.kv.delete(&history_key(id)).await?;
        self.kv.delete(&catalog_key(id)).await?;
        self.kv.delete(&sync_meta_key(id)).await?;
        self.kv.delete(&session_key(id)).await?;
        if self.current_session_id().await? == Some(id) {
            self.set_current_session(None).await?;
        }

        if let Some(queue) = &self.queue {
            queue
                .enqueue(SyncOperation::delete(
                    id,
                    meta.remote_revision,
                    self.clock.now_ms(),
                ))
                .await?;
        }
        tracing::info!(session_id = %id, revision = stored.snapshot.revision, "Deleted session");
        Ok(())
    }

    pub async fn write_history(&self, id: SessionId, history: &PersistedHistory) -> Result<()> {
        self.set_json(&history_key(id), history).await
    }

    /// Persisted history, empty if none was written.
    pub async fn read_history(&self, id: SessionId) -> Result<PersistedHistory> {
        Ok(self
            .get_json(&history_key(id))
            .await?
            .unwrap_or_default())
    }

    pub async fn current_session_id(&self) -> Result<Option<SessionId>> {
        Ok(self
            .kv
            .get(CURRENT_SESSION_KEY)
            .await?
            .and_then(|raw| raw.parse().ok()))
    }

    pub async fn set_current_session(&self, id: Option<SessionId>) -> Result<()> {
        match id {
            Some(id) => self.kv.set(CURRENT_SESSION_KEY, &id.to_string()).await,
            None => self.kv.delete(CURRENT_SESSION_KEY).await,
        }
    }

    pub async fn sync_meta(&self, id: SessionId) -> Result<SyncMeta> {
        Ok(self
            .get_json(&sync_meta_key(id))
            .await?
            .unwrap_or_default())
    }

    pub async fn set_sync_meta(&self, id: SessionId, meta: &SyncMeta) -> Result<()> {
        self.set_json(&sync_meta_key(id), meta).await
    }

    /// Like [`Self::set_sync_meta`], but skipped if the session was deleted
    /// since `token` was taken. Returns whether it was written.
    pub async fn update_sync_meta(&self, token: &ValidityToken, meta: &SyncMeta) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        if !self.is_valid(token) {
            return Ok(false);
        }
        self.set_sync_meta(token.session_id, meta).await?;
        Ok(true)
    }

    /// Store a conflict record unless its session was deleted since `token`
    /// was taken. Returns whether it was written.
    pub async fn record_conflict(
        &self,
        record: &ConflictRecord,
        token: &ValidityToken,
    ) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        if !self.is_valid(token) {
            tracing::debug!(session_id = %record.session_id, "Dropping conflict for deleted session");
            return Ok(false);
        }
        let key = format!("{}{}", conflict_prefix(record.session_id), record.id);
        self.set_json(&key, record).await?;
        tracing::info!(
            session_id = %record.session_id,
            local_revision = record.local_revision,
            remote_revision = record.remote_revision,
            strategy = %record.strategy,
            "Resolved sync conflict"
        );
        Ok(true)
    }

    /// Most recent conflicts across all sessions, newest first.
    pub async fn list_conflicts(&self, limit: usize) -> Result<Vec<ConflictRecord>> {
        let mut records = Vec::new();
        for key in self.kv.keys(CONFLICT_PREFIX).await? {
            if let Some(record) = self.get_json::<ConflictRecord>(&key).await? {
                records.push(record);
            }
        }
        records.sort_by(|a, b| b.resolved_at.cmp(&a.resolved_at).then(b.id.cmp(&a.id)));
        records.truncate(limit);
        Ok(records)
    }

    pub async fn conflicts_for(&self, id: SessionId) -> Result<Vec<ConflictRecord>> {
        let mut records = Vec::new();
        for key in self.kv.keys(&conflict_prefix(id)).await? {
            if let Some(record) = self.get_json::<ConflictRecord>(&key).await? {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Token that stays valid until the session is deleted.
    pub fn validity_token(&self, id: SessionId) -> ValidityToken {
        let generation = self
            .generations
            .lock()
            .map_or(0, |generations| generations.get(&id).copied().unwrap_or(0));
        ValidityToken {
            session_id: id,
            generation,
        }
    }

    pub fn is_valid(&self, token: &ValidityToken) -> bool {
        self.generations.lock().is_ok_and(|generations| {
            generations.get(&token.session_id).copied().unwrap_or(0) == token.generation
        })
    }

    fn invalidate(&self, id: SessionId) {
        if let Ok(mut generations) = self.generations.lock() {
            *generations.entry(id).or_insert(0) += 1;
        }
    }
}
