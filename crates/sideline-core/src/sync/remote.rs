//! Remote store abstraction and an in-memory implementation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::models::{SessionId, SessionSnapshot};

/// A session as held by the remote, with the remote's own revision.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteRecord {
    pub snapshot: SessionSnapshot,
    pub revision: u64,
}

/// Result of a conditional upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Applied { new_revision: u64 },
    /// The remote moved past `expected_revision` since it was read.
    Conflict { current_revision: u64 },
}

/// Eventually-consistent remote storage for session snapshots.
///
/// Errors are expected to be transient and map to [`Error::Sync`].
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn fetch(&self, id: SessionId) -> Result<Option<RemoteRecord>>;

    /// Write `snapshot` if the remote revision still equals
    /// `expected_revision` (0 when the record should not exist yet).
    async fn upsert(
        &self,
        snapshot: &SessionSnapshot,
        expected_revision: u64,
    ) -> Result<UpsertOutcome>;

    /// Remove a session. Deleting an absent record succeeds.
    async fn delete(&self, id: SessionId) -> Result<()>;
}

/// In-process remote, with switches to simulate outages and other writers.
#[derive(Default)]
pub struct MemoryRemoteStore {
    records: Mutex<HashMap<SessionId, RemoteRecord>>,
    unreachable: AtomicBool,
    fail_next: AtomicUsize,
    latency: Mutex<Option<Duration>>,
    upserts: AtomicUsize,
}

impl MemoryRemoteStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Fail the next `count` calls with a transient error.
    pub fn fail_next(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Delay every call, to exercise timeouts.
    pub fn set_latency(&self, latency: Option<Duration>) {
        if let Ok(mut guard) = self.latency.lock() {
            *guard = latency;
        }
    }

    /// Write a record directly, as another device would.
    pub fn put_record(&self, snapshot: SessionSnapshot, revision: u64) {
        if let Ok(mut records) = self.records.lock() {
            records.insert(snapshot.id, RemoteRecord { snapshot, revision });
        }
    }

    pub fn record(&self, id: SessionId) -> Option<RemoteRecord> {
        self.records
            .lock()
            .ok()
            .and_then(|records| records.get(&id).cloned())
    }

    pub fn len(&self) -> usize {
        self.records.lock().map_or(0, |records| records.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of upserts applied so far.
    pub fn upsert_count(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }

    async fn before_call(&self) -> Result<()> {
        let latency = self.latency.lock().ok().and_then(|guard| *guard);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(Error::Sync("remote unreachable".to_string()));
        }
        let failing = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::Sync("injected remote failure".to_string()));
        }
        Ok(())
    }

    fn lock_records(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<SessionId, RemoteRecord>>> {
        self.records
            .lock()
            .map_err(|e| Error::Sync(format!("remote state poisoned: {e}")))
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn fetch(&self, id: SessionId) -> Result<Option<RemoteRecord>> {
        self.before_call().await?;
        Ok(self.lock_records()?.get(&id).cloned())
    }

    async fn upsert(
        &self,
        snapshot: &SessionSnapshot,
        expected_revision: u64,
    ) -> Result<UpsertOutcome> {
        self.before_call().await?;
        let mut records = self.lock_records()?;
        let current = records.get(&snapshot.id).map_or(0, |record| record.revision);
        if current != expected_revision {
            return Ok(UpsertOutcome::Conflict {
                current_revision: current,
            });
        }
        let new_revision = snapshot.revision.max(current + 1);
        let mut stored = snapshot.clone();
        stored.revision = new_revision;
        records.insert(
            snapshot.id,
            RemoteRecord {
                snapshot: stored,
                revision: new_revision,
            },
        );
        drop(records);
        self.upserts.fetch_add(1, Ordering::SeqCst);
        Ok(UpsertOutcome::Applied { new_revision })
    }

    async fn delete(&self, id: SessionId) -> Result<()> {
        self.before_call().await?;
        self.lock_records()?.remove(&id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewSession;
    use pretty_assertions::assert_eq;

    fn snapshot(revision: u64) -> SessionSnapshot {
        let mut snapshot = SessionSnapshot::new(&NewSession::default(), 0);
        snapshot.revision = revision;
        snapshot
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn upsert_applies_when_expected_matches() {
        let remote = MemoryRemoteStore::new();
        let local = snapshot(3);

        let outcome = remote.upsert(&local, 0).await.unwrap();
        assert_eq!(outcome, UpsertOutcome::Applied { new_revision: 3 });

        let record = remote.fetch(local.id).await.unwrap().unwrap();
        assert_eq!(record.revision, 3);
        assert_eq!(record.snapshot, local);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn upsert_reports_conflict_on_stale_expectation() {
        let remote = MemoryRemoteStore::new();
        let local = snapshot(2);
        remote.put_record(local.clone(), 6);

        let outcome = remote.upsert(&local, 5).await.unwrap();
        assert_eq!(
            outcome,
            UpsertOutcome::Conflict {
                current_revision: 6
            }
        );
        assert_eq!(remote.upsert_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn remote_revision_always_advances() {
        let remote = MemoryRemoteStore::new();
        let local = snapshot(1);
        remote.put_record(local.clone(), 4);

        let outcome = remote.upsert(&local, 4).await.unwrap();
        assert_eq!(outcome, UpsertOutcome::Applied { new_revision: 5 });
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delete_of_absent_record_succeeds() {
        let remote = MemoryRemoteStore::new();
        remote.delete(SessionId::new()).await.unwrap();
        assert!(remote.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn injected_failures_are_transient() {
        let remote = MemoryRemoteStore::new();
        remote.fail_next(1);
        let error = remote.fetch(SessionId::new()).await.unwrap_err();
        assert!(error.is_retryable());
        assert!(remote.fetch(SessionId::new()).await.unwrap().is_none());

        remote.set_unreachable(true);
        assert!(remote.delete(SessionId::new()).await.is_err());
    }
}
