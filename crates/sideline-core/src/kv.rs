//! Key-value backend abstraction for the durable local tier.
//!
//! `set` must be atomic per key and durable before it returns; `set_many`
//! applies every entry or none of them. `keys` returns matching keys in
//! ascending order.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::{Error, Result};

/// Async key-value storage consumed by the local store and sync queue.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Write several entries as one unit.
    async fn set_many(&self, entries: &[(String, String)]) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// All keys starting with `prefix`, ascending.
    async fn keys(&self, prefix: &str) -> Result<Vec<String>>;
}

/// In-memory backend.
///
/// Useful for tests and ephemeral sessions. Data is lost on restart.
#[derive(Default)]
pub struct MemoryKvStore {
    entries: RwLock<BTreeMap<String, String>>,
    unavailable: AtomicBool,
    failing_prefix: RwLock<Option<String>>,
}

impl MemoryKvStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail with a storage error, as an unavailable
    /// device store would.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make writes touching any key under `prefix` fail, leaving reads and
    /// other writes working. `None` clears it.
    pub fn fail_writes_under(&self, prefix: Option<&str>) {
        if let Ok(mut failing) = self.failing_prefix.write() {
            *failing = prefix.map(str::to_string);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map_or(0, |entries| entries.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(Error::StorageIo("local store unavailable".to_string()))
        } else {
            Ok(())
        }
    }

    fn check_writable<'a>(&self, mut keys: impl Iterator<Item = &'a str>) -> Result<()> {
        self.check_available()?;
        let failing = self.failing_prefix.read().map_err(|e| poisoned(&e))?;
        match failing.as_deref() {
            Some(prefix) if keys.any(|key| key.starts_with(prefix)) => Err(Error::StorageIo(
                format!("writes under {prefix} are failing"),
            )),
            _ => Ok(()),
        }
    }
}

fn poisoned<T>(error: &std::sync::PoisonError<T>) -> Error {
    Error::StorageIo(error.to_string())
}

#[async_trait]
impl KeyValueStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check_available()?;
        Ok(self
            .entries
            .read()
            .map_err(|e| poisoned(&e))?
            .get(key)
            .cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.check_writable(std::iter::once(key))?;
        self.entries
            .write()
            .map_err(|e| poisoned(&e))?
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn set_many(&self, entries: &[(String, String)]) -> Result<()> {
        self.check_writable(entries.iter().map(|(key, _)| key.as_str()))?;
        let mut guard = self.entries.write().map_err(|e| poisoned(&e))?;
        for (key, value) in entries {
            guard.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.check_available()?;
        self.entries
            .write()
            .map_err(|e| poisoned(&e))?
            .remove(key);
        Ok(())
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        self.check_available()?;
        let entries = self.entries.read().map_err(|e| poisoned(&e))?;
        Ok(entries
            .range(prefix.to_string()..)
            .map(|(key, _)| key)
            .take_while(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }
}
