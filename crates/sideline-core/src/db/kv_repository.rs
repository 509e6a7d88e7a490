//! `SQLite`-backed key-value store

use std::path::Path;

use async_trait::async_trait;
use rusqlite::{params, OptionalExtension};

use crate::error::Result;
use crate::kv::KeyValueStore;
use crate::util::unix_timestamp_ms_now;

use super::Database;

/// Durable [`KeyValueStore`] over the `kv_entries` table.
#[derive(Clone)]
pub struct SqliteKvStore {
    db: Database,
}

impl SqliteKvStore {
    pub const fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(Database::open(path)?))
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::new(Database::open_in_memory()?))
    }
}

#[async_trait]
impl KeyValueStore for SqliteKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        self.db
            .with_connection(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT value FROM kv_entries WHERE key = ?1",
                        params![key],
                        |row| row.get(0),
                    )
                    .optional()?)
            })
            .await
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let key = key.to_string();
        let value = value.to_string();
        let now = unix_timestamp_ms_now();
        self.db
            .with_connection(move |conn| {
                conn.execute(
                    "INSERT INTO kv_entries (key, value, updated_at) VALUES (?1, ?2, ?3)
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                    params![key, value, now],
                )?;
                Ok(())
            })
            .await
    }

    async fn set_many(&self, entries: &[(String, String)]) -> Result<()> {
        let entries = entries.to_vec();
        let now = unix_timestamp_ms_now();
        self.db
            .with_connection(move |conn| {
                let tx = conn.unchecked_transaction()?;
                for (key, value) in &entries {
                    tx.execute(
                        "INSERT INTO kv_entries (key, value, updated_at) VALUES (?1, ?2, ?3)
                         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                        params![key, value, now],
                    )?;
                }
                tx.commit()?;
                Ok(())
            })
            .await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let key = key.to_string();
        self.db
            .with_connection(move |conn| {
                conn.execute("DELETE FROM kv_entries WHERE key = ?1", params![key])?;
                Ok(())
            })
            .await
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let prefix = prefix.to_string();
        self.db
            .with_connection(move |conn| {
                let mut stmt =
                    conn.prepare("SELECT key FROM kv_entries WHERE key >= ?1 ORDER BY key ASC")?;
                let rows = stmt.query_map(params![prefix], |row| row.get::<_, String>(0))?;

                let mut keys = Vec::new();
                for key in rows {
                    let key = key?;
                    if !key.starts_with(&prefix) {
                        break;
                    }
                    keys.push(key);
                }
                Ok(keys)
            })
            .await
    }
}
