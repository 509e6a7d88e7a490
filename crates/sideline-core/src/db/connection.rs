//! Database connection management

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use crate::error::{Error, Result};

use super::migrations;

/// Shared handle to a configured and migrated `SQLite` connection.
///
/// The connection is guarded by a mutex; callers run queries on blocking
/// threads through [`Database::with_connection`].
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open the database at `path`, creating it and any parent directories
    /// if needed. Runs migrations automatically.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        let database = Self::from_connection(conn)?;
        tracing::debug!(path = %path.display(), "Opened local database");
        Ok(database)
    }

    /// Open an in-memory database (useful for testing)
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        configure(&conn)?;
        migrations::run(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on a blocking thread.
    pub async fn with_connection<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|e| Error::StorageIo(format!("database lock poisoned: {e}")))?;
            f(&guard)
        })
        .await
        .map_err(|e| Error::StorageIo(format!("database task failed: {e}")))?
    }

    /// Current schema version
    pub fn schema_version(&self) -> Result<i32> {
        let guard = self
            .conn
            .lock()
            .map_err(|e| Error::StorageIo(format!("database lock poisoned: {e}")))?;
        migrations::version(&guard)
    }
}

/// Writes must be durable before they are acknowledged, so `synchronous`
/// stays at FULL.
fn configure(conn: &Connection) -> Result<()> {
    // In-memory databases report "memory" instead of "wal".
    let _mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    conn.pragma_update(None, "synchronous", "FULL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(())
}
