//! Error types for sideline-core

use thiserror::Error;

use crate::models::TimerPhase;

/// Result type alias using sideline-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in sideline-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// State machine misuse; never retried
    #[error("Invalid transition: cannot {action} while {from}")]
    InvalidTransition {
        /// Phase the session was in
        from: TimerPhase,
        /// Operation that was attempted
        action: &'static str,
    },

    /// Session, event, or drawing not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Local store unavailable; the write was not acknowledged
    #[error("Storage error: {0}")]
    StorageIo(String),

    /// Remote store unreachable or rejected the request
    #[error("Sync error: {0}")]
    Sync(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// `SQLite` error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether the error belongs to the remote tier and should be retried.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Sync(_))
    }
}
