use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] sideline_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("No current session. Run `sideline new <team>` or `sideline load <id>`.")]
    NoSession,
    #[error("ID cannot be empty")]
    EmptyId,
    #[error("Not found for id/prefix: {0}")]
    IdNotFound(String),
    #[error("{0}")]
    AmbiguousId(String),
    #[error("Invalid point '{0}', expected x,y")]
    InvalidPoint(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error(
        "Sync is not configured. Run `sideline config init --remote-url <url> --sync true` or set SIDELINE_REMOTE_URL."
    )]
    SyncNotConfigured,
}
