//! Engine configuration.
//!
//! `EngineConfig` is plain JSON with defaults for every field, so an empty
//! object is a valid local-only configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::history::DEFAULT_PERSISTED_DEPTH;
use crate::sync::BackoffPolicy;
use crate::util::{is_http_url, normalize_text_option};

const DEFAULT_BACKOFF_BASE_MS: u64 = 1_000;
const DEFAULT_BACKOFF_MAX_MS: u64 = 60_000;
const DEFAULT_BACKOFF_JITTER: f64 = 0.2;
const DEFAULT_BATCH_SIZE: usize = 16;
const DEFAULT_REMOTE_TIMEOUT_SECS: u64 = 10;
const DEFAULT_DEGRADED_AFTER_ATTEMPTS: u32 = 5;
const DEFAULT_MAX_CONFLICT_RETRIES: u32 = 3;

/// Tunables for the orchestrator and sync engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct EngineConfig {
    /// Undo entries kept per stack when history is persisted
    pub history_depth: usize,
    /// Enqueue remote sync operations on every write
    pub sync_enabled: bool,
    pub remote_base_url: Option<String>,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    /// Fraction of each delay that may be shaved off at random, 0.0..=1.0
    pub backoff_jitter: f64,
    /// Maximum operations taken per drain
    pub batch_size: usize,
    pub remote_timeout_secs: u64,
    /// Attempts after which sync status reports degraded
    pub degraded_after_attempts: u32,
    /// Immediate retries when the remote moves between fetch and upsert
    pub max_conflict_retries: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            history_depth: DEFAULT_PERSISTED_DEPTH,
            sync_enabled: false,
            remote_base_url: None,
            backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
            backoff_max_ms: DEFAULT_BACKOFF_MAX_MS,
            backoff_jitter: DEFAULT_BACKOFF_JITTER,
            batch_size: DEFAULT_BATCH_SIZE,
            remote_timeout_secs: DEFAULT_REMOTE_TIMEOUT_SECS,
            degraded_after_attempts: DEFAULT_DEGRADED_AFTER_ATTEMPTS,
            max_conflict_retries: DEFAULT_MAX_CONFLICT_RETRIES,
        }
    }
}

impl EngineConfig {
    /// Load and validate a config file. A missing file yields the defaults.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No engine config file, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let mut config: Self = serde_json::from_str(raw)?;
        config.normalize()?;
        Ok(config)
    }

    /// Trim the remote URL and check ranges.
    pub fn normalize(&mut self) -> Result<()> {
        self.remote_base_url = match normalize_text_option(self.remote_base_url.take()) {
            Some(url) if is_http_url(&url) => Some(url.trim_end_matches('/').to_string()),
            Some(_) => {
                return Err(Error::InvalidInput(
                    "remote_base_url must include http:// or https://".to_string(),
                ))
            }
            None => None,
        };
        if !(0.0..=1.0).contains(&self.backoff_jitter) {
            return Err(Error::InvalidInput(
                "backoff_jitter must be between 0.0 and 1.0".to_string(),
            ));
        }
        if self.backoff_base_ms == 0 || self.backoff_max_ms < self.backoff_base_ms {
            return Err(Error::InvalidInput(
                "backoff_max_ms must be at least backoff_base_ms, which must be positive"
                    .to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(Error::InvalidInput("batch_size must be positive".to_string()));
        }
        Ok(())
    }

    /// Sync is active only when enabled and a remote is configured.
    pub const fn remote_sync_active(&self) -> bool {
        self.sync_enabled && self.remote_base_url.is_some()
    }

    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            base: Duration::from_millis(self.backoff_base_ms),
            max: Duration::from_millis(self.backoff_max_ms),
            jitter: self.backoff_jitter,
        }
    }

    pub const fn remote_timeout(&self) -> Duration {
        Duration::from_secs(self.remote_timeout_secs)
    }
}
