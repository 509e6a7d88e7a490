//! Sync status reported to callers.

use std::fmt;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// Coarse sync state for status displays.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    /// No remote configured
    Disabled,
    /// Connectivity signal reports offline
    Offline,
    /// Operations queued, none failing
    Pending,
    /// A drain is in progress
    Syncing,
    /// Queue empty
    Synced,
    /// An operation keeps failing
    Degraded,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disabled => "disabled",
            Self::Offline => "offline",
            Self::Pending => "pending",
            Self::Syncing => "syncing",
            Self::Synced => "synced",
            Self::Degraded => "degraded",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub pending_count: usize,
    pub last_error: Option<String>,
    /// Unix ms of the last acknowledged remote write
    pub last_synced_at: Option<i64>,
    pub state: SyncState,
}

impl SyncStatus {
    pub const fn disabled(pending_count: usize) -> Self {
        Self {
            pending_count,
            last_error: None,
            last_synced_at: None,
            state: SyncState::Disabled,
        }
    }
}

#[derive(Debug, Default)]
struct Activity {
    syncing: bool,
    last_error: Option<String>,
    last_synced_at: Option<i64>,
}

/// Mutable drain activity shared between the engine and status readers.
#[derive(Debug, Default)]
pub(crate) struct StatusTracker {
    activity: Mutex<Activity>,
}

impl StatusTracker {
    fn update(&self, f: impl FnOnce(&mut Activity)) {
        if let Ok(mut activity) = self.activity.lock() {
            f(&mut activity);
        }
    }

    pub(crate) fn set_syncing(&self, syncing: bool) {
        self.update(|activity| activity.syncing = syncing);
    }

    pub(crate) fn record_success(&self, at_ms: i64) {
        self.update(|activity| {
            activity.last_synced_at = Some(at_ms);
            activity.last_error = None;
        });
    }

    pub(crate) fn record_error(&self, error: &str) {
        self.update(|activity| activity.last_error = Some(error.to_string()));
    }

    /// Combine drain activity with queue facts into a status.
    pub(crate) fn status(
        &self,
        online: bool,
        pending_count: usize,
        max_attempts: u32,
        degraded_after: u32,
    ) -> SyncStatus {
        let (syncing, last_error, last_synced_at) = self.activity.lock().map_or(
            (false, None, None),
            |activity| {
                (
                    activity.syncing,
                    activity.last_error.clone(),
                    activity.last_synced_at,
                )
            },
        );

        let state = if !online {
            SyncState::Offline
        } else if max_attempts >= degraded_after && pending_count > 0 {
            SyncState::Degraded
        } else if syncing {
            SyncState::Syncing
        } else if pending_count > 0 {
            SyncState::Pending
        } else {
            SyncState::Synced
        };

        SyncStatus {
            pending_count,
            last_error,
            last_synced_at,
            state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offline_wins_over_everything() {
        let tracker = StatusTracker::default();
        tracker.set_syncing(true);
        assert_eq!(tracker.status(false, 3, 9, 5).state, SyncState::Offline);
    }

    #[test]
    fn repeated_failures_report_degraded() {
        let tracker = StatusTracker::default();
        tracker.record_error("HTTP 503");
        let status = tracker.status(true, 1, 5, 5);
        assert_eq!(status.state, SyncState::Degraded);
        assert_eq!(status.last_error.as_deref(), Some("HTTP 503"));
    }

    #[test]
    fn success_clears_last_error() {
        let tracker = StatusTracker::default();
        tracker.record_error("timeout");
        tracker.record_success(42);
        let status = tracker.status(true, 0, 0, 5);
        assert_eq!(status.state, SyncState::Synced);
        assert_eq!(status.last_error, None);
        assert_eq!(status.last_synced_at, Some(42));
    }

    #[test]
    fn queued_work_is_pending_until_drained() {
        let tracker = StatusTracker::default();
        assert_eq!(tracker.status(true, 2, 1, 5).state, SyncState::Pending);
        tracker.set_syncing(true);
        assert_eq!(tracker.status(true, 2, 1, 5).state, SyncState::Syncing);
    }

    #[test]
    fn display_is_lowercase() {
        assert_eq!(SyncState::Degraded.to_string(), "degraded");
    }
}
