//! Sync conflict model

use std::fmt;

use serde::{Deserialize, Serialize};

use super::ids::{ConflictId, SessionId};

/// How a detected divergence was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    /// Scalars last-write-wins, collections union-merged by entry id
    FieldMerge,
    /// Remote record was gone; the local snapshot re-created it
    RecreateRemote,
}

impl fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::FieldMerge => "field-merge",
            Self::RecreateRemote => "recreate-remote",
        })
    }
}

/// Recorded sync conflict, kept for later inspection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub id: ConflictId,
    /// Session involved in the conflict
    pub session_id: SessionId,
    /// Revision of the local snapshot being pushed
    pub local_revision: u64,
    /// Revision found on the remote
    pub remote_revision: u64,
    /// Resolution strategy applied
    pub strategy: ConflictStrategy,
    /// Resolution timestamp (unix ms)
    pub resolved_at: i64,
}
