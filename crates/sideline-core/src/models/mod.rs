//! Data models for Sideline

mod command;
mod ids;
mod session;
mod sync_conflict;
mod sync_operation;

pub use command::{Command, EventDraft};
pub use ids::{ConflictId, DrawingId, EventId, PlayerId, SessionId};
pub use session::{
    CardColor, Drawing, EventKind, FieldPosition, GameEvent, NewSession, Placement, Point, Score,
    SessionSnapshot, SessionSummary, Side, SubstitutionSchedule, TimerMarks, TimerPhase,
};
pub use sync_conflict::{ConflictRecord, ConflictStrategy};
pub use sync_operation::{SyncOpKind, SyncOperation};
