//! Command model: user-intent mutations of a session

use serde::{Deserialize, Serialize};

use super::ids::{DrawingId, EventId, PlayerId};
use super::session::{Drawing, EventKind, FieldPosition, Side, TimerPhase};

/// Event to append to the log. The id is chosen by the caller so that the
/// command stays deterministic when replayed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDraft {
    pub id: EventId,
    pub kind: EventKind,
    pub side: Side,
    #[serde(default)]
    pub player_id: Option<PlayerId>,
    /// Match clock second; the current elapsed time when omitted
    #[serde(default)]
    pub at_secs: Option<u64>,
}

impl EventDraft {
    #[must_use]
    pub fn new(kind: EventKind, side: Side) -> Self {
        Self {
            id: EventId::new(),
            kind,
            side,
            player_id: None,
            at_secs: None,
        }
    }

    #[must_use]
    pub fn with_player(mut self, player: impl Into<PlayerId>) -> Self {
        self.player_id = Some(player.into());
        self
    }

    #[must_use]
    pub const fn at(mut self, at_secs: u64) -> Self {
        self.at_secs = Some(at_secs);
        self
    }
}

/// A single user-intent mutation; the unit of undo/redo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    MovePlayer {
        player_id: PlayerId,
        to: FieldPosition,
    },
    AddDrawing {
        drawing: Drawing,
    },
    RemoveDrawing {
        drawing_id: DrawingId,
    },
    LogEvent {
        event: EventDraft,
    },
    /// Retract a logged event (e.g. a goal entered by mistake)
    UndoEvent {
        event_id: EventId,
    },
    SetPhase {
        phase: TimerPhase,
    },
    ConfirmSubstitution,
    AdvancePeriod,
    /// Refresh elapsed-time derived state; never recorded in history
    Tick,
}

impl Command {
    pub const fn is_tick(&self) -> bool {
        matches!(self, Self::Tick)
    }

    /// Short name for logs.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::MovePlayer { .. } => "move_player",
            Self::AddDrawing { .. } => "add_drawing",
            Self::RemoveDrawing { .. } => "remove_drawing",
            Self::LogEvent { .. } => "log_event",
            Self::UndoEvent { .. } => "undo_event",
            Self::SetPhase { .. } => "set_phase",
            Self::ConfirmSubstitution => "confirm_substitution",
            Self::AdvancePeriod => "advance_period",
            Self::Tick => "tick",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CardColor;

    #[test]
    fn command_serializes_with_tag() {
        let command = Command::SetPhase {
            phase: TimerPhase::Running,
        };
        let json = serde_json::to_string(&command).unwrap();
        assert_eq!(json, r#"{"command":"set_phase","phase":"running"}"#);
    }

    #[test]
    fn event_draft_builder_sets_player_and_time() {
        let draft = EventDraft::new(
            EventKind::Card {
                color: CardColor::Yellow,
            },
            Side::Away,
        )
        .with_player("4")
        .at(300);
        assert_eq!(draft.player_id, Some(PlayerId::new("4")));
        assert_eq!(draft.at_secs, Some(300));
    }

    #[test]
    fn only_tick_is_tick() {
        assert!(Command::Tick.is_tick());
        assert!(!Command::AdvancePeriod.is_tick());
        assert_eq!(Command::ConfirmSubstitution.name(), "confirm_substitution");
    }
}
