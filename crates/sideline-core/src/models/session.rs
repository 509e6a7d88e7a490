//! Session snapshot model

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::ids::{DrawingId, EventId, PlayerId, SessionId};
use crate::error::{Error, Result};

/// Timer phase of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TimerPhase {
    /// Session created, clock not started
    #[default]
    Idle,
    /// Clock running
    Running,
    /// Clock stopped, can resume
    Paused,
    /// Terminal
    Ended,
}

impl fmt::Display for TimerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Ended => "ended",
        };
        f.write_str(label)
    }
}

/// Wall-clock marks the elapsed time is derived from.
///
/// Elapsed time is `end - started_at - paused_total_ms`, where `end` is the
/// freeze mark while paused or ended and the current time otherwise. Nothing
/// is accumulated per tick, so suspension of the host cannot cause drift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TimerMarks {
    /// Unix ms when the clock was first started
    pub started_at: Option<i64>,
    /// Unix ms when the clock was last paused or ended
    pub frozen_at: Option<i64>,
    /// Total ms spent paused across all completed pause segments
    pub paused_total_ms: i64,
}

impl TimerMarks {
    /// Elapsed running time in milliseconds at `now_ms`.
    pub fn elapsed_ms(&self, now_ms: i64) -> i64 {
        let Some(started_at) = self.started_at else {
            return 0;
        };
        let end = self.frozen_at.unwrap_or(now_ms);
        end.saturating_sub(started_at)
            .saturating_sub(self.paused_total_ms)
            .max(0)
    }

    /// Elapsed running time in whole seconds at `now_ms`.
    #[allow(clippy::cast_sign_loss)]
    pub fn elapsed_secs(&self, now_ms: i64) -> u64 {
        (self.elapsed_ms(now_ms) / 1000) as u64
    }
}

/// Team side an event is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Home,
    Away,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Home => "home",
            Self::Away => "away",
        })
    }
}

/// Current score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Score {
    pub home: u32,
    pub away: u32,
}

impl Score {
    pub fn add_goal(&mut self, side: Side) {
        match side {
            Side::Home => self.home = self.home.saturating_add(1),
            Side::Away => self.away = self.away.saturating_add(1),
        }
    }

    pub fn remove_goal(&mut self, side: Side) {
        match side {
            Side::Home => self.home = self.home.saturating_sub(1),
            Side::Away => self.away = self.away.saturating_sub(1),
        }
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.home, self.away)
    }
}

/// Disciplinary card color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CardColor {
    Yellow,
    Red,
}

/// Kind of an event log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    Goal,
    Card {
        color: CardColor,
    },
    Substitution {
        /// Player leaving the field; the actor is the player coming on
        #[serde(default)]
        replaced: Option<PlayerId>,
    },
}

impl EventKind {
    pub const fn is_goal(&self) -> bool {
        matches!(self, Self::Goal)
    }

    pub const fn label(&self) -> &'static str {
        match self {
            Self::Goal => "goal",
            Self::Card {
                color: CardColor::Yellow,
            } => "yellow card",
            Self::Card {
                color: CardColor::Red,
            } => "red card",
            Self::Substitution { .. } => "substitution",
        }
    }
}

/// An entry in the session's event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameEvent {
    pub id: EventId,
    pub kind: EventKind,
    pub side: Side,
    /// Acting player
    #[serde(default)]
    pub player_id: Option<PlayerId>,
    /// Match clock second the event happened at
    pub at_secs: u64,
    /// Unix ms when the entry was logged
    pub recorded_at: i64,
    /// Unix ms of the last change to this entry
    pub updated_at: i64,
    /// Tombstone for retracted entries
    #[serde(default)]
    pub retracted: bool,
}

/// Position of a player on the field.
///
/// Coordinates are normalized to the field: `0.0..=1.0` on both axes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum FieldPosition {
    OnField { x: f64, y: f64 },
    OffField,
}

impl FieldPosition {
    pub fn validate(&self) -> Result<()> {
        match *self {
            Self::OnField { x, y } => {
                if is_unit(x) && is_unit(y) {
                    Ok(())
                } else {
                    Err(Error::InvalidInput(format!(
                        "field coordinate ({x}, {y}) is outside 0..=1"
                    )))
                }
            }
            Self::OffField => Ok(()),
        }
    }

    pub const fn is_on_field(&self) -> bool {
        matches!(self, Self::OnField { .. })
    }
}

fn is_unit(value: f64) -> bool {
    value.is_finite() && (0.0..=1.0).contains(&value)
}

/// A player's position plus the stamp used for merging.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    pub position: FieldPosition,
    pub updated_at: i64,
}

/// A point of a drawing polyline, normalized like [`FieldPosition`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// A polyline drawn over the field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Drawing {
    pub id: DrawingId,
    pub points: Vec<Point>,
    pub color: String,
    pub created_at: i64,
    pub updated_at: i64,
    /// Tombstone for erased drawings
    #[serde(default)]
    pub removed: bool,
}

impl Drawing {
    /// Create a drawing with a fresh id; stamps are set when it is committed.
    #[must_use]
    pub fn new(points: Vec<Point>, color: impl Into<String>) -> Self {
        Self {
            id: DrawingId::new(),
            points,
            color: color.into(),
            created_at: 0,
            updated_at: 0,
            removed: false,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.points.is_empty() {
            return Err(Error::InvalidInput("drawing needs at least one point".into()));
        }
        if let Some(point) = self.points.iter().find(|p| !is_unit(p.x) || !is_unit(p.y)) {
            return Err(Error::InvalidInput(format!(
                "drawing point ({}, {}) is outside 0..=1",
                point.x, point.y
            )));
        }
        Ok(())
    }
}

/// Substitution alert schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SubstitutionSchedule {
    /// Minutes between substitution reminders; 0 disables alerts
    pub interval_minutes: u32,
    /// Match clock second of the last confirmed substitution
    pub last_confirmed_at_secs: u64,
    /// Raised once the next alert is due, cleared on confirmation
    pub alert: bool,
    pub updated_at: i64,
}

impl SubstitutionSchedule {
    /// Match clock second the next alert is due, if alerts are enabled.
    pub fn next_alert_at(&self) -> Option<u64> {
        if self.interval_minutes == 0 {
            return None;
        }
        Some(
            self.last_confirmed_at_secs
                .saturating_add(u64::from(self.interval_minutes) * 60),
        )
    }

    pub fn is_due(&self, elapsed_secs: u64) -> bool {
        self.next_alert_at().is_some_and(|due| elapsed_secs >= due)
    }
}

/// Parameters for starting a new game session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct NewSession {
    pub team_name: String,
    pub opponent_name: String,
    #[serde(default)]
    pub owner_id: Option<String>,
    #[serde(default)]
    pub substitution_interval_minutes: u32,
    /// Players placed off field at creation
    #[serde(default)]
    pub roster: Vec<PlayerId>,
}

/// Complete, immutable representation of a session at one revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub id: SessionId,
    #[serde(default)]
    pub owner_id: Option<String>,
    pub team_name: String,
    pub opponent_name: String,
    pub phase: TimerPhase,
    pub timer: TimerMarks,
    /// Last derived elapsed value, refreshed by ticks and commands
    pub elapsed_secs: u64,
    /// Unix ms of the last phase or period change
    pub phase_updated_at: i64,
    /// 1-based period index
    pub period: u32,
    pub score: Score,
    pub score_updated_at: i64,
    /// Ordered by match clock, then log time
    pub events: Vec<GameEvent>,
    pub positions: BTreeMap<PlayerId, Placement>,
    /// Ordered by creation
    pub drawings: Vec<Drawing>,
    pub substitution: SubstitutionSchedule,
    pub revision: u64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl SessionSnapshot {
    /// Build the initial snapshot of a new session.
    #[must_use]
    pub fn new(config: &NewSession, now_ms: i64) -> Self {
        let positions = config
            .roster
            .iter()
            .map(|player| {
                (
                    player.clone(),
                    Placement {
                        position: FieldPosition::OffField,
                        updated_at: now_ms,
                    },
                )
            })
            .collect();

        Self {
            id: SessionId::new(),
            owner_id: config.owner_id.clone(),
            team_name: config.team_name.trim().to_string(),
            opponent_name: config.opponent_name.trim().to_string(),
            phase: TimerPhase::Idle,
            timer: TimerMarks::default(),
            elapsed_secs: 0,
            phase_updated_at: now_ms,
            period: 1,
            score: Score::default(),
            score_updated_at: now_ms,
            events: Vec::new(),
            positions,
            drawings: Vec::new(),
            substitution: SubstitutionSchedule {
                interval_minutes: config.substitution_interval_minutes,
                last_confirmed_at_secs: 0,
                alert: false,
                updated_at: now_ms,
            },
            revision: 1,
            created_at: now_ms,
            updated_at: now_ms,
        }
    }

    /// Events that have not been retracted.
    pub fn active_events(&self) -> impl Iterator<Item = &GameEvent> {
        self.events.iter().filter(|event| !event.retracted)
    }

    /// Drawings that have not been erased.
    pub fn visible_drawings(&self) -> impl Iterator<Item = &Drawing> {
        self.drawings.iter().filter(|drawing| !drawing.removed)
    }

    pub fn position_of(&self, player: &PlayerId) -> Option<FieldPosition> {
        self.positions.get(player).map(|placement| placement.position)
    }

    /// Sort events into log order: match clock, then log time, then id.
    pub fn sort_events(&mut self) {
        self.events.sort_by(|a, b| {
            a.at_secs
                .cmp(&b.at_secs)
                .then(a.recorded_at.cmp(&b.recorded_at))
                .then(a.id.cmp(&b.id))
        });
    }

    /// Sort drawings into creation order.
    pub fn sort_drawings(&mut self) {
        self.drawings
            .sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
    }

    /// Summary used by the saved-sessions catalog.
    #[must_use]
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id,
            team_name: self.team_name.clone(),
            opponent_name: self.opponent_name.clone(),
            score: self.score,
            date: self.created_at,
            last_modified: self.updated_at,
        }
    }
}

/// Caller-facing summary for a "load session" list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: SessionId,
    pub team_name: String,
    pub opponent_name: String,
    pub score: Score,
    /// Unix ms the session was created
    pub date: i64,
    /// Unix ms of the last write
    pub last_modified: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> NewSession {
        NewSession {
            team_name: " Rovers ".to_string(),
            opponent_name: "United".to_string(),
            owner_id: Some("coach-1".to_string()),
            substitution_interval_minutes: 5,
            roster: vec![PlayerId::new("7"), PlayerId::new("9")],
        }
    }

    #[test]
    fn new_snapshot_starts_idle_with_roster_off_field() {
        let snapshot = SessionSnapshot::new(&config(), 1_000);
        assert_eq!(snapshot.phase, TimerPhase::Idle);
        assert_eq!(snapshot.team_name, "Rovers");
        assert_eq!(snapshot.revision, 1);
        assert_eq!(snapshot.period, 1);
        assert_eq!(
            snapshot.position_of(&PlayerId::new("9")),
            Some(FieldPosition::OffField)
        );
        assert_eq!(snapshot.substitution.next_alert_at(), Some(300));
    }

    #[test]
    fn timer_marks_subtract_paused_time() {
        let marks = TimerMarks {
            started_at: Some(10_000),
            frozen_at: None,
            paused_total_ms: 5_000,
        };
        assert_eq!(marks.elapsed_ms(75_000), 60_000);
        assert_eq!(marks.elapsed_secs(75_999), 60);
    }

    #[test]
    fn timer_marks_freeze_while_paused() {
        let marks = TimerMarks {
            started_at: Some(0),
            frozen_at: Some(30_000),
            paused_total_ms: 0,
        };
        assert_eq!(marks.elapsed_secs(500_000), 30);
        assert_eq!(TimerMarks::default().elapsed_ms(500_000), 0);
    }

    #[test]
    fn field_position_rejects_out_of_range_coordinates() {
        assert!(FieldPosition::OnField { x: 0.5, y: 1.0 }.validate().is_ok());
        assert!(FieldPosition::OnField { x: 1.5, y: 0.2 }.validate().is_err());
        assert!(FieldPosition::OnField {
            x: f64::NAN,
            y: 0.2
        }
        .validate()
        .is_err());
    }

    #[test]
    fn drawing_requires_points() {
        assert!(Drawing::new(Vec::new(), "red").validate().is_err());
        assert!(Drawing::new(vec![Point { x: 0.1, y: 0.1 }], "red")
            .validate()
            .is_ok());
    }

    #[test]
    fn disabled_substitution_schedule_is_never_due() {
        let schedule = SubstitutionSchedule::default();
        assert_eq!(schedule.next_alert_at(), None);
        assert!(!schedule.is_due(10_000));
    }

    #[test]
    fn score_never_goes_negative() {
        let mut score = Score::default();
        score.remove_goal(Side::Home);
        score.add_goal(Side::Away);
        assert_eq!(score.to_string(), "0-1");
    }
}
