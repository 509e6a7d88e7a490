//! Session state machine.
//!
//! Owns the live snapshot and applies timer transitions, event logging, and
//! field mutations to it. Every mutation works on a copy and only replaces the
//! live snapshot once it succeeded, so a failed operation leaves no trace.

use std::sync::Arc;

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::models::{
    Command, Drawing, DrawingId, EventDraft, EventId, EventKind, FieldPosition, GameEvent,
    Placement, PlayerId, SessionSnapshot, TimerPhase,
};

/// Timer-driven state machine over a single session.
pub struct SessionMachine {
    snapshot: SessionSnapshot,
    clock: Arc<dyn Clock>,
}

impl SessionMachine {
    pub fn new(snapshot: SessionSnapshot, clock: Arc<dyn Clock>) -> Self {
        Self { snapshot, clock }
    }

    pub const fn snapshot(&self) -> &SessionSnapshot {
        &self.snapshot
    }

    pub const fn phase(&self) -> TimerPhase {
        self.snapshot.phase
    }

    /// Elapsed seconds derived from the clock right now.
    pub fn elapsed_secs(&self) -> u64 {
        self.snapshot.timer.elapsed_secs(self.clock.now_ms())
    }

    pub const fn alert_pending(&self) -> bool {
        self.snapshot.substitution.alert
    }

    /// Replace the live snapshot wholesale (history restore, reconciliation).
    pub fn restore(&mut self, snapshot: SessionSnapshot) {
        self.snapshot = snapshot;
    }

    pub fn into_snapshot(self) -> SessionSnapshot {
        self.snapshot
    }

    /// Start the clock. Only valid from idle.
    pub fn start(&mut self) -> Result<SessionSnapshot> {
        self.commit(|next, now| {
            if next.phase != TimerPhase::Idle {
                return Err(invalid(next.phase, "start"));
            }
            next.timer.started_at = Some(now);
            next.timer.frozen_at = None;
            next.timer.paused_total_ms = 0;
            set_phase(next, TimerPhase::Running, now);
            Ok(())
        })
    }

    /// Stop the clock. Only valid while running.
    pub fn pause(&mut self) -> Result<SessionSnapshot> {
        self.commit(|next, now| {
            if next.phase != TimerPhase::Running {
                return Err(invalid(next.phase, "pause"));
            }
            next.timer.frozen_at = Some(now);
            set_phase(next, TimerPhase::Paused, now);
            Ok(())
        })
    }

    /// Restart the clock, folding the pause segment into the paused total.
    pub fn resume(&mut self) -> Result<SessionSnapshot> {
        self.commit(|next, now| {
            if next.phase != TimerPhase::Paused {
                return Err(invalid(next.phase, "resume"));
            }
            if let Some(frozen_at) = next.timer.frozen_at.take() {
                let pause_ms = now.saturating_sub(frozen_at).max(0);
                next.timer.paused_total_ms = next.timer.paused_total_ms.saturating_add(pause_ms);
            }
            set_phase(next, TimerPhase::Running, now);
            Ok(())
        })
    }

    /// End the session. One-way.
    pub fn end(&mut self) -> Result<SessionSnapshot> {
        self.commit(|next, now| {
            if next.phase == TimerPhase::Ended {
                return Err(invalid(next.phase, "end"));
            }
            if next.phase == TimerPhase::Running {
                next.timer.frozen_at = Some(now);
            }
            next.substitution.alert = false;
            set_phase(next, TimerPhase::Ended, now);
            Ok(())
        })
    }

    /// Append an event to the log; goals update the score and substitutions
    /// confirm the substitution schedule.
    pub fn record_event(&mut self, draft: EventDraft) -> Result<SessionSnapshot> {
        self.commit(|next, now| {
            ensure_not_ended(next, "record an event")?;
            if next.events.iter().any(|event| event.id == draft.id) {
                return Err(Error::InvalidInput(format!(
                    "event {} is already logged",
                    draft.id
                )));
            }

            let at_secs = draft.at_secs.unwrap_or(next.elapsed_secs);
            match &draft.kind {
                EventKind::Goal => {
                    next.score.add_goal(draft.side);
                    next.score_updated_at = now;
                }
                EventKind::Substitution { replaced } => {
                    swap_positions(next, draft.player_id.as_ref(), replaced.as_ref(), now);
                    confirm(next, now);
                }
                EventKind::Card { .. } => {}
            }

            next.events.push(GameEvent {
                id: draft.id,
                kind: draft.kind,
                side: draft.side,
                player_id: draft.player_id,
                at_secs,
                recorded_at: now,
                updated_at: now,
                retracted: false,
            });
            next.sort_events();
            Ok(())
        })
    }

    /// Retract a logged event, reverting its effect on the score.
    pub fn retract_event(&mut self, event_id: EventId) -> Result<SessionSnapshot> {
        self.commit(|next, now| {
            ensure_not_ended(next, "retract an event")?;
            let event = next
                .events
                .iter_mut()
                .find(|event| event.id == event_id && !event.retracted)
                .ok_or_else(|| Error::NotFound(format!("event {event_id}")))?;
            event.retracted = true;
            event.updated_at = now;

            if event.kind.is_goal() {
                let side = event.side;
                next.score.remove_goal(side);
                next.score_updated_at = now;
            }
            Ok(())
        })
    }

    /// Reset the substitution baseline to the current elapsed time.
    pub fn confirm_substitution(&mut self) -> Result<SessionSnapshot> {
        self.commit(|next, now| {
            ensure_not_ended(next, "confirm a substitution")?;
            confirm(next, now);
            Ok(())
        })
    }

    pub fn advance_period(&mut self) -> Result<SessionSnapshot> {
        self.commit(|next, now| {
            ensure_not_ended(next, "advance the period")?;
            next.period = next.period.saturating_add(1);
            next.phase_updated_at = now;
            Ok(())
        })
    }

    pub fn move_player(
        &mut self,
        player_id: PlayerId,
        to: FieldPosition,
    ) -> Result<SessionSnapshot> {
        to.validate()?;
        self.commit(|next, now| {
            next.positions.insert(
                player_id,
                Placement {
                    position: to,
                    updated_at: now,
                },
            );
            Ok(())
        })
    }

    pub fn add_drawing(&mut self, drawing: Drawing) -> Result<SessionSnapshot> {
        drawing.validate()?;
        self.commit(|next, now| {
            if next.drawings.iter().any(|existing| existing.id == drawing.id) {
                return Err(Error::InvalidInput(format!(
                    "drawing {} already exists",
                    drawing.id
                )));
            }
            next.drawings.push(Drawing {
                created_at: now,
                updated_at: now,
                removed: false,
                ..drawing
            });
            Ok(())
        })
    }

    pub fn remove_drawing(&mut self, drawing_id: DrawingId) -> Result<SessionSnapshot> {
        self.commit(|next, now| {
            let drawing = next
                .drawings
                .iter_mut()
                .find(|drawing| drawing.id == drawing_id && !drawing.removed)
                .ok_or_else(|| Error::NotFound(format!("drawing {drawing_id}")))?;
            drawing.removed = true;
            drawing.updated_at = now;
            Ok(())
        })
    }

    /// Refresh elapsed time and the substitution alert.
    ///
    /// Not a committed mutation: the revision is left untouched, and calling
    /// it twice at the same instant yields the same snapshot.
    pub fn tick(&mut self) -> SessionSnapshot {
        let now = self.clock.now_ms();
        refresh_derived(&mut self.snapshot, now);
        self.snapshot.clone()
    }

    /// Apply a command through the matching operation.
    pub fn execute(&mut self, command: &Command) -> Result<SessionSnapshot> {
        match command {
            Command::MovePlayer { player_id, to } => self.move_player(player_id.clone(), *to),
            Command::AddDrawing { drawing } => self.add_drawing(drawing.clone()),
            Command::RemoveDrawing { drawing_id } => self.remove_drawing(*drawing_id),
            Command::LogEvent { event } => self.record_event(event.clone()),
            Command::UndoEvent { event_id } => self.retract_event(*event_id),
            Command::SetPhase { phase } => self.set_phase(*phase),
            Command::ConfirmSubstitution => self.confirm_substitution(),
            Command::AdvancePeriod => self.advance_period(),
            Command::Tick => Ok(self.tick()),
        }
    }

    fn set_phase(&mut self, target: TimerPhase) -> Result<SessionSnapshot> {
        match (self.snapshot.phase, target) {
            (TimerPhase::Idle, TimerPhase::Running) => self.start(),
            (TimerPhase::Paused, TimerPhase::Running) => self.resume(),
            (_, TimerPhase::Paused) => self.pause(),
            (_, TimerPhase::Ended) => self.end(),
            (from, TimerPhase::Running) => Err(invalid(from, "run")),
            (from, TimerPhase::Idle) => Err(invalid(from, "reset")),
        }
    }

    fn commit<F>(&mut self, mutate: F) -> Result<SessionSnapshot>
    where
        F: FnOnce(&mut SessionSnapshot, i64) -> Result<()>,
    {
        let now = self.clock.now_ms();
        let mut next = self.snapshot.clone();
        refresh_derived(&mut next, now);
        mutate(&mut next, now)?;
        refresh_derived(&mut next, now);
        next.revision = self.snapshot.revision.saturating_add(1);
        next.updated_at = now.max(self.snapshot.updated_at);
        self.snapshot = next;
        Ok(self.snapshot.clone())
    }
}

fn refresh_derived(snapshot: &mut SessionSnapshot, now: i64) {
    let computed = snapshot.timer.elapsed_secs(now);
    snapshot.elapsed_secs = if snapshot.phase == TimerPhase::Running {
        snapshot.elapsed_secs.max(computed)
    } else {
        computed
    };

    let alerts_active = matches!(snapshot.phase, TimerPhase::Running | TimerPhase::Paused);
    if alerts_active && snapshot.substitution.is_due(snapshot.elapsed_secs) {
        snapshot.substitution.alert = true;
    }
}

fn set_phase(snapshot: &mut SessionSnapshot, phase: TimerPhase, now: i64) {
    snapshot.phase = phase;
    snapshot.phase_updated_at = now;
}

fn confirm(snapshot: &mut SessionSnapshot, now: i64) {
    snapshot.substitution.last_confirmed_at_secs = snapshot.elapsed_secs;
    snapshot.substitution.alert = false;
    snapshot.substitution.updated_at = now;
}

/// The incoming player takes the outgoing player's spot.
fn swap_positions(
    snapshot: &mut SessionSnapshot,
    incoming: Option<&PlayerId>,
    outgoing: Option<&PlayerId>,
    now: i64,
) {
    let (Some(incoming), Some(outgoing)) = (incoming, outgoing) else {
        return;
    };
    let Some(spot) = snapshot.position_of(outgoing) else {
        return;
    };
    snapshot.positions.insert(
        incoming.clone(),
        Placement {
            position: spot,
            updated_at: now,
        },
    );
    snapshot.positions.insert(
        outgoing.clone(),
        Placement {
            position: FieldPosition::OffField,
            updated_at: now,
        },
    );
}

fn ensure_not_ended(snapshot: &SessionSnapshot, action: &'static str) -> Result<()> {
    if snapshot.phase == TimerPhase::Ended {
        Err(invalid(snapshot.phase, action))
    } else {
        Ok(())
    }
}

const fn invalid(from: TimerPhase, action: &'static str) -> Error {
    Error::InvalidTransition { from, action }
}
