//! Field-level merge of diverged session snapshots.
//!
//! Scalar groups are last-write-wins by their own stamp. Collections are
//! unioned by entry id with per-entry last-write-wins, and tombstones take part
//! like any other change, so a removal is never undone by the union.
//!
//! Equal stamps fall back to the higher snapshot revision and then to the
//! lexicographically greater canonical JSON of the candidate value. The merge
//! is therefore deterministic and commutative.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::Serialize;

use crate::models::{
    Drawing, GameEvent, PlayerId, Placement, Score, SessionSnapshot, SubstitutionSchedule,
    TimerMarks, TimerPhase,
};

/// One side's value with the stamps used to order it.
struct Candidate<'a, T> {
    value: &'a T,
    stamp: i64,
    revision: u64,
}

fn canonical<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

fn pick<'a, T: Serialize>(a: Candidate<'a, T>, b: Candidate<'a, T>) -> &'a T {
    let order = a
        .stamp
        .cmp(&b.stamp)
        .then(a.revision.cmp(&b.revision))
        .then_with(|| canonical(a.value).cmp(&canonical(b.value)));
    if order == Ordering::Less {
        b.value
    } else {
        a.value
    }
}

/// The timer group moves as a unit.
#[derive(Serialize)]
struct PhaseGroup {
    phase: TimerPhase,
    timer: TimerMarks,
    elapsed_secs: u64,
    period: u32,
}

impl PhaseGroup {
    const fn of(snapshot: &SessionSnapshot) -> Self {
        Self {
            phase: snapshot.phase,
            timer: snapshot.timer,
            elapsed_secs: snapshot.elapsed_secs,
            period: snapshot.period,
        }
    }
}

#[derive(Serialize)]
struct Header<'a> {
    owner_id: &'a Option<String>,
    team_name: &'a str,
    opponent_name: &'a str,
}

impl<'a> Header<'a> {
    fn of(snapshot: &'a SessionSnapshot) -> Self {
        Self {
            owner_id: &snapshot.owner_id,
            team_name: &snapshot.team_name,
            opponent_name: &snapshot.opponent_name,
        }
    }
}

/// Merge two versions of the same session.
///
/// The result carries revision `max(local, remote) + 1`; callers pass the
/// remote snapshot with the remote's revision.
#[must_use]
pub fn merge_snapshots(local: &SessionSnapshot, remote: &SessionSnapshot) -> SessionSnapshot {
    let lr = local.revision;
    let rr = remote.revision;

    let (local_header, remote_header) = (Header::of(local), Header::of(remote));
    let header = pick(
        Candidate {
            value: &local_header,
            stamp: local.updated_at,
            revision: lr,
        },
        Candidate {
            value: &remote_header,
            stamp: remote.updated_at,
            revision: rr,
        },
    );

    let (local_phase, remote_phase) = (PhaseGroup::of(local), PhaseGroup::of(remote));
    let phase = pick(
        Candidate {
            value: &local_phase,
            stamp: local.phase_updated_at,
            revision: lr,
        },
        Candidate {
            value: &remote_phase,
            stamp: remote.phase_updated_at,
            revision: rr,
        },
    );
    let phase_updated_at = local.phase_updated_at.max(remote.phase_updated_at);

    let score: &Score = pick(
        Candidate {
            value: &local.score,
            stamp: local.score_updated_at,
            revision: lr,
        },
        Candidate {
            value: &remote.score,
            stamp: remote.score_updated_at,
            revision: rr,
        },
    );

    let substitution: &SubstitutionSchedule = pick(
        Candidate {
            value: &local.substitution,
            stamp: local.substitution.updated_at,
            revision: lr,
        },
        Candidate {
            value: &remote.substitution,
            stamp: remote.substitution.updated_at,
            revision: rr,
        },
    );

    let events = union_by_id(
        &local.events,
        lr,
        &remote.events,
        rr,
        |event: &GameEvent| event.id,
        |event| event.updated_at,
    );
    let drawings = union_by_id(
        &local.drawings,
        lr,
        &remote.drawings,
        rr,
        |drawing: &Drawing| drawing.id,
        |drawing| drawing.updated_at,
    );
    let positions = merge_positions(&local.positions, lr, &remote.positions, rr);

    let mut merged = SessionSnapshot {
        id: local.id,
        owner_id: header.owner_id.clone(),
        team_name: header.team_name.to_string(),
        opponent_name: header.opponent_name.to_string(),
        phase: phase.phase,
        timer: phase.timer,
        elapsed_secs: phase.elapsed_secs,
        phase_updated_at,
        period: phase.period,
        score: *score,
        score_updated_at: local.score_updated_at.max(remote.score_updated_at),
        events,
        positions,
        drawings,
        substitution: *substitution,
        revision: lr.max(rr) + 1,
        created_at: local.created_at.min(remote.created_at),
        updated_at: local.updated_at.max(remote.updated_at),
    };
    merged.sort_events();
    merged.sort_drawings();
    merged
}

fn union_by_id<T, K>(
    local: &[T],
    local_revision: u64,
    remote: &[T],
    remote_revision: u64,
    id: impl Fn(&T) -> K,
    stamp: impl Fn(&T) -> i64,
) -> Vec<T>
where
    T: Clone + Serialize,
    K: Ord + Copy,
{
    let mut merged: BTreeMap<K, T> = local
        .iter()
        .map(|entry| (id(entry), entry.clone()))
        .collect();
    for entry in remote {
        let key = id(entry);
        let winner = match merged.get(&key) {
            Some(existing) => pick(
                Candidate {
                    value: existing,
                    stamp: stamp(existing),
                    revision: local_revision,
                },
                Candidate {
                    value: entry,
                    stamp: stamp(entry),
                    revision: remote_revision,
                },
            )
            .clone(),
            None => entry.clone(),
        };
        merged.insert(key, winner);
    }
    merged.into_values().collect()
}

fn merge_positions(
    local: &BTreeMap<PlayerId, Placement>,
    local_revision: u64,
    remote: &BTreeMap<PlayerId, Placement>,
    remote_revision: u64,
) -> BTreeMap<PlayerId, Placement> {
    let mut merged = local.clone();
    for (player, placement) in remote {
        let winner = match merged.get(player) {
            Some(existing) => *pick(
                Candidate {
                    value: existing,
                    stamp: existing.updated_at,
                    revision: local_revision,
                },
                Candidate {
                    value: placement,
                    stamp: placement.updated_at,
                    revision: remote_revision,
                },
            ),
            None => *placement,
        };
        merged.insert(player.clone(), winner);
    }
    merged
}
