//! Undo/redo history over session commands.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{Command, SessionSnapshot};
use crate::session::SessionMachine;

/// Default number of entries kept when history is persisted.
pub const DEFAULT_PERSISTED_DEPTH: usize = 50;

/// One applied command with the snapshots on either side of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub command: Command,
    pub before: SessionSnapshot,
    pub after: SessionSnapshot,
}

/// History as stored across reloads, trimmed to the most recent entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PersistedHistory {
    #[serde(default)]
    pub past: Vec<HistoryEntry>,
    #[serde(default)]
    pub future: Vec<HistoryEntry>,
}

/// Undo/redo stacks layered over a [`SessionMachine`].
///
/// `past` and `future` are both stacks whose top is the last element.
pub struct HistoryManager {
    machine: SessionMachine,
    past: Vec<HistoryEntry>,
    future: Vec<HistoryEntry>,
}

impl HistoryManager {
    pub const fn new(machine: SessionMachine) -> Self {
        Self {
            machine,
            past: Vec::new(),
            future: Vec::new(),
        }
    }

    /// Rebuild a manager from history persisted by [`Self::persisted`].
    ///
    /// History that does not line up with the machine's snapshot (because
    /// the snapshot was replaced by a merge after it was written) is dropped.
    pub fn restore(machine: SessionMachine, persisted: PersistedHistory) -> Self {
        let current = machine.snapshot();
        let consistent = match (persisted.past.last(), persisted.future.last()) {
            (Some(entry), _) => entry.after.revision == current.revision,
            (None, Some(entry)) => entry.before.revision == current.revision,
            (None, None) => true,
        };
        if !consistent {
            tracing::debug!(
                session_id = %current.id,
                "Persisted history does not match snapshot, starting fresh"
            );
            return Self::new(machine);
        }
        Self {
            machine,
            past: persisted.past,
            future: persisted.future,
        }
    }

    pub const fn snapshot(&self) -> &SessionSnapshot {
        self.machine.snapshot()
    }

    pub const fn machine(&self) -> &SessionMachine {
        &self.machine
    }

    pub fn can_undo(&self) -> bool {
        !self.past.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.future.is_empty()
    }

    /// Number of entries on the (undo, redo) stacks.
    pub fn depth(&self) -> (usize, usize) {
        (self.past.len(), self.future.len())
    }

    /// Apply a command. Ticks go straight to the machine and are never recorded.
    pub fn apply(&mut self, command: Command) -> Result<SessionSnapshot> {
        if command.is_tick() {
            return Ok(self.machine.tick());
        }

        let before = self.machine.snapshot().clone();
        let after = self.machine.execute(&command)?;
        tracing::debug!(
            command = command.name(),
            revision = after.revision,
            "Applied session command"
        );
        self.past.push(HistoryEntry {
            command,
            before,
            after: after.clone(),
        });
        self.future.clear();
        Ok(after)
    }

    pub fn tick(&mut self) -> SessionSnapshot {
        self.machine.tick()
    }

    /// Restore the snapshot from before the last command. No-op when empty.
    pub fn undo(&mut self) -> SessionSnapshot {
        let Some(entry) = self.past.pop() else {
            return self.machine.snapshot().clone();
        };
        self.machine.restore(entry.before.clone());
        self.future.push(entry);
        self.machine.snapshot().clone()
    }

    /// Re-apply the last undone command's result. No-op when empty.
    pub fn redo(&mut self) -> SessionSnapshot {
        let Some(entry) = self.future.pop() else {
            return self.machine.snapshot().clone();
        };
        self.machine.restore(entry.after.clone());
        self.past.push(entry);
        self.machine.snapshot().clone()
    }

    /// Take the redo stack, leaving it empty. Pair with [`Self::restore_redo`]
    /// to roll back a command that could not be persisted.
    pub fn take_redo(&mut self) -> Vec<HistoryEntry> {
        std::mem::take(&mut self.future)
    }

    pub fn restore_redo(&mut self, future: Vec<HistoryEntry>) {
        self.future = future;
    }

    /// Forget the most recent command and return to its `before` snapshot.
    pub fn discard_last(&mut self) -> Option<HistoryEntry> {
        let entry = self.past.pop()?;
        self.machine.restore(entry.before.clone());
        Some(entry)
    }

    /// Replace the live snapshot and drop both stacks.
    pub fn reset_to(&mut self, snapshot: SessionSnapshot) {
        self.machine.restore(snapshot);
        self.past.clear();
        self.future.clear();
    }

    /// The entries nearest the present on each stack, at most `depth` each.
    pub fn persisted(&self, depth: usize) -> PersistedHistory {
        PersistedHistory {
            past: tail(&self.past, depth),
            future: tail(&self.future, depth),
        }
    }
}

fn tail(entries: &[HistoryEntry], depth: usize) -> Vec<HistoryEntry> {
    let start = entries.len().saturating_sub(depth);
    entries[start..].to_vec()
}
