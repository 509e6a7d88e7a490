//! Session orchestrator: the single entry point for UI and CLI callers.

use std::sync::Arc;

use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::{broadcast, watch, Mutex};

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::history::HistoryManager;
use crate::kv::KeyValueStore;
use crate::models::{
    Command, ConflictRecord, NewSession, SessionId, SessionSnapshot, SessionSummary,
};
use crate::session::SessionMachine;
use crate::store::{LocalStore, ValidityToken};
use crate::sync::{DrainReport, RemoteStore, RemoteSyncEngine, SyncQueue, SyncStatus};

/// Commands re-applied on top of a reconciled snapshot before giving up.
const MAX_REAPPLY_ATTEMPTS: usize = 3;

struct ActiveSession {
    history: HistoryManager,
    token: ValidityToken,
    /// Store write sequence of the snapshot this session last wrote or read
    write_seq: u64,
}

impl ActiveSession {
    fn id(&self) -> SessionId {
        self.history.snapshot().id
    }
}

struct State {
    active: Option<ActiveSession>,
    reconciled: Option<broadcast::Receiver<SessionId>>,
}

/// Sequences commands, history, persistence, and sync for one live session.
///
/// Every mutating call holds one async lock for its whole duration, so
/// concurrent callers queue instead of racing. The sync engine runs on its
/// own and hands merged snapshots back through the store; they are adopted
/// before the next foreground call.
pub struct SessionOrchestrator {
    store: Arc<LocalStore>,
    engine: Option<Arc<RemoteSyncEngine>>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    state: Mutex<State>,
}

impl SessionOrchestrator {
    /// Compose an orchestrator from already built services.
    pub fn from_parts(
        store: Arc<LocalStore>,
        engine: Option<Arc<RemoteSyncEngine>>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        let reconciled = engine.as_ref().map(|engine| engine.subscribe());
        Self {
            store,
            engine,
            clock,
            config,
            state: Mutex::new(State {
                active: None,
                reconciled,
            }),
        }
    }

    /// An orchestrator that keeps everything on this device.
    pub fn local_only(
        kv: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        tracing::info!("Running in local-only mode");
        let store = Arc::new(LocalStore::local_only(kv, Arc::clone(&clock)));
        Self::from_parts(store, None, clock, config)
    }

    /// An orchestrator that queues every write for `remote`.
    ///
    /// Call [`RemoteSyncEngine::spawn_worker`] on [`Self::engine`] to drain in
    /// the background, or [`Self::sync_now`] to drain on demand.
    pub fn with_remote(
        kv: Arc<dyn KeyValueStore>,
        remote: Arc<dyn RemoteStore>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
        online: watch::Receiver<bool>,
    ) -> Self {
        let queue = Arc::new(SyncQueue::new(Arc::clone(&kv), config.backoff()));
        let store = Arc::new(LocalStore::with_sync(
            kv,
            Arc::clone(&queue),
            Arc::clone(&clock),
        ));
        let engine = Arc::new(RemoteSyncEngine::new(
            Arc::clone(&store),
            queue,
            remote,
            Arc::clone(&clock),
            config.clone(),
            online,
        ));
        tracing::info!("Remote sync enabled");
        Self::from_parts(store, Some(engine), clock, config)
    }

    pub const fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    pub const fn engine(&self) -> Option<&Arc<RemoteSyncEngine>> {
        self.engine.as_ref()
    }

    /// Create, persist, and activate a new session.
    pub async fn start_new_session(&self, config: NewSession) -> Result<SessionSnapshot> {
        if config.team_name.trim().is_empty() {
            return Err(Error::InvalidInput("team name is required".to_string()));
        }

        let mut state = self.state.lock().await;
        drain_reconciled(&mut state);

        let snapshot = SessionSnapshot::new(&config, self.clock.now_ms());
        let history = HistoryManager::new(SessionMachine::new(
            snapshot.clone(),
            Arc::clone(&self.clock),
        ));
        let write_seq = self.store.write_session(&snapshot).await?;
        self.store
            .write_history(snapshot.id, &history.persisted(self.config.history_depth))
            .await?;
        self.store.set_current_session(Some(snapshot.id)).await?;

        tracing::info!(session_id = %snapshot.id, "Started new session");
        state.active = Some(ActiveSession {
            token: self.store.validity_token(snapshot.id),
            write_seq,
            history,
        });
        Ok(snapshot)
    }

    /// Apply one command to the live session and persist the result.
    ///
    /// Ticks only refresh derived state and are not written. If the store
    /// rejects the write the live session is left as it was.
    pub async fn apply_command(&self, command: Command) -> Result<SessionSnapshot> {
        let mut state = self.state.lock().await;
        self.adopt_reconciled(&mut state).await?;
        let active = self.active_mut(&mut state)?;

        if command.is_tick() {
            return Ok(active.history.tick());
        }

        for _ in 0..MAX_REAPPLY_ATTEMPTS {
            let redo = active.history.take_redo();
            let applied = match active.history.apply(command.clone()) {
                Ok(snapshot) => snapshot,
                Err(error) => {
                    active.history.restore_redo(redo);
                    return Err(error);
                }
            };

            match self.persist(active).await {
                Ok(true) => return Ok(applied),
                Ok(false) => {
                    active.history.discard_last();
                    self.refresh_from_store(active).await?;
                }
                Err(error) => {
                    active.history.discard_last();
                    active.history.restore_redo(redo);
                    self.rewrite_history(active).await;
                    return Err(error);
                }
            }
        }

        Err(Error::StorageIo(format!(
            "session {} kept changing while applying {}",
            active.id(),
            command.name()
        )))
    }

    /// Refresh timer-derived state. Never written and never recorded.
    pub async fn tick(&self) -> Result<SessionSnapshot> {
        self.apply_command(Command::Tick).await
    }

    /// Undo the last command. A no-op on an empty history.
    pub async fn undo(&self) -> Result<SessionSnapshot> {
        self.step_history(HistoryStep::Undo).await
    }

    /// Redo the last undone command. A no-op on an empty redo stack.
    pub async fn redo(&self) -> Result<SessionSnapshot> {
        self.step_history(HistoryStep::Redo).await
    }

    async fn step_history(&self, step: HistoryStep) -> Result<SessionSnapshot> {
        let mut state = self.state.lock().await;
        self.adopt_reconciled(&mut state).await?;
        let active = self.active_mut(&mut state)?;

        let can_step = match step {
            HistoryStep::Undo => active.history.can_undo(),
            HistoryStep::Redo => active.history.can_redo(),
        };
        if !can_step {
            return Ok(active.history.snapshot().clone());
        }

        let snapshot = match step {
            HistoryStep::Undo => active.history.undo(),
            HistoryStep::Redo => active.history.redo(),
        };

        match self.persist(active).await {
            Ok(true) => Ok(snapshot),
            Ok(false) => {
                // A merge landed; it supersedes the step.
                self.refresh_from_store(active).await?;
                Ok(active.history.snapshot().clone())
            }
            Err(error) => {
                match step {
                    HistoryStep::Undo => active.history.redo(),
                    HistoryStep::Redo => active.history.undo(),
                };
                self.rewrite_history(active).await;
                Err(error)
            }
        }
    }

    pub async fn can_undo(&self) -> bool {
        let state = self.state.lock().await;
        state
            .active
            .as_ref()
            .is_some_and(|active| active.history.can_undo())
    }

    pub async fn can_redo(&self) -> bool {
        let state = self.state.lock().await;
        state
            .active
            .as_ref()
            .is_some_and(|active| active.history.can_redo())
    }

    /// The live snapshot, if a session is active.
    pub async fn current(&self) -> Result<Option<SessionSnapshot>> {
        let mut state = self.state.lock().await;
        self.adopt_reconciled(&mut state).await?;
        Ok(state
            .active
            .as_ref()
            .map(|active| active.history.snapshot().clone()))
    }

    /// Add the live session to the saved-sessions catalog.
    pub async fn save(&self) -> Result<SessionSummary> {
        let mut state = self.state.lock().await;
        self.adopt_reconciled(&mut state).await?;
        let active = self.active_mut(&mut state)?;
        let summary = self.store.archive_session(active.id()).await?;
        tracing::info!(session_id = %summary.id, "Saved session");
        Ok(summary)
    }

    /// Make a stored session the live one, with its persisted history.
    pub async fn load(&self, id: SessionId) -> Result<SessionSnapshot> {
        let mut state = self.state.lock().await;
        drain_reconciled(&mut state);

        let token = self.store.validity_token(id);
        let stored = self.store.read_stored(id).await?;
        let persisted = self.store.read_history(id).await?;
        if !self.store.is_valid(&token) {
            return Err(Error::NotFound(format!("session {id}")));
        }

        let revision = stored.snapshot.revision;
        let machine = SessionMachine::new(stored.snapshot, Arc::clone(&self.clock));
        let mut history = HistoryManager::restore(machine, persisted);
        let live = history.tick();
        self.store.set_current_session(Some(id)).await?;

        tracing::info!(session_id = %id, revision, "Loaded session");
        state.active = Some(ActiveSession {
            history,
            token,
            write_seq: stored.write_seq,
        });
        Ok(live)
    }

    /// Load whichever session was live when the process last ran.
    pub async fn resume_current(&self) -> Result<Option<SessionSnapshot>> {
        let Some(id) = self.store.current_session_id().await? else {
            return Ok(None);
        };
        match self.load(id).await {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(Error::NotFound(_)) => {
                tracing::debug!(session_id = %id, "Current session is gone, clearing pointer");
                self.store.set_current_session(None).await?;
                Ok(None)
            }
            Err(error) => Err(error),
        }
    }

    /// Delete a session everywhere. Deactivates it if it is live.
    pub async fn delete(&self, id: SessionId) -> Result<()> {
        let mut state = self.state.lock().await;
        self.store.delete_session(id).await?;
        if state.active.as_ref().is_some_and(|active| active.id() == id) {
            state.active = None;
        }
        tracing::info!(session_id = %id, "Deleted session");
        Ok(())
    }

    pub async fn list_sessions(&self) -> Result<Vec<SessionSummary>> {
        self.store.list_sessions().await
    }

    /// Most recent conflict records across all sessions.
    pub async fn list_conflicts(&self, limit: usize) -> Result<Vec<ConflictRecord>> {
        self.store.list_conflicts(limit).await
    }

    /// Drain the sync queue now. `None` when no remote is configured.
    pub async fn sync_now(&self) -> Result<Option<DrainReport>> {
        let Some(engine) = &self.engine else {
            return Ok(None);
        };
        let report = engine.drain().await?;
        let mut state = self.state.lock().await;
        self.adopt_reconciled(&mut state).await?;
        Ok(Some(report))
    }

    pub async fn sync_status(&self) -> Result<SyncStatus> {
        match &self.engine {
            Some(engine) => engine.status().await,
            None => Ok(SyncStatus::disabled(0)),
        }
    }

    fn active_mut<'a>(&self, state: &'a mut State) -> Result<&'a mut ActiveSession> {
        let still_valid = state
            .active
            .as_ref()
            .map(|active| self.store.is_valid(&active.token));
        match still_valid {
            Some(true) => state
                .active
                .as_mut()
                .ok_or_else(|| Error::NotFound("active session".to_string())),
            Some(false) => {
                state.active = None;
                Err(Error::NotFound("active session was deleted".to_string()))
            }
            None => Err(Error::NotFound("no active session".to_string())),
        }
    }

    /// Write history, then the snapshot if the store still holds the write
    /// this session last made. `false` means a merge got there first.
    async fn persist(&self, active: &mut ActiveSession) -> Result<bool> {
        if !self.store.is_valid(&active.token) {
            return Err(Error::NotFound(format!("session {}", active.id())));
        }
        self.store
            .write_history(
                active.id(),
                &active.history.persisted(self.config.history_depth),
            )
            .await?;
        let written = self
            .store
            .replace_session(active.history.snapshot(), active.write_seq)
            .await?;
        if let Some(write_seq) = written {
            active.write_seq = write_seq;
        }
        Ok(written.is_some())
    }

    async fn rewrite_history(&self, active: &ActiveSession) {
        if let Err(error) = self
            .store
            .write_history(
                active.id(),
                &active.history.persisted(self.config.history_depth),
            )
            .await
        {
            tracing::warn!(session_id = %active.id(), %error, "Could not restore persisted history");
        }
    }

    async fn adopt_reconciled(&self, state: &mut State) -> Result<()> {
        let active_id = state.active.as_ref().map(ActiveSession::id);
        let touched = drain_reconciled_for(state, active_id);
        if !touched {
            return Ok(());
        }
        if let Some(active) = state.active.as_mut() {
            if self.store.is_valid(&active.token) {
                self.refresh_from_store(active).await?;
            }
        }
        Ok(())
    }

    /// Replace the live session with the stored snapshot if it moved on.
    async fn refresh_from_store(&self, active: &mut ActiveSession) -> Result<()> {
        let stored = self.store.read_stored(active.id()).await?;
        if stored.write_seq == active.write_seq {
            return Ok(());
        }
        tracing::info!(
            session_id = %stored.snapshot.id,
            revision = stored.snapshot.revision,
            "Adopting reconciled session"
        );
        active.write_seq = stored.write_seq;
        active.history.reset_to(stored.snapshot);
        self.store
            .write_history(
                active.id(),
                &active.history.persisted(self.config.history_depth),
            )
            .await
    }
}

#[derive(Debug, Clone, Copy)]
enum HistoryStep {
    Undo,
    Redo,
}

fn drain_reconciled(state: &mut State) {
    drain_reconciled_for(state, None);
}

/// Empty the reconciliation channel, reporting whether `id` was touched.
fn drain_reconciled_for(state: &mut State, id: Option<SessionId>) -> bool {
    let Some(receiver) = state.reconciled.as_mut() else {
        return false;
    };
    let mut touched = false;
    loop {
        match receiver.try_recv() {
            Ok(session_id) => touched |= Some(session_id) == id,
            Err(TryRecvError::Lagged(_)) => touched = id.is_some(),
            Err(TryRecvError::Empty | TryRecvError::Closed) => break,
        }
    }
    touched
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::clock::ManualClock;
    use crate::kv::MemoryKvStore;
    use crate::models::{
        CardColor, Drawing, EventDraft, EventKind, FieldPosition, PlayerId, Point, Score, Side,
        TimerPhase,
    };
    use crate::sync::{MemoryRemoteStore, SyncState};
    use pretty_assertions::assert_eq;

    const T0: i64 = 1_700_000_000_000;

    fn new_session() -> NewSession {
        NewSession {
            team_name: "Rovers".to_string(),
            opponent_name: "United".to_string(),
            roster: vec![PlayerId::new("7"), PlayerId::new("10")],
            substitution_interval_minutes: 5,
            ..Default::default()
        }
    }

    fn local(kv: &Arc<MemoryKvStore>, clock: &ManualClock) -> SessionOrchestrator {
        SessionOrchestrator::local_only(
            Arc::clone(kv) as Arc<dyn KeyValueStore>,
            Arc::new(clock.clone()),
            EngineConfig::default(),
        )
    }

    struct Synced {
        orchestrator: SessionOrchestrator,
        remote: Arc<MemoryRemoteStore>,
        clock: ManualClock,
        _online: watch::Sender<bool>,
    }

    fn synced() -> Synced {
        synced_with(Arc::new(MemoryKvStore::new()))
    }

    fn synced_with(kv: Arc<MemoryKvStore>) -> Synced {
        let clock = ManualClock::new(T0);
        let remote = Arc::new(MemoryRemoteStore::new());
        let (online, online_rx) = watch::channel(true);
        let config = EngineConfig {
            sync_enabled: true,
            backoff_jitter: 0.0,
            remote_timeout_secs: 1,
            ..EngineConfig::default()
        };
        let orchestrator = SessionOrchestrator::with_remote(
            kv,
            Arc::clone(&remote) as Arc<dyn RemoteStore>,
            Arc::new(clock.clone()),
            config,
            online_rx,
        );
        Synced {
            orchestrator,
            remote,
            clock,
            _online: online,
        }
    }

    fn goal(side: Side) -> Command {
        Command::LogEvent {
            event: EventDraft::new(EventKind::Goal, side),
        }
    }

    fn phase(phase: TimerPhase) -> Command {
        Command::SetPhase { phase }
    }

    fn move_player(player: &str, x: f64) -> Command {
        Command::MovePlayer {
            player_id: PlayerId::new(player),
            to: FieldPosition::OnField { x, y: 0.5 },
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn goal_pause_resume_card_scenario() {
        let kv = Arc::new(MemoryKvStore::new());
        let clock = ManualClock::new(T0);
        let orchestrator = local(&kv, &clock);
        orchestrator.start_new_session(new_session()).await.unwrap();

        orchestrator.apply_command(phase(TimerPhase::Running)).await.unwrap();
        clock.advance_secs(120);
        orchestrator.apply_command(goal(Side::Home)).await.unwrap();
        clock.advance_secs(30);
        orchestrator.apply_command(phase(TimerPhase::Paused)).await.unwrap();
        clock.advance_secs(600);
        orchestrator.apply_command(phase(TimerPhase::Running)).await.unwrap();
        clock.advance_secs(150);
        let card = Command::LogEvent {
            event: EventDraft::new(
                EventKind::Card {
                    color: CardColor::Yellow,
                },
                Side::Away,
            ),
        };
        let snapshot = orchestrator.apply_command(card).await.unwrap();

        assert_eq!(snapshot.events.len(), 2);
        assert_eq!(snapshot.events[0].at_secs, 120);
        assert_eq!(snapshot.events[1].at_secs, 300);
        assert_eq!(snapshot.score, Score { home: 1, away: 0 });
        assert_eq!(snapshot.elapsed_secs, 300);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn undo_on_fresh_session_is_a_noop() {
        let kv = Arc::new(MemoryKvStore::new());
        let clock = ManualClock::new(T0);
        let orchestrator = local(&kv, &clock);
        let started = orchestrator.start_new_session(new_session()).await.unwrap();

        assert!(!orchestrator.can_undo().await);
        assert_eq!(orchestrator.undo().await.unwrap(), started);
        assert_eq!(orchestrator.redo().await.unwrap(), started);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn undo_and_redo_are_persisted() {
        let kv = Arc::new(MemoryKvStore::new());
        let clock = ManualClock::new(T0);
        let orchestrator = local(&kv, &clock);
        let started = orchestrator.start_new_session(new_session()).await.unwrap();
        let moved = orchestrator.apply_command(move_player("7", 0.2)).await.unwrap();

        assert_eq!(orchestrator.undo().await.unwrap(), started);
        assert_eq!(
            orchestrator.store().read_session(started.id).await.unwrap(),
            started
        );
        assert!(orchestrator.can_redo().await);

        assert_eq!(orchestrator.redo().await.unwrap(), moved);
        assert_eq!(
            orchestrator.store().read_session(started.id).await.unwrap(),
            moved
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn invalid_transition_leaves_history_untouched() {
        let kv = Arc::new(MemoryKvStore::new());
        let clock = ManualClock::new(T0);
        let orchestrator = local(&kv, &clock);
        orchestrator.start_new_session(new_session()).await.unwrap();
        orchestrator.apply_command(move_player("7", 0.2)).await.unwrap();
        orchestrator.undo().await.unwrap();

        let error = orchestrator
            .apply_command(phase(TimerPhase::Paused))
            .await
            .unwrap_err();
        assert!(matches!(error, Error::InvalidTransition { .. }));
        assert!(orchestrator.can_redo().await);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn ticks_are_not_written() {
        let kv = Arc::new(MemoryKvStore::new());
        let clock = ManualClock::new(T0);
        let orchestrator = local(&kv, &clock);
        orchestrator.start_new_session(new_session()).await.unwrap();
        let running = orchestrator
            .apply_command(phase(TimerPhase::Running))
            .await
            .unwrap();

        clock.advance_secs(45);
        let ticked = orchestrator.tick().await.unwrap();
        assert_eq!(ticked.elapsed_secs, 45);
        assert_eq!(ticked.revision, running.revision);
        assert_eq!(
            orchestrator.store().read_session(running.id).await.unwrap(),
            running
        );
        assert!(orchestrator.can_undo().await);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn restart_recovers_session_and_history() {
        let kv = Arc::new(MemoryKvStore::new());
        let clock = ManualClock::new(T0);
        let (started, running) = {
            let orchestrator = local(&kv, &clock);
            let started = orchestrator.start_new_session(new_session()).await.unwrap();
            orchestrator
                .apply_command(phase(TimerPhase::Running))
                .await
                .unwrap();
            clock.advance_secs(60);
            let running = orchestrator.apply_command(goal(Side::Home)).await.unwrap();
            (started, running)
        };

        clock.advance_secs(240);
        let orchestrator = local(&kv, &clock);
        let resumed = orchestrator.resume_current().await.unwrap().unwrap();
        assert_eq!(resumed.id, started.id);
        assert_eq!(resumed.revision, running.revision);
        assert_eq!(resumed.elapsed_secs, 300);
        assert_eq!(resumed.score, Score { home: 1, away: 0 });

        assert!(orchestrator.can_undo().await);
        let undone = orchestrator.undo().await.unwrap();
        assert_eq!(undone.score, Score::default());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn resume_without_current_session_is_none() {
        let kv = Arc::new(MemoryKvStore::new());
        let orchestrator = local(&kv, &ManualClock::new(T0));
        assert_eq!(orchestrator.resume_current().await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn storage_failure_is_returned_and_rolled_back() {
        let kv = Arc::new(MemoryKvStore::new());
        let clock = ManualClock::new(T0);
        let orchestrator = local(&kv, &clock);
        let started = orchestrator.start_new_session(new_session()).await.unwrap();

        kv.set_unavailable(true);
        let error = orchestrator
            .apply_command(move_player("7", 0.3))
            .await
            .unwrap_err();
        assert!(matches!(error, Error::StorageIo(_)));
        assert_eq!(orchestrator.current().await.unwrap(), Some(started.clone()));
        assert!(!orchestrator.can_undo().await);

        kv.set_unavailable(false);
        let moved = orchestrator.apply_command(move_player("7", 0.3)).await.unwrap();
        assert_eq!(moved.revision, started.revision + 1);
        assert_eq!(
            orchestrator.store().read_session(started.id).await.unwrap(),
            moved
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn commands_without_session_are_not_found() {
        let kv = Arc::new(MemoryKvStore::new());
        let orchestrator = local(&kv, &ManualClock::new(T0));
        let error = orchestrator
            .apply_command(goal(Side::Home))
            .await
            .unwrap_err();
        assert!(matches!(error, Error::NotFound(_)));
        assert!(matches!(
            orchestrator.save().await.unwrap_err(),
            Error::NotFound(_)
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn blank_team_name_is_rejected() {
        let kv = Arc::new(MemoryKvStore::new());
        let orchestrator = local(&kv, &ManualClock::new(T0));
        let error = orchestrator
            .start_new_session(NewSession {
                team_name: "  ".to_string(),
                ..new_session()
            })
            .await
            .unwrap_err();
        assert!(matches!(error, Error::InvalidInput(_)));
        assert!(kv.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_commands_are_serialized() {
        let kv = Arc::new(MemoryKvStore::new());
        let clock = ManualClock::new(T0);
        let orchestrator = Arc::new(local(&kv, &clock));
        let started = orchestrator.start_new_session(new_session()).await.unwrap();

        let tasks: Vec<_> = (0..20)
            .map(|index| {
                let orchestrator = Arc::clone(&orchestrator);
                tokio::spawn(async move {
                    let x = f64::from(index) / 20.0;
                    orchestrator.apply_command(move_player("7", x)).await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let current = orchestrator.current().await.unwrap().unwrap();
        assert_eq!(current.revision, started.revision + 20);
        assert_eq!(
            orchestrator.store().read_session(started.id).await.unwrap(),
            current
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn save_lists_most_recent_first() {
        let kv = Arc::new(MemoryKvStore::new());
        let clock = ManualClock::new(T0);
        let orchestrator = local(&kv, &clock);
        let first = orchestrator.start_new_session(new_session()).await.unwrap();
        orchestrator.save().await.unwrap();

        clock.advance_secs(60);
        let second = orchestrator
            .start_new_session(NewSession {
                opponent_name: "City".to_string(),
                ..new_session()
            })
            .await
            .unwrap();
        orchestrator.save().await.unwrap();
        clock.advance_secs(60);
        orchestrator.apply_command(goal(Side::Away)).await.unwrap();

        let listed = orchestrator.list_sessions().await.unwrap();
        assert_eq!(
            listed.iter().map(|summary| summary.id).collect::<Vec<_>>(),
            vec![second.id, first.id]
        );
        assert_eq!(listed[0].score, Score { home: 0, away: 1 });

        let loaded = orchestrator.load(first.id).await.unwrap();
        assert_eq!(loaded.opponent_name, "United");
        assert_eq!(
            orchestrator.store().current_session_id().await.unwrap(),
            Some(first.id)
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn load_missing_session_is_not_found() {
        let kv = Arc::new(MemoryKvStore::new());
        let orchestrator = local(&kv, &ManualClock::new(T0));
        let error = orchestrator.load(SessionId::new()).await.unwrap_err();
        assert!(matches!(error, Error::NotFound(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delete_deactivates_live_session() {
        let kv = Arc::new(MemoryKvStore::new());
        let clock = ManualClock::new(T0);
        let orchestrator = local(&kv, &clock);
        let started = orchestrator.start_new_session(new_session()).await.unwrap();
        orchestrator.save().await.unwrap();

        orchestrator.delete(started.id).await.unwrap();
        assert_eq!(orchestrator.current().await.unwrap(), None);
        assert!(orchestrator.list_sessions().await.unwrap().is_empty());
        assert!(matches!(
            orchestrator.apply_command(goal(Side::Home)).await.unwrap_err(),
            Error::NotFound(_)
        ));
        assert_eq!(orchestrator.resume_current().await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn local_only_never_queues_and_reports_disabled() {
        let kv = Arc::new(MemoryKvStore::new());
        let clock = ManualClock::new(T0);
        let orchestrator = local(&kv, &clock);
        orchestrator.start_new_session(new_session()).await.unwrap();
        orchestrator.apply_command(goal(Side::Home)).await.unwrap();

        assert!(orchestrator.store().queue().is_none());
        assert_eq!(orchestrator.sync_now().await.unwrap(), None);
        let status = orchestrator.sync_status().await.unwrap();
        assert_eq!(status.state, SyncState::Disabled);
        assert_eq!(status.pending_count, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn every_write_is_queued_and_drained() {
        let harness = synced();
        let orchestrator = &harness.orchestrator;
        let started = orchestrator.start_new_session(new_session()).await.unwrap();
        orchestrator.apply_command(move_player("7", 0.4)).await.unwrap();
        let latest = orchestrator.apply_command(goal(Side::Home)).await.unwrap();

        let status = orchestrator.sync_status().await.unwrap();
        assert_eq!(status.pending_count, 3);
        assert_eq!(status.state, SyncState::Pending);

        let report = orchestrator.sync_now().await.unwrap().unwrap();
        assert_eq!(report.completed, 3);
        assert_eq!(report.conflicts, 0);
        let record = harness.remote.record(started.id).unwrap();
        assert_eq!(record.snapshot, latest);

        let status = orchestrator.sync_status().await.unwrap();
        assert_eq!(status.pending_count, 0);
        assert_eq!(status.state, SyncState::Synced);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn remote_failures_never_block_local_commands() {
        let harness = synced();
        let orchestrator = &harness.orchestrator;
        orchestrator.start_new_session(new_session()).await.unwrap();
        harness.remote.set_unreachable(true);

        let report = orchestrator.sync_now().await.unwrap().unwrap();
        assert_eq!(report.failed, 1);
        let snapshot = orchestrator.apply_command(goal(Side::Home)).await.unwrap();
        assert_eq!(snapshot.score, Score { home: 1, away: 0 });

        let status = orchestrator.sync_status().await.unwrap();
        assert_eq!(status.pending_count, 2);
        assert!(status.last_error.is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn reconciled_merge_is_adopted_before_next_command() {
        let harness = synced();
        let orchestrator = &harness.orchestrator;
        let started = orchestrator.start_new_session(new_session()).await.unwrap();
        orchestrator.sync_now().await.unwrap();
        let base = harness.remote.record(started.id).unwrap();

        // Another device scores against the synced revision.
        harness.clock.advance_secs(5);
        let mut elsewhere = SessionMachine::new(
            base.snapshot.clone(),
            Arc::new(harness.clock.clone()),
        );
        let remote_goal = elsewhere
            .record_event(EventDraft::new(EventKind::Goal, Side::Away))
            .unwrap();
        harness
            .remote
            .put_record(remote_goal.clone(), base.revision + 1);

        harness.clock.advance_secs(5);
        let drawing = Drawing::new(
            vec![Point { x: 0.1, y: 0.1 }, Point { x: 0.4, y: 0.6 }],
            "#ff0000",
        );
        let drawing_id = drawing.id;
        orchestrator
            .apply_command(Command::AddDrawing { drawing })
            .await
            .unwrap();
        assert!(orchestrator.can_undo().await);

        let report = orchestrator.sync_now().await.unwrap().unwrap();
        assert_eq!(report.conflicts, 1);

        let merged = orchestrator.current().await.unwrap().unwrap();
        assert_eq!(merged.score, Score { home: 0, away: 1 });
        assert!(merged.drawings.iter().any(|drawing| drawing.id == drawing_id));
        assert!(!orchestrator.can_undo().await);

        let conflicts = orchestrator.list_conflicts(10).await.unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].session_id, started.id);

        let next = orchestrator.apply_command(goal(Side::Home)).await.unwrap();
        assert_eq!(next.revision, merged.revision + 1);
        assert_eq!(next.score, Score { home: 1, away: 1 });
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn background_worker_syncs_commands() {
        let harness = synced();
        let orchestrator = &harness.orchestrator;
        let engine = Arc::clone(orchestrator.engine().unwrap());
        let (shutdown, shutdown_rx) = watch::channel(false);
        let worker = engine.spawn_worker(shutdown_rx);

        let started = orchestrator.start_new_session(new_session()).await.unwrap();
        let latest = orchestrator.apply_command(goal(Side::Home)).await.unwrap();

        let mut synced = false;
        for _ in 0..100 {
            if harness
                .remote
                .record(started.id)
                .is_some_and(|record| record.snapshot == latest)
            {
                synced = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(synced);

        shutdown.send(true).unwrap();
        worker.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn offline_undo_then_new_command_merges_without_loss() {
        let harness = synced();
        let orchestrator = &harness.orchestrator;
        let started = orchestrator.start_new_session(new_session()).await.unwrap();
        orchestrator.sync_now().await.unwrap();
        let base = harness.remote.record(started.id).unwrap();

        harness.clock.advance_secs(5);
        let mut elsewhere = SessionMachine::new(
            base.snapshot.clone(),
            Arc::new(harness.clock.clone()),
        );
        let remote_goal = elsewhere
            .record_event(EventDraft::new(EventKind::Goal, Side::Away))
            .unwrap();
        harness.remote.put_record(remote_goal, base.revision + 1);

        // Move, take it back, then draw: the drawing reuses the move's
        // revision number with different content.
        harness.clock.advance_secs(5);
        let moved = orchestrator.apply_command(move_player("7", 0.5)).await.unwrap();
        let undone = orchestrator.undo().await.unwrap();
        assert_eq!(undone, started);
        harness.clock.advance_secs(5);
        let drawing = Drawing::new(vec![Point { x: 0.2, y: 0.2 }], "#00ff00");
        let drawing_id = drawing.id;
        let drawn = orchestrator
            .apply_command(Command::AddDrawing { drawing })
            .await
            .unwrap();
        assert_eq!(drawn.revision, moved.revision);

        let report = orchestrator.sync_now().await.unwrap().unwrap();
        assert_eq!(report.completed, 3);
        assert_eq!(report.conflicts, 1);

        let local = orchestrator.current().await.unwrap().unwrap();
        let remote = harness.remote.record(started.id).unwrap().snapshot;
        for snapshot in [&local, &remote] {
            assert_eq!(snapshot.score, Score { home: 0, away: 1 });
            assert!(snapshot.drawings.iter().any(|drawing| drawing.id == drawing_id));
            assert_eq!(
                snapshot.position_of(&PlayerId::new("7")),
                Some(FieldPosition::OffField)
            );
        }
        assert_eq!(local, remote);
        assert_eq!(
            orchestrator.store().read_session(started.id).await.unwrap(),
            local
        );

        // Back in step: the next command takes the fast path.
        let next = orchestrator.apply_command(goal(Side::Home)).await.unwrap();
        let report = orchestrator.sync_now().await.unwrap().unwrap();
        assert_eq!(report.conflicts, 0);
        let remote = harness.remote.record(started.id).unwrap().snapshot;
        assert_eq!(remote.score, Score { home: 1, away: 1 });
        assert_eq!(remote.events.len(), next.events.len());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failed_enqueue_rolls_back_without_losing_history() {
        let kv = Arc::new(MemoryKvStore::new());
        let harness = synced_with(Arc::clone(&kv));
        let orchestrator = &harness.orchestrator;
        let started = orchestrator.start_new_session(new_session()).await.unwrap();
        let moved = orchestrator.apply_command(move_player("7", 0.3)).await.unwrap();

        kv.fail_writes_under(Some("syncop/"));
        let error = orchestrator
            .apply_command(goal(Side::Home))
            .await
            .unwrap_err();
        assert!(matches!(error, Error::StorageIo(_)));
        assert_eq!(orchestrator.current().await.unwrap(), Some(moved.clone()));
        assert_eq!(
            orchestrator.store().read_session(started.id).await.unwrap(),
            moved
        );
        assert_eq!(orchestrator.sync_status().await.unwrap().pending_count, 2);

        kv.fail_writes_under(None);
        let scored = orchestrator.apply_command(goal(Side::Home)).await.unwrap();
        assert_eq!(scored.revision, moved.revision + 1);
        assert_eq!(
            orchestrator.store().read_session(started.id).await.unwrap(),
            scored
        );
        assert_eq!(orchestrator.undo().await.unwrap(), moved);
        assert_eq!(orchestrator.undo().await.unwrap(), started);
        assert_eq!(orchestrator.sync_status().await.unwrap().pending_count, 5);
    }
}
