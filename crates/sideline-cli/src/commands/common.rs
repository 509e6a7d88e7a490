use std::collections::BTreeSet;
use std::fmt::Display;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use sideline_core::db::SqliteKvStore;
use sideline_core::kv::KeyValueStore;
use sideline_core::models::{ConflictRecord, Point, SessionSnapshot, SessionSummary};
use sideline_core::sync::{HttpRemoteStore, RemoteStore, SyncStatus};
use sideline_core::util::{format_match_clock, format_timestamp_ms};
use sideline_core::{SessionOrchestrator, SystemClock};
use tokio::sync::watch;

use crate::error::CliError;
use crate::settings::CliSettings;

#[derive(Debug, Serialize)]
pub struct SessionListItem {
    pub id: String,
    pub team_name: String,
    pub opponent_name: String,
    pub home_score: u32,
    pub away_score: u32,
    pub date: i64,
    pub last_modified: i64,
    pub relative_time: String,
}

#[derive(Debug, Serialize)]
pub struct ConflictItem {
    pub id: String,
    pub session_id: String,
    pub local_revision: u64,
    pub remote_revision: u64,
    pub strategy: String,
    pub resolved_at: i64,
    pub resolved_at_iso: String,
}

#[derive(Debug, Serialize)]
pub struct StatusReport<'a> {
    pub session: Option<&'a SessionSnapshot>,
    pub sync: &'a SyncStatus,
}

/// Open the durable store and compose the orchestrator. Sync is wired in
/// only when the config enables it and names a remote.
pub fn open_orchestrator(settings: &CliSettings) -> Result<SessionOrchestrator, CliError> {
    let kv: Arc<dyn KeyValueStore> = Arc::new(SqliteKvStore::open(&settings.db_path)?);
    let clock = Arc::new(SystemClock);

    if !settings.engine.remote_sync_active() {
        return Ok(SessionOrchestrator::local_only(
            kv,
            clock,
            settings.engine.clone(),
        ));
    }

    let Some(base_url) = settings.engine.remote_base_url.clone() else {
        return Err(CliError::SyncNotConfigured);
    };
    let remote: Arc<dyn RemoteStore> = Arc::new(HttpRemoteStore::new(
        base_url,
        settings.engine.remote_timeout(),
    )?);
    // One process per command; the remote call itself reports unreachability.
    let (_online, online_rx) = watch::channel(true);
    Ok(SessionOrchestrator::with_remote(
        kv,
        remote,
        clock,
        settings.engine.clone(),
        online_rx,
    ))
}

/// Resume the session that was current when the last command ran.
pub async fn require_current(
    orchestrator: &SessionOrchestrator,
) -> Result<SessionSnapshot, CliError> {
    orchestrator
        .resume_current()
        .await?
        .ok_or(CliError::NoSession)
}

pub fn normalize_identifier(id: &str) -> Result<String, CliError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptyId)
    } else {
        Ok(trimmed.to_string())
    }
}

/// Resolve a full id or a unique id prefix against `candidates`.
pub fn resolve_id_prefix<T>(
    query: &str,
    candidates: impl IntoIterator<Item = T>,
) -> Result<T, CliError>
where
    T: Copy + Ord + Display,
{
    let query = normalize_identifier(query)?.to_lowercase();
    let matching = candidates
        .into_iter()
        .filter(|id| id.to_string().starts_with(&query))
        .collect::<BTreeSet<_>>();

    let mut iter = matching.iter();
    match (iter.next(), iter.next()) {
        (None, _) => Err(CliError::IdNotFound(query)),
        (Some(id), None) => Ok(*id),
        (Some(_), Some(_)) => {
            let options = matching
                .iter()
                .take(3)
                .map(|id| short_id(&id.to_string()))
                .collect::<Vec<_>>()
                .join(", ");
            Err(CliError::AmbiguousId(format!(
                "ID prefix '{query}' is ambiguous; matches: {options}"
            )))
        }
    }
}

pub fn short_id(id: &str) -> String {
    id.chars().take(13).collect()
}

/// Parse an `x,y` field point.
pub fn parse_point(raw: &str) -> Result<Point, CliError> {
    let invalid = || CliError::InvalidPoint(raw.to_string());
    let (x, y) = raw.split_once(',').ok_or_else(invalid)?;
    let x = x.trim().parse::<f64>().map_err(|_| invalid())?;
    let y = y.trim().parse::<f64>().map_err(|_| invalid())?;
    Ok(Point { x, y })
}

pub fn format_session_lines(sessions: &[SessionSummary]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    sessions
        .iter()
        .map(|session| {
            let title = format!(
                "{} {} - {} {}",
                session.team_name, session.score.home, session.score.away, session.opponent_name
            );
            let relative_time = format_relative_time(session.last_modified, now_ms);
            format!(
                "{:<13}  {title:<40}  {relative_time}",
                short_id(&session.id.to_string())
            )
        })
        .collect()
}

pub fn session_to_list_item(session: &SessionSummary) -> SessionListItem {
    let now_ms = Utc::now().timestamp_millis();
    SessionListItem {
        id: session.id.to_string(),
        team_name: session.team_name.clone(),
        opponent_name: session.opponent_name.clone(),
        home_score: session.score.home,
        away_score: session.score.away,
        date: session.date,
        last_modified: session.last_modified,
        relative_time: format_relative_time(session.last_modified, now_ms),
    }
}

pub fn conflict_to_item(conflict: &ConflictRecord) -> ConflictItem {
    ConflictItem {
        id: conflict.id.to_string(),
        session_id: conflict.session_id.to_string(),
        local_revision: conflict.local_revision,
        remote_revision: conflict.remote_revision,
        strategy: conflict.strategy.to_string(),
        resolved_at: conflict.resolved_at,
        resolved_at_iso: format_timestamp_ms(conflict.resolved_at),
    }
}

pub fn format_conflict_lines(conflicts: &[ConflictRecord]) -> Vec<String> {
    conflicts
        .iter()
        .map(|conflict| {
            format!(
                "{}  {:<15}  session={}  local=r{} remote=r{}",
                format_timestamp_ms(conflict.resolved_at),
                conflict.strategy.to_string(),
                short_id(&conflict.session_id.to_string()),
                conflict.local_revision,
                conflict.remote_revision
            )
        })
        .collect()
}

/// One-line summary printed after every session command.
pub fn format_snapshot_line(snapshot: &SessionSnapshot) -> String {
    let mut line = format!(
        "{} {} - {} {}  {} P{} {}  r{}",
        snapshot.team_name,
        snapshot.score.home,
        snapshot.score.away,
        snapshot.opponent_name,
        format_match_clock(snapshot.elapsed_secs),
        snapshot.period,
        snapshot.phase,
        snapshot.revision
    );
    if snapshot.substitution.alert {
        line.push_str("  [substitution due]");
    }
    line
}

pub fn format_status_lines(snapshot: Option<&SessionSnapshot>, sync: &SyncStatus) -> Vec<String> {
    let mut lines = Vec::new();
    match snapshot {
        Some(snapshot) => {
            lines.push(format!("Session  {}", snapshot.id));
            lines.push(format_snapshot_line(snapshot));
            let events = snapshot.active_events().count();
            let drawings = snapshot.visible_drawings().count();
            let on_field = snapshot
                .positions
                .values()
                .filter(|placement| placement.position.is_on_field())
                .count();
            lines.push(format!(
                "{events} events, {drawings} drawings, {on_field} players on field"
            ));
        }
        None => lines.push("No current session".to_string()),
    }

    let mut sync_line = format!("Sync     {} ({} pending)", sync.state, sync.pending_count);
    if let Some(last_synced_at) = sync.last_synced_at {
        sync_line.push_str(&format!(", last synced {}", format_timestamp_ms(last_synced_at)));
    }
    lines.push(sync_line);
    if let Some(error) = &sync.last_error {
        lines.push(format!("Last sync error: {error}"));
    }
    lines
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else {
        format!("{}w ago", diff / week)
    }
}
