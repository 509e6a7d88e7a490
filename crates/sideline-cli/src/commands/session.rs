use sideline_core::models::{
    Command, Drawing, EventDraft, FieldPosition, NewSession, PlayerId, SessionSnapshot,
};
use sideline_core::SessionOrchestrator;

use crate::commands::common::{
    format_snapshot_line, parse_point, require_current, resolve_id_prefix,
};
use crate::error::CliError;
use crate::settings::CliSettings;

pub async fn run_new(
    orchestrator: &SessionOrchestrator,
    settings: &CliSettings,
    team: &str,
    opponent: &str,
    players: &[String],
    sub_interval: u32,
) -> Result<(), CliError> {
    let snapshot = orchestrator
        .start_new_session(NewSession {
            team_name: team.trim().to_string(),
            opponent_name: opponent.trim().to_string(),
            owner_id: settings.owner_id.clone(),
            substitution_interval_minutes: sub_interval,
            roster: roster_from_args(players),
        })
        .await?;
    println!("{}", snapshot.id);
    println!("{}", format_snapshot_line(&snapshot));
    Ok(())
}

/// Resume the current session, apply `command`, and print the result.
pub async fn run_command(
    orchestrator: &SessionOrchestrator,
    command: Command,
) -> Result<(), CliError> {
    require_current(orchestrator).await?;
    let snapshot = orchestrator.apply_command(command).await?;
    println!("{}", format_snapshot_line(&snapshot));
    Ok(())
}

pub async fn run_logged_event(
    orchestrator: &SessionOrchestrator,
    draft: EventDraft,
) -> Result<(), CliError> {
    let event_id = draft.id;
    run_command(orchestrator, Command::LogEvent { event: draft }).await?;
    println!("{event_id}");
    Ok(())
}

pub async fn run_retract(orchestrator: &SessionOrchestrator, id: &str) -> Result<(), CliError> {
    let current = require_current(orchestrator).await?;
    let event_id = resolve_id_prefix(id, current.active_events().map(|event| event.id))?;
    run_command(orchestrator, Command::UndoEvent { event_id }).await
}

pub async fn run_move(
    orchestrator: &SessionOrchestrator,
    player: &str,
    x: Option<f64>,
    y: Option<f64>,
    off: bool,
) -> Result<(), CliError> {
    let to = match (off, x, y) {
        (false, Some(x), Some(y)) => FieldPosition::OnField { x, y },
        _ => FieldPosition::OffField,
    };
    run_command(
        orchestrator,
        Command::MovePlayer {
            player_id: PlayerId::new(player.trim()),
            to,
        },
    )
    .await
}

pub async fn run_draw(
    orchestrator: &SessionOrchestrator,
    points: &[String],
    color: &str,
) -> Result<(), CliError> {
    let points = points
        .iter()
        .map(|raw| parse_point(raw))
        .collect::<Result<Vec<_>, _>>()?;
    let drawing = Drawing::new(points, color.trim());
    let drawing_id = drawing.id;
    run_command(orchestrator, Command::AddDrawing { drawing }).await?;
    println!("{drawing_id}");
    Ok(())
}

pub async fn run_erase(orchestrator: &SessionOrchestrator, id: &str) -> Result<(), CliError> {
    let current = require_current(orchestrator).await?;
    let drawing_id = resolve_id_prefix(id, current.visible_drawings().map(|drawing| drawing.id))?;
    run_command(orchestrator, Command::RemoveDrawing { drawing_id }).await
}

pub async fn run_undo(orchestrator: &SessionOrchestrator) -> Result<(), CliError> {
    require_current(orchestrator).await?;
    if !orchestrator.can_undo().await {
        println!("Nothing to undo");
    }
    print_snapshot(&orchestrator.undo().await?);
    Ok(())
}

pub async fn run_redo(orchestrator: &SessionOrchestrator) -> Result<(), CliError> {
    require_current(orchestrator).await?;
    if !orchestrator.can_redo().await {
        println!("Nothing to redo");
    }
    print_snapshot(&orchestrator.redo().await?);
    Ok(())
}

pub async fn run_save(orchestrator: &SessionOrchestrator) -> Result<(), CliError> {
    require_current(orchestrator).await?;
    let summary = orchestrator.save().await?;
    println!("Saved {}", summary.id);
    Ok(())
}

pub async fn run_load(orchestrator: &SessionOrchestrator, id: &str) -> Result<(), CliError> {
    let mut candidates = orchestrator
        .list_sessions()
        .await?
        .into_iter()
        .map(|summary| summary.id)
        .collect::<Vec<_>>();
    if let Some(current) = orchestrator.store().current_session_id().await? {
        candidates.push(current);
    }
    let session_id = resolve_id_prefix(id, candidates)?;
    print_snapshot(&orchestrator.load(session_id).await?);
    Ok(())
}

/// Roster ids from repeated `--player` flags, trimmed, blanks and repeats dropped.
pub fn roster_from_args(players: &[String]) -> Vec<PlayerId> {
    let mut roster: Vec<PlayerId> = Vec::new();
    for player in players {
        let player = player.trim();
        if player.is_empty() || roster.iter().any(|known| known.as_str() == player) {
            continue;
        }
        roster.push(PlayerId::new(player));
    }
    roster
}

fn print_snapshot(snapshot: &SessionSnapshot) {
    println!("{}", format_snapshot_line(snapshot));
}
