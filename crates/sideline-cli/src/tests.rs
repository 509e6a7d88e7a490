use std::path::PathBuf;

use clap::Parser;
use pretty_assertions::assert_eq;
use sideline_core::models::{
    Command, EventDraft, EventKind, NewSession, PlayerId, Point, SessionId, SessionSnapshot, Side,
};
use sideline_core::sync::SyncStatus;
use sideline_core::EngineConfig;

use crate::cli::{Cli, Commands, CompletionShell, SideArg};
use crate::commands::common::{
    format_relative_time, format_snapshot_line, format_status_lines, open_orchestrator,
    parse_point, resolve_id_prefix, short_id,
};
use crate::commands::completions::completion_script;
use crate::commands::session::roster_from_args;
use crate::error::CliError;
use crate::settings::{apply_remote_override, resolve_db_path, save_engine_config, CliSettings};

fn temp_settings(dir: &tempfile::TempDir) -> CliSettings {
    CliSettings {
        engine: EngineConfig::default(),
        config_path: dir.path().join("config.json"),
        db_path: dir.path().join("sideline.db"),
        owner_id: Some("coach-1".to_string()),
    }
}

fn snapshot() -> SessionSnapshot {
    SessionSnapshot::new(
        &NewSession {
            team_name: "Rovers".to_string(),
            opponent_name: "United".to_string(),
            ..Default::default()
        },
        1_700_000_000_000,
    )
}

#[test]
fn parse_point_accepts_comma_pairs() {
    assert_eq!(parse_point("0.25, 0.5").unwrap(), Point { x: 0.25, y: 0.5 });
    assert!(matches!(parse_point("0.25"), Err(CliError::InvalidPoint(_))));
    assert!(matches!(parse_point("a,b"), Err(CliError::InvalidPoint(_))));
}

#[test]
fn resolve_id_prefix_finds_unique_match() {
    let first = SessionId::new();
    let second = SessionId::new();
    let full = first.to_string();

    assert_eq!(resolve_id_prefix(&full, [first, second]).unwrap(), first);
    assert_eq!(
        resolve_id_prefix(&full.to_uppercase(), [first, second]).unwrap(),
        first
    );
    assert!(matches!(
        resolve_id_prefix("zzzz", [first, second]),
        Err(CliError::IdNotFound(_))
    ));
    assert!(matches!(
        resolve_id_prefix("  ", [first]),
        Err(CliError::EmptyId)
    ));
}

#[test]
fn resolve_id_prefix_reports_ambiguity() {
    // v7 ids minted together share their timestamp prefix.
    let first = SessionId::new();
    let second = SessionId::new();
    let shared = &first.to_string()[..4];
    assert!(second.to_string().starts_with(shared));

    let error = resolve_id_prefix(shared, [first, second]).unwrap_err();
    assert!(matches!(error, CliError::AmbiguousId(_)));
    assert!(error.to_string().contains(&short_id(&first.to_string())));
}

#[test]
fn resolve_id_prefix_ignores_duplicate_candidates() {
    let id = SessionId::new();
    assert_eq!(resolve_id_prefix(&id.to_string(), [id, id]).unwrap(), id);
}

#[test]
fn roster_from_args_trims_and_dedupes() {
    let roster = roster_from_args(&[
        " 7 ".to_string(),
        String::new(),
        "10".to_string(),
        "7".to_string(),
    ]);
    assert_eq!(roster, vec![PlayerId::new("7"), PlayerId::new("10")]);
}

#[test]
fn format_relative_time_units() {
    let now = 10_000_000_000;
    assert_eq!(format_relative_time(now - 30_000, now), "just now");
    assert_eq!(format_relative_time(now - 120_000, now), "2m ago");
    assert_eq!(format_relative_time(now - 2 * 60 * 60_000, now), "2h ago");
    assert_eq!(
        format_relative_time(now - 3 * 24 * 60 * 60_000, now),
        "3d ago"
    );
}

#[test]
fn snapshot_line_shows_score_clock_and_revision() {
    let line = format_snapshot_line(&snapshot());
    assert_eq!(line, "Rovers 0 - 0 United  00:00 P1 idle  r1");
}

#[test]
fn status_lines_without_session() {
    let lines = format_status_lines(None, &SyncStatus::disabled(0));
    assert_eq!(
        lines,
        vec![
            "No current session".to_string(),
            "Sync     disabled (0 pending)".to_string()
        ]
    );
}

#[test]
fn remote_override_enables_sync() {
    let mut engine = EngineConfig::default();
    apply_remote_override(&mut engine, Some("https://sync.example.com/".to_string())).unwrap();
    assert!(engine.remote_sync_active());
    assert_eq!(
        engine.remote_base_url.as_deref(),
        Some("https://sync.example.com")
    );

    let mut engine = EngineConfig::default();
    assert!(apply_remote_override(&mut engine, Some("sync.example.com".to_string())).is_err());

    let mut engine = EngineConfig::default();
    apply_remote_override(&mut engine, None).unwrap();
    assert!(!engine.remote_sync_active());
}

#[test]
fn db_path_prefers_flag_over_environment() {
    let resolved = resolve_db_path(
        Some(PathBuf::from("/tmp/flag.db")),
        Some(PathBuf::from("/tmp/env.db")),
    )
    .unwrap();
    assert_eq!(resolved, PathBuf::from("/tmp/flag.db"));

    let resolved = resolve_db_path(None, Some(PathBuf::from("/tmp/env.db"))).unwrap();
    assert_eq!(resolved, PathBuf::from("/tmp/env.db"));
}

#[test]
fn saved_engine_config_loads_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.json");
    let engine = EngineConfig {
        sync_enabled: true,
        remote_base_url: Some("https://sync.example.com".to_string()),
        history_depth: 20,
        ..EngineConfig::default()
    };

    save_engine_config(&path, &engine).unwrap();
    assert_eq!(EngineConfig::load_from_path(&path).unwrap(), engine);
}

#[test]
fn cli_parses_event_commands() {
    let cli = Cli::try_parse_from(["sideline", "goal", "away", "--player", "9"]).unwrap();
    match cli.command {
        Some(Commands::Goal { side, player }) => {
            assert_eq!(side, SideArg::Away);
            assert_eq!(player.as_deref(), Some("9"));
        }
        _ => panic!("expected goal command"),
    }

    let cli = Cli::try_parse_from(["sideline", "move", "7", "--off"]).unwrap();
    assert!(matches!(
        cli.command,
        Some(Commands::Move {
            off: true,
            x: None,
            ..
        })
    ));
    assert!(Cli::try_parse_from(["sideline", "move", "7"]).is_err());
}

#[test]
fn completion_script_names_the_binary() {
    let script = String::from_utf8(completion_script(CompletionShell::Bash)).unwrap();
    assert!(script.contains("sideline"));
}

#[tokio::test(flavor = "multi_thread")]
async fn local_orchestrator_persists_between_processes() {
    let dir = tempfile::tempdir().unwrap();
    let settings = temp_settings(&dir);

    let session_id = {
        let orchestrator = open_orchestrator(&settings).unwrap();
        let started = orchestrator
            .start_new_session(NewSession {
                team_name: "Rovers".to_string(),
                owner_id: settings.owner_id.clone(),
                ..Default::default()
            })
            .await
            .unwrap();
        orchestrator
            .apply_command(Command::LogEvent {
                event: EventDraft::new(EventKind::Goal, Side::Home),
            })
            .await
            .unwrap();
        started.id
    };

    let orchestrator = open_orchestrator(&settings).unwrap();
    let resumed = orchestrator.resume_current().await.unwrap().unwrap();
    assert_eq!(resumed.id, session_id);
    assert_eq!(resumed.score.home, 1);
    assert_eq!(resumed.owner_id.as_deref(), Some("coach-1"));
    assert_eq!(orchestrator.sync_now().await.unwrap(), None);
}
