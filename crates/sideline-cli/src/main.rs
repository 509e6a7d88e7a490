//! Sideline CLI - run a live game session from the terminal
//!
//! One process per command; the current session is recovered from the
//! durable store every time.

mod cli;
mod commands;
mod error;
mod settings;

#[cfg(test)]
mod tests;

use clap::{CommandFactory, Parser};
use sideline_core::models::{CardColor, Command, EventDraft, EventKind, TimerPhase};
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands, ConfigCommands, SyncCommands};
use crate::commands::common::open_orchestrator;
use crate::commands::completions::run_completions;
use crate::commands::config::{run_config_init, run_config_show};
use crate::commands::delete::run_delete;
use crate::commands::export::run_export;
use crate::commands::list::run_list;
use crate::commands::session::{
    run_command, run_draw, run_erase, run_load, run_logged_event, run_move, run_new, run_redo,
    run_retract, run_save, run_undo,
};
use crate::commands::status::run_status;
use crate::commands::sync::{run_sync, run_sync_conflicts};
use crate::error::CliError;
use crate::settings::CliSettings;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sideline=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let Some(command) = cli.command else {
        Cli::command().print_help().map_err(CliError::Io)?;
        println!();
        return Ok(());
    };

    if let Commands::Completions { shell, output } = &command {
        return run_completions(*shell, output.as_deref());
    }

    let settings = CliSettings::resolve(cli.db_path, cli.config)?;
    match command {
        Commands::Config { command } => {
            return match command {
                ConfigCommands::Init {
                    remote_url,
                    sync,
                    history_depth,
                } => run_config_init(&settings, remote_url, sync, history_depth),
                ConfigCommands::Show => run_config_show(&settings),
            };
        }
        Commands::Completions { .. } => return Ok(()),
        _ => {}
    }

    let orchestrator = open_orchestrator(&settings)?;
    match command {
        Commands::New {
            team,
            opponent,
            players,
            sub_interval,
        } => run_new(&orchestrator, &settings, &team, &opponent, &players, sub_interval).await?,
        Commands::Start | Commands::Resume => {
            run_command(&orchestrator, set_phase(TimerPhase::Running)).await?;
        }
        Commands::Pause => run_command(&orchestrator, set_phase(TimerPhase::Paused)).await?,
        Commands::End => run_command(&orchestrator, set_phase(TimerPhase::Ended)).await?,
        Commands::Period => run_command(&orchestrator, Command::AdvancePeriod).await?,
        Commands::Goal { side, player } => {
            let draft = with_player(EventDraft::new(EventKind::Goal, side.into()), player);
            run_logged_event(&orchestrator, draft).await?;
        }
        Commands::Card {
            color,
            side,
            player,
        } => {
            let kind = EventKind::Card {
                color: CardColor::from(color),
            };
            run_logged_event(&orchestrator, with_player(EventDraft::new(kind, side.into()), player))
                .await?;
        }
        Commands::Sub {
            player,
            replaces,
            side,
        } => {
            let kind = EventKind::Substitution {
                replaced: replaces.map(|id| id.trim().into()),
            };
            let draft = EventDraft::new(kind, side.into()).with_player(player.trim());
            run_logged_event(&orchestrator, draft).await?;
        }
        Commands::ConfirmSub => run_command(&orchestrator, Command::ConfirmSubstitution).await?,
        Commands::Retract { id } => run_retract(&orchestrator, &id).await?,
        Commands::Move { player, x, y, off } => run_move(&orchestrator, &player, x, y, off).await?,
        Commands::Draw { points, color } => run_draw(&orchestrator, &points, &color).await?,
        Commands::Erase { id } => run_erase(&orchestrator, &id).await?,
        Commands::Undo => run_undo(&orchestrator).await?,
        Commands::Redo => run_redo(&orchestrator).await?,
        Commands::Status { json } => run_status(&orchestrator, json).await?,
        Commands::Save => run_save(&orchestrator).await?,
        Commands::List { json } => run_list(&orchestrator, json).await?,
        Commands::Load { id } => run_load(&orchestrator, &id).await?,
        Commands::Delete { id } => run_delete(&orchestrator, &id).await?,
        Commands::Export { format, output } => {
            run_export(&orchestrator, format, output.as_deref()).await?;
        }
        Commands::Sync { command } => match command {
            Some(SyncCommands::Conflicts { limit, json }) => {
                run_sync_conflicts(&orchestrator, limit, json).await?;
            }
            None => run_sync(&orchestrator).await?,
        },
        Commands::Completions { .. } | Commands::Config { .. } => {}
    }

    Ok(())
}

const fn set_phase(phase: TimerPhase) -> Command {
    Command::SetPhase { phase }
}

fn with_player(draft: EventDraft, player: Option<String>) -> EventDraft {
    match player.map(|id| id.trim().to_string()) {
        Some(id) if !id.is_empty() => draft.with_player(id.as_str()),
        _ => draft,
    }
}
