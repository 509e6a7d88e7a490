use sideline_core::SessionOrchestrator;

use crate::commands::common::{conflict_to_item, format_conflict_lines, ConflictItem};
use crate::error::CliError;

pub async fn run_sync(orchestrator: &SessionOrchestrator) -> Result<(), CliError> {
    let Some(report) = orchestrator.sync_now().await? else {
        return Err(CliError::SyncNotConfigured);
    };

    if report.failed > 0 {
        let status = orchestrator.sync_status().await?;
        println!(
            "Sync incomplete: {} pushed, {} failed, {} still queued",
            report.completed, report.failed, status.pending_count
        );
        if let Some(error) = status.last_error {
            println!("Last error: {error}");
        }
    } else {
        println!(
            "Sync completed: {} pushed, {} merged",
            report.completed, report.conflicts
        );
    }
    Ok(())
}

pub async fn run_sync_conflicts(
    orchestrator: &SessionOrchestrator,
    limit: usize,
    as_json: bool,
) -> Result<(), CliError> {
    let conflicts = orchestrator.list_conflicts(limit).await?;

    if as_json {
        let json_items = conflicts
            .iter()
            .map(conflict_to_item)
            .collect::<Vec<ConflictItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if conflicts.is_empty() {
        println!("No sync conflicts recorded.");
        return Ok(());
    }

    for line in format_conflict_lines(&conflicts) {
        println!("{line}");
    }
    Ok(())
}
