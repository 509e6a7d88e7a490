use sideline_core::SessionOrchestrator;

use crate::commands::common::{format_status_lines, StatusReport};
use crate::error::CliError;

pub async fn run_status(orchestrator: &SessionOrchestrator, as_json: bool) -> Result<(), CliError> {
    let snapshot = match orchestrator.resume_current().await? {
        Some(_) => Some(orchestrator.tick().await?),
        None => None,
    };
    let mut sync = orchestrator.sync_status().await?;
    // Status is per process; fall back to what the store remembers.
    if sync.last_synced_at.is_none() {
        if let Some(snapshot) = &snapshot {
            sync.last_synced_at = orchestrator
                .store()
                .sync_meta(snapshot.id)
                .await?
                .last_synced_at;
        }
    }

    if as_json {
        let report = StatusReport {
            session: snapshot.as_ref(),
            sync: &sync,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    for line in format_status_lines(snapshot.as_ref(), &sync) {
        println!("{line}");
    }
    Ok(())
}
