use sideline_core::SessionOrchestrator;

use crate::commands::common::resolve_id_prefix;
use crate::error::CliError;

pub async fn run_delete(orchestrator: &SessionOrchestrator, id: &str) -> Result<(), CliError> {
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

    orchestrator.delete(session_id).await?;
    println!("{session_id}");
    Ok(())
}
