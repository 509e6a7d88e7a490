use std::path::Path;

use sideline_core::export::render_session_export;
use sideline_core::SessionOrchestrator;

use crate::cli::ExportFormat;
use crate::commands::common::require_current;
use crate::error::CliError;

pub async fn run_export(
    orchestrator: &SessionOrchestrator,
    format: ExportFormat,
    output_path: Option<&Path>,
) -> Result<(), CliError> {
    require_current(orchestrator).await?;
    let snapshot = orchestrator.tick().await?;
    let rendered = render_session_export(&snapshot, format.into())?;

    if let Some(path) = output_path {
        std::fs::write(path, rendered)?;
        println!("{}", path.display());
    } else {
        println!("{rendered}");
    }

    Ok(())
}
