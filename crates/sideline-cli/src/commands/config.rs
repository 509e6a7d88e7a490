use sideline_core::util::normalize_text_option;
use sideline_core::EngineConfig;

use crate::error::CliError;
use crate::settings::{save_engine_config, CliSettings};

/// Write flag values over the current config file and report what is missing.
pub fn run_config_init(
    settings: &CliSettings,
    remote_url: Option<String>,
    sync: Option<bool>,
    history_depth: Option<usize>,
) -> Result<(), CliError> {
    // Environment overrides stay out of the file.
    let mut engine = EngineConfig::load_from_path(&settings.config_path)?;
    if let Some(url) = normalize_text_option(remote_url) {
        engine.remote_base_url = Some(url);
    }
    if let Some(enabled) = sync {
        engine.sync_enabled = enabled;
    }
    if let Some(depth) = history_depth {
        engine.history_depth = depth;
    }

    save_engine_config(&settings.config_path, &engine)?;
    println!("Config written to {}", settings.config_path.display());

    if engine.sync_enabled && engine.remote_base_url.is_none() {
        println!("Sync is enabled but remote_url is missing; running local-only.");
    } else if engine.remote_sync_active() {
        println!("Remote sync is ready. Run `sideline sync` to push queued changes.");
    }
    Ok(())
}

pub fn run_config_show(settings: &CliSettings) -> Result<(), CliError> {
    println!("# {}", settings.config_path.display());
    println!("{}", serde_json::to_string_pretty(&settings.engine)?);
    println!("# database: {}", settings.db_path.display());
    Ok(())
}
