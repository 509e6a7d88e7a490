//! Resolved CLI settings: the engine config file plus environment overrides.

use std::env;
use std::path::{Path, PathBuf};

use sideline_core::util::normalize_text_option;
use sideline_core::EngineConfig;

use crate::error::CliError;

const APP_DIR_NAME: &str = "sideline";
const CONFIG_FILE_NAME: &str = "config.json";
const DB_FILE_NAME: &str = "sideline.db";

#[derive(Debug, Clone)]
pub struct CliSettings {
    pub engine: EngineConfig,
    pub config_path: PathBuf,
    pub db_path: PathBuf,
    /// Stamped on new sessions
    pub owner_id: Option<String>,
}

impl CliSettings {
    pub fn resolve(
        cli_db_path: Option<PathBuf>,
        cli_config_path: Option<PathBuf>,
    ) -> Result<Self, CliError> {
        let config_path = match cli_config_path {
            Some(path) => path,
            None => default_config_path()?,
        };
        let mut engine = EngineConfig::load_from_path(&config_path)?;
        apply_remote_override(
            &mut engine,
            normalize_text_option(env::var("SIDELINE_REMOTE_URL").ok()),
        )?;
        let db_path = resolve_db_path(
            cli_db_path,
            env::var_os("SIDELINE_DB_PATH").map(PathBuf::from),
        )?;

        Ok(Self {
            engine,
            config_path,
            db_path,
            owner_id: normalize_text_option(env::var("SIDELINE_OWNER_ID").ok()),
        })
    }
}

pub fn default_config_path() -> Result<PathBuf, CliError> {
    dirs::config_dir()
        .map(|dir| dir.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
        .ok_or_else(|| CliError::Config("could not resolve config directory".to_string()))
}

pub fn default_db_path() -> Result<PathBuf, CliError> {
    dirs::data_dir()
        .map(|dir| dir.join(APP_DIR_NAME).join(DB_FILE_NAME))
        .ok_or_else(|| CliError::Config("could not resolve data directory".to_string()))
}

/// Explicit flag first, then `SIDELINE_DB_PATH`, then the data directory.
pub fn resolve_db_path(
    cli_db_path: Option<PathBuf>,
    env_db_path: Option<PathBuf>,
) -> Result<PathBuf, CliError> {
    match cli_db_path.or(env_db_path) {
        Some(path) => Ok(path),
        None => default_db_path(),
    }
}

/// A remote URL from the environment turns sync on.
pub fn apply_remote_override(
    engine: &mut EngineConfig,
    remote_url: Option<String>,
) -> Result<(), CliError> {
    if let Some(url) = remote_url {
        engine.remote_base_url = Some(url);
        engine.sync_enabled = true;
        engine.normalize()?;
    }
    Ok(())
}

pub fn save_engine_config(path: &Path, engine: &EngineConfig) -> Result<(), CliError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut normalized = engine.clone();
    normalized.normalize()?;
    std::fs::write(path, serde_json::to_string_pretty(&normalized)?)?;
    Ok(())
}
