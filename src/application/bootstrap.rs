use crate::infrastructure::config::{
    ensure_default_configs, load_backend_config, load_event_config, BackendConfig, EventConfig,
};
use crate::infrastructure::error::ScheduleError;
use crate::infrastructure::storage::initialize_database;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct BootstrapResult {
    pub workspace_root: PathBuf,
    pub config_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub database_path: PathBuf,
    pub event: EventConfig,
    pub backend: BackendConfig,
}

pub fn bootstrap_workspace(workspace_root: &Path) -> Result<BootstrapResult, ScheduleError> {
    let config_dir = workspace_root.join("config");
    let state_dir = workspace_root.join("state");
    let logs_dir = workspace_root.join("logs");
    let database_path = state_dir.join("schedule.sqlite");

    fs::create_dir_all(&config_dir)?;
    fs::create_dir_all(&state_dir)?;
    fs::create_dir_all(&logs_dir)?;

    ensure_default_configs(&config_dir)?;
    let event = load_event_config(&config_dir)?;
    let backend = load_backend_config(&config_dir)?;
    initialize_database(&database_path)?;

    Ok(BootstrapResult {
        workspace_root: workspace_root.to_path_buf(),
        config_dir,
        logs_dir,
        database_path,
        event,
        backend,
    })
}
