pub mod config_cmd;
pub mod status;
pub mod tools;
pub mod write;

use scribeloop_config::AppConfig;
use std::path::{Path, PathBuf};

/// The effective configuration and the file it was looked up at.
pub struct LoadedConfig {
    pub config: AppConfig,
    pub path: PathBuf,
    /// `false` when the file was missing and defaults were used
    pub from_file: bool,
}

impl LoadedConfig {
    /// Report where the settings came from. Call after tracing is set up.
    pub fn log_source(&self) {
        if self.from_file {
            tracing::debug!(path = %self.path.display(), "Loaded config");
        } else {
            tracing::info!("No config file found at {}, using defaults", self.path.display());
        }
    }
}

/// Load from `path` when given, otherwise from the default location.
pub fn load_config(path: Option<&Path>) -> Result<LoadedConfig, Box<dyn std::error::Error>> {
    let resolved = config_path(path);
    let from_file = resolved.exists();
    let config = match path {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load(),
    };
    let config = config.map_err(|e| format!("Failed to load config: {e}"))?;
    Ok(LoadedConfig {
        config,
        path: resolved,
        from_file,
    })
}

pub fn config_path(path: Option<&Path>) -> PathBuf {
    path.map(Path::to_path_buf)
        .unwrap_or_else(|| AppConfig::config_dir().join("config.toml"))
}
