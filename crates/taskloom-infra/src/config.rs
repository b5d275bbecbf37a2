//! Configuration loader for Taskloom.
//!
//! Reads `config.toml` from the data directory (`~/.taskloom/` unless
//! `TASKLOOM_DATA_DIR` is set) into [`AppConfig`]. A missing or malformed
//! file falls back to defaults.

use std::path::{Path, PathBuf};

use taskloom_types::config::AppConfig;

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "TASKLOOM_DATA_DIR";

/// Resolve the data directory.
///
/// Priority:
/// 1. `TASKLOOM_DATA_DIR` environment variable
/// 2. `~/.taskloom`
/// 3. `.taskloom` in the current directory
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        return PathBuf::from(dir);
    }
    match dirs::home_dir() {
        Some(home) => home.join(".taskloom"),
        None => PathBuf::from(".taskloom"),
    }
}

/// `sqlite://{data_dir}/taskloom.db`, created on first open.
pub fn default_database_url(data_dir: &Path) -> String {
    format!("sqlite://{}", data_dir.join("taskloom.db").display())
}

/// Load `{data_dir}/config.toml`.
pub async fn load_app_config(data_dir: &Path) -> AppConfig {
    let config_path = data_dir.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %config_path.display(), "no config.toml, using defaults");
            return AppConfig::default();
        }
        Err(err) => {
            tracing::warn!(path = %config_path.display(), error = %err, "failed to read config, using defaults");
            return AppConfig::default();
        }
    };

    match toml::from_str::<AppConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(path = %config_path.display(), error = %err, "failed to parse config, using defaults");
            AppConfig::default()
        }
    }
}

/// The database URL to open: the configured one or the data dir default.
pub fn database_url(config: &AppConfig, data_dir: &Path) -> String {
    config
        .database_url
        .clone()
        .unwrap_or_else(|| default_database_url(data_dir))
}
