//! Configuration file management.
//!
//! Handles loading and saving the TOML configuration file.

use std::fs;
use std::path::Path;

use crate::domain::{AppConfig, AppError, Result};

/// Default configuration file content.
const DEFAULT_CONFIG: &str = r#"# Sippa sync configuration
# Auto-generated - edit as needed

[remote]
# Base URL of the hosted backend
url = "http://localhost:54321"

# Anonymous API key (the SIPPA_API_KEY environment variable takes precedence)
# api_key = "..."

# Per-request timeout in seconds
timeout_secs = 15

[sync]
# Seconds between connectivity probes while watching (default: 10)
probe_interval_secs = 10

# Run a full sync when `sippa watch` starts
sync_on_start = true

[paths]
# Directory for the local database (optional, defaults to ~/.sippa).
# This file itself always stays in ~/.sippa.
# data_dir = "/custom/path"
"#;

/// Load configuration from the default location, or defaults if absent.
///
/// # Errors
/// Returns error if file exists but cannot be read or parsed.
pub fn load_config() -> Result<AppConfig> {
    let config_path = AppConfig::config_file_path();

    if config_path.exists() {
        load_config_from_file(&config_path)
    } else {
        Ok(AppConfig::default())
    }
}

/// Load configuration from a specific file.
///
/// # Errors
/// Returns error if file cannot be read or parsed.
pub fn load_config_from_file(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .map_err(|e| AppError::io(format!("Failed to read config file: {}", path.display()), e))?;

    toml::from_str(&content).map_err(|e| AppError::Config {
        message: format!("Failed to parse config file: {e}"),
    })
}

/// Save configuration where `load_config` reads it.
///
/// # Errors
/// Returns error if file cannot be written.
pub fn save_config(config: &AppConfig) -> Result<()> {
    save_config_to(config, &AppConfig::config_file_path())
}

fn save_config_to(config: &AppConfig, config_path: &Path) -> Result<()> {
    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| AppError::io("Failed to create config directory", e))?;
    }

    let content = toml::to_string_pretty(config).map_err(|e| AppError::Config {
        message: format!("Failed to serialize config: {e}"),
    })?;

    fs::write(config_path, content).map_err(|e| {
        AppError::io(
            format!("Failed to write config file: {}", config_path.display()),
            e,
        )
    })?;

    tracing::info!(path = %config_path.display(), "Configuration saved");

    Ok(())
}

/// Write the commented default configuration if no file exists yet.
///
/// Returns whether a file was created.
///
/// # Errors
/// Returns error if file cannot be created.
pub fn ensure_config_exists() -> Result<bool> {
    ensure_config_at(&AppConfig::config_file_path())
}

fn ensure_config_at(config_path: &Path) -> Result<bool> {
    if config_path.exists() {
        return Ok(false);
    }

    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| AppError::io("Failed to create config directory", e))?;
    }

    fs::write(config_path, DEFAULT_CONFIG)
        .map_err(|e| AppError::io("Failed to create default config", e))?;

    tracing::info!(path = %config_path.display(), "Created default configuration");

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::PathConfig;
    use tempfile::tempdir;

    #[test]
    fn test_default_config_parses() {
        let config: AppConfig = toml::from_str(DEFAULT_CONFIG).unwrap();
        assert_eq!(config.remote.url, "http://localhost:54321");
        assert_eq!(config.remote.timeout_secs, 15);
        assert_eq!(config.sync.probe_interval_secs, 10);
        assert!(config.remote.api_key.is_none());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = AppConfig::default();
        config.sync.probe_interval_secs = 3;
        config.remote.api_key = Some("anon-key".into());

        save_config_to(&config, &path).unwrap();
        let loaded = load_config_from_file(&path).unwrap();

        assert_eq!(loaded.sync.probe_interval_secs, 3);
        assert_eq!(loaded.remote.api_key.as_deref(), Some("anon-key"));
    }

    #[test]
    fn test_saved_custom_data_dir_is_read_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("home").join("config.toml");
        let data = dir.path().join("elsewhere");
        let config = AppConfig {
            paths: PathConfig {
                data_dir: Some(data.clone()),
            },
            ..Default::default()
        };

        save_config_to(&config, &path).unwrap();

        assert!(path.exists());
        assert!(!data.join("config.toml").exists());
        let loaded = load_config_from_file(&path).unwrap();
        assert_eq!(loaded.local_db_path(), data.join("sippa.db"));
    }

    #[test]
    fn test_ensure_config_exists_only_once() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");

        assert!(ensure_config_at(&path).unwrap());
        fs::write(&path, "[sync]\nsync_on_start = false\n").unwrap();
        assert!(!ensure_config_at(&path).unwrap());

        let loaded = load_config_from_file(&path).unwrap();
        assert!(!loaded.sync.sync_on_start);
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[remote\nurl = ").unwrap();

        assert!(matches!(
            load_config_from_file(&path),
            Err(AppError::Config { .. })
        ));
    }
}
