//! Application configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Environment variable that overrides `remote.api_key`.
pub const API_KEY_ENV: &str = "SIPPA_API_KEY";

/// Remote store connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Base URL of the hosted backend.
    #[serde(default = "default_remote_url")]
    pub url: String,

    /// Anonymous API key sent with every request.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            url: default_remote_url(),
            api_key: None,
            timeout_secs: default_timeout(),
        }
    }
}

fn default_remote_url() -> String {
    "http://localhost:54321".to_string()
}

const fn default_timeout() -> u64 {
    15
}

/// Sync behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Interval between connectivity probes in seconds.
    #[serde(default = "default_probe_interval")]
    pub probe_interval_secs: u64,

    /// Run a full sync when `watch` starts.
    #[serde(default = "default_sync_on_start")]
    pub sync_on_start: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            probe_interval_secs: default_probe_interval(),
            sync_on_start: default_sync_on_start(),
        }
    }
}

const fn default_probe_interval() -> u64 {
    10
}

const fn default_sync_on_start() -> bool {
    true
}

/// Path configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PathConfig {
    /// Base data directory.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

/// Complete application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub remote: RemoteConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub paths: PathConfig,
}

impl AppConfig {
    /// Get the data directory, using default if not configured.
    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        self.paths
            .data_dir
            .clone()
            .unwrap_or_else(Self::default_data_dir)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".sippa")
    }

    /// Path of the local database file.
    #[must_use]
    pub fn local_db_path(&self) -> PathBuf {
        self.data_dir().join("sippa.db")
    }

    /// The config file always lives in the default data directory; a custom
    /// `paths.data_dir` only moves the database.
    #[must_use]
    pub fn config_file_path() -> PathBuf {
        Self::default_data_dir().join("config.toml")
    }

    /// API key, with the environment taking precedence over the file.
    #[must_use]
    pub fn api_key(&self) -> Option<String> {
        std::env::var(API_KEY_ENV)
            .ok()
            .filter(|k| !k.is_empty())
            .or_else(|| self.remote.api_key.clone())
    }
}
