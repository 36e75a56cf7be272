//! Typed configuration sections
//!
//! Every section derives `Default` and uses `#[serde(default)]`, so a config
//! file only needs to name the values it overrides.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Complete configuration for a survey device
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurveyConfig {
    pub database: DatabaseSettings,
    pub remote: RemoteSettings,
    pub sync: SyncSettings,
    pub logging: LoggingSettings,
}

/// On-device database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// SQLite file path; `:memory:` keeps everything in RAM
    pub path: PathBuf,
    pub max_connections: u32,
    pub enable_wal: bool,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: 5,
            enable_wal: true,
        }
    }
}

/// Remote store of record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteSettings {
    pub enabled: bool,
    pub base_url: String,
    /// Project API key sent with every request
    pub api_key: String,
    /// Access token of the signed-in enumerator
    pub access_token: Option<String>,
    pub photo_bucket: String,
    pub request_timeout_secs: u64,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: String::new(),
            api_key: String::new(),
            access_token: None,
            photo_bucket: "household-photos".to_string(),
            request_timeout_secs: 30,
        }
    }
}

/// Drain scheduling and retry policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub drain_interval_secs: u64,
    pub online_debounce_ms: u64,
    pub backoff_base_secs: u64,
    pub backoff_max_secs: u64,
    /// Failed attempts after which a record is flagged `error`
    pub error_threshold: u32,
    /// Reachability probe period; 0 disables the probe
    pub probe_interval_secs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            drain_interval_secs: 300,
            online_debounce_ms: 2_000,
            backoff_base_secs: 5,
            backoff_max_secs: 3_600,
            error_threshold: 5,
            probe_interval_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
    pub redaction_enabled: bool,
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            redaction_enabled: true,
            log_dir: None,
        }
    }
}

/// Platform data directory, falling back to the working directory
fn default_database_path() -> PathBuf {
    ProjectDirs::from("org", "bogia", "survey")
        .map(|dirs| dirs.data_dir().join("survey.db"))
        .unwrap_or_else(|| PathBuf::from("survey_local.db"))
}
