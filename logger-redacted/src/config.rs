// Logger configuration
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggerConfig {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
    /// Redact PII from messages passed through the redaction macros
    pub redaction_enabled: bool,
    /// Optional directory for a daily-rotated JSON log file
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            redaction_enabled: true,
            log_dir: None,
        }
    }
}
