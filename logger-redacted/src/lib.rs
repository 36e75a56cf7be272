//! Structured logging with automatic PII redaction
//!
//! Survey records carry names, phone numbers and GPS positions of household
//! members. Remote stores echo those values back in validation errors, so any
//! free text that reaches a log line or the persisted sync queue goes through
//! [`PiiRedactor`] first.
//!
//! # Example
//!
//! ```rust,no_run
//! use logger_redacted::{init_tracing, redact, LoggerConfig};
//!
//! let _guard = init_tracing(&LoggerConfig::default()).unwrap();
//! tracing::warn!(error = %redact("rejected head_phone 7123 4567"), "upsert failed");
//! ```

pub mod config;
pub mod macros;
pub mod redactor;

pub use config::*;
pub use redactor::*;

use lazy_static::lazy_static;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, time::ChronoUtc},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

lazy_static! {
    static ref DEFAULT_REDACTOR: PiiRedactor = PiiRedactor::default();
}

static REDACTION_ENABLED: AtomicBool = AtomicBool::new(true);

#[derive(Error, Debug)]
pub enum LoggerError {
    #[error("Invalid log filter: {0}")]
    InvalidFilter(String),

    #[error("Global subscriber already installed: {0}")]
    AlreadyInitialized(String),
}

impl From<LoggerError> for error_common::SurveyError {
    fn from(err: LoggerError) -> Self {
        error_common::SurveyError::LoggingError(err.to_string())
    }
}

/// Redact PII using the default redaction rules.
/// Returns the text unchanged when redaction was disabled at init.
pub fn redact(text: &str) -> String {
    if REDACTION_ENABLED.load(Ordering::Relaxed) {
        DEFAULT_REDACTOR.redact(text)
    } else {
        text.to_string()
    }
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over `config.level`. When `config.log_dir` is set a
/// daily-rotated JSON file is written as well; keep the returned guard alive
/// for the lifetime of the process so buffered lines are flushed.
pub fn init_tracing(config: &LoggerConfig) -> Result<Option<WorkerGuard>, LoggerError> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| LoggerError::InvalidFilter(e.to_string()))?;

    REDACTION_ENABLED.store(config.redaction_enabled, Ordering::Relaxed);

    let stdout_layer = if config.json {
        fmt::layer()
            .with_target(false)
            .with_timer(ChronoUtc::rfc_3339())
            .with_ansi(false)
            .json()
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_timer(ChronoUtc::rfc_3339())
            .boxed()
    };

    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "survey.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_timer(ChronoUtc::rfc_3339())
                .with_ansi(false)
                .json()
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| LoggerError::AlreadyInitialized(e.to_string()))?;

    Ok(guard)
}
