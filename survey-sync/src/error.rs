//! Error types for the sync engine

use error_common::SurveyError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    /// The local store could not commit or read; nothing was queued
    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SyncError {
    pub fn is_storage(&self) -> bool {
        matches!(self, SyncError::Storage(_))
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

impl From<SyncError> for SurveyError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::Storage(e) => SurveyError::Storage(e.to_string()),
            SyncError::NotFound(what) => SurveyError::NotFound(what),
            SyncError::Remote(RemoteError::Transient(msg)) => SurveyError::RemoteUnavailable(msg),
            SyncError::Remote(rejected @ RemoteError::Rejected { .. }) => {
                SurveyError::RemoteRejected(rejected.to_string())
            }
            SyncError::InvalidOperation(msg) => SurveyError::ValidationError(msg),
            SyncError::Config(msg) => SurveyError::ConfigError(msg),
            SyncError::Serialization(msg) | SyncError::Internal(msg) => {
                SurveyError::InternalError(msg)
            }
        }
    }
}

pub type SyncResult<T> = Result<T, SyncError>;

/// Outcome classification for a failed remote call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Network failure, timeout or server-side error; worth retrying
    #[error("transient remote failure: {0}")]
    Transient(String),

    /// The remote store explicitly refused the payload
    #[error("remote rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },
}

impl RemoteError {
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Transient(_))
    }

    /// Classify an unsuccessful HTTP status. 408 and 429 are retryable like 5xx.
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        if status >= 500 || status == 408 || status == 429 {
            RemoteError::Transient(format!("status {status}: {body}"))
        } else {
            RemoteError::Rejected {
                status,
                message: body,
            }
        }
    }
}
