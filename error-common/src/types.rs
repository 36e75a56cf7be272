use thiserror::Error;

use crate::codes;

/// Application-boundary error shared by the survey crates
#[derive(Error, Debug)]
pub enum SurveyError {
    /// Local persistence failed; nothing was queued
    #[error("Storage error: {0}")]
    Storage(String),

    /// A requested record does not exist locally
    #[error("Not found: {0}")]
    NotFound(String),

    /// The remote store could not be reached or timed out
    #[error("Remote store unavailable: {0}")]
    RemoteUnavailable(String),

    /// The remote store refused the payload
    #[error("Remote store rejected request: {0}")]
    RemoteRejected(String),

    /// Configuration could not be loaded or is invalid
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Logging could not be initialised
    #[error("Logging error: {0}")]
    LoggingError(String),

    /// Export could not be written
    #[error("Export error: {0}")]
    ExportError(String),

    /// Caller supplied invalid input
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Internal system errors
    #[error("Internal error: {0}")]
    InternalError(String),

    /// Wrapped external errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SurveyError {
    /// Stable error code for this error
    pub fn code(&self) -> &'static str {
        match self {
            SurveyError::Storage(_) => codes::storage::WRITE_FAILED,
            SurveyError::NotFound(_) => codes::storage::RECORD_NOT_FOUND,
            SurveyError::RemoteUnavailable(_) => codes::remote::TRANSIENT,
            SurveyError::RemoteRejected(_) => codes::remote::REJECTED,
            SurveyError::ConfigError(_) => codes::configuration::INVALID,
            SurveyError::LoggingError(_) => codes::configuration::LOGGING,
            SurveyError::ExportError(_) => codes::export::WRITE_FAILED,
            SurveyError::ValidationError(_) => codes::validation::INVALID_INPUT,
            SurveyError::InternalError(_) | SurveyError::Other(_) => codes::INTERNAL,
        }
    }

    /// Whether retrying the same operation later may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, SurveyError::RemoteUnavailable(_))
    }
}

impl From<std::io::Error> for SurveyError {
    fn from(err: std::io::Error) -> Self {
        SurveyError::ExportError(err.to_string())
    }
}

/// Result type alias for survey operations
pub type Result<T> = std::result::Result<T, SurveyError>;

/// Log an error together with its code
pub fn log_error(context: &str, error: &SurveyError) {
    tracing::error!(
        context = context,
        error_code = error.code(),
        error = %error,
        "Survey operation failed"
    );
}
