use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration source not found: {0}")]
    SourceNotFound(PathBuf),

    #[error("Unsupported configuration format: {0}")]
    UnsupportedFormat(String),

    #[error("Configuration parsing failed: {0}")]
    ParseError(String),

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}

impl From<ConfigError> for error_common::SurveyError {
    fn from(err: ConfigError) -> Self {
        error_common::SurveyError::ConfigError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;
