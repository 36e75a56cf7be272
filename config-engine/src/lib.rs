//! Configuration management for the survey engine
//!
//! Configuration is layered with figment:
//!
//! 1. Built-in defaults ([`SurveyConfig::default`])
//! 2. An optional YAML or TOML file
//! 3. Environment variables prefixed `SURVEY_`, nested with `__`
//!    (`SURVEY_SYNC__ERROR_THRESHOLD=7` sets `sync.error_threshold`)
//!
//! The merged result is validated before it is handed out.
//!
//! # Example
//!
//! ```rust,no_run
//! use config_engine::ConfigLoader;
//! use std::path::Path;
//!
//! let config = ConfigLoader::standard(Some(Path::new("survey.yaml"))).load()?;
//! println!("database at {}", config.database.path.display());
//! # Ok::<(), config_engine::ConfigError>(())
//! ```

pub mod error;
pub mod providers;
pub mod settings;
pub mod validation;

pub use error::*;
pub use providers::*;
pub use settings::*;
pub use validation::ConfigValidator;
