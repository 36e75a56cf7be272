//! Common error handling utilities for the survey engine
//!
//! Every crate in the workspace keeps its own precise error enum; this crate
//! provides the application-boundary error those enums convert into, plus the
//! stable error codes reported to operators.
//!
//! # Error Categories
//!
//! - **Storage**: the on-device database refused a read or write
//! - **Remote**: the remote store was unreachable or rejected a payload
//! - **Configuration**: configuration or logging setup failed
//! - **Export**: a backup or report could not be written
//!
//! # Example
//!
//! ```rust
//! use error_common::{SurveyError, Result};
//!
//! fn require_ward(ward: Option<&str>) -> Result<&str> {
//!     ward.ok_or_else(|| SurveyError::ValidationError("ward is required".into()))
//! }
//!
//! assert_eq!(require_ward(None).unwrap_err().code(), "VALIDATION_5001");
//! ```

pub mod codes;
pub mod types;

pub use types::*;
