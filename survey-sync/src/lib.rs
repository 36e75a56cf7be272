//! Offline-first synchronization engine for household survey records
//!
//! Provides:
//! - Local SQLite store with atomic record + queue writes
//! - Durable FIFO mutation queue with per-entry backoff
//! - Connectivity monitor publishing online/offline transitions
//! - Remote adapter for a row store with object uploads
//! - Single-flight sync engine and its background loop
//! - Survey recording service, dashboard counts and exports
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use survey_sync::{
//!     ConnectivityMonitor, EngineSettings, Household, LocalDatabase, RestBackend, RestConfig,
//!     RetryPolicy, StoreAdapter, SurveyService, SyncEngine,
//! };
//!
//! # async fn run() -> survey_sync::SyncResult<()> {
//! let db = LocalDatabase::in_memory().await?;
//! let backend = Arc::new(RestBackend::new(RestConfig {
//!     base_url: "https://example.invalid".to_string(),
//!     api_key: "anon".to_string(),
//!     access_token: None,
//!     timeout: std::time::Duration::from_secs(30),
//! })?);
//! let adapter = Arc::new(StoreAdapter::new(backend, "household-photos", std::time::Duration::from_secs(30)));
//! let engine = Arc::new(SyncEngine::new(
//!     db,
//!     adapter,
//!     Arc::new(ConnectivityMonitor::new(false)),
//!     RetryPolicy::default(),
//!     EngineSettings::default(),
//! ));
//!
//! let service = SurveyService::new(engine.clone());
//! service.save_household(Household::new(), Vec::new(), Vec::new()).await?;
//! assert_eq!(engine.pending_count().await?, 1);
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod connectivity;
pub mod engine;
pub mod error;
pub mod export;
pub mod local_db;
pub mod models;
pub mod queue;
pub mod remote;
pub mod service;

pub use backoff::RetryPolicy;
pub use connectivity::{spawn_probe, ConnectivityEvent, ConnectivityMonitor};
pub use engine::{DrainOutcome, DrainTrigger, EngineSettings, SyncEngine, SyncStats};
pub use error::{RemoteError, SyncError, SyncResult};
pub use export::{Backup, HouseholdFilter, HouseholdRow};
pub use local_db::{LocalDatabase, LocalDbConfig, Query, WriteBatch};
pub use models::{
    Collection, Household, IndexValue, Individual, Operation, Photo, Profile, Record, Role,
    SyncEnvelope, SyncStatus,
};
pub use queue::{MutationQueue, QueueEntry};
pub use remote::{AppliedResult, RemoteAdapter, RemoteBackend, RestBackend, RestConfig, StoreAdapter};
pub use service::{DashboardStats, StorageInfo, SurveyService};
