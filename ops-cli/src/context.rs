//! Engine wiring from configuration

use anyhow::Context;
use async_trait::async_trait;
use config_engine::SurveyConfig;
use std::sync::Arc;
use std::time::Duration;
use survey_sync::{
    AppliedResult, ConnectivityMonitor, EngineSettings, LocalDatabase, LocalDbConfig, QueueEntry,
    RemoteAdapter, RemoteBackend, RemoteError, RestBackend, RestConfig, RetryPolicy, StoreAdapter,
    SurveyService, SyncEngine,
};

/// Adapter used when remote sync is switched off; every entry stays queued
struct DisabledRemote;

#[async_trait]
impl RemoteAdapter for DisabledRemote {
    async fn apply(&self, _entry: &QueueEntry) -> Result<AppliedResult, RemoteError> {
        Err(RemoteError::Transient("remote sync is disabled".to_string()))
    }
}

pub struct AppContext {
    pub config: SurveyConfig,
    pub engine: Arc<SyncEngine>,
    pub service: SurveyService,
    /// `None` when remote sync is disabled
    pub backend: Option<Arc<dyn RemoteBackend>>,
}

impl AppContext {
    pub async fn build(config: SurveyConfig) -> anyhow::Result<Self> {
        let db = LocalDatabase::new(LocalDbConfig {
            db_path: config.database.path.to_string_lossy().into_owned(),
            max_connections: config.database.max_connections,
            enable_wal: config.database.enable_wal,
        })
        .await
        .with_context(|| format!("opening {}", config.database.path.display()))?;

        let timeout = Duration::from_secs(config.remote.request_timeout_secs);
        let (backend, adapter): (Option<Arc<dyn RemoteBackend>>, Arc<dyn RemoteAdapter>) =
            if config.remote.enabled {
                let backend: Arc<dyn RemoteBackend> = Arc::new(RestBackend::new(RestConfig {
                    base_url: config.remote.base_url.clone(),
                    api_key: config.remote.api_key.clone(),
                    access_token: config.remote.access_token.clone(),
                    timeout,
                })?);
                let adapter = StoreAdapter::new(
                    backend.clone(),
                    config.remote.photo_bucket.clone(),
                    timeout,
                );
                (Some(backend), Arc::new(adapter))
            } else {
                tracing::warn!("Remote sync disabled; entries will stay queued");
                (None, Arc::new(DisabledRemote))
            };

        let sync = &config.sync;
        let policy = RetryPolicy {
            base: Duration::from_secs(sync.backoff_base_secs),
            max: Duration::from_secs(sync.backoff_max_secs),
            error_threshold: sync.error_threshold,
        };
        let settings = EngineSettings {
            drain_interval: Duration::from_secs(sync.drain_interval_secs),
            online_debounce: Duration::from_millis(sync.online_debounce_ms),
        };

        let engine = Arc::new(SyncEngine::new(
            db,
            adapter,
            Arc::new(ConnectivityMonitor::new(false)),
            policy,
            settings,
        ));
        let service = SurveyService::new(engine.clone());

        Ok(Self {
            config,
            engine,
            service,
            backend,
        })
    }

    /// Ping the remote once and record the result on the monitor
    pub async fn probe_once(&self) -> bool {
        let reachable = match &self.backend {
            Some(backend) => backend.ping().await.is_ok(),
            None => false,
        };
        self.engine.connectivity().set_online(reachable);
        reachable
    }
}
