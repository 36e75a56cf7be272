//! In-memory remote store and engine wiring shared by the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use survey_sync::{
    ConnectivityMonitor, EngineSettings, LocalDatabase, RemoteBackend, RemoteError, RetryPolicy,
    StoreAdapter, SurveyService, SyncEngine,
};
use tokio::sync::Notify;

pub const PHOTO_BUCKET: &str = "household-photos";

/// Remote row/object store held in memory, with failure injection
#[derive(Default)]
pub struct FakeRemote {
    tables: Mutex<HashMap<String, HashMap<String, Value>>>,
    objects: Mutex<HashMap<String, Vec<u8>>>,
    calls: Mutex<Vec<String>>,
    failing_ids: Mutex<HashSet<String>>,
    failing_delete_tables: Mutex<HashSet<String>>,
    fail_uploads: AtomicBool,
    hold_upserts: AtomicBool,
    pub upsert_entered: Notify,
    pub upsert_release: Notify,
}

impl FakeRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn row(&self, table: &str, id: &str) -> Option<Value> {
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .and_then(|rows| rows.get(id))
            .cloned()
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .map_or(0, HashMap::len)
    }

    pub fn object(&self, path: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(path).cloned()
    }

    /// Calls in the order they reached the store, e.g. `upsert:households:<id>`
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn fail_id(&self, id: &str) {
        self.failing_ids.lock().unwrap().insert(id.to_string());
    }

    /// Reject every delete against `table` with a transient error
    pub fn fail_deletes_in(&self, table: &str) {
        self.failing_delete_tables
            .lock()
            .unwrap()
            .insert(table.to_string());
    }

    pub fn set_fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }

    /// Make every upsert wait for `upsert_release`
    pub fn set_hold_upserts(&self, hold: bool) {
        self.hold_upserts.store(hold, Ordering::SeqCst);
    }
}

#[async_trait]
impl RemoteBackend for FakeRemote {
    async fn upsert(&self, table: &str, row: Value) -> Result<(), RemoteError> {
        if self.hold_upserts.load(Ordering::SeqCst) {
            self.upsert_entered.notify_one();
            self.upsert_release.notified().await;
        }

        let id = row
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| RemoteError::Rejected {
                status: 400,
                message: "missing id".to_string(),
            })?
            .to_string();

        if self.failing_ids.lock().unwrap().contains(&id) {
            return Err(RemoteError::Transient("injected failure".to_string()));
        }

        self.calls
            .lock()
            .unwrap()
            .push(format!("upsert:{}:{}", table, id));
        self.tables
            .lock()
            .unwrap()
            .entry(table.to_string())
            .or_default()
            .insert(id, row);
        Ok(())
    }

    async fn delete(&self, table: &str, id: &str) -> Result<(), RemoteError> {
        if self.failing_delete_tables.lock().unwrap().contains(table) {
            return Err(RemoteError::Transient("injected delete failure".to_string()));
        }
        self.calls
            .lock()
            .unwrap()
            .push(format!("delete:{}:{}", table, id));
        if let Some(rows) = self.tables.lock().unwrap().get_mut(table) {
            rows.remove(id);
        }
        Ok(())
    }

    async fn upload_object(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        _content_type: &str,
    ) -> Result<(), RemoteError> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(RemoteError::Transient("upload interrupted".to_string()));
        }
        self.calls
            .lock()
            .unwrap()
            .push(format!("upload:{}/{}", bucket, path));
        self.objects.lock().unwrap().insert(path.to_string(), bytes);
        Ok(())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("https://storage.test/{}/{}", bucket, path)
    }

    async fn ping(&self) -> Result<(), RemoteError> {
        Ok(())
    }
}

pub struct Harness {
    pub remote: Arc<FakeRemote>,
    pub engine: Arc<SyncEngine>,
    pub service: SurveyService,
}

impl Harness {
    pub async fn new(online: bool) -> Self {
        Self::with_settings(online, EngineSettings::default()).await
    }

    pub async fn with_settings(online: bool, settings: EngineSettings) -> Self {
        let remote = FakeRemote::new();
        let db = LocalDatabase::in_memory().await.unwrap();
        let adapter = StoreAdapter::new(remote.clone(), PHOTO_BUCKET, Duration::from_secs(5));
        let engine = Arc::new(SyncEngine::new(
            db,
            Arc::new(adapter),
            Arc::new(ConnectivityMonitor::new(online)),
            RetryPolicy::immediate(),
            settings,
        ));
        let service = SurveyService::new(engine.clone());

        Self {
            remote,
            engine,
            service,
        }
    }
}
