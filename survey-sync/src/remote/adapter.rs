//! Queue entry to remote call mapping

use super::{AppliedResult, RemoteAdapter, RemoteBackend};
use crate::error::RemoteError;
use crate::models::{Collection, Operation, Photo};
use crate::queue::QueueEntry;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use serde_json::{Map, Value};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Fields that exist only on the device
const LOCAL_ONLY_FIELDS: [&str; 3] = ["sync_status", "last_modified", "blob_data"];

const PHOTO_CONTENT_TYPE: &str = "image/jpeg";

/// [`RemoteAdapter`] over a row/object store backend
pub struct StoreAdapter {
    backend: Arc<dyn RemoteBackend>,
    photo_bucket: String,
    call_timeout: Duration,
}

impl StoreAdapter {
    pub fn new(
        backend: Arc<dyn RemoteBackend>,
        photo_bucket: impl Into<String>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            photo_bucket: photo_bucket.into(),
            call_timeout,
        }
    }

    async fn bounded<T, F>(&self, call: F) -> Result<T, RemoteError>
    where
        F: Future<Output = Result<T, RemoteError>>,
    {
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Transient(format!(
                "remote call exceeded {:?}",
                self.call_timeout
            ))),
        }
    }

    /// Upload the photo blob (if still held locally) and return the
    /// fields the row and local record need afterwards
    async fn upload_photo(
        &self,
        entry: &QueueEntry,
        row: &mut Map<String, Value>,
        applied: &mut AppliedResult,
    ) -> Result<(), RemoteError> {
        let Some(encoded) = entry.payload.get("blob_data").and_then(Value::as_str) else {
            return Ok(());
        };

        let bytes = STANDARD.decode(encoded).map_err(|e| RemoteError::Rejected {
            status: 0,
            message: format!("photo blob is not valid base64: {}", e),
        })?;
        let household_id = entry.parent_household().ok_or_else(|| RemoteError::Rejected {
            status: 0,
            message: "photo has no household_id".to_string(),
        })?;

        let path = Photo::storage_path(household_id, entry.record_id);
        self.bounded(
            self.backend
                .upload_object(&self.photo_bucket, &path, bytes, PHOTO_CONTENT_TYPE),
        )
        .await?;

        let url = Value::String(self.backend.public_url(&self.photo_bucket, &path));
        row.insert("url".to_string(), url.clone());
        applied.write_back.insert("url".to_string(), url);
        applied.write_back.insert("blob_data".to_string(), Value::Null);
        Ok(())
    }
}

#[async_trait]
impl RemoteAdapter for StoreAdapter {
    async fn apply(&self, entry: &QueueEntry) -> Result<AppliedResult, RemoteError> {
        let table = entry.collection.as_str();

        if entry.operation == Operation::Delete {
            let id = entry.record_id.to_string();
            self.bounded(self.backend.delete(table, &id)).await?;
            return Ok(AppliedResult::default());
        }

        let mut row = match &entry.payload {
            Value::Object(map) => map.clone(),
            _ => {
                return Err(RemoteError::Rejected {
                    status: 0,
                    message: "queue payload is not an object".to_string(),
                })
            }
        };
        for field in LOCAL_ONLY_FIELDS {
            row.remove(field);
        }

        let mut applied = AppliedResult::default();
        match entry.collection {
            Collection::Households => {
                let synced_at = Value::String(Utc::now().to_rfc3339());
                row.insert("synced_at".to_string(), synced_at.clone());
                applied.write_back.insert("synced_at".to_string(), synced_at);
            }
            Collection::Photos => {
                // Without a stored object the row would point nowhere
                self.upload_photo(entry, &mut row, &mut applied).await?;
            }
            Collection::Individuals | Collection::Profiles => {}
        }

        self.bounded(self.backend.upsert(table, Value::Object(row)))
            .await?;

        tracing::debug!(
            entry_id = %entry.id,
            table,
            record_id = %entry.record_id,
            "Queue entry applied remotely"
        );
        Ok(applied)
    }
}
