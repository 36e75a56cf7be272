//! Remote store seam
//!
//! [`RemoteBackend`] is the transport-level contract (row upserts, deletes,
//! object uploads). [`RemoteAdapter`] turns one [`QueueEntry`] into the
//! backend calls it needs and reports the fields to write back locally.

mod adapter;
mod rest;

pub use adapter::StoreAdapter;
pub use rest::{RestBackend, RestConfig};

use crate::error::RemoteError;
use crate::queue::QueueEntry;
use async_trait::async_trait;
use serde_json::{Map, Value};

/// Row and object operations against the remote store
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    /// Insert or update a row keyed by `id`
    async fn upsert(&self, table: &str, row: Value) -> Result<(), RemoteError>;

    async fn delete(&self, table: &str, id: &str) -> Result<(), RemoteError>;

    /// Store an object, overwriting any existing object at `path`
    async fn upload_object(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), RemoteError>;

    fn public_url(&self, bucket: &str, path: &str) -> String;

    /// Cheap reachability check
    async fn ping(&self) -> Result<(), RemoteError>;
}

/// Result of applying one queue entry remotely
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppliedResult {
    /// Fields to merge into the local record; `null` removes the field
    pub write_back: Map<String, Value>,
}

impl AppliedResult {
    pub fn with_field(mut self, key: &str, value: Value) -> Self {
        self.write_back.insert(key.to_string(), value);
        self
    }
}

/// Applies queue entries to the remote store
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteAdapter: Send + Sync {
    async fn apply(&self, entry: &QueueEntry) -> Result<AppliedResult, RemoteError>;
}
