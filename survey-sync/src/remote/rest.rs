//! HTTP backend for a PostgREST-style remote store with object storage

use super::RemoteBackend;
use crate::error::{RemoteError, SyncError, SyncResult};
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, Response};
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RestConfig {
    /// Project URL, e.g. `https://abc.example.co`
    pub base_url: String,
    pub api_key: String,
    /// Signed-in user's token; the api key is used when absent
    pub access_token: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct RestBackend {
    client: Client,
    config: RestConfig,
}

impl RestBackend {
    pub fn new(mut config: RestConfig) -> SyncResult<Self> {
        if config.base_url.trim().is_empty() {
            return Err(SyncError::Config("Remote base URL is empty".to_string()));
        }
        config.base_url = config.base_url.trim_end_matches('/').to_string();

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| SyncError::Config(format!("HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let token = self
            .config
            .access_token
            .as_deref()
            .unwrap_or(&self.config.api_key);
        request
            .header("apikey", self.config.api_key.as_str())
            .header(AUTHORIZATION, format!("Bearer {}", token))
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.config.base_url, table)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, RemoteError> {
        let response = self.authorize(request).send().await.map_err(send_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(RemoteError::from_status(status.as_u16(), body))
    }
}

fn send_error(err: reqwest::Error) -> RemoteError {
    if err.is_timeout() {
        RemoteError::Transient("request timed out".to_string())
    } else {
        RemoteError::Transient(err.to_string())
    }
}

#[async_trait]
impl RemoteBackend for RestBackend {
    async fn upsert(&self, table: &str, row: Value) -> Result<(), RemoteError> {
        let request = self
            .client
            .post(self.table_url(table))
            .query(&[("on_conflict", "id")])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&row);

        self.send(request).await?;
        tracing::debug!(table, "Row upserted remotely");
        Ok(())
    }

    async fn delete(&self, table: &str, id: &str) -> Result<(), RemoteError> {
        let request = self
            .client
            .delete(self.table_url(table))
            .query(&[("id", format!("eq.{}", id))]);

        self.send(request).await?;
        tracing::debug!(table, id, "Row deleted remotely");
        Ok(())
    }

    async fn upload_object(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), RemoteError> {
        let size = bytes.len();
        let request = self
            .client
            .post(format!(
                "{}/storage/v1/object/{}/{}",
                self.config.base_url, bucket, path
            ))
            .header(CONTENT_TYPE, content_type)
            .header("x-upsert", "true")
            .body(bytes);

        self.send(request).await?;
        tracing::debug!(bucket, path, size, "Object uploaded");
        Ok(())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.config.base_url, bucket, path
        )
    }

    async fn ping(&self) -> Result<(), RemoteError> {
        let request = self.client.head(format!("{}/rest/v1/", self.config.base_url));
        let response = self.authorize(request).send().await.map_err(send_error)?;

        // Any answer short of a server error means the store is reachable
        if response.status().is_server_error() {
            return Err(RemoteError::from_status(response.status().as_u16(), ""));
        }
        Ok(())
    }
}
