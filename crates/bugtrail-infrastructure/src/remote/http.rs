//! REST implementation of [`RemoteStore`].
//!
//! Endpoints (all relative to `base_url`):
//!
//! | Operation        | Request                                   |
//! |------------------|-------------------------------------------|
//! | merge_document   | `PATCH  /v1/documents/{path}` JSON body   |
//! | get_document     | `GET    /v1/documents/{path}`             |
//! | delete_document  | `DELETE /v1/documents/{path}`             |
//! | list_collection  | `GET    /v1/collections/{path}`           |
//! | increment_field  | `POST   /v1/increments/{path}`            |
//! | upload_blob      | `PUT    /v1/blobs/{path}` raw body        |
//! | delete_blob      | `DELETE /v1/blobs/{path}`                 |

use crate::config::RemoteConfig;
use async_trait::async_trait;
use bugtrail_core::sync::RemoteStore;
use bugtrail_core::{BugtrailError, Result};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct CollectionResponse {
    ids: Vec<String>,
}

#[derive(Debug, Serialize)]
struct IncrementRequest<'a> {
    field: &'a str,
    delta: i64,
}

#[derive(Debug, Deserialize)]
struct BlobResponse {
    url: String,
}

/// Remote store over HTTP with bearer-token auth.
#[derive(Clone)]
pub struct HttpRemoteStore {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl HttpRemoteStore {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Self {
        let base_url: String = base_url.into();
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            timeout,
        }
    }

    /// Builds a store from config; `None` when no base URL is configured.
    pub fn from_config(config: &RemoteConfig) -> Option<Self> {
        let base_url = config.base_url.as_ref()?;
        Some(Self::new(
            base_url.clone(),
            config.api_key.clone(),
            config.timeout(),
        ))
    }

    fn url(&self, kind: &str, path: &str) -> String {
        format!("{}/v1/{}/{}", self.base_url, kind, path.trim_start_matches('/'))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.timeout(self.timeout);
        match &self.api_key {
            Some(api_key) => request.header("Authorization", format!("Bearer {}", api_key)),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> Result<Response> {
        self.authorize(request).send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                BugtrailError::NetworkUnavailable(format!("{}: {}", what, e))
            } else {
                BugtrailError::remote(0, format!("{}: {}", what, e))
            }
        })
    }

    async fn ensure_success(response: Response, what: &str) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        Err(BugtrailError::remote(
            status.as_u16(),
            format!("{} failed: {}", what, error_text),
        ))
    }

    async fn parse<T: serde::de::DeserializeOwned>(response: Response, what: &str) -> Result<T> {
        response.json::<T>().await.map_err(|e| BugtrailError::Serialization {
            format: "JSON".to_string(),
            message: format!("Failed to parse {} response: {}", what, e),
        })
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn merge_document(&self, path: &str, fields: Value) -> Result<()> {
        let request = self.client.patch(self.url("documents", path)).json(&fields);
        let response = self.send(request, "merge_document").await?;
        Self::ensure_success(response, "merge_document").await?;
        tracing::debug!("[HttpRemoteStore] Merged {}", path);
        Ok(())
    }

    async fn get_document(&self, path: &str) -> Result<Option<Value>> {
        let request = self.client.get(self.url("documents", path));
        let response = self.send(request, "get_document").await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = Self::ensure_success(response, "get_document").await?;
        Ok(Some(Self::parse(response, "get_document").await?))
    }

    async fn delete_document(&self, path: &str) -> Result<()> {
        let request = self.client.delete(self.url("documents", path));
        let response = self.send(request, "delete_document").await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Self::ensure_success(response, "delete_document").await?;
        Ok(())
    }

    async fn list_collection(&self, path: &str) -> Result<Vec<String>> {
        let request = self.client.get(self.url("collections", path));
        let response = self.send(request, "list_collection").await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let response = Self::ensure_success(response, "list_collection").await?;
        let body: CollectionResponse = Self::parse(response, "list_collection").await?;
        Ok(body.ids)
    }

    async fn increment_field(&self, path: &str, field: &str, delta: i64) -> Result<()> {
        let request = self
            .client
            .post(self.url("increments", path))
            .json(&IncrementRequest { field, delta });
        let response = self.send(request, "increment_field").await?;
        Self::ensure_success(response, "increment_field").await?;
        Ok(())
    }

    async fn upload_blob(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<String> {
        let len = bytes.len();
        let request = self
            .client
            .put(self.url("blobs", path))
            .header("Content-Type", content_type)
            .body(bytes);
        let response = self.send(request, "upload_blob").await?;
        let response = Self::ensure_success(response, "upload_blob").await?;
        let body: BlobResponse = Self::parse(response, "upload_blob").await?;
        tracing::debug!("[HttpRemoteStore] Uploaded blob {} ({} bytes)", path, len);
        Ok(body.url)
    }

    async fn delete_blob(&self, path: &str) -> Result<()> {
        let request = self.client.delete(self.url("blobs", path));
        let response = self.send(request, "delete_blob").await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Self::ensure_success(response, "delete_blob").await?;
        Ok(())
    }
}
