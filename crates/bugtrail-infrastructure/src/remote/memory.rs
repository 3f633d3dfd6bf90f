//! In-process [`RemoteStore`] with merge semantics and failure injection.

use async_trait::async_trait;
use bugtrail_core::sync::RemoteStore;
use bugtrail_core::{BugtrailError, Result};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

/// A stored blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Remote store kept in memory.
///
/// Deleting a document does not delete documents nested under it, the same
/// way hosted document stores behave.
#[derive(Default)]
pub struct InMemoryRemoteStore {
    documents: RwLock<BTreeMap<String, Value>>,
    blobs: RwLock<HashMap<String, StoredBlob>>,
    failure: RwLock<Option<BugtrailError>>,
    operations: AtomicUsize,
}

impl InMemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following operation fail with `error` until cleared with `None`.
    pub async fn set_failure(&self, error: Option<BugtrailError>) {
        *self.failure.write().await = error;
    }

    pub async fn document(&self, path: &str) -> Option<Value> {
        self.documents.read().await.get(path).cloned()
    }

    pub async fn document_paths(&self) -> Vec<String> {
        self.documents.read().await.keys().cloned().collect()
    }

    pub async fn blob(&self, path: &str) -> Option<StoredBlob> {
        self.blobs.read().await.get(path).cloned()
    }

    pub async fn blob_count(&self) -> usize {
        self.blobs.read().await.len()
    }

    /// Number of operations attempted, including failed ones.
    pub fn operation_count(&self) -> usize {
        self.operations.load(Ordering::SeqCst)
    }

    async fn begin(&self) -> Result<()> {
        self.operations.fetch_add(1, Ordering::SeqCst);
        match &*self.failure.read().await {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn blob_url(path: &str) -> String {
        format!("memory://blobs/{}", path)
    }
}

/// Shallow merge: top-level fields of `incoming` replace those of `existing`.
fn merge(existing: &mut Value, incoming: Value) {
    match (existing, incoming) {
        (Value::Object(current), Value::Object(fields)) => {
            for (key, value) in fields {
                current.insert(key, value);
            }
        }
        (slot, incoming) => *slot = incoming,
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemoteStore {
    async fn merge_document(&self, path: &str, fields: Value) -> Result<()> {
        self.begin().await?;
        let mut documents = self.documents.write().await;
        match documents.get_mut(path) {
            Some(existing) => merge(existing, fields),
            None => {
                documents.insert(path.to_string(), fields);
            }
        }
        Ok(())
    }

    async fn get_document(&self, path: &str) -> Result<Option<Value>> {
        self.begin().await?;
        Ok(self.document(path).await)
    }

    async fn delete_document(&self, path: &str) -> Result<()> {
        self.begin().await?;
        self.documents.write().await.remove(path);
        Ok(())
    }

    async fn list_collection(&self, path: &str) -> Result<Vec<String>> {
        self.begin().await?;
        let prefix = format!("{}/", path.trim_end_matches('/'));
        let documents = self.documents.read().await;
        Ok(documents
            .keys()
            .filter_map(|key| key.strip_prefix(&prefix))
            .filter(|rest| !rest.is_empty() && !rest.contains('/'))
            .map(str::to_string)
            .collect())
    }

    async fn increment_field(&self, path: &str, field: &str, delta: i64) -> Result<()> {
        self.begin().await?;
        let mut documents = self.documents.write().await;
        let document = documents
            .entry(path.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        let Value::Object(fields) = document else {
            return Err(BugtrailError::remote(
                400,
                format!("{} is not an object document", path),
            ));
        };
        let current = fields.get(field).and_then(Value::as_i64).unwrap_or(0);
        fields.insert(field.to_string(), Value::from(current + delta));
        Ok(())
    }

    async fn upload_blob(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<String> {
        self.begin().await?;
        self.blobs.write().await.insert(
            path.to_string(),
            StoredBlob {
                bytes,
                content_type: content_type.to_string(),
            },
        );
        Ok(Self::blob_url(path))
    }

    async fn delete_blob(&self, path: &str) -> Result<()> {
        self.begin().await?;
        self.blobs.write().await.remove(path);
        Ok(())
    }
}
