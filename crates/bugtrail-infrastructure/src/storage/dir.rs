//! Directory-backed storage: one file per key.
//!
//! File layout:
//!
//! ```text
//! [u32 big-endian header length][JSON ItemMetadata header][payload bytes]
//! ```
//!
//! Writes go to a temporary file in the same directory, are fsynced, and are
//! then renamed over the target, so a reader never sees metadata without
//! its payload.

use super::backend::{BackendCapabilities, BackendLimits, ItemMetadata, RawEntry, StorageBackend};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use bugtrail_core::{BugtrailError, Result};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

const HEADER_LEN_BYTES: usize = 4;
const TMP_SUFFIX: &str = ".tmp";

/// Stores each key as a file under `base_dir`.
pub struct DirBackend {
    name: String,
    base_dir: PathBuf,
    limits: BackendLimits,
    capabilities: BackendCapabilities,
    /// Payload size per key, built from a directory scan on first use.
    index: Mutex<Option<HashMap<String, u64>>>,
}

impl DirBackend {
    pub fn new(name: impl Into<String>, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            base_dir: base_dir.into(),
            limits: BackendLimits::unlimited(),
            capabilities: BackendCapabilities::full(),
            index: Mutex::new(None),
        }
    }

    pub fn with_limits(mut self, limits: BackendLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_capabilities(mut self, capabilities: BackendCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn file_name(key: &str) -> String {
        URL_SAFE_NO_PAD.encode(key.as_bytes())
    }

    fn key_from_file_name(name: &str) -> Option<String> {
        let bytes = URL_SAFE_NO_PAD.decode(name).ok()?;
        String::from_utf8(bytes).ok()
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.base_dir.join(Self::file_name(key))
    }

    fn encode(entry: &RawEntry) -> Result<Vec<u8>> {
        let header = serde_json::to_vec(&entry.metadata)?;
        let header_len = u32::try_from(header.len())
            .map_err(|_| BugtrailError::internal("metadata header too large"))?;
        let mut bytes = Vec::with_capacity(HEADER_LEN_BYTES + header.len() + entry.payload.len());
        bytes.extend_from_slice(&header_len.to_be_bytes());
        bytes.extend_from_slice(&header);
        bytes.extend_from_slice(&entry.payload);
        Ok(bytes)
    }

    fn decode(bytes: &[u8]) -> Result<RawEntry> {
        let len_bytes: [u8; HEADER_LEN_BYTES] = bytes
            .get(..HEADER_LEN_BYTES)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| BugtrailError::decode("truncated header length"))?;
        let header_len = u32::from_be_bytes(len_bytes) as usize;
        let header_end = HEADER_LEN_BYTES
            .checked_add(header_len)
            .filter(|end| *end <= bytes.len())
            .ok_or_else(|| BugtrailError::decode("truncated metadata header"))?;

        let metadata: ItemMetadata = serde_json::from_slice(&bytes[HEADER_LEN_BYTES..header_end])
            .map_err(|e| BugtrailError::decode(format!("invalid metadata header: {e}")))?;

        Ok(RawEntry {
            metadata,
            payload: bytes[header_end..].to_vec(),
        })
    }

    async fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.base_dir).await.map_err(|e| {
            BugtrailError::io(format!(
                "Failed to create storage directory {:?}: {}",
                self.base_dir, e
            ))
        })
    }

    /// Scans the directory and returns payload sizes per key.
    async fn scan(&self) -> Result<HashMap<String, u64>> {
        let mut sizes = HashMap::new();
        let mut dir = match fs::read_dir(&self.base_dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(sizes),
            Err(e) => return Err(e.into()),
        };

        while let Some(dirent) = dir.next_entry().await? {
            let file_name = dirent.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if file_name.ends_with(TMP_SUFFIX) {
                continue;
            }
            let Some(key) = Self::key_from_file_name(file_name) else {
                tracing::debug!("[DirBackend] Skipping foreign file: {}", file_name);
                continue;
            };
            match fs::read(dirent.path()).await.map_err(BugtrailError::from).and_then(|b| Self::decode(&b)) {
                Ok(entry) => {
                    sizes.insert(key, entry.payload.len() as u64);
                }
                Err(e) => {
                    tracing::warn!("[DirBackend] Unreadable entry {}: {}", file_name, e);
                    sizes.insert(key, 0);
                }
            }
        }
        Ok(sizes)
    }

    async fn with_index<R>(
        &self,
        f: impl FnOnce(&mut HashMap<String, u64>) -> R,
    ) -> Result<R> {
        let mut guard = self.index.lock().await;
        if guard.is_none() {
            *guard = Some(self.scan().await?);
        }
        match guard.as_mut() {
            Some(index) => Ok(f(index)),
            None => Err(BugtrailError::internal("size index unavailable")),
        }
    }

    async fn write_atomically(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| BugtrailError::io(format!("Path has no file name: {:?}", path)))?;
        let tmp_path = path.with_file_name(format!("{file_name}{TMP_SUFFIX}"));

        let mut tmp_file = fs::File::create(&tmp_path).await?;
        tmp_file.write_all(bytes).await?;
        tmp_file.sync_all().await?;
        drop(tmp_file);

        if let Err(e) = fs::rename(&tmp_path, path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(BugtrailError::io(format!(
                "Failed to rename {:?} to {:?}: {}",
                tmp_path, path, e
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for DirBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> BackendCapabilities {
        self.capabilities
    }

    fn limits(&self) -> BackendLimits {
        self.limits
    }

    async fn read(&self, key: &str) -> Result<Option<RawEntry>> {
        let bytes = match fs::read(self.path_for(key)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Self::decode(&bytes).map(Some)
    }

    async fn write(&self, key: &str, entry: RawEntry) -> Result<()> {
        self.ensure_dir().await?;

        // Hold the index lock across the write so concurrent writers see a
        // consistent usage figure.
        let mut guard = self.index.lock().await;
        if guard.is_none() {
            *guard = Some(self.scan().await?);
        }
        let index = guard
            .as_mut()
            .ok_or_else(|| BugtrailError::internal("size index unavailable"))?;

        let new_len = entry.payload.len() as u64;
        let old_len = index.get(key).copied().unwrap_or(0);
        let used: u64 = index.values().sum();
        self.limits.check(&self.name, used, old_len, new_len)?;

        let bytes = Self::encode(&entry)?;
        self.write_atomically(&self.path_for(key), &bytes).await?;
        index.insert(key.to_string(), new_len);

        tracing::debug!(
            "[DirBackend:{}] Wrote {} ({} bytes)",
            self.name,
            key,
            new_len
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.path_for(key)).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.with_index(|index| {
            index.remove(key);
        })
        .await
    }

    async fn clear(&self) -> Result<()> {
        match fs::remove_dir_all(&self.base_dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        *self.index.lock().await = Some(HashMap::new());
        tracing::info!("[DirBackend:{}] Cleared {:?}", self.name, self.base_dir);
        Ok(())
    }

    async fn keys(&self) -> Result<Option<Vec<String>>> {
        if !self.capabilities.enumerate {
            return Ok(None);
        }
        let keys = self.with_index(|index| index.keys().cloned().collect()).await?;
        Ok(Some(keys))
    }

    async fn usage(&self) -> Result<Option<u64>> {
        if !self.capabilities.usage {
            return Ok(None);
        }
        let used = self.with_index(|index| index.values().sum()).await?;
        Ok(Some(used))
    }
}
