//! In-process backend used for the ephemeral tier.

use super::backend::{BackendCapabilities, BackendLimits, RawEntry, StorageBackend};
use async_trait::async_trait;
use bugtrail_core::Result;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// In-memory backend. Contents live as long as the process.
pub struct MemoryBackend {
    name: String,
    entries: RwLock<HashMap<String, RawEntry>>,
    limits: BackendLimits,
    capabilities: BackendCapabilities,
}

impl MemoryBackend {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: RwLock::new(HashMap::new()),
            limits: BackendLimits::unlimited(),
            capabilities: BackendCapabilities::full(),
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

    fn used(entries: &HashMap<String, RawEntry>) -> u64 {
        entries.values().map(|e| e.payload.len() as u64).sum()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
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
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn write(&self, key: &str, entry: RawEntry) -> Result<()> {
        let mut entries = self.entries.write().await;
        let old_len = entries.get(key).map_or(0, |e| e.payload.len() as u64);
        self.limits.check(
            &self.name,
            Self::used(&entries),
            old_len,
            entry.payload.len() as u64,
        )?;
        entries.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.entries.write().await.clear();
        Ok(())
    }

    async fn keys(&self) -> Result<Option<Vec<String>>> {
        if !self.capabilities.enumerate {
            return Ok(None);
        }
        Ok(Some(self.entries.read().await.keys().cloned().collect()))
    }

    async fn usage(&self) -> Result<Option<u64>> {
        if !self.capabilities.usage {
            return Ok(None);
        }
        Ok(Some(Self::used(&*self.entries.read().await)))
    }
}
