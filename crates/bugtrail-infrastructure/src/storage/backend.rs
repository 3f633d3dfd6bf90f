//! Raw key/value backends underneath the tiered store.

use async_trait::async_trait;
use bugtrail_core::{BugtrailError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-item metadata persisted together with every payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemMetadata {
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub encrypted: bool,
    #[serde(default)]
    pub compressed: bool,
    /// Stored payload length in bytes (after compression and encryption)
    pub size: u64,
}

impl ItemMetadata {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}

/// A payload and its metadata, always read and written as one unit.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEntry {
    pub metadata: ItemMetadata,
    pub payload: Vec<u8>,
}

impl RawEntry {
    /// Whether the recorded size matches the payload actually held.
    pub fn is_consistent(&self) -> bool {
        self.metadata.size == self.payload.len() as u64
    }
}

/// Byte limits enforced by a backend on write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendLimits {
    /// Total bytes the backend may hold
    pub quota_bytes: Option<u64>,
    /// Largest single payload the backend accepts
    pub max_item_bytes: Option<u64>,
}

impl BackendLimits {
    pub fn unlimited() -> Self {
        Self::default()
    }

    /// Rejects a write of `new_len` bytes replacing `old_len` bytes when the
    /// backend currently holds `used` bytes.
    pub fn check(&self, backend: &str, used: u64, old_len: u64, new_len: u64) -> Result<()> {
        if let Some(max_item) = self.max_item_bytes
            && new_len > max_item
        {
            return Err(BugtrailError::capacity_exceeded(backend, new_len, max_item));
        }
        if let Some(quota) = self.quota_bytes {
            let projected = used.saturating_sub(old_len).saturating_add(new_len);
            if projected > quota {
                let available = quota.saturating_sub(used.saturating_sub(old_len));
                return Err(BugtrailError::capacity_exceeded(backend, new_len, available));
            }
        }
        Ok(())
    }
}

/// What a backend exposes to callers beyond plain reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendCapabilities {
    /// Keys can be listed
    pub enumerate: bool,
    /// Current usage can be queried
    pub usage: bool,
}

impl BackendCapabilities {
    pub fn full() -> Self {
        Self {
            enumerate: true,
            usage: true,
        }
    }

    /// Write/read only; enumeration and usage must be tracked by the caller.
    pub fn opaque() -> Self {
        Self {
            enumerate: false,
            usage: false,
        }
    }
}

/// A raw key/value backend.
///
/// Implementations must persist metadata and payload atomically and must
/// enforce their [`BackendLimits`] on write by returning
/// [`BugtrailError::CapacityExceeded`].
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Short name used in logs and capacity errors.
    fn name(&self) -> &str;

    fn capabilities(&self) -> BackendCapabilities;

    fn limits(&self) -> BackendLimits;

    /// Reads an entry.
    ///
    /// A stored entry that cannot be decoded yields `Err(BugtrailError::Decode)`.
    async fn read(&self, key: &str) -> Result<Option<RawEntry>>;

    async fn write(&self, key: &str, entry: RawEntry) -> Result<()>;

    /// Deletes an entry. Deleting a missing key succeeds.
    async fn delete(&self, key: &str) -> Result<()>;

    async fn clear(&self) -> Result<()>;

    /// Lists keys, `None` when the backend cannot enumerate.
    async fn keys(&self) -> Result<Option<Vec<String>>>;

    /// Bytes in use, `None` when the backend cannot report usage.
    async fn usage(&self) -> Result<Option<u64>>;
}
