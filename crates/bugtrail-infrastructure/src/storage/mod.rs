//! Tiered key/value store.
//!
//! Four tiers share one contract. Each item is serialized to JSON, optionally
//! gzip-compressed and AES-256-GCM encrypted, and written together with its
//! [`ItemMetadata`] in a single backend write.
//!
//! Expiration is lazy: an expired item keeps occupying space until it is
//! next read (or until [`TieredStore::purge_expired`] is called explicitly).

pub mod backend;
pub mod codec;
pub mod dir;
pub mod memory;
pub mod tiered;

pub use backend::{BackendCapabilities, BackendLimits, ItemMetadata, RawEntry, StorageBackend};
pub use dir::DirBackend;
pub use memory::MemoryBackend;
pub use tiered::{TierSet, TieredStore};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// A backing store with its own persistence and size characteristics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorageTier {
    /// Lives for the current process only
    Ephemeral,
    /// Durable on this device
    DurableLocal,
    /// Small, synced across devices; cannot enumerate keys or report usage
    Roaming,
    /// Large document store
    Indexed,
}

impl StorageTier {
    pub const ALL: [StorageTier; 4] = [
        StorageTier::Ephemeral,
        StorageTier::DurableLocal,
        StorageTier::Roaming,
        StorageTier::Indexed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StorageTier::Ephemeral => "ephemeral",
            StorageTier::DurableLocal => "durable-local",
            StorageTier::Roaming => "roaming",
            StorageTier::Indexed => "indexed",
        }
    }
}

impl fmt::Display for StorageTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-call options: which tier, which transforms, how long to live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    pub tier: StorageTier,
    pub compress: bool,
    pub encrypt: bool,
    pub ttl: Option<Duration>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self::tier(StorageTier::DurableLocal)
    }
}

impl StoreOptions {
    pub fn tier(tier: StorageTier) -> Self {
        Self {
            tier,
            compress: false,
            encrypt: false,
            ttl: None,
        }
    }

    pub fn compressed(mut self) -> Self {
        self.compress = true;
        self
    }

    pub fn encrypted(mut self) -> Self {
        self.encrypt = true;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_names() {
        let names: Vec<_> = StorageTier::ALL.iter().map(|t| t.to_string()).collect();
        assert_eq!(names, ["ephemeral", "durable-local", "roaming", "indexed"]);
        assert_eq!(
            serde_json::to_string(&StorageTier::DurableLocal).unwrap(),
            "\"durable-local\""
        );
    }

    #[test]
    fn test_options_builder() {
        let opts = StoreOptions::tier(StorageTier::Indexed)
            .compressed()
            .encrypted()
            .with_ttl(Duration::from_secs(60));
        assert!(opts.compress && opts.encrypt);
        assert_eq!(opts.ttl, Some(Duration::from_secs(60)));
        assert_eq!(StoreOptions::default().tier, StorageTier::DurableLocal);
    }
}
