//! The tiered store: codec, metadata, lazy expiration and ledger bookkeeping
//! on top of four [`StorageBackend`]s.

use super::backend::{BackendCapabilities, ItemMetadata, RawEntry, StorageBackend};
use super::codec::{self, Cipher};
use super::dir::DirBackend;
use super::memory::MemoryBackend;
use super::{StorageTier, StoreOptions};
use crate::config::StorageConfig;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bugtrail_core::storage::QuotaReport;
use bugtrail_core::{BugtrailError, Result};
use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use tokio::sync::Mutex;

/// Prefix shared by every key the store reserves for itself.
pub const RESERVED_PREFIX: &str = "__bugtrail";
const ENCRYPTION_KEY: &str = "__bugtrail_encryption_key";
const LEDGER_PREFIX: &str = "__bugtrail_ledger:";

fn is_reserved(key: &str) -> bool {
    key.starts_with(RESERVED_PREFIX)
}

/// The four backends, one per tier.
#[derive(Clone)]
pub struct TierSet {
    pub ephemeral: Arc<dyn StorageBackend>,
    pub durable_local: Arc<dyn StorageBackend>,
    pub roaming: Arc<dyn StorageBackend>,
    pub indexed: Arc<dyn StorageBackend>,
}

impl TierSet {
    /// All tiers in memory; roaming keeps its opaque capabilities.
    pub fn in_memory(config: &StorageConfig) -> Self {
        Self {
            ephemeral: Arc::new(MemoryBackend::new("ephemeral").with_limits(config.ephemeral)),
            durable_local: Arc::new(
                MemoryBackend::new("durable-local").with_limits(config.durable_local),
            ),
            roaming: Arc::new(
                MemoryBackend::new("roaming")
                    .with_limits(config.roaming)
                    .with_capabilities(BackendCapabilities::opaque()),
            ),
            indexed: Arc::new(MemoryBackend::new("indexed").with_limits(config.indexed)),
        }
    }

    /// Durable tiers as directories under `data_dir`; ephemeral stays in memory.
    pub fn open(data_dir: &Path, config: &StorageConfig) -> Self {
        Self {
            ephemeral: Arc::new(MemoryBackend::new("ephemeral").with_limits(config.ephemeral)),
            durable_local: Arc::new(
                DirBackend::new("durable-local", data_dir.join("local"))
                    .with_limits(config.durable_local),
            ),
            roaming: Arc::new(
                DirBackend::new("roaming", data_dir.join("roaming"))
                    .with_limits(config.roaming)
                    .with_capabilities(BackendCapabilities::opaque()),
            ),
            indexed: Arc::new(
                DirBackend::new("indexed", data_dir.join("indexed")).with_limits(config.indexed),
            ),
        }
    }

    pub fn get(&self, tier: StorageTier) -> &Arc<dyn StorageBackend> {
        match tier {
            StorageTier::Ephemeral => &self.ephemeral,
            StorageTier::DurableLocal => &self.durable_local,
            StorageTier::Roaming => &self.roaming,
            StorageTier::Indexed => &self.indexed,
        }
    }
}

/// Uniform key/value store over the four tiers.
pub struct TieredStore {
    tiers: TierSet,
    cipher: OnceLock<Cipher>,
    cipher_init: Mutex<()>,
    ledger_lock: Mutex<()>,
}

impl TieredStore {
    pub fn new(tiers: TierSet) -> Self {
        Self {
            tiers,
            cipher: OnceLock::new(),
            cipher_init: Mutex::new(()),
            ledger_lock: Mutex::new(()),
        }
    }

    pub fn backend(&self, tier: StorageTier) -> &Arc<dyn StorageBackend> {
        self.tiers.get(tier)
    }

    fn tracks_ledger(backend: &dyn StorageBackend) -> bool {
        let caps = backend.capabilities();
        !caps.enumerate || !caps.usage
    }

    /// Serializes, transforms and writes `value` under `key`.
    pub async fn set<T>(&self, key: &str, value: &T, options: StoreOptions) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let mut payload = serde_json::to_vec(value)?;
        if options.compress {
            payload = codec::gzip(&payload)?;
        }
        if options.encrypt {
            let cipher = self
                .cipher(true)
                .await?
                .ok_or_else(|| BugtrailError::Crypto("encryption key unavailable".to_string()))?;
            payload = cipher.encrypt(&payload)?;
        }

        let now = Utc::now();
        let expires_at = match options.ttl {
            Some(ttl) => Some(
                now + chrono::Duration::from_std(ttl)
                    .map_err(|e| BugtrailError::config(format!("invalid ttl: {e}")))?,
            ),
            None => None,
        };
        let metadata = ItemMetadata {
            timestamp: now,
            expires_at,
            encrypted: options.encrypt,
            compressed: options.compress,
            size: payload.len() as u64,
        };
        let size = metadata.size;

        let backend = self.tiers.get(options.tier);
        backend.write(key, RawEntry { metadata, payload }).await?;
        if Self::tracks_ledger(backend.as_ref()) {
            self.ledger_update(options.tier, |ledger| {
                ledger.insert(key.to_string(), size);
            })
            .await?;
        }

        tracing::debug!(
            "[TieredStore] set {} in {} ({} bytes, compressed={}, encrypted={})",
            key,
            options.tier,
            size,
            options.compress,
            options.encrypt
        );
        Ok(())
    }

    /// Reads and decodes the value under `key`.
    ///
    /// Expired items are deleted and reported absent. Items that fail to
    /// decode at any step are reported absent as well.
    pub async fn get<T>(&self, key: &str, options: StoreOptions) -> Result<Option<T>>
    where
        T: DeserializeOwned,
    {
        let backend = self.tiers.get(options.tier);
        let entry = match backend.read(key).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                tracing::debug!("[TieredStore] miss {} in {}", key, options.tier);
                return Ok(None);
            }
            Err(e) if e.is_decode() => {
                tracing::warn!("[TieredStore] Unreadable item {} in {}: {}", key, options.tier, e);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        if entry.metadata.is_expired(Utc::now()) {
            tracing::debug!("[TieredStore] {} in {} expired, removing", key, options.tier);
            self.remove(key, options).await?;
            return Ok(None);
        }

        if !entry.is_consistent() {
            tracing::warn!(
                "[TieredStore] Size mismatch for {} in {}: metadata says {}, payload has {}",
                key,
                options.tier,
                entry.metadata.size,
                entry.payload.len()
            );
            return Ok(None);
        }

        match self.decode(entry).await {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                tracing::warn!("[TieredStore] Failed to decode {} in {}: {}", key, options.tier, e);
                Ok(None)
            }
        }
    }

    async fn decode<T: DeserializeOwned>(&self, entry: RawEntry) -> Result<T> {
        let mut payload = entry.payload;
        if entry.metadata.encrypted {
            let cipher = self
                .cipher(false)
                .await?
                .ok_or_else(|| BugtrailError::Crypto("no encryption key stored".to_string()))?;
            payload = cipher.decrypt(&payload)?;
        }
        if entry.metadata.compressed {
            payload = codec::gunzip(&payload)?;
        }
        serde_json::from_slice(&payload).map_err(|e| BugtrailError::decode(format!("json: {e}")))
    }

    pub async fn remove(&self, key: &str, options: StoreOptions) -> Result<()> {
        let backend = self.tiers.get(options.tier);
        backend.delete(key).await?;
        if Self::tracks_ledger(backend.as_ref()) {
            self.ledger_update(options.tier, |ledger| {
                ledger.remove(key);
            })
            .await?;
        }
        tracing::debug!("[TieredStore] removed {} from {}", key, options.tier);
        Ok(())
    }

    /// Removes every item of the tier. On durable-local, reserved keys
    /// (encryption key, ledgers) survive.
    pub async fn clear(&self, options: StoreOptions) -> Result<()> {
        let backend = self.tiers.get(options.tier);
        if options.tier == StorageTier::DurableLocal {
            for key in self.keys(options).await? {
                backend.delete(&key).await?;
            }
        } else {
            backend.clear().await?;
            if Self::tracks_ledger(backend.as_ref()) {
                self.ledger_update(options.tier, |ledger| ledger.clear()).await?;
            }
        }
        tracing::info!("[TieredStore] Cleared tier {}", options.tier);
        Ok(())
    }

    /// Lists user keys of the tier, falling back to the ledger when the tier
    /// cannot enumerate.
    pub async fn keys(&self, options: StoreOptions) -> Result<Vec<String>> {
        let backend = self.tiers.get(options.tier);
        let keys = match backend.keys().await? {
            Some(keys) => keys,
            None => self.load_ledger(options.tier).await?.into_keys().collect(),
        };
        let mut keys: Vec<String> = keys.into_iter().filter(|k| !is_reserved(k)).collect();
        keys.sort();
        Ok(keys)
    }

    /// Bytes held by the tier, falling back to the ledger when the tier
    /// cannot report usage.
    pub async fn size(&self, options: StoreOptions) -> Result<u64> {
        let backend = self.tiers.get(options.tier);
        match backend.usage().await? {
            Some(used) => Ok(used),
            None => Ok(self.load_ledger(options.tier).await?.values().sum()),
        }
    }

    /// Usage against quota for the durable-local tier, if it has a quota.
    pub async fn estimate(&self) -> Result<Option<QuotaReport>> {
        let backend = &self.tiers.durable_local;
        let Some(quota) = backend.limits().quota_bytes else {
            return Ok(None);
        };
        Ok(backend
            .usage()
            .await?
            .map(|used| QuotaReport::new(used, quota)))
    }

    /// Deletes every expired item of the tier, returning how many were removed.
    pub async fn purge_expired(&self, tier: StorageTier) -> Result<usize> {
        let options = StoreOptions::tier(tier);
        let backend = self.tiers.get(tier);
        let now = Utc::now();
        let mut purged = 0;

        for key in self.keys(options).await? {
            let expired = match backend.read(&key).await {
                Ok(Some(entry)) => entry.metadata.is_expired(now),
                Ok(None) => false,
                Err(e) if e.is_decode() => false,
                Err(e) => return Err(e),
            };
            if expired {
                self.remove(&key, options).await?;
                purged += 1;
            }
        }

        if purged > 0 {
            tracing::info!("[TieredStore] Purged {} expired item(s) from {}", purged, tier);
        }
        Ok(purged)
    }

    // ------------------------------------------------------------------
    // Reserved bookkeeping in durable-local
    // ------------------------------------------------------------------

    async fn read_plain<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.tiers.durable_local.read(key).await? {
            Some(entry) => Ok(Some(serde_json::from_slice(&entry.payload)?)),
            None => Ok(None),
        }
    }

    async fn write_plain<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let payload = serde_json::to_vec(value)?;
        let metadata = ItemMetadata {
            timestamp: Utc::now(),
            expires_at: None,
            encrypted: false,
            compressed: false,
            size: payload.len() as u64,
        };
        self.tiers
            .durable_local
            .write(key, RawEntry { metadata, payload })
            .await
    }

    fn ledger_key(tier: StorageTier) -> String {
        format!("{LEDGER_PREFIX}{}", tier.as_str())
    }

    async fn load_ledger(&self, tier: StorageTier) -> Result<HashMap<String, u64>> {
        match self.read_plain(&Self::ledger_key(tier)).await {
            Ok(ledger) => Ok(ledger.unwrap_or_default()),
            Err(e) if e.is_decode() => {
                tracing::warn!("[TieredStore] Ledger for {} unreadable, starting empty: {}", tier, e);
                Ok(HashMap::new())
            }
            Err(e) => Err(e),
        }
    }

    async fn ledger_update(
        &self,
        tier: StorageTier,
        f: impl FnOnce(&mut HashMap<String, u64>),
    ) -> Result<()> {
        let _guard = self.ledger_lock.lock().await;
        let mut ledger = self.load_ledger(tier).await?;
        f(&mut ledger);
        self.write_plain(&Self::ledger_key(tier), &ledger).await
    }

    /// Returns the process-wide cipher, loading the persisted key or, when
    /// `create` is set, generating and persisting a new one.
    async fn cipher(&self, create: bool) -> Result<Option<&Cipher>> {
        if let Some(cipher) = self.cipher.get() {
            return Ok(Some(cipher));
        }

        let _guard = self.cipher_init.lock().await;
        if let Some(cipher) = self.cipher.get() {
            return Ok(Some(cipher));
        }

        let cipher = match self.read_plain::<String>(ENCRYPTION_KEY).await? {
            Some(encoded) => {
                let key = STANDARD
                    .decode(encoded)
                    .map_err(|e| BugtrailError::Crypto(format!("stored key is not base64: {e}")))?;
                Cipher::from_key(&key)?
            }
            None if create => {
                let (cipher, key) = Cipher::generate();
                self.write_plain(ENCRYPTION_KEY, &STANDARD.encode(key)).await?;
                tracing::info!("[TieredStore] Generated new encryption key");
                cipher
            }
            None => return Ok(None),
        };

        let _ = self.cipher.set(cipher);
        Ok(self.cipher.get())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde::Deserialize;
    use std::time::Duration;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        title: String,
        tags: Vec<String>,
    }

    fn note() -> Note {
        Note {
            title: "checkout button misaligned".to_string(),
            tags: vec!["ui".to_string(), "css".to_string()],
        }
    }

    fn memory_store() -> TieredStore {
        TieredStore::new(TierSet::in_memory(&StorageConfig::default()))
    }

    #[tokio::test]
    async fn test_roundtrip_every_transform_and_tier() {
        let store = memory_store();
        for tier in StorageTier::ALL {
            for (compress, encrypt) in [(false, false), (true, false), (false, true), (true, true)] {
                let mut opts = StoreOptions::tier(tier);
                opts.compress = compress;
                opts.encrypt = encrypt;
                let key = format!("note:{compress}:{encrypt}");

                store.set(&key, &note(), opts).await.unwrap();
                let back: Option<Note> = store.get(&key, opts).await.unwrap();
                assert_eq!(back, Some(note()), "tier={tier} compress={compress} encrypt={encrypt}");
            }
        }
    }

    #[tokio::test]
    async fn test_read_follows_metadata_not_options() {
        let store = memory_store();
        let write = StoreOptions::default().compressed().encrypted();
        store.set("n", &note(), write).await.unwrap();

        let back: Option<Note> = store.get("n", StoreOptions::default()).await.unwrap();
        assert_eq!(back, Some(note()));
    }

    #[tokio::test]
    async fn test_encrypted_payload_is_opaque() {
        let store = memory_store();
        store
            .set("n", &note(), StoreOptions::default().encrypted())
            .await
            .unwrap();

        let raw = store.backend(StorageTier::DurableLocal).read("n").await.unwrap().unwrap();
        assert!(raw.metadata.encrypted);
        assert!(!String::from_utf8_lossy(&raw.payload).contains("checkout"));
    }

    #[tokio::test]
    async fn test_key_persists_across_instances() {
        let temp_dir = TempDir::new().unwrap();
        let config = StorageConfig::default();

        let store = TieredStore::new(TierSet::open(temp_dir.path(), &config));
        store
            .set("n", &note(), StoreOptions::default().encrypted())
            .await
            .unwrap();
        drop(store);

        let reopened = TieredStore::new(TierSet::open(temp_dir.path(), &config));
        let back: Option<Note> = reopened.get("n", StoreOptions::default()).await.unwrap();
        assert_eq!(back, Some(note()));
    }

    #[tokio::test]
    async fn test_lazy_expiration() {
        let store = memory_store();
        let opts = StoreOptions::tier(StorageTier::Ephemeral).with_ttl(Duration::from_millis(20));
        store.set("n", &note(), opts).await.unwrap();

        // Still present in the backend until accessed
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(store.backend(StorageTier::Ephemeral).read("n").await.unwrap().is_some());

        let back: Option<Note> = store.get("n", opts).await.unwrap();
        assert_eq!(back, None);
        assert!(store.backend(StorageTier::Ephemeral).read("n").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let store = memory_store();
        let short = StoreOptions::tier(StorageTier::Indexed).with_ttl(Duration::from_millis(10));
        store.set("old", &note(), short).await.unwrap();
        store
            .set("keep", &note(), StoreOptions::tier(StorageTier::Indexed))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(store.purge_expired(StorageTier::Indexed).await.unwrap(), 1);
        assert_eq!(
            store.keys(StoreOptions::tier(StorageTier::Indexed)).await.unwrap(),
            vec!["keep".to_string()]
        );
    }

    #[tokio::test]
    async fn test_corrupt_item_reads_as_absent() {
        let store = memory_store();
        store.set("good", &note(), StoreOptions::default()).await.unwrap();
        store
            .set("bad", &note(), StoreOptions::default().compressed())
            .await
            .unwrap();

        let backend = store.backend(StorageTier::DurableLocal);
        let mut raw = backend.read("bad").await.unwrap().unwrap();
        raw.payload = b"definitely not gzip".to_vec();
        raw.metadata.size = raw.payload.len() as u64;
        backend.write("bad", raw).await.unwrap();

        let bad: Option<Note> = store.get("bad", StoreOptions::default()).await.unwrap();
        let good: Option<Note> = store.get("good", StoreOptions::default()).await.unwrap();
        assert_eq!(bad, None);
        assert_eq!(good, Some(note()));
    }

    #[tokio::test]
    async fn test_size_mismatch_reads_as_absent() {
        let store = memory_store();
        store.set("n", &note(), StoreOptions::default()).await.unwrap();

        let backend = store.backend(StorageTier::DurableLocal);
        let mut raw = backend.read("n").await.unwrap().unwrap();
        raw.metadata.size += 1;
        backend.write("n", raw).await.unwrap();

        let back: Option<Note> = store.get("n", StoreOptions::default()).await.unwrap();
        assert_eq!(back, None);
    }

    #[tokio::test]
    async fn test_roaming_uses_ledger() {
        let store = memory_store();
        let roaming = StoreOptions::tier(StorageTier::Roaming);
        store.set("a", &"x", roaming).await.unwrap();
        store.set("b", &"yy", roaming).await.unwrap();

        assert_eq!(store.keys(roaming).await.unwrap(), vec!["a", "b"]);
        // "\"x\"" + "\"yy\""
        assert_eq!(store.size(roaming).await.unwrap(), 7);

        store.remove("a", roaming).await.unwrap();
        assert_eq!(store.keys(roaming).await.unwrap(), vec!["b"]);

        store.clear(roaming).await.unwrap();
        assert!(store.keys(roaming).await.unwrap().is_empty());
        assert_eq!(store.size(roaming).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reserved_keys_hidden_and_survive_clear() {
        let store = memory_store();
        let local = StoreOptions::default();
        store.set("user", &note(), local.encrypted()).await.unwrap();
        store
            .set("r", &1, StoreOptions::tier(StorageTier::Roaming))
            .await
            .unwrap();

        assert_eq!(store.keys(local).await.unwrap(), vec!["user"]);

        store.clear(local).await.unwrap();
        assert!(store.keys(local).await.unwrap().is_empty());
        // Ledger and key survived
        assert_eq!(
            store.keys(StoreOptions::tier(StorageTier::Roaming)).await.unwrap(),
            vec!["r"]
        );
        store.set("user", &note(), local.encrypted()).await.unwrap();
        let back: Option<Note> = store.get("user", local).await.unwrap();
        assert_eq!(back, Some(note()));
    }

    #[tokio::test]
    async fn test_estimate_reports_durable_local_usage() {
        let store = memory_store();
        store.set("n", &"abcd", StoreOptions::default()).await.unwrap();

        let report = store.estimate().await.unwrap().unwrap();
        assert_eq!(report.used, 6);
        assert_eq!(report.quota, StorageConfig::default().durable_local.quota_bytes.unwrap());
    }

    #[tokio::test]
    async fn test_capacity_error_propagates() {
        let mut config = StorageConfig::default();
        config.durable_local.max_item_bytes = Some(8);
        let store = TieredStore::new(TierSet::in_memory(&config));

        let err = store
            .set("n", &"much longer than eight bytes", StoreOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_capacity_exceeded());
    }
}
