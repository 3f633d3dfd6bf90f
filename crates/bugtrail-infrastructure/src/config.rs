//! Engine configuration loaded from `bugtrail.toml`.
//!
//! Every field has a default, so a missing file or a partial file is valid.
//! A handful of environment variables override the file:
//!
//! - `BUGTRAIL_DATA_DIR`
//! - `BUGTRAIL_REMOTE_URL`
//! - `BUGTRAIL_REMOTE_API_KEY`

use crate::paths::BugtrailPaths;
use crate::storage::BackendLimits;
use bugtrail_core::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;

pub const ENV_DATA_DIR: &str = "BUGTRAIL_DATA_DIR";
pub const ENV_REMOTE_URL: &str = "BUGTRAIL_REMOTE_URL";
pub const ENV_REMOTE_API_KEY: &str = "BUGTRAIL_REMOTE_API_KEY";

/// Byte limits per tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub ephemeral: BackendLimits,
    pub durable_local: BackendLimits,
    pub roaming: BackendLimits,
    pub indexed: BackendLimits,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            ephemeral: BackendLimits {
                quota_bytes: Some(10 * MIB),
                max_item_bytes: None,
            },
            durable_local: BackendLimits {
                quota_bytes: Some(10 * MIB),
                max_item_bytes: Some(5 * MIB),
            },
            roaming: BackendLimits {
                quota_bytes: Some(100 * KIB),
                max_item_bytes: Some(8 * KIB),
            },
            indexed: BackendLimits {
                quota_bytes: Some(512 * MIB),
                max_item_bytes: None,
            },
        }
    }
}

/// Remote document/blob store endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            timeout_secs: 30,
        }
    }
}

impl RemoteConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Recurrence of the default background tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub sync_interval_secs: u64,
    pub cleanup_interval_secs: u64,
    pub telemetry_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sync_interval_secs: 5 * 60,
            cleanup_interval_secs: 60 * 60,
            telemetry_interval_secs: 15 * 60,
        }
    }
}

impl SchedulerConfig {
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn telemetry_interval(&self) -> Duration {
        Duration::from_secs(self.telemetry_interval_secs)
    }
}

/// Process-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Root of the durable tiers; platform data directory when unset.
    pub data_dir: Option<PathBuf>,
    /// Rolling log file directory; console only when unset.
    pub log_dir: Option<PathBuf>,
    pub storage: StorageConfig,
    pub remote: RemoteConfig,
    pub scheduler: SchedulerConfig,
}

impl EngineConfig {
    /// Loads a config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("[EngineConfig] {:?} not found, using defaults", path);
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        tracing::info!("[EngineConfig] Loaded {:?}", path);
        Ok(config)
    }

    /// Loads from the platform config file, then applies environment overrides.
    pub fn load_default() -> Result<Self> {
        let config = Self::load(&BugtrailPaths::config_file()?)?;
        Ok(config.with_overrides(|name| std::env::var(name).ok()))
    }

    /// Applies overrides from a variable lookup (normally the process environment).
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(dir) = non_empty(ENV_DATA_DIR) {
            self.data_dir = Some(PathBuf::from(dir));
        }
        if let Some(url) = non_empty(ENV_REMOTE_URL) {
            self.remote.base_url = Some(url);
        }
        if let Some(key) = non_empty(ENV_REMOTE_API_KEY) {
            self.remote.api_key = Some(key);
        }
        self
    }

    pub fn resolved_data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => BugtrailPaths::data_dir(),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = EngineConfig::load(&temp_dir.path().join("bugtrail.toml")).unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_partial_file_merges_over_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bugtrail.toml");
        std::fs::write(
            &path,
            r#"
data_dir = "/var/lib/bugtrail"

[remote]
base_url = "https://sync.example.com"

[storage.durable_local]
quota_bytes = 2048

[scheduler]
sync_interval_secs = 60
"#,
        )
        .unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.data_dir, Some(PathBuf::from("/var/lib/bugtrail")));
        assert_eq!(config.remote.base_url.as_deref(), Some("https://sync.example.com"));
        assert_eq!(config.remote.timeout_secs, 30);
        assert_eq!(config.storage.durable_local.quota_bytes, Some(2048));
        assert_eq!(config.storage.durable_local.max_item_bytes, None);
        assert_eq!(config.storage.roaming, StorageConfig::default().roaming);
        assert_eq!(config.scheduler.sync_interval(), Duration::from_secs(60));
        assert_eq!(config.scheduler.cleanup_interval_secs, 3600);
    }

    #[test]
    fn test_env_overrides() {
        let config = EngineConfig::default().with_overrides(|name| match name {
            ENV_DATA_DIR => Some("/tmp/bt".to_string()),
            ENV_REMOTE_URL => Some("  ".to_string()),
            ENV_REMOTE_API_KEY => Some("secret".to_string()),
            _ => None,
        });
        assert_eq!(config.data_dir, Some(PathBuf::from("/tmp/bt")));
        assert_eq!(config.remote.base_url, None);
        assert_eq!(config.remote.api_key.as_deref(), Some("secret"));
        assert_eq!(config.resolved_data_dir().unwrap(), PathBuf::from("/tmp/bt"));
    }

    #[test]
    fn test_save_then_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("bugtrail.toml");
        let mut config = EngineConfig::default();
        config.remote.api_key = Some("k".to_string());
        config.save(&path).unwrap();

        assert_eq!(EngineConfig::load(&path).unwrap(), config);
    }
}
