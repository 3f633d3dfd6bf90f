//! Platform path resolution for Bugtrail files.
//!
//! ```text
//! ~/.config/bugtrail/
//! └── bugtrail.toml            # Engine configuration
//!
//! ~/.local/share/bugtrail/     # Data directory
//! ├── local/                   # durable-local tier
//! ├── roaming/                 # roaming tier
//! ├── indexed/                 # indexed tier
//! └── logs/
//!     └── bugtrail.log.YYYY-MM-DD
//! ```

use bugtrail_core::{BugtrailError, Result};
use std::path::PathBuf;

const APP_NAME: &str = "bugtrail";

/// Resolves Bugtrail directories for the current platform.
pub struct BugtrailPaths;

impl BugtrailPaths {
    /// Configuration directory (e.g. `~/.config/bugtrail`).
    pub fn config_dir() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join(APP_NAME))
            .ok_or_else(|| BugtrailError::config("Cannot determine config directory"))
    }

    /// Data directory (e.g. `~/.local/share/bugtrail`).
    pub fn data_dir() -> Result<PathBuf> {
        dirs::data_dir()
            .map(|dir| dir.join(APP_NAME))
            .ok_or_else(|| BugtrailError::config("Cannot determine data directory"))
    }

    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("bugtrail.toml"))
    }

    pub fn log_dir() -> Result<PathBuf> {
        Ok(Self::data_dir()?.join("logs"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_are_namespaced() {
        // Headless CI may lack a home directory; only check when resolvable
        if let Ok(config_file) = BugtrailPaths::config_file() {
            assert!(config_file.ends_with("bugtrail/bugtrail.toml"));
        }
        if let Ok(log_dir) = BugtrailPaths::log_dir() {
            assert!(log_dir.ends_with("bugtrail/logs"));
        }
    }
}
