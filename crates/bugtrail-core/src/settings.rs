//! User settings recognised by the storage engine.

use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_SESSIONS: usize = 10;
pub const DEFAULT_MAX_ISSUES_PER_SESSION: usize = 50;
pub const DEFAULT_WARNING_THRESHOLD: f64 = 0.8;

/// User-facing settings.
///
/// Every field is optional on the wire; missing fields take their default, so
/// a stored partial object is merged over the defaults on read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    /// Session cap enforced by eviction
    pub max_sessions_count: usize,
    /// Issue cap per session enforced by eviction
    pub max_issues_per_session: usize,
    /// Fraction (0-1) of quota above which a storage warning is emitted
    pub storage_warning_threshold: f64,
    pub auto_cleanup_enabled: bool,
    pub sync_enabled: bool,
    pub auto_tagging_enabled: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_sessions_count: DEFAULT_MAX_SESSIONS,
            max_issues_per_session: DEFAULT_MAX_ISSUES_PER_SESSION,
            storage_warning_threshold: DEFAULT_WARNING_THRESHOLD,
            auto_cleanup_enabled: true,
            sync_enabled: false,
            auto_tagging_enabled: false,
        }
    }
}

impl Settings {
    /// Clamps out-of-range values. Caps are at least one and the threshold is a
    /// fraction in `[0, 1]`.
    pub fn normalized(mut self) -> Self {
        self.max_sessions_count = self.max_sessions_count.max(1);
        self.max_issues_per_session = self.max_issues_per_session.max(1);
        self.storage_warning_threshold = if self.storage_warning_threshold.is_finite() {
            self.storage_warning_threshold.clamp(0.0, 1.0)
        } else {
            DEFAULT_WARNING_THRESHOLD
        };
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_partial_settings_merge_over_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{"maxSessionsCount": 3, "syncEnabled": true}"#).unwrap();

        assert_eq!(
            settings,
            Settings {
                max_sessions_count: 3,
                sync_enabled: true,
                ..Settings::default()
            }
        );
    }

    #[test]
    fn test_normalized_clamps() {
        let settings = Settings {
            max_sessions_count: 0,
            max_issues_per_session: 0,
            storage_warning_threshold: 4.2,
            ..Settings::default()
        }
        .normalized();

        assert_eq!(settings.max_sessions_count, 1);
        assert_eq!(settings.max_issues_per_session, 1);
        assert_eq!(settings.storage_warning_threshold, 1.0);

        let nan = Settings {
            storage_warning_threshold: f64::NAN,
            ..Settings::default()
        }
        .normalized();
        assert_eq!(nan.storage_warning_threshold, DEFAULT_WARNING_THRESHOLD);
    }
}
