//! Quota guard: compares store usage with its quota and reacts.

use crate::storage::TieredStore;
use bugtrail_core::storage::{QuotaReport, StorageCleanup};
use bugtrail_core::{EngineEvent, EventBus, Result, Settings, WarningSeverity};
use std::sync::Arc;

/// Usage fraction at which a warning escalates to critical.
pub const CRITICAL_THRESHOLD: f64 = 0.95;

pub struct QuotaGuard {
    store: Arc<TieredStore>,
    events: EventBus,
}

impl QuotaGuard {
    pub fn new(store: Arc<TieredStore>, events: EventBus) -> Self {
        Self { store, events }
    }

    /// Estimates usage and, above the configured threshold, warns and
    /// optionally runs eviction.
    ///
    /// Returns `None` when the store cannot estimate its usage.
    pub async fn check_quota(
        &self,
        settings: &Settings,
        cleanup: &dyn StorageCleanup,
    ) -> Result<Option<QuotaReport>> {
        let Some(report) = self.store.estimate().await? else {
            tracing::debug!("[QuotaGuard] No usage estimate available");
            return Ok(None);
        };

        let threshold = settings.storage_warning_threshold;
        if report.percent_used < threshold {
            return Ok(Some(report));
        }

        let severity = if report.percent_used >= CRITICAL_THRESHOLD {
            WarningSeverity::Critical
        } else {
            WarningSeverity::Warning
        };
        let message = format!(
            "Storage is {:.0}% full ({} of {} bytes used)",
            report.percent_used * 100.0,
            report.used,
            report.quota
        );
        tracing::warn!("[QuotaGuard] {}", message);
        self.events
            .emit(EngineEvent::StorageWarning { message, severity });

        if settings.auto_cleanup_enabled {
            let removed = cleanup.cleanup_storage().await?;
            tracing::info!("[QuotaGuard] Auto-cleanup removed {} session(s)", removed);
        }

        Ok(Some(report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::storage::{BackendLimits, StoreOptions, TierSet};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingCleanup {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl StorageCleanup for CountingCleanup {
        async fn cleanup_storage(&self) -> Result<usize> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(0)
        }
    }

    fn store_with_quota(quota: Option<u64>) -> Arc<TieredStore> {
        let mut config = StorageConfig::default();
        config.durable_local = BackendLimits {
            quota_bytes: quota,
            max_item_bytes: None,
        };
        Arc::new(TieredStore::new(TierSet::in_memory(&config)))
    }

    #[tokio::test]
    async fn test_below_threshold_is_quiet() {
        let store = store_with_quota(Some(1000));
        store.set("k", &"x".repeat(10), StoreOptions::default()).await.unwrap();
        let events = EventBus::new();
        let mut rx = events.subscribe();
        let cleanup = CountingCleanup::default();

        let report = QuotaGuard::new(store, events)
            .check_quota(&Settings::default(), &cleanup)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(report.used, 12);
        assert!(rx.try_recv().is_err());
        assert_eq!(cleanup.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_warning_triggers_cleanup() {
        let store = store_with_quota(Some(100));
        // 85 bytes of JSON
        store.set("k", &"x".repeat(83), StoreOptions::default()).await.unwrap();
        let events = EventBus::new();
        let mut rx = events.subscribe();
        let cleanup = CountingCleanup::default();

        QuotaGuard::new(store, events)
            .check_quota(&Settings::default(), &cleanup)
            .await
            .unwrap();

        match rx.try_recv().unwrap() {
            EngineEvent::StorageWarning { severity, .. } => {
                assert_eq!(severity, WarningSeverity::Warning)
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(cleanup.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_critical_without_auto_cleanup() {
        let store = store_with_quota(Some(100));
        store.set("k", &"x".repeat(96), StoreOptions::default()).await.unwrap();
        let events = EventBus::new();
        let mut rx = events.subscribe();
        let cleanup = CountingCleanup::default();
        let settings = Settings {
            auto_cleanup_enabled: false,
            ..Settings::default()
        };

        QuotaGuard::new(store, events)
            .check_quota(&settings, &cleanup)
            .await
            .unwrap();

        assert!(matches!(
            rx.try_recv().unwrap(),
            EngineEvent::StorageWarning {
                severity: WarningSeverity::Critical,
                ..
            }
        ));
        assert_eq!(cleanup.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_no_estimate_does_not_fire() {
        let store = store_with_quota(None);
        let cleanup = CountingCleanup::default();
        let report = QuotaGuard::new(store, EventBus::new())
            .check_quota(&Settings::default(), &cleanup)
            .await
            .unwrap();
        assert!(report.is_none());
    }
}
