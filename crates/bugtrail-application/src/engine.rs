//! Engine facade: builds every component, registers the default background
//! tasks and routes host signals.

use crate::records::StoreRecordRepository;
use crate::scheduler::{TaskScheduler, task_action};
use crate::sync::{SyncEngine, SyncWorker};
use bugtrail_core::sync::{RemoteStore, SnapshotSource, SyncJob, SyncQueue, SyncStatusTracker};
use bugtrail_core::task::{TaskPriority, TaskSpec, TaskType};
use bugtrail_core::{EventBus, HostSignal, RecordRepository, Result};
use bugtrail_infrastructure::storage::{StorageTier, StoreOptions, TierSet, TieredStore};
use bugtrail_infrastructure::{EngineConfig, HttpRemoteStore, InMemoryRemoteStore, QuotaGuard};
use std::sync::Arc;

pub const SYNC_TASK_ID: &str = "sync";
pub const CLEANUP_TASK_ID: &str = "cleanup";
pub const TELEMETRY_TASK_ID: &str = "telemetry";

/// Every component of a running engine, wired together.
pub struct Engine {
    store: Arc<TieredStore>,
    events: EventBus,
    repository: Arc<StoreRecordRepository>,
    quota: Arc<QuotaGuard>,
    tracker: Arc<SyncStatusTracker>,
    worker: Arc<SyncWorker>,
    scheduler: TaskScheduler,
}

impl Engine {
    /// Opens the durable tiers under the configured data directory and talks
    /// to the configured remote. Without a remote URL, sync goes to an
    /// in-process store.
    pub async fn open(config: EngineConfig) -> Result<Self> {
        let data_dir = config.resolved_data_dir()?;
        tracing::info!("[Engine] Opening data directory {:?}", data_dir);
        let tiers = TierSet::open(&data_dir, &config.storage);

        let remote: Arc<dyn RemoteStore> = match HttpRemoteStore::from_config(&config.remote) {
            Some(remote) => Arc::new(remote),
            None => {
                tracing::warn!("[Engine] No remote configured, sync stays in-process");
                Arc::new(InMemoryRemoteStore::new())
            }
        };

        Self::with_parts(&config, tiers, remote).await
    }

    /// Builds an engine over explicit tiers and remote store.
    pub async fn with_parts(
        config: &EngineConfig,
        tiers: TierSet,
        remote: Arc<dyn RemoteStore>,
    ) -> Result<Self> {
        let store = Arc::new(TieredStore::new(tiers));
        let events = EventBus::new();
        let repository = Arc::new(StoreRecordRepository::new(store.clone(), events.clone()));
        let quota = Arc::new(QuotaGuard::new(store.clone(), events.clone()));

        let tracker = Arc::new(SyncStatusTracker::new());
        let sync = Arc::new(SyncEngine::new(remote, tracker.clone()));
        let snapshot: Arc<dyn SnapshotSource> = repository.clone();
        sync.attach_snapshot(&snapshot);
        let worker = SyncWorker::spawn(sync);
        repository.attach_sync(worker.clone());

        let engine = Self {
            store,
            events,
            repository,
            quota,
            tracker,
            worker,
            scheduler: TaskScheduler::new(),
        };
        engine.register_default_tasks(config).await?;
        tracing::info!("[Engine] Ready");
        Ok(engine)
    }

    async fn register_default_tasks(&self, config: &EngineConfig) -> Result<()> {
        let intervals = &config.scheduler;

        let repository = self.repository.clone();
        let worker = self.worker.clone();
        self.scheduler
            .register_task(
                TaskSpec::new(SYNC_TASK_ID, TaskType::Sync, TaskPriority::High)
                    .every(intervals.sync_interval()),
                task_action(move || {
                    let repository = repository.clone();
                    let worker = worker.clone();
                    async move {
                        let settings = repository.get_settings().await?;
                        if settings.sync_enabled && worker.is_online() {
                            worker.engine().resync_all().await?;
                        }
                        Ok(())
                    }
                }),
            )
            .await?;

        let store = self.store.clone();
        let repository = self.repository.clone();
        let quota = self.quota.clone();
        self.scheduler
            .register_task(
                TaskSpec::new(CLEANUP_TASK_ID, TaskType::Cleanup, TaskPriority::Medium)
                    .every(intervals.cleanup_interval()),
                task_action(move || {
                    let store = store.clone();
                    let repository = repository.clone();
                    let quota = quota.clone();
                    async move {
                        let mut purged = 0;
                        for tier in StorageTier::ALL {
                            purged += store.purge_expired(tier).await?;
                        }
                        let evicted = RecordRepository::cleanup_storage(repository.as_ref()).await?;
                        let settings = repository.get_settings().await?;
                        quota.check_quota(&settings, repository.as_ref()).await?;
                        tracing::info!(
                            "[Engine] Cleanup purged {} expired item(s), evicted {} session(s)",
                            purged,
                            evicted
                        );
                        Ok(())
                    }
                }),
            )
            .await?;

        let store = self.store.clone();
        let repository = self.repository.clone();
        let tracker = self.tracker.clone();
        self.scheduler
            .register_task(
                TaskSpec::new(TELEMETRY_TASK_ID, TaskType::Telemetry, TaskPriority::Low)
                    .every(intervals.telemetry_interval()),
                task_action(move || {
                    let store = store.clone();
                    let repository = repository.clone();
                    let tracker = tracker.clone();
                    async move {
                        let sessions = repository.get_sessions().await?;
                        let issues: usize = sessions.iter().map(|s| s.issue_count).sum();
                        let local_bytes = store.size(StoreOptions::tier(StorageTier::DurableLocal)).await?;
                        let sync = tracker.snapshot();
                        tracing::info!(
                            sessions = sessions.len(),
                            issues,
                            local_bytes,
                            sync_status = ?sync.status,
                            pending_changes = sync.pending_changes,
                            "[Engine] Usage report"
                        );
                        Ok(())
                    }
                }),
            )
            .await?;

        Ok(())
    }

    /// Routes a host signal: connectivity goes to sync, activity and
    /// lifecycle go to the scheduler.
    pub async fn handle_host_signal(&self, signal: HostSignal) -> Result<()> {
        tracing::debug!("[Engine] Host signal {:?}", signal);
        match signal {
            HostSignal::Online => {
                self.worker.engine().set_online();
                if self.repository.get_settings().await?.sync_enabled {
                    self.worker.enqueue(SyncJob::ResyncAll);
                }
            }
            HostSignal::Offline => self.worker.engine().set_offline(),
            HostSignal::Idle | HostSignal::Locked => self.scheduler.on_idle().await,
            HostSignal::Active => self.scheduler.on_active().await,
            HostSignal::Suspend => self.scheduler.suspend().await,
            HostSignal::Resume => self.scheduler.resume().await,
        }
        Ok(())
    }

    pub fn repository(&self) -> &Arc<StoreRecordRepository> {
        &self.repository
    }

    pub fn store(&self) -> &Arc<TieredStore> {
        &self.store
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn quota(&self) -> &Arc<QuotaGuard> {
        &self.quota
    }

    pub fn sync_status(&self) -> &Arc<SyncStatusTracker> {
        &self.tracker
    }

    pub fn sync_engine(&self) -> &Arc<SyncEngine> {
        self.worker.engine()
    }

    pub fn scheduler(&self) -> &TaskScheduler {
        &self.scheduler
    }

    /// Waits until every queued sync job has been handled.
    pub async fn flush_sync(&self) {
        self.worker.flush().await;
    }

    /// Drains pending sync work and stops every background task.
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
        self.worker.shutdown().await;
        tracing::info!("[Engine] Shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::TaskOutcome;
    use bugtrail_core::sync::SyncStatus;
    use bugtrail_infrastructure::StorageConfig;
    use tempfile::TempDir;

    async fn in_memory_engine() -> (Engine, Arc<InMemoryRemoteStore>) {
        let remote = Arc::new(InMemoryRemoteStore::new());
        let engine = Engine::with_parts(
            &EngineConfig::default(),
            TierSet::in_memory(&StorageConfig::default()),
            remote.clone(),
        )
        .await
        .unwrap();
        (engine, remote)
    }

    #[tokio::test]
    async fn test_default_tasks_registered() {
        let (engine, _) = in_memory_engine().await;
        let ids: Vec<String> = engine
            .scheduler()
            .tasks()
            .await
            .into_iter()
            .map(|info| info.spec.id)
            .collect();
        assert_eq!(ids, vec![SYNC_TASK_ID, CLEANUP_TASK_ID, TELEMETRY_TASK_ID]);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_default_tasks_complete() {
        let (engine, _) = in_memory_engine().await;
        engine
            .repository()
            .create_session("https://a", Default::default())
            .await
            .unwrap();
        for id in [SYNC_TASK_ID, CLEANUP_TASK_ID, TELEMETRY_TASK_ID] {
            assert_eq!(
                engine.scheduler().execute_task(id).await.unwrap(),
                TaskOutcome::Completed,
                "task {}",
                id
            );
        }
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_connectivity_signals_reach_sync() {
        let (engine, _) = in_memory_engine().await;
        engine.handle_host_signal(HostSignal::Offline).await.unwrap();
        assert_eq!(engine.sync_status().status(), SyncStatus::Offline);
        assert!(!engine.sync_engine().is_online());

        engine.handle_host_signal(HostSignal::Online).await.unwrap();
        engine.flush_sync().await;
        assert_eq!(engine.sync_status().status(), SyncStatus::Synced);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_open_on_disk() {
        let dir = TempDir::new().unwrap();
        let config = EngineConfig {
            data_dir: Some(dir.path().to_path_buf()),
            ..EngineConfig::default()
        };

        let session_id = {
            let engine = Engine::open(config.clone()).await.unwrap();
            let session = engine
                .repository()
                .create_session("https://a", Default::default())
                .await
                .unwrap();
            engine.shutdown().await;
            session.meta.id
        };

        let engine = Engine::open(config).await.unwrap();
        let current = engine
            .repository()
            .get_current_session()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(current.meta.id, session_id);
        engine.shutdown().await;
    }
}
