//! Background consumer of the sync queue.

use super::engine::SyncEngine;
use bugtrail_core::sync::{SyncJob, SyncQueue};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

enum WorkerMessage {
    Job(SyncJob),
    Flush(oneshot::Sender<()>),
}

/// Single consumer that feeds queued [`SyncJob`]s to the [`SyncEngine`] in
/// enqueue order.
///
/// Job failures are logged and dropped; the tracker already reflects them.
pub struct SyncWorker {
    engine: Arc<SyncEngine>,
    sender: mpsc::UnboundedSender<WorkerMessage>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SyncWorker {
    /// Spawns the consumer loop on the current runtime.
    pub fn spawn(engine: Arc<SyncEngine>) -> Arc<Self> {
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let loop_engine = engine.clone();
        let handle = tokio::spawn(async move {
            while let Some(message) = receiver.recv().await {
                match message {
                    WorkerMessage::Job(job) => {
                        let label = job.label();
                        if let Err(e) = loop_engine.handle_job(job).await {
                            tracing::warn!("[SyncWorker] Job {} failed: {}", label, e);
                        }
                    }
                    WorkerMessage::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
            tracing::debug!("[SyncWorker] Queue closed");
        });

        Arc::new(Self {
            engine,
            sender,
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    /// Waits until every job enqueued before this call has been handled.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.sender.send(WorkerMessage::Flush(done)).is_err() {
            return;
        }
        let _ = wait.await;
    }

    /// Drains the queue and stops the consumer.
    pub async fn shutdown(&self) {
        self.flush().await;
        let handle = match self.handle.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            handle.abort();
            tracing::info!("[SyncWorker] Stopped");
        }
    }
}

impl SyncQueue for SyncWorker {
    fn enqueue(&self, job: SyncJob) {
        if self.sender.send(WorkerMessage::Job(job)).is_err() {
            tracing::warn!("[SyncWorker] Queue closed, dropping job");
        }
    }

    fn is_online(&self) -> bool {
        self.engine.is_online()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bugtrail_core::session::{BrowserInfo, Issue, SessionMeta};
    use bugtrail_core::sync::{SyncStatus, SyncStatusTracker, layout};
    use bugtrail_infrastructure::InMemoryRemoteStore;

    fn worker() -> (Arc<SyncWorker>, Arc<InMemoryRemoteStore>) {
        let remote = Arc::new(InMemoryRemoteStore::new());
        let engine = Arc::new(SyncEngine::new(
            remote.clone(),
            Arc::new(SyncStatusTracker::new()),
        ));
        (SyncWorker::spawn(engine), remote)
    }

    #[tokio::test]
    async fn test_jobs_run_in_order_and_flush_waits() {
        let (worker, remote) = worker();
        let issue = Issue::new("x");
        let mut meta = SessionMeta::new("s1", "https://a", BrowserInfo::default());
        meta.issue_count = 1;

        worker.enqueue(SyncJob::SessionMeta(meta));
        worker.enqueue(SyncJob::Issue {
            session_id: "s1".to_string(),
            issue: issue.clone(),
        });
        worker.enqueue(SyncJob::DeleteIssue {
            session_id: "s1".to_string(),
            issue_id: issue.id.clone(),
        });
        worker.flush().await;

        assert!(remote
            .document(&layout::issue_doc("s1", &issue.id))
            .await
            .is_none());
        assert_eq!(remote.document("sessions/s1").await.unwrap()["issueCount"], 0);
        assert_eq!(worker.engine().tracker().status(), SyncStatus::Synced);
    }

    #[tokio::test]
    async fn test_shutdown_drops_later_jobs() {
        let (worker, remote) = worker();
        worker.shutdown().await;
        worker.enqueue(SyncJob::DeleteSession {
            session_id: "s1".to_string(),
        });
        worker.flush().await;
        tokio::task::yield_now().await;
        assert_eq!(remote.operation_count(), 0);
    }
}
