//! Task scheduler with idle throttling and suspend/resume.
//!
//! Each recurring task gets its own timer loop (`interval_at` + a
//! `CancellationToken`). Loops hold the scheduler weakly, so dropping the
//! scheduler stops them at their next tick.

use super::error::SchedulerError;
use bugtrail_core::task::{TaskInfo, TaskPriority, TaskSpec, TaskType};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;

/// Async body of a task.
pub type TaskAction = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Wraps an async closure as a [`TaskAction`].
pub fn task_action<F, Fut>(f: F) -> TaskAction
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move || Box::pin(f()))
}

/// Result of one task run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    /// The body returned an error or panicked.
    Failed(String),
}

impl TaskOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

struct TaskEntry {
    spec: TaskSpec,
    action: TaskAction,
    last_run: Option<DateTime<Utc>>,
    timer: Option<CancellationToken>,
}

impl TaskEntry {
    fn info(&self) -> TaskInfo {
        TaskInfo {
            spec: self.spec.clone(),
            last_run: self.last_run,
            scheduled: self.timer.is_some(),
        }
    }

    fn cancel_timer(&mut self) {
        if let Some(token) = self.timer.take() {
            token.cancel();
        }
    }
}

#[derive(Default)]
struct SchedulerState {
    tasks: HashMap<String, TaskEntry>,
    idle: bool,
    suspended: bool,
    shut_down: bool,
}

struct Inner {
    state: Mutex<SchedulerState>,
    root: CancellationToken,
}

impl Inner {
    async fn execute(&self, task_id: &str) -> Result<TaskOutcome, SchedulerError> {
        let action = {
            let state = self.state.lock().await;
            let entry = state
                .tasks
                .get(task_id)
                .ok_or_else(|| SchedulerError::TaskNotFound(task_id.to_string()))?;
            entry.action.clone()
        };

        tracing::debug!("[Scheduler] Running task {}", task_id);
        let outcome = match tokio::spawn(action()).await {
            Ok(Ok(())) => TaskOutcome::Completed,
            Ok(Err(e)) => {
                tracing::error!("[Scheduler] Task {} failed: {:#}", task_id, e);
                TaskOutcome::Failed(e.to_string())
            }
            Err(e) => {
                tracing::error!("[Scheduler] Task {} aborted: {}", task_id, e);
                TaskOutcome::Failed(e.to_string())
            }
        };

        if let Some(entry) = self.state.lock().await.tasks.get_mut(task_id) {
            entry.last_run = Some(Utc::now());
        }
        Ok(outcome)
    }
}

/// First delay for a task's timer under the current activity state, or
/// `None` if the task should have no timer at all.
fn first_delay(spec: &TaskSpec, state: &SchedulerState) -> Option<Duration> {
    let interval = spec.interval.filter(|_| spec.is_recurring())?;
    if state.suspended || state.shut_down {
        return None;
    }
    if !state.idle {
        return Some(interval);
    }
    match spec.priority {
        TaskPriority::High => Some(interval),
        TaskPriority::Medium => Some(interval * 2),
        TaskPriority::Low => None,
    }
}

fn spawn_timer(
    inner: Weak<Inner>,
    root: &CancellationToken,
    task_id: String,
    first_delay: Duration,
    period: Duration,
) -> CancellationToken {
    let token = root.child_token();
    let loop_token = token.clone();
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + first_delay, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = loop_token.cancelled() => break,
                _ = ticker.tick() => {
                    let Some(inner) = inner.upgrade() else { break };
                    if let Err(e) = inner.execute(&task_id).await {
                        tracing::debug!("[Scheduler] Timer for {} stopping: {}", task_id, e);
                        break;
                    }
                }
            }
        }
    });
    token
}

/// Registry and timer owner for background tasks.
#[derive(Clone)]
pub struct TaskScheduler {
    inner: Arc<Inner>,
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskScheduler {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(SchedulerState::default()),
                root: CancellationToken::new(),
            }),
        }
    }

    /// Cancels and re-creates the timer of `task_id` for the current state.
    fn rearm(&self, state: &mut SchedulerState, task_id: &str) {
        let delay = match state.tasks.get(task_id) {
            Some(entry) => first_delay(&entry.spec, state),
            None => return,
        };
        let Some(entry) = state.tasks.get_mut(task_id) else {
            return;
        };
        entry.cancel_timer();
        if let (Some(delay), Some(period)) = (delay, entry.spec.interval) {
            entry.timer = Some(spawn_timer(
                Arc::downgrade(&self.inner),
                &self.inner.root,
                task_id.to_string(),
                delay,
                period,
            ));
        }
    }

    fn rearm_all(&self, state: &mut SchedulerState) {
        let ids: Vec<String> = state.tasks.keys().cloned().collect();
        for id in ids {
            self.rearm(state, &id);
        }
    }

    /// Registers a task, replacing (and cancelling the timer of) any task
    /// with the same id. Recurring tasks are armed immediately.
    pub async fn register_task(
        &self,
        spec: TaskSpec,
        action: TaskAction,
    ) -> Result<(), SchedulerError> {
        let mut state = self.inner.state.lock().await;
        if state.shut_down {
            return Err(SchedulerError::ShutDown);
        }
        let id = spec.id.clone();
        tracing::info!(
            "[Scheduler] Registered task {} ({:?}, {:?}, every {:?})",
            id,
            spec.task_type,
            spec.priority,
            spec.interval
        );
        let previous = state.tasks.insert(
            id.clone(),
            TaskEntry {
                spec,
                action,
                last_run: None,
                timer: None,
            },
        );
        if let Some(mut previous) = previous {
            previous.cancel_timer();
        }
        self.rearm(&mut state, &id);
        Ok(())
    }

    /// Removes a task and stops its timer. Returns whether it existed.
    pub async fn unregister_task(&self, task_id: &str) -> bool {
        match self.inner.state.lock().await.tasks.remove(task_id) {
            Some(mut entry) => {
                entry.cancel_timer();
                tracing::info!("[Scheduler] Unregistered task {}", task_id);
                true
            }
            None => false,
        }
    }

    /// Runs a task now, catching any failure in its body, and stamps `last_run`.
    pub async fn execute_task(&self, task_id: &str) -> Result<TaskOutcome, SchedulerError> {
        self.inner.execute(task_id).await
    }

    /// Runs every task of `task_type` one after another, high priority first.
    pub async fn execute_tasks_by_type(&self, task_type: &TaskType) -> Vec<(String, TaskOutcome)> {
        let mut specs: Vec<TaskSpec> = {
            let state = self.inner.state.lock().await;
            state
                .tasks
                .values()
                .filter(|entry| &entry.spec.task_type == task_type)
                .map(|entry| entry.spec.clone())
                .collect()
        };
        specs.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));

        let mut outcomes = Vec::with_capacity(specs.len());
        for spec in specs {
            // Unregistered meanwhile
            if let Ok(outcome) = self.inner.execute(&spec.id).await {
                outcomes.push((spec.id, outcome));
            }
        }
        outcomes
    }

    /// Host went idle or locked: low-priority timers stop, medium-priority
    /// timers wait twice their interval before the next run.
    pub async fn on_idle(&self) {
        let mut state = self.inner.state.lock().await;
        if state.idle {
            return;
        }
        state.idle = true;
        tracing::info!("[Scheduler] Host idle, throttling background tasks");
        let ids: Vec<String> = state
            .tasks
            .values()
            .filter(|entry| entry.spec.priority != TaskPriority::High)
            .map(|entry| entry.spec.id.clone())
            .collect();
        for id in ids {
            self.rearm(&mut state, &id);
        }
    }

    /// Host active again: every recurring task restarts at its own interval.
    pub async fn on_active(&self) {
        let mut state = self.inner.state.lock().await;
        state.idle = false;
        tracing::info!("[Scheduler] Host active, restoring task schedule");
        self.rearm_all(&mut state);
    }

    /// Stops every timer without unregistering anything.
    pub async fn suspend(&self) {
        let mut state = self.inner.state.lock().await;
        state.suspended = true;
        for entry in state.tasks.values_mut() {
            entry.cancel_timer();
        }
        tracing::info!("[Scheduler] Suspended");
    }

    pub async fn resume(&self) {
        let mut state = self.inner.state.lock().await;
        if !state.suspended {
            return;
        }
        state.suspended = false;
        self.rearm_all(&mut state);
        tracing::info!("[Scheduler] Resumed");
    }

    /// Stops every timer for good. Registered tasks can still be run by hand.
    pub async fn shutdown(&self) {
        let mut state = self.inner.state.lock().await;
        state.shut_down = true;
        self.inner.root.cancel();
        for entry in state.tasks.values_mut() {
            entry.timer = None;
        }
        tracing::info!("[Scheduler] Shut down");
    }

    pub async fn task_info(&self, task_id: &str) -> Option<TaskInfo> {
        self.inner
            .state
            .lock()
            .await
            .tasks
            .get(task_id)
            .map(TaskEntry::info)
    }

    /// Every registered task, high priority first.
    pub async fn tasks(&self) -> Vec<TaskInfo> {
        let mut infos: Vec<TaskInfo> = self
            .inner
            .state
            .lock()
            .await
            .tasks
            .values()
            .map(TaskEntry::info)
            .collect();
        infos.sort_by(|a, b| {
            a.spec
                .priority
                .cmp(&b.spec.priority)
                .then_with(|| a.spec.id.cmp(&b.spec.id))
        });
        infos
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(counter: &Arc<AtomicUsize>) -> TaskAction {
        let counter = counter.clone();
        task_action(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
    }

    fn every(id: &str, priority: TaskPriority, secs: u64) -> TaskSpec {
        TaskSpec::new(id, TaskType::Custom(id.to_string()), priority)
            .every(Duration::from_secs(secs))
    }

    async fn advance(secs: u64) {
        tokio::time::sleep(Duration::from_secs(secs)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_recurring_task_runs_each_interval() {
        let scheduler = TaskScheduler::new();
        let runs = Arc::new(AtomicUsize::new(0));
        scheduler
            .register_task(every("sync", TaskPriority::High, 10), counting(&runs))
            .await
            .unwrap();

        advance(35).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);

        let info = scheduler.task_info("sync").await.unwrap();
        assert!(info.scheduled);
        assert!(info.last_run.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_on_demand_task_has_no_timer() {
        let scheduler = TaskScheduler::new();
        let runs = Arc::new(AtomicUsize::new(0));
        scheduler
            .register_task(
                TaskSpec::new("manual", TaskType::Cleanup, TaskPriority::Low),
                counting(&runs),
            )
            .await
            .unwrap();

        advance(3600).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert!(!scheduler.task_info("manual").await.unwrap().scheduled);

        assert_eq!(
            scheduler.execute_task("manual").await.unwrap(),
            TaskOutcome::Completed
        );
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_cancels_low_and_doubles_medium() {
        let scheduler = TaskScheduler::new();
        let low = Arc::new(AtomicUsize::new(0));
        let medium = Arc::new(AtomicUsize::new(0));
        scheduler
            .register_task(every("telemetry", TaskPriority::Low, 10), counting(&low))
            .await
            .unwrap();
        scheduler
            .register_task(every("cleanup", TaskPriority::Medium, 10), counting(&medium))
            .await
            .unwrap();

        scheduler.on_idle().await;
        assert!(!scheduler.task_info("telemetry").await.unwrap().scheduled);

        advance(15).await;
        assert_eq!(low.load(Ordering::SeqCst), 0);
        assert_eq!(medium.load(Ordering::SeqCst), 0);

        advance(10).await;
        assert_eq!(medium.load(Ordering::SeqCst), 1);

        scheduler.on_active().await;
        advance(11).await;
        assert_eq!(low.load(Ordering::SeqCst), 1);
        assert_eq!(medium.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_suspend_and_resume() {
        let scheduler = TaskScheduler::new();
        let runs = Arc::new(AtomicUsize::new(0));
        scheduler
            .register_task(every("sync", TaskPriority::High, 10), counting(&runs))
            .await
            .unwrap();

        scheduler.suspend().await;
        advance(60).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert!(scheduler.task_info("sync").await.is_some());

        scheduler.resume().await;
        advance(11).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_while_idle_keeps_low_cancelled() {
        let scheduler = TaskScheduler::new();
        let runs = Arc::new(AtomicUsize::new(0));
        scheduler
            .register_task(every("telemetry", TaskPriority::Low, 10), counting(&runs))
            .await
            .unwrap();

        scheduler.suspend().await;
        scheduler.on_idle().await;
        scheduler.resume().await;
        advance(30).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failures_are_contained() {
        let scheduler = TaskScheduler::new();
        scheduler
            .register_task(
                TaskSpec::new("broken", TaskType::Sync, TaskPriority::High),
                task_action(|| async { Err::<(), _>(anyhow::anyhow!("remote exploded")) }),
            )
            .await
            .unwrap();
        scheduler
            .register_task(
                TaskSpec::new("panics", TaskType::Sync, TaskPriority::Low),
                task_action(|| async {
                    let missing: Option<()> = None;
                    missing.expect("bad task");
                    Ok(())
                }),
            )
            .await
            .unwrap();

        let outcome = scheduler.execute_task("broken").await.unwrap();
        assert_eq!(outcome, TaskOutcome::Failed("remote exploded".to_string()));
        assert!(scheduler.task_info("broken").await.unwrap().last_run.is_some());

        let outcome = scheduler.execute_task("panics").await.unwrap();
        assert!(!outcome.is_completed());

        assert_eq!(
            scheduler.execute_task("missing").await.unwrap_err(),
            SchedulerError::TaskNotFound("missing".to_string())
        );
    }

    #[tokio::test]
    async fn test_execute_by_type_runs_in_priority_order() {
        let scheduler = TaskScheduler::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        for (id, priority) in [
            ("low", TaskPriority::Low),
            ("high", TaskPriority::High),
            ("medium", TaskPriority::Medium),
        ] {
            let order = order.clone();
            scheduler
                .register_task(
                    TaskSpec::new(id, TaskType::Sync, priority),
                    task_action(move || {
                        let order = order.clone();
                        async move {
                            order.lock().unwrap().push(id);
                            Ok(())
                        }
                    }),
                )
                .await
                .unwrap();
        }
        scheduler
            .register_task(
                TaskSpec::new("other", TaskType::Telemetry, TaskPriority::High),
                task_action(|| async { Ok(()) }),
            )
            .await
            .unwrap();

        let outcomes = scheduler.execute_tasks_by_type(&TaskType::Sync).await;
        assert_eq!(outcomes.len(), 3);
        assert_eq!(*order.lock().unwrap(), vec!["high", "medium", "low"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unregister_and_reregister_replace_timers() {
        let scheduler = TaskScheduler::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        scheduler
            .register_task(every("sync", TaskPriority::High, 10), counting(&first))
            .await
            .unwrap();
        scheduler
            .register_task(every("sync", TaskPriority::High, 10), counting(&second))
            .await
            .unwrap();

        advance(11).await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);

        assert!(scheduler.unregister_task("sync").await);
        assert!(!scheduler.unregister_task("sync").await);
        advance(30).await;
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_timers_and_registration() {
        let scheduler = TaskScheduler::new();
        let runs = Arc::new(AtomicUsize::new(0));
        scheduler
            .register_task(every("sync", TaskPriority::High, 10), counting(&runs))
            .await
            .unwrap();

        scheduler.shutdown().await;
        advance(30).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(
            scheduler
                .register_task(every("late", TaskPriority::Low, 1), counting(&runs))
                .await
                .unwrap_err(),
            SchedulerError::ShutDown
        );
        assert_eq!(scheduler.tasks().await.len(), 1);
    }
}
