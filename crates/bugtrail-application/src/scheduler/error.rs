use bugtrail_core::BugtrailError;
use thiserror::Error;

/// Errors returned by the task scheduler's control surface.
///
/// Failures inside task bodies never surface here; they are reported as
/// [`TaskOutcome::Failed`](super::TaskOutcome::Failed).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Scheduler has been shut down")]
    ShutDown,
}

impl From<SchedulerError> for BugtrailError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::TaskNotFound(id) => BugtrailError::not_found("task", id),
            SchedulerError::ShutDown => {
                BugtrailError::Execution("scheduler has been shut down".to_string())
            }
        }
    }
}
