//! Background task domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Category of a background task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Sync,
    Cleanup,
    Telemetry,
    Custom(String),
}

/// Scheduling priority. Declaration order is execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    High,
    Medium,
    Low,
}

/// Static description of a registered task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub id: String,
    pub task_type: TaskType,
    pub priority: TaskPriority,
    /// Recurrence period; `None` for on-demand tasks.
    pub interval: Option<Duration>,
}

impl TaskSpec {
    pub fn new(id: impl Into<String>, task_type: TaskType, priority: TaskPriority) -> Self {
        Self {
            id: id.into(),
            task_type,
            priority,
            interval: None,
        }
    }

    pub fn every(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn is_recurring(&self) -> bool {
        self.interval.is_some_and(|i| !i.is_zero())
    }
}

/// Observable state of a registered task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub spec: TaskSpec,
    pub last_run: Option<DateTime<Utc>>,
    /// Whether a timer is currently armed for this task.
    pub scheduled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_order() {
        let mut priorities = vec![TaskPriority::Low, TaskPriority::High, TaskPriority::Medium];
        priorities.sort();
        assert_eq!(
            priorities,
            vec![TaskPriority::High, TaskPriority::Medium, TaskPriority::Low]
        );
    }

    #[test]
    fn test_zero_interval_is_not_recurring() {
        let spec = TaskSpec::new("t", TaskType::Sync, TaskPriority::High).every(Duration::ZERO);
        assert!(!spec.is_recurring());
        assert!(
            TaskSpec::new("t", TaskType::Sync, TaskPriority::High)
                .every(Duration::from_secs(5))
                .is_recurring()
        );
    }
}
