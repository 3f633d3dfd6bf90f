//! Background task scheduling.

mod error;
mod service;

pub use error::SchedulerError;
pub use service::{TaskAction, TaskOutcome, TaskScheduler, task_action};
