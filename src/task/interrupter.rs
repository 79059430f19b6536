//! Policies deciding whether the task running on a given thread must stop.
//!
//! A worker calls [`TaskInterrupter::on_start`] and [`TaskInterrupter::on_end`]
//! on the thread that processes a task; the pipeline calls
//! [`TaskInterrupter::check`] with that same thread before every step.

use super::descriptor::TaskDescriptor;
use crate::queue::ActivityStatus;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread::ThreadId;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Raised by an interrupter when a task must stop.
///
/// This is an expected outcome rather than a bug, so it is a plain value with
/// no captured backtrace.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TaskInterruptedError {
    #[error("Execution of task timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u128 },

    #[error("Execution of task has been canceled")]
    Canceled,
}

impl TaskInterruptedError {
    /// Terminal status to record for the interrupted task.
    pub fn status(&self) -> ActivityStatus {
        match self {
            TaskInterruptedError::Timeout { .. } => ActivityStatus::Failed,
            TaskInterruptedError::Canceled => ActivityStatus::Canceled,
        }
    }

    /// Machine readable reason stored alongside the status.
    pub fn error_type(&self) -> &'static str {
        match self {
            TaskInterruptedError::Timeout { .. } => "TIMEOUT",
            TaskInterruptedError::Canceled => "CANCELED",
        }
    }
}

pub trait TaskInterrupter: Send + Sync {
    /// Returns an error when the task processed by `thread` must stop.
    fn check(&self, thread: ThreadId) -> Result<(), TaskInterruptedError>;

    /// Called on the processing thread right before the task starts.
    fn on_start(&self, task: &TaskDescriptor);

    /// Called on the processing thread once the task is done, whatever the outcome.
    fn on_end(&self, task: &TaskDescriptor);
}

struct ActiveTask {
    task_uuid: String,
    started_at: Instant,
    cancel_token: CancellationToken,
}

/// Registry of the tasks currently being processed, keyed by processing thread.
#[derive(Default)]
pub struct ActiveTasks {
    tasks: Mutex<HashMap<ThreadId, ActiveTask>>,
}

impl ActiveTasks {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, task: &TaskDescriptor) {
        let mut tasks = self.tasks.lock().unwrap();
        tasks.insert(
            std::thread::current().id(),
            ActiveTask {
                task_uuid: task.uuid().to_string(),
                started_at: Instant::now(),
                cancel_token: CancellationToken::new(),
            },
        );
    }

    fn unregister(&self, task: &TaskDescriptor) {
        let mut tasks = self.tasks.lock().unwrap();
        let thread = std::thread::current().id();
        if tasks
            .get(&thread)
            .is_some_and(|active| active.task_uuid == task.uuid())
        {
            tasks.remove(&thread);
        }
    }

    /// Requests cancellation of a running task. Returns false if no such task is running.
    pub fn cancel(&self, task_uuid: &str) -> bool {
        let tasks = self.tasks.lock().unwrap();
        match tasks.values().find(|active| active.task_uuid == task_uuid) {
            Some(active) => {
                info!("Cancellation requested for task {}", task_uuid);
                active.cancel_token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, task_uuid: &str) -> bool {
        let tasks = self.tasks.lock().unwrap();
        tasks.values().any(|active| active.task_uuid == task_uuid)
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn state_of(&self, thread: ThreadId) -> Option<(Instant, bool)> {
        let tasks = self.tasks.lock().unwrap();
        tasks
            .get(&thread)
            .map(|active| (active.started_at, active.cancel_token.is_cancelled()))
    }
}

/// Stops a task only when it has been explicitly cancelled.
pub struct SimpleTaskInterrupter {
    active_tasks: Arc<ActiveTasks>,
}

impl SimpleTaskInterrupter {
    pub fn new(active_tasks: Arc<ActiveTasks>) -> Self {
        Self { active_tasks }
    }
}

impl TaskInterrupter for SimpleTaskInterrupter {
    fn check(&self, thread: ThreadId) -> Result<(), TaskInterruptedError> {
        match self.active_tasks.state_of(thread) {
            Some((_, true)) => Err(TaskInterruptedError::Canceled),
            _ => Ok(()),
        }
    }

    fn on_start(&self, task: &TaskDescriptor) {
        self.active_tasks.register(task);
    }

    fn on_end(&self, task: &TaskDescriptor) {
        self.active_tasks.unregister(task);
    }
}

/// Stops a task when it is cancelled or once it has run longer than `timeout`.
pub struct TimeoutTaskInterrupter {
    active_tasks: Arc<ActiveTasks>,
    timeout: Duration,
}

impl TimeoutTaskInterrupter {
    pub fn new(active_tasks: Arc<ActiveTasks>, timeout: Duration) -> Self {
        Self {
            active_tasks,
            timeout,
        }
    }
}

impl TaskInterrupter for TimeoutTaskInterrupter {
    fn check(&self, thread: ThreadId) -> Result<(), TaskInterruptedError> {
        let Some((started_at, cancelled)) = self.active_tasks.state_of(thread) else {
            return Ok(());
        };
        if cancelled {
            return Err(TaskInterruptedError::Canceled);
        }
        if started_at.elapsed() > self.timeout {
            return Err(TaskInterruptedError::Timeout {
                timeout_ms: self.timeout.as_millis(),
            });
        }
        Ok(())
    }

    fn on_start(&self, task: &TaskDescriptor) {
        debug!(
            "Task {} must complete within {} ms",
            task.uuid(),
            self.timeout.as_millis()
        );
        self.active_tasks.register(task);
    }

    fn on_end(&self, task: &TaskDescriptor) {
        self.active_tasks.unregister(task);
    }
}

/// Picks the timeout interrupter when a timeout is configured, the simple one otherwise.
pub fn create_interrupter(
    active_tasks: Arc<ActiveTasks>,
    timeout: Option<Duration>,
) -> Arc<dyn TaskInterrupter> {
    match timeout {
        Some(timeout) if !timeout.is_zero() => {
            info!("Task execution timeout set to {} ms", timeout.as_millis());
            Arc::new(TimeoutTaskInterrupter::new(active_tasks, timeout))
        }
        _ => Arc::new(SimpleTaskInterrupter::new(active_tasks)),
    }
}
