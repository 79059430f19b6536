//! Claims queued tasks and runs them through the processor registered for their type.

use crate::metrics;
use crate::queue::{ActivityStatus, QueuedTask, TaskOutcome, TaskQueue};
use crate::task::step::{PipelineError, StepsTelemetry};
use crate::task::{ActiveTasks, Component, TaskDescriptor, TaskInterrupter, User};
use anyhow::Result;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Runs the tasks of one type.
pub trait TaskProcessor: Send + Sync {
    fn task_type(&self) -> &'static str;

    /// Process `task` on the calling thread. `interrupter` must be consulted
    /// with this thread's id. Steps report their telemetry metrics to `telemetry`.
    fn process(
        &self,
        task: &TaskDescriptor,
        interrupter: Arc<dyn TaskInterrupter>,
        telemetry: StepsTelemetry,
    ) -> Result<(), PipelineError>;
}

/// Calls `on_end` when dropped, so a panicking processor still releases its slot.
struct RunningTask<'a> {
    interrupter: &'a dyn TaskInterrupter,
    task: &'a TaskDescriptor,
}

impl<'a> RunningTask<'a> {
    fn start(interrupter: &'a dyn TaskInterrupter, task: &'a TaskDescriptor) -> Self {
        interrupter.on_start(task);
        Self { interrupter, task }
    }
}

impl Drop for RunningTask<'_> {
    fn drop(&mut self) {
        self.interrupter.on_end(self.task);
    }
}

pub struct TaskWorker {
    task_queue: Arc<dyn TaskQueue>,
    active_tasks: Arc<ActiveTasks>,
    interrupter: Arc<dyn TaskInterrupter>,
    processors: HashMap<&'static str, Arc<dyn TaskProcessor>>,
    poll_interval: Duration,
}

impl TaskWorker {
    /// `interrupter` must track its tasks in `active_tasks` for [`TaskWorker::cancel`] to work.
    pub fn new(
        task_queue: Arc<dyn TaskQueue>,
        active_tasks: Arc<ActiveTasks>,
        interrupter: Arc<dyn TaskInterrupter>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            task_queue,
            active_tasks,
            interrupter,
            processors: HashMap::new(),
            poll_interval,
        }
    }

    pub fn with_processor(mut self, processor: Arc<dyn TaskProcessor>) -> Self {
        self.processors.insert(processor.task_type(), processor);
        self
    }

    /// Process queued tasks until `shutdown` is cancelled.
    ///
    /// Tasks left in progress by a previous run are queued again first.
    pub async fn run(&self, shutdown: CancellationToken) {
        match self.task_queue.requeue_in_progress() {
            Ok(0) => {}
            Ok(count) => info!("Requeued {} tasks interrupted by a previous shutdown", count),
            Err(e) => error!("Failed to requeue interrupted tasks: {:#}", e),
        }
        info!("Task worker started");

        while !shutdown.is_cancelled() {
            let idle = match self.process_next().await {
                Ok(found) => !found,
                Err(e) => {
                    error!("Task worker failed to process next task: {:#}", e);
                    true
                }
            };
            if idle {
                tokio::select! {
                    _ = tokio::time::sleep(self.poll_interval) => {}
                    _ = shutdown.cancelled() => {}
                }
            }
        }
        info!("Task worker stopped");
    }

    /// Process the oldest pending task, if any. Returns whether a task was found.
    ///
    /// A claimed task never stays in progress: it ends with an activity record,
    /// or goes back to pending when its outcome cannot be stored.
    pub async fn process_next(&self) -> Result<bool> {
        let Some(task) = self.task_queue.claim_next_pending()? else {
            return Ok(false);
        };
        debug!("Claimed task {} of type {}", task.uuid, task.task_type);

        let start = Instant::now();
        let descriptor = self
            .task_queue
            .select_characteristics(&task.uuid)
            .and_then(|characteristics| build_descriptor(&task, characteristics));
        let outcome = match descriptor {
            Ok(descriptor) => self.execute(descriptor).await,
            Err(e) => {
                error!("Failed to prepare task {}: {:#}", task.uuid, e);
                TaskOutcome::failure(ActivityStatus::Failed, None, format!("{:#}", e), 0)
            }
        };
        metrics::record_task_execution(&task.task_type, outcome.status.as_db_str(), start.elapsed());

        if let Err(e) = self.task_queue.finish_task(&task.uuid, &outcome) {
            error!("Failed to record outcome of task {}: {:#}", task.uuid, e);
            match self.task_queue.requeue_task(&task.uuid) {
                Ok(true) => warn!("Task {} is pending again", task.uuid),
                Ok(false) => warn!("Task {} was no longer in progress", task.uuid),
                Err(requeue_err) => {
                    error!("Failed to requeue task {}: {:#}", task.uuid, requeue_err)
                }
            }
            return Err(e);
        }
        Ok(true)
    }

    /// Request cancellation of a running task. Returns false if it isn't running.
    pub fn cancel(&self, task_uuid: &str) -> bool {
        self.active_tasks.cancel(task_uuid)
    }

    async fn execute(&self, descriptor: TaskDescriptor) -> TaskOutcome {
        let Some(processor) = self.processors.get(descriptor.task_type()).cloned() else {
            warn!("No processor for task {}", descriptor);
            return TaskOutcome::failure(
                ActivityStatus::Failed,
                None,
                format!("No processor for task type {}", descriptor.task_type()),
                0,
            );
        };

        info!("Executing task {}", descriptor);
        let task_uuid = descriptor.uuid().to_string();
        let interrupter = self.interrupter.clone();
        let telemetry = StepsTelemetry::new();
        let step_telemetry = telemetry.clone();
        let start = Instant::now();
        metrics::set_task_in_progress(true);
        let result = tokio::task::spawn_blocking(move || {
            let _running = RunningTask::start(interrupter.as_ref(), &descriptor);
            processor.process(&descriptor, interrupter.clone(), step_telemetry)
        })
        .await;
        metrics::set_task_in_progress(false);
        let elapsed_ms = start.elapsed().as_millis() as i64;
        report_step_telemetry(&task_uuid, &telemetry);

        match result {
            Ok(Ok(())) => {
                info!("Task executed successfully in {} ms", elapsed_ms);
                TaskOutcome::success(elapsed_ms)
            }
            Ok(Err(e)) => match e.interruption() {
                Some(interruption) => {
                    info!("Task interrupted after {} ms: {}", elapsed_ms, interruption);
                    TaskOutcome::failure(
                        interruption.status(),
                        Some(interruption.error_type().to_string()),
                        interruption.to_string(),
                        elapsed_ms,
                    )
                }
                None => {
                    error!("Task failed after {} ms: {:#}", elapsed_ms, e);
                    TaskOutcome::failure(ActivityStatus::Failed, None, e.to_string(), elapsed_ms)
                }
            },
            Err(e) => {
                error!("Task panicked after {} ms: {}", elapsed_ms, e);
                TaskOutcome::failure(
                    ActivityStatus::Failed,
                    None,
                    format!("Task panic: {}", e),
                    elapsed_ms,
                )
            }
        }
    }
}

/// Exports the metrics reported by the steps of a finished task.
/// Numeric values are added to the step telemetry counter; others are only logged.
fn report_step_telemetry(task_uuid: &str, telemetry: &StepsTelemetry) {
    for (metric, value) in telemetry.snapshot() {
        debug!("Task {} telemetry {}={}", task_uuid, metric, value);
        match value.parse::<f64>() {
            Ok(number) => metrics::record_step_telemetry(&metric, number),
            Err(_) => debug!("Telemetry metric {} is not numeric", metric),
        }
    }
}

fn build_descriptor(
    task: &QueuedTask,
    characteristics: BTreeMap<String, String>,
) -> Result<TaskDescriptor> {
    let component = task
        .component_uuid
        .as_deref()
        .map(|uuid| Component::new(uuid, None, None))
        .transpose()?;
    // The owning project is the main component; a component without one is its own main
    let main_component = match (&component, task.entity_uuid.as_deref()) {
        (Some(_), Some(project_uuid)) => Some(Component::new(project_uuid, None, None)?),
        (Some(component), None) => Some(component.clone()),
        (None, _) => None,
    };
    let submitter = task
        .submitter_uuid
        .as_deref()
        .map(|uuid| User::new(uuid, None))
        .transpose()?;

    Ok(TaskDescriptor::builder()
        .task_type(&task.task_type)
        .uuid(&task.uuid)
        .component(component)
        .main_component(main_component)
        .submitter(submitter)
        .characteristics(characteristics)
        .build()?)
}
