use super::context::{StepContext, StepsTelemetry};
use super::statistics::StepStatistics;
use super::step::ComputationStep;
use crate::metrics;
use crate::task::interrupter::{TaskInterruptedError, TaskInterrupter};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum PipelineError {
    /// The interrupter stopped the task before a step could start.
    #[error(transparent)]
    Interrupted(#[from] TaskInterruptedError),

    /// A step returned an error; it is propagated unchanged.
    #[error(transparent)]
    StepFailed(anyhow::Error),
}

impl PipelineError {
    /// Interruption carried by this error, whether raised by the interrupter
    /// or returned from inside a step.
    pub fn interruption(&self) -> Option<&TaskInterruptedError> {
        match self {
            PipelineError::Interrupted(e) => Some(e),
            PipelineError::StepFailed(e) => e.downcast_ref::<TaskInterruptedError>(),
        }
    }
}

/// Notified once a pipeline run is over.
pub trait ExecutionListener: Send + Sync {
    fn finished(&self, all_steps_executed: bool) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Success,
    Failed,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Success => "SUCCESS",
            StepStatus::Failed => "FAILED",
        }
    }
}

/// Runs the ordered steps of one task.
pub struct StepExecutor {
    steps: Vec<Box<dyn ComputationStep>>,
    interrupter: Arc<dyn TaskInterrupter>,
    listener: Option<Box<dyn ExecutionListener>>,
    telemetry: StepsTelemetry,
}

impl StepExecutor {
    pub fn new(steps: Vec<Box<dyn ComputationStep>>, interrupter: Arc<dyn TaskInterrupter>) -> Self {
        Self {
            steps,
            interrupter,
            listener: None,
            telemetry: StepsTelemetry::new(),
        }
    }

    pub fn with_listener(mut self, listener: Box<dyn ExecutionListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Steps report their telemetry metrics to `telemetry` instead of a private store.
    pub fn with_telemetry(mut self, telemetry: StepsTelemetry) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Telemetry metrics reported by the steps so far.
    pub fn telemetry(&self) -> &StepsTelemetry {
        &self.telemetry
    }

    /// Run every step in order on the current thread.
    ///
    /// Stops at the first interruption or step failure and returns it. The
    /// listener, if any, is told whether all steps ran to completion; its own
    /// errors are logged and never replace the pipeline outcome.
    pub fn execute(&self) -> Result<(), PipelineError> {
        let result = self.execute_steps();
        if let Some(listener) = &self.listener {
            if let Err(e) = listener.finished(result.is_ok()) {
                error!("Execution of task listener failed: {:#}", e);
            }
        }
        result
    }

    fn execute_steps(&self) -> Result<(), PipelineError> {
        let thread = std::thread::current().id();
        for step in &self.steps {
            self.interrupter.check(thread)?;
            self.execute_step(step.as_ref())
                .map_err(PipelineError::StepFailed)?;
        }
        Ok(())
    }

    fn execute_step(&self, step: &dyn ComputationStep) -> anyhow::Result<()> {
        let mut ctx = StepContext::new(step.key(), self.telemetry.clone());
        let start = Instant::now();
        let result = step.execute(&mut ctx);
        let elapsed = start.elapsed();

        let status = if result.is_ok() {
            StepStatus::Success
        } else {
            StepStatus::Failed
        };
        let statistics = ctx.into_statistics();
        info!(
            "{}",
            format_step_log(step.description(), &statistics, elapsed, status)
        );
        metrics::record_step_execution(step.key(), status.as_str(), elapsed);

        result
    }
}

fn format_step_log(
    description: &str,
    statistics: &StepStatistics,
    elapsed: Duration,
    status: StepStatus,
) -> String {
    let mut line = description.to_string();
    for (key, value) in statistics.entries() {
        line.push_str(&format!(" | {}={}", key, value));
    }
    line.push_str(&format!(
        " | time={}ms | status={}",
        elapsed.as_millis(),
        status.as_str()
    ));
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::descriptor::TaskDescriptor;
    use crate::task::interrupter::{ActiveTasks, SimpleTaskInterrupter};
    use crate::task::step::statistics::StatisticsError;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::thread::ThreadId;

    type Calls = Arc<Mutex<Vec<&'static str>>>;

    struct TestStep {
        key: &'static str,
        calls: Calls,
        error: Option<&'static str>,
    }

    impl ComputationStep for TestStep {
        fn key(&self) -> &'static str {
            self.key
        }

        fn description(&self) -> &'static str {
            "Test step"
        }

        fn execute(&self, ctx: &mut StepContext) -> anyhow::Result<()> {
            self.calls.lock().unwrap().push(self.key);
            ctx.add_statistic("calls", 1)?;
            match self.error {
                Some(msg) => Err(anyhow!(msg)),
                None => Ok(()),
            }
        }
    }

    fn step(key: &'static str, calls: &Calls, error: Option<&'static str>) -> Box<dyn ComputationStep> {
        Box::new(TestStep {
            key,
            calls: calls.clone(),
            error,
        })
    }

    struct RecordingListener {
        called: Arc<Mutex<Option<bool>>>,
        fail: bool,
    }

    impl ExecutionListener for RecordingListener {
        fn finished(&self, all_steps_executed: bool) -> anyhow::Result<()> {
            *self.called.lock().unwrap() = Some(all_steps_executed);
            if self.fail {
                Err(anyhow!("listener exploded"))
            } else {
                Ok(())
            }
        }
    }

    fn never_interrupt() -> Arc<dyn TaskInterrupter> {
        Arc::new(SimpleTaskInterrupter::new(Arc::new(ActiveTasks::new())))
    }

    #[test]
    fn test_all_steps_run_in_order() {
        let calls: Calls = Arc::default();
        let called = Arc::new(Mutex::new(None));
        let executor = StepExecutor::new(
            vec![step("a", &calls, None), step("b", &calls, None), step("c", &calls, None)],
            never_interrupt(),
        )
        .with_listener(Box::new(RecordingListener {
            called: called.clone(),
            fail: false,
        }));

        executor.execute().unwrap();

        assert_eq!(*calls.lock().unwrap(), vec!["a", "b", "c"]);
        assert_eq!(*called.lock().unwrap(), Some(true));
    }

    #[test]
    fn test_failing_step_stops_pipeline_and_propagates_error() {
        let calls: Calls = Arc::default();
        let called = Arc::new(Mutex::new(None));
        let executor = StepExecutor::new(
            vec![
                step("a", &calls, None),
                step("b", &calls, Some("disk full")),
                step("c", &calls, None),
            ],
            never_interrupt(),
        )
        .with_listener(Box::new(RecordingListener {
            called: called.clone(),
            fail: false,
        }));

        let err = executor.execute().unwrap_err();

        assert!(matches!(err, PipelineError::StepFailed(_)));
        assert_eq!(err.to_string(), "disk full");
        assert!(err.interruption().is_none());
        assert_eq!(*calls.lock().unwrap(), vec!["a", "b"]);
        assert_eq!(*called.lock().unwrap(), Some(false));
    }

    #[test]
    fn test_listener_failure_does_not_mask_outcome() {
        let calls: Calls = Arc::default();
        let called = Arc::new(Mutex::new(None));

        let ok = StepExecutor::new(vec![step("a", &calls, None)], never_interrupt()).with_listener(
            Box::new(RecordingListener {
                called: called.clone(),
                fail: true,
            }),
        );
        assert!(ok.execute().is_ok());

        let failing = StepExecutor::new(vec![step("b", &calls, Some("boom"))], never_interrupt())
            .with_listener(Box::new(RecordingListener {
                called: called.clone(),
                fail: true,
            }));
        assert_eq!(failing.execute().unwrap_err().to_string(), "boom");
        assert_eq!(*called.lock().unwrap(), Some(false));
    }

    struct InterruptAfter {
        checks: AtomicUsize,
        allowed: usize,
    }

    impl TaskInterrupter for InterruptAfter {
        fn check(&self, _thread: ThreadId) -> Result<(), TaskInterruptedError> {
            if self.checks.fetch_add(1, Ordering::SeqCst) >= self.allowed {
                Err(TaskInterruptedError::Timeout { timeout_ms: 10 })
            } else {
                Ok(())
            }
        }

        fn on_start(&self, _task: &TaskDescriptor) {}

        fn on_end(&self, _task: &TaskDescriptor) {}
    }

    #[test]
    fn test_interruption_prevents_next_step() {
        let calls: Calls = Arc::default();
        let called = Arc::new(Mutex::new(None));
        let executor = StepExecutor::new(
            vec![step("a", &calls, None), step("b", &calls, None)],
            Arc::new(InterruptAfter {
                checks: AtomicUsize::new(0),
                allowed: 1,
            }),
        )
        .with_listener(Box::new(RecordingListener {
            called: called.clone(),
            fail: false,
        }));

        let err = executor.execute().unwrap_err();

        assert_eq!(
            err.interruption(),
            Some(&TaskInterruptedError::Timeout { timeout_ms: 10 })
        );
        assert_eq!(*calls.lock().unwrap(), vec!["a"]);
        assert_eq!(*called.lock().unwrap(), Some(false));
    }

    #[test]
    fn test_interruption_returned_by_step_is_recognized() {
        struct CancelledStep;
        impl ComputationStep for CancelledStep {
            fn key(&self) -> &'static str {
                "cancelled"
            }
            fn description(&self) -> &'static str {
                "Cancelled step"
            }
            fn execute(&self, _ctx: &mut StepContext) -> anyhow::Result<()> {
                Err(TaskInterruptedError::Canceled.into())
            }
        }

        let executor = StepExecutor::new(vec![Box::new(CancelledStep)], never_interrupt());
        let err = executor.execute().unwrap_err();
        assert_eq!(err.interruption(), Some(&TaskInterruptedError::Canceled));
    }

    #[test]
    fn test_statistics_are_not_shared_between_steps() {
        struct StatStep {
            saw_empty: Arc<AtomicBool>,
        }
        impl ComputationStep for StatStep {
            fn key(&self) -> &'static str {
                "stat"
            }
            fn description(&self) -> &'static str {
                "Stat step"
            }
            fn execute(&self, ctx: &mut StepContext) -> anyhow::Result<()> {
                if !ctx.statistics().is_empty() {
                    self.saw_empty.store(false, Ordering::SeqCst);
                }
                // Same key in every step: only legal because each step gets fresh statistics
                ctx.add_statistic("shared", 1)?;
                Ok(())
            }
        }

        let saw_empty = Arc::new(AtomicBool::new(true));
        let steps: Vec<Box<dyn ComputationStep>> = (0..3)
            .map(|_| {
                Box::new(StatStep {
                    saw_empty: saw_empty.clone(),
                }) as Box<dyn ComputationStep>
            })
            .collect();

        StepExecutor::new(steps, never_interrupt()).execute().unwrap();
        assert!(saw_empty.load(Ordering::SeqCst));
    }

    #[test]
    fn test_statistics_misuse_fails_step() {
        struct TimeStep;
        impl ComputationStep for TimeStep {
            fn key(&self) -> &'static str {
                "time"
            }
            fn description(&self) -> &'static str {
                "Time step"
            }
            fn execute(&self, ctx: &mut StepContext) -> anyhow::Result<()> {
                ctx.add_statistic("time", 3)?;
                Ok(())
            }
        }

        let err = StepExecutor::new(vec![Box::new(TimeStep)], never_interrupt())
            .execute()
            .unwrap_err();
        match err {
            PipelineError::StepFailed(e) => assert_eq!(
                e.downcast_ref::<StatisticsError>(),
                Some(&StatisticsError::ReservedKey("time".to_string()))
            ),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_step_log_line_ends_with_status() {
        let mut stats = StepStatistics::new();
        stats.add("branches", 3).unwrap().add("project", "p1").unwrap();

        let line = format_step_log(
            "Index branch",
            &stats,
            Duration::from_millis(42),
            StepStatus::Failed,
        );

        assert_eq!(
            line,
            "Index branch | branches=3 | project=p1 | time=42ms | status=FAILED"
        );
    }
}
