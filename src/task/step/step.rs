use super::context::StepContext;
use anyhow::Result;

/// One unit of a task's processing logic.
///
/// Steps are assembled into an explicit, ordered list by a task processor and
/// run one after the other on the thread processing the task.
pub trait ComputationStep: Send + Sync {
    /// Short identifier used in metric names and telemetry keys.
    fn key(&self) -> &'static str;

    /// Human-readable description, used as the step's log line prefix.
    fn description(&self) -> &'static str;

    /// Execute the step.
    ///
    /// Statistics added to `ctx` are logged once the step finishes and are
    /// discarded before the next step starts.
    fn execute(&self, ctx: &mut StepContext) -> Result<()>;
}
