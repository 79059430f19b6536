//! Sequential execution of the steps making up one task.

mod context;
mod executor;
mod statistics;
mod step;

pub use context::{StepContext, StepsTelemetry};
pub use executor::{ExecutionListener, PipelineError, StepExecutor, StepStatus};
pub use statistics::{StatisticsError, StepStatistics, RESERVED_TIME_KEY};
pub use step::ComputationStep;
