//! Analysis Task Engine Library
//!
//! Background task execution with a step pipeline, and the scheduling of
//! branch resynchronization after a search index rebuild.

pub mod config;
pub mod metrics;
pub mod project;
pub mod queue;
pub mod reindex;
pub mod sqlite_persistence;
pub mod task;
pub mod telemetry;
pub mod worker;

// Re-export commonly used types for convenience
pub use project::{AnalysisStore, BranchStore, SqliteProjectStore};
pub use queue::{QueueStore, SqliteQueueStore, TaskQueue};
pub use reindex::{BranchSyncProcessor, ReindexMonitor, ReindexScheduler};
pub use task::step::{ComputationStep, StepContext, StepExecutor};
pub use task::{TaskDescriptor, TaskInterrupter};
pub use worker::{TaskProcessor, TaskWorker};
