//! Search index resynchronization: deciding which branches to sync, syncing
//! them, and reporting when a run is over.

mod monitor;
mod scheduler;
mod sync_processor;

pub use monitor::{ReindexMonitor, ReindexTelemetry, DEFAULT_MONITOR_INTERVAL};
pub use scheduler::ReindexScheduler;
pub use sync_processor::{BranchIndexer, BranchSyncProcessor, LoggingBranchIndexer};
