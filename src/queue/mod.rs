//! Task queue module
//!
//! Queued tasks, their characteristics and the activity records of finished
//! tasks, behind the [`TaskQueue`] and [`QueueStore`] traits.

mod models;
mod queue_store;
mod schema;

pub use models::*;
pub use queue_store::{QueueStore, SqliteQueueStore, TaskQueue};
pub use schema::QUEUE_VERSIONED_SCHEMAS;
