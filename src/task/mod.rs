//! Task descriptors, interruption policies and the step pipeline.

mod descriptor;
mod interrupter;
pub mod step;

pub use descriptor::{
    Component, TaskDescriptor, TaskDescriptorBuilder, TaskDescriptorError, User, BRANCH,
    BRANCH_TYPE, PULL_REQUEST,
};
pub use interrupter::{
    create_interrupter, ActiveTasks, SimpleTaskInterrupter, TaskInterruptedError, TaskInterrupter,
    TimeoutTaskInterrupter,
};

/// Task type of the branch resynchronization tasks submitted on reindexing.
pub const SYNC_TASK_TYPE: &str = "SYNC";
