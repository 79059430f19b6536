//! Processing of `SYNC` tasks: rebuild the index content of one branch.

use crate::project::{Branch, BranchStore};
use crate::task::step::{
    ComputationStep, ExecutionListener, PipelineError, StepContext, StepExecutor, StepsTelemetry,
};
use crate::task::{TaskDescriptor, TaskInterrupter, SYNC_TASK_TYPE};
use crate::worker::TaskProcessor;
use anyhow::{anyhow, bail, Result};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// Writes the index content of a branch. Returns the number of documents indexed.
pub trait BranchIndexer: Send + Sync {
    fn index_branch(&self, branch: &Branch) -> Result<usize>;
}

/// Indexer used when no index is attached: logs the branch and indexes nothing.
pub struct LoggingBranchIndexer;

impl BranchIndexer for LoggingBranchIndexer {
    fn index_branch(&self, branch: &Branch) -> Result<usize> {
        info!(
            "Indexing branch {} ({}) of project {}",
            branch.key,
            branch.branch_type.as_db_str(),
            branch.project_uuid
        );
        Ok(0)
    }
}

/// Branch loaded by the first step, read by the next ones.
type LoadedBranch = Arc<Mutex<Option<Branch>>>;

struct LoadBranchStep {
    branch_uuid: String,
    branch_store: Arc<dyn BranchStore>,
    loaded: LoadedBranch,
}

impl ComputationStep for LoadBranchStep {
    fn key(&self) -> &'static str {
        "load_branch"
    }

    fn description(&self) -> &'static str {
        "Load branch"
    }

    fn execute(&self, ctx: &mut StepContext) -> Result<()> {
        let Some(branch) = self.branch_store.get_branch(&self.branch_uuid)? else {
            bail!("Branch {} does not exist", self.branch_uuid);
        };
        ctx.add_statistic("branch", &branch.key)?;
        ctx.add_statistic("type", branch.branch_type.as_db_str())?;
        *self.loaded.lock().unwrap() = Some(branch);
        Ok(())
    }
}

struct ReindexBranchStep {
    indexer: Arc<dyn BranchIndexer>,
    loaded: LoadedBranch,
}

impl ComputationStep for ReindexBranchStep {
    fn key(&self) -> &'static str {
        "reindex_branch"
    }

    fn description(&self) -> &'static str {
        "Reindex branch"
    }

    fn execute(&self, ctx: &mut StepContext) -> Result<()> {
        let branch = self
            .loaded
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| anyhow!("Branch was not loaded"))?;
        let indexed = self.indexer.index_branch(&branch)?;
        ctx.add_statistic("indexed", indexed)?;
        ctx.add_telemetry_metric("indexed", indexed);
        Ok(())
    }
}

struct ClearSyncFlagStep {
    branch_uuid: String,
    branch_store: Arc<dyn BranchStore>,
}

impl ComputationStep for ClearSyncFlagStep {
    fn key(&self) -> &'static str {
        "clear_sync_flag"
    }

    fn description(&self) -> &'static str {
        "Clear branch sync flag"
    }

    fn execute(&self, _ctx: &mut StepContext) -> Result<()> {
        if !self.branch_store.clear_need_sync(&self.branch_uuid)? {
            bail!("Branch {} disappeared during synchronization", self.branch_uuid);
        }
        Ok(())
    }
}

struct SyncListener {
    task_uuid: String,
    branch_uuid: String,
}

impl ExecutionListener for SyncListener {
    fn finished(&self, all_steps_executed: bool) -> Result<()> {
        if all_steps_executed {
            info!(
                "Branch {} synchronized by task {}",
                self.branch_uuid, self.task_uuid
            );
        } else {
            warn!(
                "Synchronization of branch {} by task {} did not complete",
                self.branch_uuid, self.task_uuid
            );
        }
        Ok(())
    }
}

pub struct BranchSyncProcessor {
    branch_store: Arc<dyn BranchStore>,
    indexer: Arc<dyn BranchIndexer>,
}

impl BranchSyncProcessor {
    pub fn new(branch_store: Arc<dyn BranchStore>, indexer: Arc<dyn BranchIndexer>) -> Self {
        Self {
            branch_store,
            indexer,
        }
    }

    fn steps(&self, branch_uuid: &str) -> Vec<Box<dyn ComputationStep>> {
        let loaded = LoadedBranch::default();
        vec![
            Box::new(LoadBranchStep {
                branch_uuid: branch_uuid.to_string(),
                branch_store: self.branch_store.clone(),
                loaded: loaded.clone(),
            }),
            Box::new(ReindexBranchStep {
                indexer: self.indexer.clone(),
                loaded,
            }),
            Box::new(ClearSyncFlagStep {
                branch_uuid: branch_uuid.to_string(),
                branch_store: self.branch_store.clone(),
            }),
        ]
    }
}

impl TaskProcessor for BranchSyncProcessor {
    fn task_type(&self) -> &'static str {
        SYNC_TASK_TYPE
    }

    fn process(
        &self,
        task: &TaskDescriptor,
        interrupter: Arc<dyn TaskInterrupter>,
        telemetry: StepsTelemetry,
    ) -> Result<(), PipelineError> {
        let branch_uuid = task
            .component()
            .map(|component| component.uuid().to_string())
            .ok_or_else(|| {
                PipelineError::StepFailed(anyhow!("Sync task {} has no branch", task.uuid()))
            })?;

        StepExecutor::new(self.steps(&branch_uuid), interrupter)
            .with_telemetry(telemetry)
            .with_listener(Box::new(SyncListener {
                task_uuid: task.uuid().to_string(),
                branch_uuid,
            }))
            .execute()
    }
}
