//! Schedules the resynchronization of branches with the search index.

use super::monitor::ReindexMonitor;
use crate::metrics;
use crate::project::{AnalysisStore, Branch, BranchStore, BranchType};
use crate::queue::{QueueStore, TaskQueue, TaskSubmit};
use crate::task::{BRANCH, BRANCH_TYPE, PULL_REQUEST, SYNC_TASK_TYPE};
use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Submits one `SYNC` task per branch whose index content must be rebuilt.
///
/// Every trigger first removes the sync tasks left by earlier triggers, so
/// calling it again after a failure is safe. Two triggers must not run at the
/// same time: callers serialize them.
pub struct ReindexScheduler {
    branch_store: Arc<dyn BranchStore>,
    analysis_store: Arc<dyn AnalysisStore>,
    queue_store: Arc<dyn QueueStore>,
    task_queue: Arc<dyn TaskQueue>,
    monitor: Option<Arc<ReindexMonitor>>,
}

impl ReindexScheduler {
    pub fn new(
        branch_store: Arc<dyn BranchStore>,
        analysis_store: Arc<dyn AnalysisStore>,
        queue_store: Arc<dyn QueueStore>,
        task_queue: Arc<dyn TaskQueue>,
    ) -> Self {
        Self {
            branch_store,
            analysis_store,
            queue_store,
            task_queue,
            monitor: None,
        }
    }

    /// Report completion of global reindexing runs through `monitor`.
    pub fn with_monitor(mut self, monitor: Arc<ReindexMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Resynchronize every branch of every project, most recently analysed projects first.
    ///
    /// Returns the number of tasks submitted.
    pub fn trigger_global(&self) -> Result<usize> {
        self.remove_sync_tasks(None)?;

        let marked = self.branch_store.update_all_need_sync()?;
        info!("Flagged {} branches for synchronization", marked);

        let branches = self.branch_store.select_branches_needing_sync()?;
        if branches.is_empty() {
            info!("No branch needs synchronization, nothing to submit");
            return Ok(0);
        }

        let branches = self.sort_by_last_analysis(branches)?;
        let submitted = self.submit(&branches)?;
        metrics::record_reindex_submitted("global", submitted);
        info!("Submitted {} branch sync tasks", submitted);

        if let Some(monitor) = &self.monitor {
            monitor.start_monitoring(submitted);
        }
        Ok(submitted)
    }

    /// Resynchronize the branches of one project. Tasks of other projects are left untouched.
    ///
    /// Returns the number of tasks submitted.
    pub fn trigger_for_project(&self, project_uuid: &str) -> Result<usize> {
        self.remove_sync_tasks(Some(project_uuid))?;

        let marked = self
            .branch_store
            .update_all_need_sync_for_project(project_uuid)?;
        info!(
            "Flagged {} branches of project {} for synchronization",
            marked, project_uuid
        );

        let branches = self
            .branch_store
            .select_branches_needing_sync_for_project(project_uuid)?;
        let submitted = self.submit(&branches)?;
        metrics::record_reindex_submitted("project", submitted);
        info!(
            "Submitted {} branch sync tasks for project {}",
            submitted, project_uuid
        );
        Ok(submitted)
    }

    /// Delete pending and completed sync tasks, with their characteristics.
    fn remove_sync_tasks(&self, project_uuid: Option<&str>) -> Result<()> {
        let pending = match project_uuid {
            Some(project) => self
                .queue_store
                .select_pending_tasks_by_type_and_project(SYNC_TASK_TYPE, project)?,
            None => self
                .queue_store
                .select_pending_tasks_by_type(SYNC_TASK_TYPE)?,
        };
        let pending_uuids: Vec<String> = pending.into_iter().map(|task| task.uuid).collect();
        for uuid in &pending_uuids {
            self.queue_store.delete_task_by_uuid(uuid)?;
        }
        self.queue_store
            .delete_characteristics_by_task_uuids(&pending_uuids)?;
        info!("{} pending sync tasks removed", pending_uuids.len());

        let completed = match project_uuid {
            Some(project) => self
                .queue_store
                .select_completed_tasks_by_type_and_project(SYNC_TASK_TYPE, project)?,
            None => self
                .queue_store
                .select_completed_tasks_by_type(SYNC_TASK_TYPE)?,
        };
        let completed_uuids: Vec<String> = completed.into_iter().map(|task| task.uuid).collect();
        self.queue_store.delete_tasks_by_uuids(&completed_uuids)?;
        self.queue_store
            .delete_characteristics_by_task_uuids(&completed_uuids)?;
        info!("{} completed sync tasks removed", completed_uuids.len());
        Ok(())
    }

    fn sort_by_last_analysis(&self, branches: Vec<Branch>) -> Result<Vec<Branch>> {
        // Projects in order of first appearance, with their branches
        let mut project_order: Vec<String> = Vec::new();
        let mut by_project: HashMap<String, Vec<Branch>> = HashMap::new();
        for branch in branches {
            if !by_project.contains_key(&branch.project_uuid) {
                project_order.push(branch.project_uuid.clone());
            }
            by_project
                .entry(branch.project_uuid.clone())
                .or_default()
                .push(branch);
        }

        let last_analysis = self
            .analysis_store
            .select_last_analysis_timestamp_per_project(&project_order)?;
        order_projects(&mut project_order, &last_analysis);

        Ok(project_order
            .iter()
            .filter_map(|project| by_project.remove(project))
            .flatten()
            .collect())
    }

    fn submit(&self, branches: &[Branch]) -> Result<usize> {
        if branches.is_empty() {
            return Ok(0);
        }
        let tasks = branches.iter().map(sync_task).collect::<Vec<_>>();
        let uuids = self.task_queue.mass_submit(tasks)?;
        Ok(uuids.len())
    }
}

/// Most recently analysed first; never analysed projects last, in their original order.
fn order_projects(projects: &mut [String], last_analysis: &HashMap<String, i64>) {
    projects.sort_by(|a, b| {
        match (last_analysis.get(a), last_analysis.get(b)) {
            (Some(ta), Some(tb)) => tb.cmp(ta),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        }
    });
}

fn sync_task(branch: &Branch) -> TaskSubmit {
    let key_characteristic = match branch.branch_type {
        BranchType::Branch => BRANCH,
        BranchType::PullRequest => PULL_REQUEST,
    };
    TaskSubmit::new(SYNC_TASK_TYPE)
        .with_component(&branch.uuid, &branch.project_uuid)
        .with_characteristic(key_characteristic, &branch.key)
        .with_characteristic(BRANCH_TYPE, branch.branch_type.as_db_str())
}
