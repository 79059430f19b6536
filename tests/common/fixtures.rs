//! Test fixture creation for the project and queue databases

use super::constants::*;
use super::telemetry::RecordingTelemetryClient;
use analysis_task_engine::project::{AnalysisStore, Branch, BranchStore, BranchType};
use analysis_task_engine::reindex::{
    BranchSyncProcessor, LoggingBranchIndexer, ReindexMonitor, ReindexScheduler,
};
use analysis_task_engine::task::{create_interrupter, ActiveTasks};
use analysis_task_engine::{SqliteProjectStore, SqliteQueueStore, TaskWorker};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Stores, scheduler and worker wired together over databases in a temp dir.
pub struct TestEngine {
    pub dir: TempDir,
    pub queue: Arc<SqliteQueueStore>,
    pub projects: Arc<SqliteProjectStore>,
    pub telemetry: Arc<RecordingTelemetryClient>,
    pub scheduler: ReindexScheduler,
    pub worker: TaskWorker,
}

impl TestEngine {
    /// Must be called from within a tokio runtime.
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let queue = Arc::new(SqliteQueueStore::new(dir.path().join("queue.db")).unwrap());
        let projects = Arc::new(SqliteProjectStore::new(dir.path().join("project.db")).unwrap());
        let telemetry = Arc::new(RecordingTelemetryClient::new());

        let monitor = Arc::new(ReindexMonitor::new(
            true,
            Duration::from_millis(MONITOR_TICK_MS),
            queue.clone(),
            telemetry.clone(),
        ));
        let scheduler = ReindexScheduler::new(
            projects.clone(),
            projects.clone(),
            queue.clone(),
            queue.clone(),
        )
        .with_monitor(monitor);

        let active_tasks = Arc::new(ActiveTasks::new());
        let interrupter = create_interrupter(active_tasks.clone(), None);
        let worker = TaskWorker::new(
            queue.clone(),
            active_tasks,
            interrupter,
            Duration::from_millis(MONITOR_TICK_MS),
        )
        .with_processor(Arc::new(BranchSyncProcessor::new(
            projects.clone(),
            Arc::new(LoggingBranchIndexer),
        )));

        Self {
            dir,
            queue,
            projects,
            telemetry,
            scheduler,
            worker,
        }
    }

    /// Three projects: A analysed on day 2 with a branch and a pull request,
    /// B analysed on day 1, C never analysed. C's branch is inserted first.
    pub fn with_projects() -> Self {
        let engine = Self::new();
        let branches = [
            Branch::new(C_MAIN, PROJECT_C, BranchType::Branch, "main"),
            Branch::new(B_MAIN, PROJECT_B, BranchType::Branch, "main"),
            Branch::new(A_MAIN, PROJECT_A, BranchType::Branch, "main"),
            Branch::new(A_PR, PROJECT_A, BranchType::PullRequest, "12"),
        ];
        for branch in &branches {
            engine.projects.insert_branch(branch).unwrap();
        }
        engine
            .projects
            .insert_analysis("analysis-b", PROJECT_B, DAY_MS)
            .unwrap();
        engine
            .projects
            .insert_analysis("analysis-a", PROJECT_A, 2 * DAY_MS)
            .unwrap();
        engine
    }

    /// Process queued tasks until the queue is empty. Returns how many ran.
    pub async fn drain_queue(&self) -> usize {
        let mut processed = 0;
        while self.worker.process_next().await.unwrap() {
            processed += 1;
        }
        processed
    }

    /// Wait up to two seconds for `count` telemetry messages.
    pub async fn wait_for_telemetry(&self, count: usize) -> Vec<serde_json::Value> {
        for _ in 0..200 {
            if self.telemetry.payloads().len() >= count {
                break;
            }
            tokio::time::sleep(Duration::from_millis(MONITOR_TICK_MS)).await;
        }
        self.telemetry
            .payloads()
            .iter()
            .map(|payload| serde_json::from_str(payload).unwrap())
            .collect()
    }
}
