//! Reports how long a reindexing run took once all its sync tasks are done.

use crate::queue::QueueStore;
use crate::task::SYNC_TASK_TYPE;
use crate::telemetry::TelemetryClient;
use anyhow::Result;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_secs(5);

/// Summary uploaded once a reindexing run is over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReindexTelemetry {
    /// Milliseconds between the trigger and the last sync task leaving the queue
    pub duration: u64,
    pub task_total_count: usize,
    pub failure_count: usize,
}

struct MonitoringCycle {
    cancel_token: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct ReindexMonitor {
    enabled: bool,
    interval: Duration,
    queue_store: Arc<dyn QueueStore>,
    telemetry: Arc<dyn TelemetryClient>,
    runtime: Handle,
    current: Mutex<Option<MonitoringCycle>>,
}

impl ReindexMonitor {
    /// Must be called from within a tokio runtime; cycles are spawned on it.
    pub fn new(
        enabled: bool,
        interval: Duration,
        queue_store: Arc<dyn QueueStore>,
        telemetry: Arc<dyn TelemetryClient>,
    ) -> Self {
        Self {
            enabled,
            interval,
            queue_store,
            telemetry,
            runtime: Handle::current(),
            current: Mutex::new(None),
        }
    }

    /// Start watching the `task_count` sync tasks just submitted.
    ///
    /// A cycle still running from a previous call is cancelled without waiting for it.
    pub fn start_monitoring(&self, task_count: usize) {
        if !self.enabled {
            debug!("Reindex telemetry disabled, not monitoring {} tasks", task_count);
            return;
        }

        let start = Instant::now();
        let cancel_token = CancellationToken::new();
        let handle = self.runtime.spawn(monitor_cycle(
            start,
            task_count,
            self.interval,
            self.queue_store.clone(),
            self.telemetry.clone(),
            cancel_token.clone(),
        ));

        let previous = self
            .current
            .lock()
            .unwrap()
            .replace(MonitoringCycle {
                cancel_token,
                handle,
            });
        if let Some(previous) = previous {
            debug!("Cancelling previous reindex monitoring cycle");
            previous.cancel_token.cancel();
        }
        info!("Monitoring completion of {} sync tasks", task_count);
    }

    /// Whether a monitoring cycle is still waiting for tasks to finish.
    pub fn is_monitoring(&self) -> bool {
        self.current
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|cycle| !cycle.handle.is_finished())
    }

    /// Cancel the running cycle, if any.
    pub fn stop(&self) {
        if let Some(cycle) = self.current.lock().unwrap().take() {
            cycle.cancel_token.cancel();
        }
    }
}

async fn monitor_cycle(
    start: Instant,
    task_count: usize,
    interval: Duration,
    queue_store: Arc<dyn QueueStore>,
    telemetry: Arc<dyn TelemetryClient>,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                debug!("Reindex monitoring cycle cancelled");
                return;
            }
            _ = ticker.tick() => {}
        }

        // Queue queries block on SQLite
        let store = queue_store.clone();
        let checked =
            tokio::task::spawn_blocking(move || check_completion(start, task_count, store.as_ref()))
                .await;
        let summary = match checked {
            Ok(Ok(Some(summary))) => summary,
            Ok(Ok(None)) => continue,
            Ok(Err(e)) => {
                warn!("Failed to check reindexing progress: {:#}", e);
                continue;
            }
            Err(e) => {
                warn!("Reindexing progress check panicked: {}", e);
                continue;
            }
        };

        info!(
            "Reindexing of {} branches finished in {} ms with {} failures",
            summary.task_total_count, summary.duration, summary.failure_count
        );
        match serde_json::to_string(&summary) {
            Ok(payload) => {
                if let Err(e) = telemetry.upload_metric(payload).await {
                    debug!("Failed to upload reindexing telemetry: {:#}", e);
                }
            }
            Err(e) => debug!("Failed to serialize reindexing telemetry: {}", e),
        }
        return;
    }
}

fn check_completion(
    start: Instant,
    task_count: usize,
    queue_store: &dyn QueueStore,
) -> Result<Option<ReindexTelemetry>> {
    if queue_store.has_any_task_pending_or_in_progress(SYNC_TASK_TYPE)? {
        return Ok(None);
    }
    let failure_count = queue_store.count_failed_or_cancelled_tasks_by_type(SYNC_TASK_TYPE)?;
    Ok(Some(ReindexTelemetry {
        duration: start.elapsed().as_millis() as u64,
        task_total_count: task_count,
        failure_count,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{
        ActivityRecord, ActivityStatus, QueuedTask, SqliteQueueStore, TaskOutcome, TaskQueue,
        TaskSubmit,
    };
    use crate::telemetry::RecordingTelemetryClient;
    use std::thread::ThreadId;

    const TICK: Duration = Duration::from_millis(10);

    async fn wait_for_payloads(client: &RecordingTelemetryClient, count: usize) -> Vec<String> {
        for _ in 0..200 {
            let payloads = client.payloads();
            if payloads.len() >= count {
                return payloads;
            }
            tokio::time::sleep(TICK).await;
        }
        client.payloads()
    }

    fn monitor(
        enabled: bool,
        store: Arc<SqliteQueueStore>,
        client: Arc<RecordingTelemetryClient>,
    ) -> ReindexMonitor {
        ReindexMonitor::new(enabled, TICK, store, client)
    }

    #[test]
    fn test_message_field_names() {
        let json = serde_json::to_value(ReindexTelemetry {
            duration: 1200,
            task_total_count: 4,
            failure_count: 1,
        })
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!({"duration": 1200, "taskTotalCount": 4, "failureCount": 1})
        );
    }

    #[tokio::test]
    async fn test_emits_once_after_tasks_leave_queue() {
        let store = Arc::new(SqliteQueueStore::in_memory().unwrap());
        store
            .mass_submit(vec![TaskSubmit::new("SYNC"), TaskSubmit::new("SYNC")])
            .unwrap();
        let client = Arc::new(RecordingTelemetryClient::new());
        let monitor = monitor(true, store.clone(), client.clone());

        monitor.start_monitoring(2);
        tokio::time::sleep(TICK * 5).await;
        assert!(client.payloads().is_empty());
        assert!(monitor.is_monitoring());

        let first = store.claim_next_pending().unwrap().unwrap();
        store.finish_task(&first.uuid, &TaskOutcome::success(3)).unwrap();
        let second = store.claim_next_pending().unwrap().unwrap();
        store
            .finish_task(
                &second.uuid,
                &TaskOutcome::failure(ActivityStatus::Failed, None, "boom", 3),
            )
            .unwrap();

        let payloads = wait_for_payloads(&client, 1).await;
        assert_eq!(payloads.len(), 1);
        let message: serde_json::Value = serde_json::from_str(&payloads[0]).unwrap();
        assert_eq!(message["taskTotalCount"], 2);
        assert_eq!(message["failureCount"], 1);
        assert!(message["duration"].as_u64().unwrap() >= 50);

        tokio::time::sleep(TICK * 5).await;
        assert_eq!(client.payloads().len(), 1);
        assert!(!monitor.is_monitoring());
    }

    #[tokio::test]
    async fn test_restart_cancels_previous_cycle() {
        let store = Arc::new(SqliteQueueStore::in_memory().unwrap());
        let client = Arc::new(RecordingTelemetryClient::new());
        let monitor = monitor(true, store, client.clone());

        monitor.start_monitoring(5);
        monitor.start_monitoring(3);

        let payloads = wait_for_payloads(&client, 1).await;
        tokio::time::sleep(TICK * 5).await;
        assert_eq!(client.payloads().len(), 1);
        let message: serde_json::Value = serde_json::from_str(&payloads[0]).unwrap();
        assert_eq!(message["taskTotalCount"], 3);
    }

    #[tokio::test]
    async fn test_disabled_monitor_does_nothing() {
        let store = Arc::new(SqliteQueueStore::in_memory().unwrap());
        let client = Arc::new(RecordingTelemetryClient::new());
        let monitor = monitor(false, store, client.clone());

        monitor.start_monitoring(1);
        tokio::time::sleep(TICK * 5).await;
        assert!(client.payloads().is_empty());
        assert!(!monitor.is_monitoring());
    }

    #[tokio::test]
    async fn test_upload_failure_is_swallowed() {
        let store = Arc::new(SqliteQueueStore::in_memory().unwrap());
        let client = Arc::new(RecordingTelemetryClient::failing());
        let monitor = monitor(true, store, client.clone());

        monitor.start_monitoring(0);
        let payloads = wait_for_payloads(&client, 1).await;
        assert_eq!(payloads.len(), 1);

        tokio::time::sleep(TICK * 5).await;
        // The cycle ends after a failed upload instead of retrying
        assert_eq!(client.payloads().len(), 1);
    }

    #[tokio::test]
    async fn test_stop_cancels_cycle() {
        let store = Arc::new(SqliteQueueStore::in_memory().unwrap());
        store.mass_submit(vec![TaskSubmit::new("SYNC")]).unwrap();
        let client = Arc::new(RecordingTelemetryClient::new());
        let monitor = monitor(true, store.clone(), client.clone());

        monitor.start_monitoring(1);
        monitor.stop();
        let task = store.claim_next_pending().unwrap().unwrap();
        store.finish_task(&task.uuid, &TaskOutcome::success(1)).unwrap();

        tokio::time::sleep(TICK * 5).await;
        assert!(client.payloads().is_empty());
        assert!(!monitor.is_monitoring());
    }

    /// Empty queue that remembers which threads queried it.
    struct ThreadTrackingStore {
        threads: Mutex<Vec<ThreadId>>,
    }

    impl ThreadTrackingStore {
        fn record_thread(&self) {
            self.threads.lock().unwrap().push(std::thread::current().id());
        }
    }

    impl QueueStore for ThreadTrackingStore {
        fn select_pending_tasks_by_type(&self, _task_type: &str) -> Result<Vec<QueuedTask>> {
            Ok(Vec::new())
        }

        fn select_pending_tasks_by_type_and_project(
            &self,
            _task_type: &str,
            _project_uuid: &str,
        ) -> Result<Vec<QueuedTask>> {
            Ok(Vec::new())
        }

        fn select_completed_tasks_by_type(&self, _task_type: &str) -> Result<Vec<ActivityRecord>> {
            Ok(Vec::new())
        }

        fn select_completed_tasks_by_type_and_project(
            &self,
            _task_type: &str,
            _project_uuid: &str,
        ) -> Result<Vec<ActivityRecord>> {
            Ok(Vec::new())
        }

        fn delete_task_by_uuid(&self, _task_uuid: &str) -> Result<bool> {
            Ok(false)
        }

        fn delete_tasks_by_uuids(&self, _task_uuids: &[String]) -> Result<usize> {
            Ok(0)
        }

        fn delete_characteristics_by_task_uuids(&self, _task_uuids: &[String]) -> Result<usize> {
            Ok(0)
        }

        fn count_failed_or_cancelled_tasks_by_type(&self, _task_type: &str) -> Result<usize> {
            self.record_thread();
            Ok(0)
        }

        fn has_any_task_pending_or_in_progress(&self, _task_type: &str) -> Result<bool> {
            self.record_thread();
            Ok(false)
        }
    }

    #[tokio::test]
    async fn test_queue_is_queried_off_the_runtime_thread() {
        let store = Arc::new(ThreadTrackingStore {
            threads: Mutex::new(Vec::new()),
        });
        let client = Arc::new(RecordingTelemetryClient::new());
        let monitor = ReindexMonitor::new(true, TICK, store.clone(), client.clone());

        monitor.start_monitoring(1);
        assert_eq!(wait_for_payloads(&client, 1).await.len(), 1);

        // The test runtime runs every async task on this thread
        let runtime_thread = std::thread::current().id();
        let threads = store.threads.lock().unwrap().clone();
        assert_eq!(threads.len(), 2);
        assert!(threads.iter().all(|thread| *thread != runtime_thread));
    }
}
