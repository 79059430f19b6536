//! Task queue and activity storage.
//!
//! Provides SQLite-backed storage for queued tasks, their characteristics and
//! the activity records of finished tasks.

use super::models::*;
use super::schema::QUEUE_VERSIONED_SCHEMAS;
use crate::sqlite_persistence::{in_list_placeholders, open_with_schemas, IN_LIST_BATCH_SIZE};
use anyhow::{bail, Context, Result};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Transaction};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Submission and consumption side of the task queue.
pub trait TaskQueue: Send + Sync {
    /// Enqueue all tasks in one transaction. Either every task is queued or none is.
    /// Returns the generated task uuids, in submission order.
    fn mass_submit(&self, tasks: Vec<TaskSubmit>) -> Result<Vec<String>>;

    /// Atomically move the oldest pending task to IN_PROGRESS and return it.
    fn claim_next_pending(&self) -> Result<Option<QueuedTask>>;

    /// Characteristics attached to a task, queued or finished.
    fn select_characteristics(&self, task_uuid: &str) -> Result<BTreeMap<String, String>>;

    /// Move a task from the queue to the activity table with its outcome.
    fn finish_task(&self, task_uuid: &str, outcome: &TaskOutcome) -> Result<()>;

    /// Put tasks left IN_PROGRESS by a previous process back to PENDING.
    fn requeue_in_progress(&self) -> Result<usize>;

    /// Put one IN_PROGRESS task back to PENDING. Returns false if it wasn't in progress.
    fn requeue_task(&self, task_uuid: &str) -> Result<bool>;

    fn get_activity(&self, task_uuid: &str) -> Result<Option<ActivityRecord>>;
}

/// Read and cleanup access to queued and finished tasks, by task type.
pub trait QueueStore: Send + Sync {
    /// Queued tasks of the given type that have not started yet.
    fn select_pending_tasks_by_type(&self, task_type: &str) -> Result<Vec<QueuedTask>>;

    /// Same as [`QueueStore::select_pending_tasks_by_type`], restricted to one project.
    fn select_pending_tasks_by_type_and_project(
        &self,
        task_type: &str,
        project_uuid: &str,
    ) -> Result<Vec<QueuedTask>>;

    /// Finished tasks of the given type, whatever their status.
    fn select_completed_tasks_by_type(&self, task_type: &str) -> Result<Vec<ActivityRecord>>;

    fn select_completed_tasks_by_type_and_project(
        &self,
        task_type: &str,
        project_uuid: &str,
    ) -> Result<Vec<ActivityRecord>>;

    /// Remove one task from the queue. Returns false if it wasn't queued.
    fn delete_task_by_uuid(&self, task_uuid: &str) -> Result<bool>;

    /// Remove finished tasks from the activity table.
    fn delete_tasks_by_uuids(&self, task_uuids: &[String]) -> Result<usize>;

    fn delete_characteristics_by_task_uuids(&self, task_uuids: &[String]) -> Result<usize>;

    fn count_failed_or_cancelled_tasks_by_type(&self, task_type: &str) -> Result<usize>;

    fn has_any_task_pending_or_in_progress(&self, task_type: &str) -> Result<bool>;
}

/// SQLite-backed queue and activity store.
pub struct SqliteQueueStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteQueueStore {
    /// Opens an existing database or creates a new one with the current schema.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open queue database at {:?}", path))?;
        open_with_schemas(&conn, QUEUE_VERSIONED_SCHEMAS, "queue")?;
        info!("Opened queue database at {:?}", path);

        Ok(SqliteQueueStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory store for testing.
    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        open_with_schemas(&conn, QUEUE_VERSIONED_SCHEMAS, "queue")?;
        Ok(SqliteQueueStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn row_to_queued_task(row: &rusqlite::Row) -> rusqlite::Result<QueuedTask> {
        Ok(QueuedTask {
            uuid: row.get("uuid")?,
            task_type: row.get("task_type")?,
            component_uuid: row.get("component_uuid")?,
            entity_uuid: row.get("entity_uuid")?,
            status: QueueStatus::from_db_str(&row.get::<_, String>("status")?)
                .unwrap_or(QueueStatus::Pending),
            submitter_uuid: row.get("submitter_uuid")?,
            created_at: row.get("created_at")?,
            started_at: row.get("started_at")?,
        })
    }

    fn row_to_activity(row: &rusqlite::Row) -> rusqlite::Result<ActivityRecord> {
        Ok(ActivityRecord {
            uuid: row.get("uuid")?,
            task_type: row.get("task_type")?,
            component_uuid: row.get("component_uuid")?,
            entity_uuid: row.get("entity_uuid")?,
            status: ActivityStatus::from_db_str(&row.get::<_, String>("status")?)
                .unwrap_or(ActivityStatus::Failed),
            error_type: row.get("error_type")?,
            error_message: row.get("error_message")?,
            submitted_at: row.get("submitted_at")?,
            executed_at: row.get("executed_at")?,
            execution_time_ms: row.get("execution_time_ms")?,
        })
    }

    fn insert_task(tx: &Transaction, uuid: &str, task: &TaskSubmit, now: i64) -> Result<()> {
        tx.execute(
            r#"INSERT INTO task_queue (
                uuid, task_type, component_uuid, entity_uuid, status, submitter_uuid, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
            params![
                uuid,
                task.task_type,
                task.component.as_ref().map(|c| c.uuid.as_str()),
                task.component.as_ref().map(|c| c.project_uuid.as_str()),
                QueueStatus::Pending.as_db_str(),
                task.submitter_uuid,
                now,
            ],
        )?;
        for (key, value) in &task.characteristics {
            tx.execute(
                "INSERT INTO task_characteristics (task_uuid, kee, text_value) VALUES (?1, ?2, ?3)",
                params![uuid, key, value],
            )?;
        }
        Ok(())
    }

    /// Delete the rows of `table` whose `column` is one of `uuids`, in one transaction.
    fn delete_in_batches(&self, table: &str, column: &str, uuids: &[String]) -> Result<usize> {
        if uuids.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let mut deleted = 0;
        for batch in uuids.chunks(IN_LIST_BATCH_SIZE) {
            deleted += tx.execute(
                &format!(
                    "DELETE FROM {} WHERE {} IN ({})",
                    table,
                    column,
                    in_list_placeholders(batch.len())
                ),
                params_from_iter(batch.iter()),
            )?;
        }
        tx.commit()?;
        Ok(deleted)
    }

    /// Run raw SQL against the underlying connection.
    #[cfg(test)]
    pub(crate) fn execute_raw(&self, sql: &str) -> Result<()> {
        self.conn.lock().unwrap().execute_batch(sql)?;
        Ok(())
    }

    /// Get current timestamp in seconds.
    fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }
}

impl TaskQueue for SqliteQueueStore {
    fn mass_submit(&self, tasks: Vec<TaskSubmit>) -> Result<Vec<String>> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let now = Self::now();
        let mut uuids = Vec::with_capacity(tasks.len());
        for task in &tasks {
            let uuid = uuid::Uuid::new_v4().to_string();
            Self::insert_task(&tx, &uuid, task, now)
                .with_context(|| format!("Failed to enqueue task of type {}", task.task_type))?;
            uuids.push(uuid);
        }
        tx.commit()?;
        debug!("Submitted {} tasks", uuids.len());
        Ok(uuids)
    }

    fn claim_next_pending(&self) -> Result<Option<QueuedTask>> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let next = tx
            .query_row(
                r#"SELECT * FROM task_queue
                   WHERE status = 'PENDING'
                   ORDER BY created_at ASC, rowid ASC
                   LIMIT 1"#,
                [],
                Self::row_to_queued_task,
            )
            .optional()?;

        let Some(mut task) = next else {
            return Ok(None);
        };
        let started_at = Self::now();
        tx.execute(
            "UPDATE task_queue SET status = ?1, started_at = ?2 WHERE uuid = ?3 AND status = 'PENDING'",
            params![QueueStatus::InProgress.as_db_str(), started_at, task.uuid],
        )?;
        tx.commit()?;

        task.status = QueueStatus::InProgress;
        task.started_at = Some(started_at);
        Ok(Some(task))
    }

    fn select_characteristics(&self, task_uuid: &str) -> Result<BTreeMap<String, String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT kee, text_value FROM task_characteristics WHERE task_uuid = ?1")?;
        let rows = stmt
            .query_map([task_uuid], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                ))
            })?
            .collect::<rusqlite::Result<BTreeMap<_, _>>>()?;
        Ok(rows)
    }

    fn finish_task(&self, task_uuid: &str, outcome: &TaskOutcome) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let task = tx
            .query_row(
                "SELECT * FROM task_queue WHERE uuid = ?1",
                [task_uuid],
                Self::row_to_queued_task,
            )
            .optional()?;
        let Some(task) = task else {
            bail!("Task {} is not in the queue", task_uuid);
        };

        tx.execute(
            r#"INSERT INTO task_activity (
                uuid, task_type, component_uuid, entity_uuid, status, error_type,
                error_message, submitted_at, executed_at, execution_time_ms
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"#,
            params![
                task.uuid,
                task.task_type,
                task.component_uuid,
                task.entity_uuid,
                outcome.status.as_db_str(),
                outcome.error_type,
                outcome.error_message,
                task.created_at,
                Self::now(),
                outcome.execution_time_ms,
            ],
        )?;
        tx.execute("DELETE FROM task_queue WHERE uuid = ?1", [task_uuid])?;
        tx.commit()?;
        Ok(())
    }

    fn requeue_in_progress(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count = conn.execute(
            "UPDATE task_queue SET status = 'PENDING', started_at = NULL WHERE status = 'IN_PROGRESS'",
            [],
        )?;
        Ok(count)
    }

    fn requeue_task(&self, task_uuid: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE task_queue SET status = 'PENDING', started_at = NULL WHERE uuid = ?1 AND status = 'IN_PROGRESS'",
            [task_uuid],
        )?;
        Ok(updated > 0)
    }

    fn get_activity(&self, task_uuid: &str) -> Result<Option<ActivityRecord>> {
        let conn = self.conn.lock().unwrap();
        let record = conn
            .query_row(
                "SELECT * FROM task_activity WHERE uuid = ?1",
                [task_uuid],
                Self::row_to_activity,
            )
            .optional()?;
        Ok(record)
    }
}

impl QueueStore for SqliteQueueStore {
    fn select_pending_tasks_by_type(&self, task_type: &str) -> Result<Vec<QueuedTask>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT * FROM task_queue WHERE task_type = ?1 AND status = 'PENDING' ORDER BY created_at, rowid",
        )?;
        let tasks = stmt
            .query_map([task_type], Self::row_to_queued_task)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tasks)
    }

    fn select_pending_tasks_by_type_and_project(
        &self,
        task_type: &str,
        project_uuid: &str,
    ) -> Result<Vec<QueuedTask>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"SELECT * FROM task_queue
               WHERE task_type = ?1 AND entity_uuid = ?2 AND status = 'PENDING'
               ORDER BY created_at, rowid"#,
        )?;
        let tasks = stmt
            .query_map(params![task_type, project_uuid], Self::row_to_queued_task)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tasks)
    }

    fn select_completed_tasks_by_type(&self, task_type: &str) -> Result<Vec<ActivityRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT * FROM task_activity WHERE task_type = ?1")?;
        let records = stmt
            .query_map([task_type], Self::row_to_activity)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    fn select_completed_tasks_by_type_and_project(
        &self,
        task_type: &str,
        project_uuid: &str,
    ) -> Result<Vec<ActivityRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT * FROM task_activity WHERE task_type = ?1 AND entity_uuid = ?2")?;
        let records = stmt
            .query_map(params![task_type, project_uuid], Self::row_to_activity)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    fn delete_task_by_uuid(&self, task_uuid: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute("DELETE FROM task_queue WHERE uuid = ?1", [task_uuid])?;
        Ok(deleted > 0)
    }

    fn delete_tasks_by_uuids(&self, task_uuids: &[String]) -> Result<usize> {
        self.delete_in_batches("task_activity", "uuid", task_uuids)
    }

    fn delete_characteristics_by_task_uuids(&self, task_uuids: &[String]) -> Result<usize> {
        self.delete_in_batches("task_characteristics", "task_uuid", task_uuids)
    }

    fn count_failed_or_cancelled_tasks_by_type(&self, task_type: &str) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM task_activity WHERE task_type = ?1 AND status IN ('FAILED', 'CANCELED')",
            [task_type],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn has_any_task_pending_or_in_progress(&self, task_type: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM task_queue WHERE task_type = ?1 AND status IN ('PENDING', 'IN_PROGRESS'))",
            [task_type],
            |row| row.get(0),
        )?;
        Ok(exists)
    }
}
