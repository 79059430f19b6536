use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Status of a task still in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueStatus {
    Pending,
    InProgress,
}

impl QueueStatus {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "PENDING",
            QueueStatus::InProgress => "IN_PROGRESS",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(QueueStatus::Pending),
            "IN_PROGRESS" => Some(QueueStatus::InProgress),
            _ => None,
        }
    }
}

/// Terminal status of a task, recorded in the activity table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityStatus {
    Success,
    Failed,
    Canceled,
}

impl ActivityStatus {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            ActivityStatus::Success => "SUCCESS",
            ActivityStatus::Failed => "FAILED",
            ActivityStatus::Canceled => "CANCELED",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "SUCCESS" => Some(ActivityStatus::Success),
            "FAILED" => Some(ActivityStatus::Failed),
            "CANCELED" => Some(ActivityStatus::Canceled),
            _ => None,
        }
    }
}

/// Component a submitted task works on, with the project it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedComponent {
    pub uuid: String,
    pub project_uuid: String,
}

/// Request to enqueue one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSubmit {
    pub task_type: String,
    pub component: Option<SubmittedComponent>,
    pub submitter_uuid: Option<String>,
    pub characteristics: BTreeMap<String, String>,
}

impl TaskSubmit {
    pub fn new(task_type: impl Into<String>) -> Self {
        Self {
            task_type: task_type.into(),
            component: None,
            submitter_uuid: None,
            characteristics: BTreeMap::new(),
        }
    }

    pub fn with_component(mut self, uuid: impl Into<String>, project_uuid: impl Into<String>) -> Self {
        self.component = Some(SubmittedComponent {
            uuid: uuid.into(),
            project_uuid: project_uuid.into(),
        });
        self
    }

    pub fn with_characteristic(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.characteristics.insert(key.into(), value.into());
        self
    }
}

/// A task waiting in, or being processed from, the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedTask {
    pub uuid: String,
    pub task_type: String,
    pub component_uuid: Option<String>,
    /// Uuid of the project owning the component.
    pub entity_uuid: Option<String>,
    pub status: QueueStatus,
    pub submitter_uuid: Option<String>,
    /// Unix timestamp (seconds)
    pub created_at: i64,
    pub started_at: Option<i64>,
}

/// A task that left the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub uuid: String,
    pub task_type: String,
    pub component_uuid: Option<String>,
    pub entity_uuid: Option<String>,
    pub status: ActivityStatus,
    pub error_type: Option<String>,
    pub error_message: Option<String>,
    pub submitted_at: i64,
    pub executed_at: i64,
    pub execution_time_ms: i64,
}

/// How a processed task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOutcome {
    pub status: ActivityStatus,
    pub error_type: Option<String>,
    pub error_message: Option<String>,
    pub execution_time_ms: i64,
}

impl TaskOutcome {
    pub fn success(execution_time_ms: i64) -> Self {
        Self {
            status: ActivityStatus::Success,
            error_type: None,
            error_message: None,
            execution_time_ms,
        }
    }

    pub fn failure(
        status: ActivityStatus,
        error_type: Option<String>,
        error_message: impl Into<String>,
        execution_time_ms: i64,
    ) -> Self {
        Self {
            status,
            error_type,
            error_message: Some(error_message.into()),
            execution_time_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_db_strings() {
        for status in [QueueStatus::Pending, QueueStatus::InProgress] {
            assert_eq!(QueueStatus::from_db_str(status.as_db_str()), Some(status));
        }
        for status in [
            ActivityStatus::Success,
            ActivityStatus::Failed,
            ActivityStatus::Canceled,
        ] {
            assert_eq!(ActivityStatus::from_db_str(status.as_db_str()), Some(status));
        }
        assert_eq!(QueueStatus::from_db_str("DONE"), None);
    }

    #[test]
    fn test_task_submit_builder() {
        let submit = TaskSubmit::new("SYNC")
            .with_component("b1", "p1")
            .with_characteristic("BRANCH", "main");

        assert_eq!(submit.component.as_ref().unwrap().project_uuid, "p1");
        assert_eq!(submit.characteristics.get("BRANCH").unwrap(), "main");
    }
}
