//! Database schema for queue.db.

use crate::sqlite_column;
use crate::sqlite_persistence::{Column, SqlType, Table, VersionedSchema};

/// Tasks waiting to be processed or being processed
const QUEUE_TABLE_V1: Table = Table {
    name: "task_queue",
    columns: &[
        sqlite_column!("uuid", &SqlType::Text, is_primary_key = true),
        sqlite_column!("task_type", &SqlType::Text, non_null = true),
        sqlite_column!("component_uuid", &SqlType::Text),
        sqlite_column!("entity_uuid", &SqlType::Text),
        sqlite_column!("status", &SqlType::Text, non_null = true),
        sqlite_column!("submitter_uuid", &SqlType::Text),
        sqlite_column!("created_at", &SqlType::Integer, non_null = true),
        sqlite_column!("started_at", &SqlType::Integer),
    ],
    indices: &[
        ("idx_queue_type_status", "task_type, status"),
        ("idx_queue_entity", "entity_uuid"),
    ],
    unique_constraints: &[],
};

/// Tasks that left the queue, with their outcome
const ACTIVITY_TABLE_V1: Table = Table {
    name: "task_activity",
    columns: &[
        sqlite_column!("uuid", &SqlType::Text, is_primary_key = true),
        sqlite_column!("task_type", &SqlType::Text, non_null = true),
        sqlite_column!("component_uuid", &SqlType::Text),
        sqlite_column!("entity_uuid", &SqlType::Text),
        sqlite_column!("status", &SqlType::Text, non_null = true),
        sqlite_column!("error_type", &SqlType::Text),
        sqlite_column!("error_message", &SqlType::Text),
        sqlite_column!("submitted_at", &SqlType::Integer, non_null = true),
        sqlite_column!("executed_at", &SqlType::Integer, non_null = true),
        sqlite_column!("execution_time_ms", &SqlType::Integer, non_null = true),
    ],
    indices: &[
        ("idx_activity_type_status", "task_type, status"),
        ("idx_activity_entity", "entity_uuid"),
    ],
    unique_constraints: &[],
};

/// Free-form key/value metadata of queued and finished tasks
const CHARACTERISTICS_TABLE_V1: Table = Table {
    name: "task_characteristics",
    columns: &[
        sqlite_column!("task_uuid", &SqlType::Text, non_null = true),
        sqlite_column!("kee", &SqlType::Text, non_null = true),
        sqlite_column!("text_value", &SqlType::Text),
    ],
    indices: &[("idx_characteristics_task", "task_uuid")],
    unique_constraints: &[&["task_uuid", "kee"]],
};

pub const QUEUE_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 1,
    tables: &[QUEUE_TABLE_V1, ACTIVITY_TABLE_V1, CHARACTERISTICS_TABLE_V1],
    migration: None,
}];
