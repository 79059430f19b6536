//! Database schema for project.db.

use crate::sqlite_column;
use crate::sqlite_persistence::{Column, SqlType, Table, VersionedSchema, DEFAULT_TIMESTAMP};

const BRANCHES_TABLE_V1: Table = Table {
    name: "branches",
    columns: &[
        sqlite_column!("uuid", &SqlType::Text, is_primary_key = true),
        sqlite_column!("project_uuid", &SqlType::Text, non_null = true),
        sqlite_column!("branch_type", &SqlType::Text, non_null = true),
        sqlite_column!("kee", &SqlType::Text, non_null = true),
        sqlite_column!(
            "need_sync",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!(
            "updated_at",
            &SqlType::Integer,
            non_null = true,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
    ],
    indices: &[
        ("idx_branches_project", "project_uuid"),
        ("idx_branches_need_sync", "need_sync"),
    ],
    unique_constraints: &[&["project_uuid", "branch_type", "kee"]],
};

/// One row per analysis run, `created_at` in unix milliseconds
const ANALYSES_TABLE_V1: Table = Table {
    name: "analyses",
    columns: &[
        sqlite_column!("uuid", &SqlType::Text, is_primary_key = true),
        sqlite_column!("project_uuid", &SqlType::Text, non_null = true),
        sqlite_column!("created_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[("idx_analyses_project", "project_uuid, created_at")],
    unique_constraints: &[],
};

pub const PROJECT_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 1,
    tables: &[BRANCHES_TABLE_V1, ANALYSES_TABLE_V1],
    migration: None,
}];
