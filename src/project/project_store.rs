//! Branch and analysis storage backed by project.db.

use super::models::{Branch, BranchType};
use super::schema::PROJECT_VERSIONED_SCHEMAS;
use crate::sqlite_persistence::{in_list_placeholders, open_with_schemas, IN_LIST_BATCH_SIZE};
use anyhow::{Context, Result};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::info;

/// Access to the branches of all projects and their sync flag.
pub trait BranchStore: Send + Sync {
    /// Flag every branch of every project as needing sync. Returns the number of branches flagged.
    fn update_all_need_sync(&self) -> Result<usize>;

    /// Flag every branch of one project as needing sync.
    fn update_all_need_sync_for_project(&self, project_uuid: &str) -> Result<usize>;

    fn select_branches_needing_sync(&self) -> Result<Vec<Branch>>;

    fn select_branches_needing_sync_for_project(&self, project_uuid: &str) -> Result<Vec<Branch>>;

    fn insert_branch(&self, branch: &Branch) -> Result<()>;

    fn get_branch(&self, branch_uuid: &str) -> Result<Option<Branch>>;

    /// Returns false if the branch does not exist.
    fn clear_need_sync(&self, branch_uuid: &str) -> Result<bool>;
}

/// Access to the analysis history of projects.
pub trait AnalysisStore: Send + Sync {
    /// Most recent analysis timestamp (unix millis) of each given project.
    /// Projects that were never analysed are absent from the result.
    fn select_last_analysis_timestamp_per_project(
        &self,
        project_uuids: &[String],
    ) -> Result<HashMap<String, i64>>;

    fn insert_analysis(&self, analysis_uuid: &str, project_uuid: &str, created_at: i64) -> Result<()>;
}

pub struct SqliteProjectStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteProjectStore {
    /// Opens an existing database or creates a new one with the current schema.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open project database at {:?}", path))?;
        open_with_schemas(&conn, PROJECT_VERSIONED_SCHEMAS, "project")?;
        info!("Opened project database at {:?}", path);

        Ok(SqliteProjectStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        open_with_schemas(&conn, PROJECT_VERSIONED_SCHEMAS, "project")?;
        Ok(SqliteProjectStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn row_to_branch(row: &rusqlite::Row) -> rusqlite::Result<Branch> {
        let branch_type: String = row.get("branch_type")?;
        Ok(Branch {
            uuid: row.get("uuid")?,
            project_uuid: row.get("project_uuid")?,
            branch_type: BranchType::from_db_str(&branch_type).unwrap_or(BranchType::Branch),
            key: row.get("kee")?,
            needs_sync: row.get::<_, i64>("need_sync")? != 0,
        })
    }

    fn select_branches(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<Branch>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(sql)?;
        let branches = stmt
            .query_map(params, Self::row_to_branch)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(branches)
    }
}

impl BranchStore for SqliteProjectStore {
    fn update_all_need_sync(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE branches SET need_sync = 1, updated_at = ?1",
            [chrono::Utc::now().timestamp()],
        )?;
        Ok(updated)
    }

    fn update_all_need_sync_for_project(&self, project_uuid: &str) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE branches SET need_sync = 1, updated_at = ?1 WHERE project_uuid = ?2",
            params![chrono::Utc::now().timestamp(), project_uuid],
        )?;
        Ok(updated)
    }

    fn select_branches_needing_sync(&self) -> Result<Vec<Branch>> {
        self.select_branches(
            "SELECT * FROM branches WHERE need_sync = 1 ORDER BY rowid",
            &[],
        )
    }

    fn select_branches_needing_sync_for_project(&self, project_uuid: &str) -> Result<Vec<Branch>> {
        self.select_branches(
            "SELECT * FROM branches WHERE need_sync = 1 AND project_uuid = ?1 ORDER BY rowid",
            &[&project_uuid],
        )
    }

    fn insert_branch(&self, branch: &Branch) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"INSERT INTO branches (uuid, project_uuid, branch_type, kee, need_sync)
               VALUES (?1, ?2, ?3, ?4, ?5)"#,
            params![
                branch.uuid,
                branch.project_uuid,
                branch.branch_type.as_db_str(),
                branch.key,
                branch.needs_sync as i64,
            ],
        )
        .with_context(|| format!("Failed to insert branch {}", branch.uuid))?;
        Ok(())
    }

    fn get_branch(&self, branch_uuid: &str) -> Result<Option<Branch>> {
        let conn = self.conn.lock().unwrap();
        let branch = conn
            .query_row(
                "SELECT * FROM branches WHERE uuid = ?1",
                [branch_uuid],
                Self::row_to_branch,
            )
            .optional()?;
        Ok(branch)
    }

    fn clear_need_sync(&self, branch_uuid: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE branches SET need_sync = 0, updated_at = ?1 WHERE uuid = ?2",
            params![chrono::Utc::now().timestamp(), branch_uuid],
        )?;
        Ok(updated > 0)
    }
}

impl AnalysisStore for SqliteProjectStore {
    fn select_last_analysis_timestamp_per_project(
        &self,
        project_uuids: &[String],
    ) -> Result<HashMap<String, i64>> {
        let conn = self.conn.lock().unwrap();
        let mut timestamps = HashMap::new();
        for batch in project_uuids.chunks(IN_LIST_BATCH_SIZE) {
            let mut stmt = conn.prepare(&format!(
                r#"SELECT project_uuid, MAX(created_at) FROM analyses
                   WHERE project_uuid IN ({})
                   GROUP BY project_uuid"#,
                in_list_placeholders(batch.len())
            ))?;
            let rows = stmt.query_map(params_from_iter(batch.iter()), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            for row in rows {
                let (project_uuid, created_at) = row?;
                timestamps.insert(project_uuid, created_at);
            }
        }
        Ok(timestamps)
    }

    fn insert_analysis(&self, analysis_uuid: &str, project_uuid: &str, created_at: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO analyses (uuid, project_uuid, created_at) VALUES (?1, ?2, ?3)",
            params![analysis_uuid, project_uuid, created_at],
        )?;
        Ok(())
    }
}
