//! Projects, their branches and analysis history.

mod models;
mod project_store;
mod schema;

pub use models::{Branch, BranchType};
pub use project_store::{AnalysisStore, BranchStore, SqliteProjectStore};
pub use schema::PROJECT_VERSIONED_SCHEMAS;
