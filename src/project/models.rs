use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BranchType {
    Branch,
    PullRequest,
}

impl BranchType {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            BranchType::Branch => "BRANCH",
            BranchType::PullRequest => "PULL_REQUEST",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "BRANCH" => Some(BranchType::Branch),
            "PULL_REQUEST" => Some(BranchType::PullRequest),
            _ => None,
        }
    }
}

/// An analysed branch or pull request of a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    pub uuid: String,
    pub project_uuid: String,
    pub branch_type: BranchType,
    /// Branch name, or pull request id.
    pub key: String,
    /// Whether the branch must be resynchronized with the search index.
    pub needs_sync: bool,
}

impl Branch {
    pub fn new(
        uuid: impl Into<String>,
        project_uuid: impl Into<String>,
        branch_type: BranchType,
        key: impl Into<String>,
    ) -> Self {
        Self {
            uuid: uuid.into(),
            project_uuid: project_uuid.into(),
            branch_type,
            key: key.into(),
            needs_sync: false,
        }
    }
}
