use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Registered task worktree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    pub task_source: String,
    pub task_id: String,
    pub path: PathBuf,
    pub branch: String,
    pub base_branch: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub pending_cleanup: bool,
    /// Overrides the manager-wide retention when set.
    #[serde(default)]
    pub retention_days: Option<u32>,
}

impl Workspace {
    pub fn key(&self) -> String {
        registry_key(&self.task_source, &self.task_id)
    }
}

pub fn registry_key(task_source: &str, task_id: &str) -> String {
    format!("{task_source}:{task_id}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanupPolicy {
    pub retention_days: u32,
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "detail")]
pub enum CleanupOutcome {
    /// Worktree deleted and record dropped.
    Removed,
    /// Directory was already gone; record dropped.
    Cleaned,
    SkippedRunning,
    SkippedDirty(String),
    WouldRemove,
    WouldClean,
    Failed(String),
}

impl CleanupOutcome {
    pub fn is_skip(&self) -> bool {
        matches!(self, CleanupOutcome::SkippedRunning | CleanupOutcome::SkippedDirty(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupEntry {
    pub task_id: String,
    pub path: PathBuf,
    pub outcome: CleanupOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub dry_run: bool,
    pub entries: Vec<CleanupEntry>,
}

impl CleanupReport {
    pub fn count(&self, outcome: &CleanupOutcome) -> usize {
        self.entries.iter().filter(|e| &e.outcome == outcome).count()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OrphanReport {
    pub dry_run: bool,
    pub orphans: Vec<PathBuf>,
    pub removed: Vec<PathBuf>,
    pub errors: Vec<String>,
}

/// Returned when removal is deferred to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeferredCleanup {
    pub path: PathBuf,
    pub branch: String,
    pub instructions: String,
}
