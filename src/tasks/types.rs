use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::priority::{Effort, Priority, Value};

pub const STATUS_LABEL_PREFIX: &str = "status: ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Backlog,
    UpNext,
    InProgress,
    Review,
    ReadyToShip,
    /// Terminal; reached when the linked issue is closed on the tracker.
    Done,
}

impl TaskStatus {
    fn rank(self) -> u8 {
        match self {
            TaskStatus::Backlog => 0,
            TaskStatus::UpNext => 1,
            TaskStatus::InProgress => 2,
            TaskStatus::Review => 3,
            TaskStatus::ReadyToShip => 4,
            TaskStatus::Done => 5,
        }
    }

    /// Statuses only move forward, except the review rollback.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        next.rank() > self.rank() || (self == TaskStatus::Review && next == TaskStatus::InProgress)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Backlog => "backlog",
            TaskStatus::UpNext => "up_next",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Review => "review",
            TaskStatus::ReadyToShip => "ready_to_ship",
            TaskStatus::Done => "done",
        }
    }

    /// Tracker label for this status. `Done` is expressed by closing the issue.
    pub fn label(self) -> Option<String> {
        let slug = match self {
            TaskStatus::Backlog => "backlog",
            TaskStatus::UpNext => "up-next",
            TaskStatus::InProgress => "in-progress",
            TaskStatus::Review => "review",
            TaskStatus::ReadyToShip => "ready-to-ship",
            TaskStatus::Done => return None,
        };
        Some(format!("{STATUS_LABEL_PREFIX}{slug}"))
    }

    pub fn from_labels(labels: &[impl AsRef<str>]) -> Option<Self> {
        labels.iter().find_map(|l| {
            match l.as_ref().strip_prefix(STATUS_LABEL_PREFIX)? {
                "backlog" => Some(TaskStatus::Backlog),
                "up-next" => Some(TaskStatus::UpNext),
                "in-progress" => Some(TaskStatus::InProgress),
                "review" => Some(TaskStatus::Review),
                "ready-to-ship" => Some(TaskStatus::ReadyToShip),
                _ => None,
            }
        })
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerRef {
    pub issue_number: u64,
    pub url: String,
    /// Remote `updated_at` observed at the last successful sync.
    pub remote_updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    #[default]
    Pending,
    Synced,
    Conflict,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMeta {
    pub last_synced_at: Option<DateTime<Utc>>,
    pub status: SyncStatus,
    pub last_local_modified_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestRef {
    pub number: u64,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub effort: Option<Effort>,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub workspace_path: Option<PathBuf>,
    #[serde(default)]
    pub tracker: Option<TrackerRef>,
    pub sync: SyncMeta,
    #[serde(default)]
    pub review_feedback: Option<String>,
    #[serde(default)]
    pub pull_request: Option<PullRequestRef>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(id: impl Into<String>, title: impl Into<String>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            title: title.into(),
            description: description.into(),
            status: TaskStatus::Backlog,
            priority: Priority::default(),
            effort: None,
            value: None,
            branch: None,
            workspace_path: None,
            tracker: None,
            sync: SyncMeta {
                last_synced_at: None,
                status: SyncStatus::Pending,
                last_local_modified_at: now,
            },
            review_feedback: None,
            pull_request: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Record a local edit that the next sync pass must push.
    pub fn touch(&mut self) {
        let now = Utc::now();
        self.updated_at = now;
        self.sync.last_local_modified_at = now;
        if self.sync.status == SyncStatus::Synced {
            self.sync.status = SyncStatus::Pending;
        }
    }

    pub fn changed_since_sync(&self) -> bool {
        match self.sync.last_synced_at {
            Some(synced) => self.sync.last_local_modified_at > synced,
            None => true,
        }
    }

    pub fn issue_number(&self) -> Option<u64> {
        self.tracker.as_ref().map(|t| t.issue_number)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
    Killed,
}

/// One agent run for a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Execution {
    pub id: String,
    pub task_id: String,
    pub status: ExecutionStatus,
    pub parent_id: Option<String>,
    pub tokens_used: Option<u64>,
    pub duration_ms: Option<u64>,
    pub working_dir: PathBuf,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Execution {
    pub fn start(task_id: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            task_id: task_id.into(),
            status: ExecutionStatus::Running,
            parent_id: None,
            tokens_used: None,
            duration_ms: None,
            working_dir: working_dir.into(),
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    pub fn finish(&mut self, status: ExecutionStatus) {
        let now = Utc::now();
        self.status = status;
        self.ended_at = Some(now);
        self.duration_ms = Some((now - self.started_at).num_milliseconds().max(0) as u64);
    }
}
