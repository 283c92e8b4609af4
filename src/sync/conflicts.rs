use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::fs::{read_json, write_json_locked, FsError};
use crate::github::{IssueState, TrackerIssue};
use crate::tasks::{Task, TaskStatus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalSnapshot {
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub modified_at: DateTime<Utc>,
}

impl From<&Task> for LocalSnapshot {
    fn from(task: &Task) -> Self {
        Self {
            title: task.title.clone(),
            description: task.description.clone(),
            status: task.status,
            modified_at: task.sync.last_local_modified_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSnapshot {
    pub issue_number: u64,
    pub title: String,
    pub body: String,
    pub state: IssueState,
    pub labels: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

impl From<&TrackerIssue> for RemoteSnapshot {
    fn from(issue: &TrackerIssue) -> Self {
        Self {
            issue_number: issue.number,
            title: issue.title.clone(),
            body: issue.body.clone(),
            state: issue.state,
            labels: issue.labels.clone(),
            updated_at: issue.updated_at,
        }
    }
}

/// Both sides changed since the last successful sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConflict {
    pub task_id: String,
    pub local: LocalSnapshot,
    pub remote: RemoteSnapshot,
    pub detected_at: DateTime<Utc>,
}

/// Unresolved conflicts, optionally persisted so a later process can resolve them.
#[derive(Debug, Default)]
pub struct ConflictLog {
    path: Option<PathBuf>,
    entries: Mutex<BTreeMap<String, SyncConflict>>,
    write_lock: tokio::sync::Mutex<()>,
}

impl ConflictLog {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn open(path: impl Into<PathBuf>) -> Result<Self, FsError> {
        let path = path.into();
        let entries: BTreeMap<String, SyncConflict> = read_json(&path)?.unwrap_or_default();
        Ok(Self {
            path: Some(path),
            entries: Mutex::new(entries),
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, SyncConflict>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, task_id: &str) -> Option<SyncConflict> {
        self.lock().get(task_id).cloned()
    }

    pub fn all(&self) -> Vec<SyncConflict> {
        self.lock().values().cloned().collect()
    }

    pub async fn insert(&self, conflict: SyncConflict) -> Result<(), FsError> {
        let _write = self.write_lock.lock().await;
        let snapshot = {
            let mut entries = self.lock();
            entries.insert(conflict.task_id.clone(), conflict);
            entries.clone()
        };
        self.persist(snapshot).await
    }

    pub async fn remove(&self, task_id: &str) -> Result<Option<SyncConflict>, FsError> {
        let _write = self.write_lock.lock().await;
        let (removed, snapshot) = {
            let mut entries = self.lock();
            let removed = entries.remove(task_id);
            (removed, entries.clone())
        };
        if removed.is_some() {
            self.persist(snapshot).await?;
        }
        Ok(removed)
    }

    async fn persist(&self, snapshot: BTreeMap<String, SyncConflict>) -> Result<(), FsError> {
        let Some(path) = self.path.clone() else {
            return Ok(());
        };
        tokio::task::spawn_blocking(move || write_json_locked(&path, &snapshot))
            .await
            .map_err(|e| FsError::Io {
                path: "conflict log".to_string(),
                message: e.to_string(),
            })?
    }
}
