use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::debug;

use super::types::{Execution, ExecutionStatus, Task};
use crate::fs::{read_json, write_json_locked, FsError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Task not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    File(#[from] FsError),
    #[error("Storage task failed: {0}")]
    Background(String),
}

/// Backlog storage. The backlog file format lives behind this trait.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn list(&self) -> Result<Vec<Task>, StoreError>;
    async fn get(&self, id: &str) -> Result<Option<Task>, StoreError>;
    /// Insert or replace a task.
    async fn save(&self, task: &Task) -> Result<(), StoreError>;

    /// Persist buffered writes.
    async fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn require(&self, id: &str) -> Result<Task, StoreError> {
        self.get(id).await?.ok_or_else(|| StoreError::NotFound(id.to_string()))
    }
}

#[async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn list_for_task(&self, task_id: &str) -> Result<Vec<Execution>, StoreError>;
    async fn save(&self, execution: &Execution) -> Result<(), StoreError>;

    async fn has_running(&self, task_id: &str) -> Result<bool, StoreError> {
        Ok(self
            .list_for_task(task_id)
            .await?
            .iter()
            .any(|e| e.status == ExecutionStatus::Running))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    tasks: Mutex<BTreeMap<String, Task>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tasks(tasks: impl IntoIterator<Item = Task>) -> Self {
        Self {
            tasks: Mutex::new(tasks.into_iter().map(|t| (t.id.clone(), t)).collect()),
        }
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn list(&self) -> Result<Vec<Task>, StoreError> {
        Ok(lock(&self.tasks).values().cloned().collect())
    }

    async fn get(&self, id: &str) -> Result<Option<Task>, StoreError> {
        Ok(lock(&self.tasks).get(id).cloned())
    }

    async fn save(&self, task: &Task) -> Result<(), StoreError> {
        lock(&self.tasks).insert(task.id.clone(), task.clone());
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryExecutionStore {
    executions: Mutex<BTreeMap<String, Execution>>,
}

impl InMemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn list_for_task(&self, task_id: &str) -> Result<Vec<Execution>, StoreError> {
        Ok(lock(&self.executions)
            .values()
            .filter(|e| e.task_id == task_id)
            .cloned()
            .collect())
    }

    async fn save(&self, execution: &Execution) -> Result<(), StoreError> {
        lock(&self.executions).insert(execution.id.clone(), execution.clone());
        Ok(())
    }
}

/// Execution records written through to a JSON file on every save.
#[derive(Debug)]
pub struct JsonExecutionStore {
    path: PathBuf,
    executions: Mutex<BTreeMap<String, Execution>>,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonExecutionStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let executions: Vec<Execution> = read_json(&path)?.unwrap_or_default();
        Ok(Self {
            path,
            executions: Mutex::new(executions.into_iter().map(|e| (e.id.clone(), e)).collect()),
            write_lock: tokio::sync::Mutex::new(()),
        })
    }
}

#[async_trait]
impl ExecutionStore for JsonExecutionStore {
    async fn list_for_task(&self, task_id: &str) -> Result<Vec<Execution>, StoreError> {
        Ok(lock(&self.executions)
            .values()
            .filter(|e| e.task_id == task_id)
            .cloned()
            .collect())
    }

    async fn save(&self, execution: &Execution) -> Result<(), StoreError> {
        let _write = self.write_lock.lock().await;
        let snapshot: Vec<Execution> = {
            let mut executions = lock(&self.executions);
            executions.insert(execution.id.clone(), execution.clone());
            executions.values().cloned().collect()
        };
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_json_locked(&path, &snapshot))
            .await
            .map_err(|e| StoreError::Background(e.to_string()))??;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct JsonState {
    tasks: BTreeMap<String, Task>,
    dirty: bool,
}

/// Tasks kept in memory and written to a JSON file on [`TaskStore::flush`].
#[derive(Debug)]
pub struct JsonTaskStore {
    path: PathBuf,
    state: Mutex<JsonState>,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonTaskStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let tasks: Vec<Task> = read_json(&path)?.unwrap_or_default();
        debug!(path = %path.display(), count = tasks.len(), "Loaded tasks");
        Ok(Self {
            path,
            state: Mutex::new(JsonState {
                tasks: tasks.into_iter().map(|t| (t.id.clone(), t)).collect(),
                dirty: false,
            }),
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn is_dirty(&self) -> bool {
        lock(&self.state).dirty
    }
}

#[async_trait]
impl TaskStore for JsonTaskStore {
    async fn list(&self) -> Result<Vec<Task>, StoreError> {
        Ok(lock(&self.state).tasks.values().cloned().collect())
    }

    async fn get(&self, id: &str) -> Result<Option<Task>, StoreError> {
        Ok(lock(&self.state).tasks.get(id).cloned())
    }

    async fn save(&self, task: &Task) -> Result<(), StoreError> {
        let mut state = lock(&self.state);
        state.tasks.insert(task.id.clone(), task.clone());
        state.dirty = true;
        Ok(())
    }

    async fn flush(&self) -> Result<(), StoreError> {
        let _write = self.write_lock.lock().await;
        let snapshot: Vec<Task> = {
            let mut state = lock(&self.state);
            if !state.dirty {
                return Ok(());
            }
            state.dirty = false;
            state.tasks.values().cloned().collect()
        };

        let path = self.path.clone();
        let written = tokio::task::spawn_blocking(move || write_json_locked(&path, &snapshot))
            .await
            .map_err(|e| StoreError::Background(e.to_string()))
            .and_then(|r| r.map_err(StoreError::from));

        if written.is_err() {
            lock(&self.state).dirty = true;
        }
        written
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_json_store_persists_on_flush() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json");

        let store = JsonTaskStore::open(&path).unwrap();
        store.save(&Task::new("t1", "First", "")).await.unwrap();
        assert!(store.is_dirty());
        assert!(!path.exists());

        store.flush().await.unwrap();
        assert!(!store.is_dirty());

        let reopened = JsonTaskStore::open(&path).unwrap();
        let task = reopened.require("t1").await.unwrap();
        assert_eq!(task.title, "First");
    }

    #[tokio::test]
    async fn test_missing_task_is_not_found() {
        let store = InMemoryTaskStore::new();
        assert_eq!(
            store.require("nope").await,
            Err(StoreError::NotFound("nope".to_string()))
        );
    }

    #[tokio::test]
    async fn test_running_execution_detected() {
        let store = InMemoryExecutionStore::new();
        let mut done = Execution::start("t1", "/tmp/a");
        done.finish(ExecutionStatus::Completed);
        store.save(&done).await.unwrap();
        assert!(!store.has_running("t1").await.unwrap());

        store.save(&Execution::start("t1", "/tmp/a")).await.unwrap();
        assert!(store.has_running("t1").await.unwrap());
        assert!(!store.has_running("t2").await.unwrap());
    }
}
