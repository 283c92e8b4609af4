use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::types::Workspace;
use super::WorkspaceError;
use crate::fs::{read_json, write_json_locked};

/// Workspace records persisted in a JSON file, written through on every change.
#[derive(Debug)]
pub struct WorkspaceRegistry {
    path: PathBuf,
    records: Mutex<BTreeMap<String, Workspace>>,
    // Serializes snapshot-and-write so older snapshots never land last.
    write_lock: tokio::sync::Mutex<()>,
}

impl WorkspaceRegistry {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, WorkspaceError> {
        let path = path.as_ref().to_path_buf();
        let records: BTreeMap<String, Workspace> = read_json(&path)?.unwrap_or_default();
        Ok(Self {
            path,
            records: Mutex::new(records),
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Workspace>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &str) -> Option<Workspace> {
        self.lock().get(key).cloned()
    }

    pub fn all(&self) -> Vec<Workspace> {
        self.lock().values().cloned().collect()
    }

    pub async fn upsert(&self, workspace: Workspace) -> Result<(), WorkspaceError> {
        let _write = self.write_lock.lock().await;
        let snapshot = {
            let mut records = self.lock();
            records.insert(workspace.key(), workspace);
            records.clone()
        };
        self.persist(snapshot).await
    }

    pub async fn remove(&self, key: &str) -> Result<Option<Workspace>, WorkspaceError> {
        let _write = self.write_lock.lock().await;
        let (removed, snapshot) = {
            let mut records = self.lock();
            let removed = records.remove(key);
            (removed, records.clone())
        };
        if removed.is_some() {
            self.persist(snapshot).await?;
        }
        Ok(removed)
    }

    async fn persist(&self, snapshot: BTreeMap<String, Workspace>) -> Result<(), WorkspaceError> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_json_locked(&path, &snapshot))
            .await
            .map_err(|e| WorkspaceError::Io(e.to_string()))??;
        Ok(())
    }
}
