//! Isolated per-task git worktrees.

pub mod manager;
pub mod naming;
pub mod registry;
pub mod types;

use thiserror::Error;

use crate::external::GitError;
use crate::fs::FsError;
use crate::tasks::StoreError;

pub use manager::WorkspaceManager;
pub use naming::{branch_name, slugify, workspace_dir_name};
pub use registry::WorkspaceRegistry;
pub use types::{
    CleanupEntry, CleanupOutcome, CleanupPolicy, CleanupReport, DeferredCleanup, OrphanReport,
    Workspace,
};

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error(transparent)]
    Git(#[from] GitError),
    #[error("Workspace registry error: {0}")]
    Registry(#[from] FsError),
    #[error("Workspace I/O error: {0}")]
    Io(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("No workspace for task {0}")]
    NotFound(String),
}

impl WorkspaceError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, WorkspaceError::Git(e) if e.is_timeout())
    }
}
