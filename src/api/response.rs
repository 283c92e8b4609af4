//! Response envelope and error classification for the request surface.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::ai::AiError;
use crate::external::GitError;
use crate::github::{GitHubError, PullRequestError};
use crate::review::ReviewError;
use crate::tasks::StoreError;
use crate::sync::SyncError;
use crate::workflows::WorkflowError;
use crate::workspace::WorkspaceError;

/// How a failure is reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Unauthorized,
    NotFound,
    Conflict,
    CircuitOpen,
    Timeout,
    Internal,
}

impl ErrorKind {
    pub fn status_code(self) -> u16 {
        match self {
            ErrorKind::Validation => 400,
            ErrorKind::Unauthorized => 401,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::Internal => 500,
            ErrorKind::CircuitOpen => 503,
            ErrorKind::Timeout => 504,
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    Validation(String),
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
    #[error(transparent)]
    GitHub(#[from] GitHubError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Could not encode result: {0}")]
    Encode(String),
}

impl ApiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::Validation(_) => ErrorKind::Validation,
            ApiError::Workflow(e) => workflow_kind(e),
            ApiError::Sync(e) => sync_kind(e),
            ApiError::Workspace(e) => workspace_kind(e),
            ApiError::GitHub(e) => github_kind(e),
            ApiError::Store(e) => store_kind(e),
            ApiError::Encode(_) => ErrorKind::Internal,
        }
    }

    pub fn status_code(&self) -> u16 {
        self.kind().status_code()
    }

    /// Seconds until an open circuit admits a trial call.
    pub fn retry_after_secs(&self) -> Option<u64> {
        let open = match self {
            ApiError::GitHub(GitHubError::CircuitOpen(e))
            | ApiError::Sync(SyncError::Tracker(GitHubError::CircuitOpen(e)))
            | ApiError::Workflow(WorkflowError::PullRequest(PullRequestError::GitHub(GitHubError::CircuitOpen(e))))
            | ApiError::Workflow(WorkflowError::Review(ReviewError::Review(AiError::CircuitOpen(e)))) => e,
            _ => return None,
        };
        Some(open.retry_after.as_secs().max(1))
    }
}

fn github_kind(e: &GitHubError) -> ErrorKind {
    match e {
        GitHubError::TokenNotFound(_) | GitHubError::Unauthorized { .. } => ErrorKind::Unauthorized,
        GitHubError::ConfigNotFound(_) | GitHubError::Validation(_) => ErrorKind::Validation,
        GitHubError::NotFound(_) => ErrorKind::NotFound,
        GitHubError::Timeout(_) => ErrorKind::Timeout,
        GitHubError::CircuitOpen(_) => ErrorKind::CircuitOpen,
        GitHubError::Server { .. } | GitHubError::Network(_) => ErrorKind::Internal,
    }
}

fn ai_kind(e: &AiError) -> ErrorKind {
    match e {
        AiError::Timeout(_) => ErrorKind::Timeout,
        AiError::CircuitOpen(_) => ErrorKind::CircuitOpen,
        _ if e.is_auth() => ErrorKind::Unauthorized,
        _ => ErrorKind::Internal,
    }
}

fn git_kind(e: &GitError) -> ErrorKind {
    if e.is_timeout() {
        ErrorKind::Timeout
    } else {
        ErrorKind::Internal
    }
}

fn store_kind(e: &StoreError) -> ErrorKind {
    match e {
        StoreError::NotFound(_) => ErrorKind::NotFound,
        _ => ErrorKind::Internal,
    }
}

fn workspace_kind(e: &WorkspaceError) -> ErrorKind {
    match e {
        WorkspaceError::Git(git) => git_kind(git),
        WorkspaceError::Store(store) => store_kind(store),
        WorkspaceError::NotFound(_) => ErrorKind::NotFound,
        WorkspaceError::Registry(_) | WorkspaceError::Io(_) => ErrorKind::Internal,
    }
}

fn sync_kind(e: &SyncError) -> ErrorKind {
    match e {
        SyncError::Tracker(github) => github_kind(github),
        SyncError::Store(store) => store_kind(store),
        SyncError::NoConflict(_) | SyncError::NotLinked(_) => ErrorKind::Validation,
        SyncError::InFlight | SyncError::StaleConflict { .. } => ErrorKind::Conflict,
        SyncError::ConflictLog(_) => ErrorKind::Internal,
    }
}

fn workflow_kind(e: &WorkflowError) -> ErrorKind {
    match e {
        WorkflowError::InvalidTransition { .. } | WorkflowError::NoWorkspace(_) => ErrorKind::Validation,
        WorkflowError::Store(store) => store_kind(store),
        WorkflowError::Workspace(ws) => workspace_kind(ws),
        WorkflowError::Review(ReviewError::Review(ai)) => ai_kind(ai),
        WorkflowError::Review(ReviewError::Commit(git) | ReviewError::Diff(git)) => git_kind(git),
        WorkflowError::PullRequest(PullRequestError::GitHub(github)) => github_kind(github),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub status: u16,
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

impl From<&ApiError> for ErrorBody {
    fn from(err: &ApiError) -> Self {
        Self {
            status: err.status_code(),
            kind: err.kind(),
            message: err.to_string(),
            retry_after_secs: err.retry_after_secs(),
        }
    }
}

/// `{ "success": true, "result": ... }` or `{ "success": false, "error": ... }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl ApiResponse {
    pub fn ok<T: Serialize>(result: &T) -> Self {
        match serde_json::to_value(result) {
            Ok(value) => Self {
                success: true,
                result: Some(value),
                error: None,
            },
            Err(e) => Self::failure(&ApiError::Encode(e.to_string())),
        }
    }

    pub fn failure(err: &ApiError) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(ErrorBody::from(err)),
        }
    }

    pub fn from_result<T: Serialize>(result: Result<T, ApiError>) -> Self {
        match result {
            Ok(value) => Self::ok(&value),
            Err(e) => Self::failure(&e),
        }
    }

    /// HTTP-style status for transports that want one.
    pub fn status_code(&self) -> u16 {
        self.error.as_ref().map_or(200, |e| e.status)
    }
}
