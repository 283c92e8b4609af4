use thiserror::Error;

use crate::resilience::{CircuitOpenError, TimeoutError};

/// Errors raised by issue tracker and pull request calls.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GitHubError {
    #[error("GitHub token not found: {0}\n🔧 Set TACKLE_GITHUB__TOKEN or GITHUB_TOKEN, or run: gh auth login")]
    TokenNotFound(String),
    #[error("GitHub repository not configured: {0}\n🔧 Set TACKLE_GITHUB__OWNER and TACKLE_GITHUB__REPO")]
    ConfigNotFound(String),
    #[error("GitHub rejected the request (HTTP {status}): {message}")]
    Unauthorized { status: u16, message: String },
    #[error("GitHub resource not found: {0}")]
    NotFound(String),
    #[error("GitHub validation failed: {0}")]
    Validation(String),
    #[error("GitHub API error (HTTP {status}): {message}")]
    Server { status: u16, message: String },
    #[error("GitHub network error: {0}")]
    Network(String),
    #[error(transparent)]
    Timeout(#[from] TimeoutError),
    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpenError),
}

impl GitHubError {
    /// Transient failures worth retrying for idempotent reads.
    pub fn is_transient(&self) -> bool {
        match self {
            GitHubError::Timeout(_) | GitHubError::Network(_) => true,
            GitHubError::Server { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

impl From<octocrab::Error> for GitHubError {
    fn from(err: octocrab::Error) -> Self {
        match err {
            octocrab::Error::GitHub { source, .. } => {
                let status = source.status_code.as_u16();
                let message = source.message.clone();
                match status {
                    401 | 403 => GitHubError::Unauthorized { status, message },
                    404 => GitHubError::NotFound(message),
                    422 => GitHubError::Validation(message),
                    _ => GitHubError::Server { status, message },
                }
            }
            octocrab::Error::Http { .. } => {
                GitHubError::Network(err.to_string())
            }
            other => GitHubError::Server {
                status: 500,
                message: other.to_string(),
            },
        }
    }
}
