//! Tackle: a local task backlog where every task gets its own git worktree,
//! finished work is reviewed by an AI model before its pull request is
//! merged, and tasks stay in step with GitHub issues.

pub mod ai;
pub mod api;
pub mod cli;
pub mod config;
pub mod external;
pub mod fs;
pub mod github;
pub mod observability;
pub mod priority;
pub mod resilience;
pub mod review;
pub mod shutdown;
pub mod sync;
pub mod tasks;
pub mod telemetry;
pub mod workflows;
pub mod workspace;

#[cfg(test)]
pub mod testing;

pub use api::{ApiError, ApiRequest, ApiResponse, TackleService};
pub use config::{config, TackleConfig};
pub use github::{GitHubClient, GitHubError, IssueTracker};
pub use observability::{create_workflow_span, OperationTimer, PipelineMetrics};
pub use priority::Priority;
pub use shutdown::ShutdownCoordinator;
pub use sync::{SyncEngine, SyncError, SyncReport};
pub use tasks::{Task, TaskStatus, TaskStore};
pub use telemetry::{generate_correlation_id, init_telemetry};
pub use workflows::{AgentEvent, TaskWorkflow, WorkflowError};
pub use workspace::{WorkspaceError, WorkspaceManager};
