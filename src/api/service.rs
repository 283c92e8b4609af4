//! Request handlers over the task, sync and workspace engines.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::response::{ApiError, ApiResponse};
use crate::ai::{AnthropicClient, InferenceClient, UnconfiguredClient};
use crate::config::TackleConfig;
use crate::external::{CommandExecutor, GitClient, ProcessCommandExecutor};
use crate::github::{GitHubClient, IssueTracker, LabelManager, PullRequestManager, ResilientTracker};
use crate::observability::{PipelineMetrics, PipelineStats};
use crate::resilience::{CircuitBreakerRegistry, HealthReport, AI_BREAKER, GITHUB_BREAKER};
use crate::review::ReviewPipeline;
use crate::sync::{ConflictLog, DedupReport, Resolution, SyncConflict, SyncEngine, SyncReport};
use crate::tasks::{JsonExecutionStore, JsonTaskStore, Task, TaskStatus, TaskStore};
use crate::workflows::{
    AgentEvent, AgentEventOutcome, ReviewApplied, ShipOutcome, StartOutcome, StatusSnapshot,
    TaskWorkflow, TransitionResult,
};
use crate::workspace::{CleanupReport, OrphanReport, WorkspaceManager};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentEventKind {
    Session,
    Subagent,
}

/// One operation, as received over the JSON surface.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ApiRequest {
    Start { task_id: String },
    Review { task_id: String },
    Ship { task_id: String },
    Transition { task_id: String, status: TaskStatus },
    UpdateLabels { task_id: String },
    Sync,
    Resolve { task_id: String, keep: String },
    Dedupe {
        #[serde(default)]
        dry_run: bool,
    },
    Cleanup {
        #[serde(default)]
        dry_run: bool,
        #[serde(default)]
        orphans: bool,
    },
    AgentEvent { kind: AgentEventKind, working_dir: PathBuf },
    Conflicts,
    Status,
    Health,
}

#[derive(Debug, Clone, Serialize)]
pub struct CleanupSummary {
    pub stale: CleanupReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orphans: Option<OrphanReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthSummary {
    #[serde(flatten)]
    pub breakers: HealthReport,
    pub pipeline: PipelineStats,
    pub unresolved_conflicts: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct LabelSummary {
    pub issue_number: u64,
    pub labels: Vec<String>,
}

/// Engines shared by every handler.
pub struct Components {
    pub store: Arc<dyn TaskStore>,
    pub workflow: Arc<TaskWorkflow>,
    pub sync: Arc<SyncEngine>,
    pub workspaces: Arc<WorkspaceManager>,
    pub labels: LabelManager,
    pub breakers: Arc<CircuitBreakerRegistry>,
    pub metrics: Arc<PipelineMetrics>,
}

pub struct TackleService {
    components: Components,
}

fn resolve_path(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

fn require_task_id(task_id: &str) -> Result<&str, ApiError> {
    let trimmed = task_id.trim();
    if trimmed.is_empty() {
        Err(ApiError::Validation("task_id must not be empty".to_string()))
    } else {
        Ok(trimmed)
    }
}

pub fn parse_resolution(keep: &str) -> Result<Resolution, ApiError> {
    match keep.trim().to_ascii_lowercase().as_str() {
        "local" => Ok(Resolution::KeepLocal),
        "remote" => Ok(Resolution::KeepRemote),
        other => Err(ApiError::Validation(format!(
            "keep must be 'local' or 'remote', got '{other}'"
        ))),
    }
}

impl TackleService {
    pub fn new(components: Components) -> Self {
        Self { components }
    }

    /// Wire every engine against the real git binary, GitHub and the AI API.
    pub fn from_config(config: &TackleConfig) -> Result<Self> {
        let executor: Arc<dyn CommandExecutor> = Arc::new(ProcessCommandExecutor);
        let git = GitClient::new(
            executor,
            config.workspace.command_timeout(),
            config.workspace.worktree_timeout(),
        );

        let breakers = Arc::new(CircuitBreakerRegistry::default());
        let github_breaker = breakers.get_or_create_with(GITHUB_BREAKER, config.resilience.github.to_breaker_config());
        let ai_breaker = breakers.get_or_create_with(AI_BREAKER, config.resilience.ai.to_breaker_config());

        let github = GitHubClient::new(&config.github).context("Failed to initialize GitHub client")?;
        let tracker: Arc<dyn IssueTracker> = Arc::new(ResilientTracker::new(
            Arc::new(github),
            github_breaker,
            Duration::from_secs(config.github.timeout_secs),
        ));

        let ai: Arc<dyn InferenceClient> = match AnthropicClient::new(&config.ai) {
            Ok(client) => Arc::new(client),
            Err(e) => {
                warn!(error = %e, "AI review unavailable");
                Arc::new(UnconfiguredClient)
            }
        };

        let root = std::path::absolute(&config.workspace.repo_root).context("Failed to resolve repository root")?;
        let store: Arc<dyn TaskStore> = Arc::new(
            JsonTaskStore::open(resolve_path(&root, &config.storage.tasks_file)).context("Failed to open task store")?,
        );
        let executions = Arc::new(
            JsonExecutionStore::open(resolve_path(&root, &config.storage.executions_file))
                .context("Failed to open execution log")?,
        );
        let conflicts = Arc::new(
            ConflictLog::open(resolve_path(&root, &config.storage.conflicts_file))
                .context("Failed to open conflict log")?,
        );

        let workspaces = Arc::new(
            WorkspaceManager::new(git.clone(), &config.workspace, executions.clone())
                .context("Failed to open workspace registry")?,
        );
        let pulls = Arc::new(PullRequestManager::new(tracker.clone(), git.clone(), workspaces.repo_root()));
        let review = Arc::new(
            ReviewPipeline::new(git, ai, ai_breaker, &config.review, &config.ai).with_pull_requests(pulls.clone()),
        );

        let metrics = Arc::new(PipelineMetrics::new());
        let labels = LabelManager::new(tracker.clone());
        let workflow = Arc::new(
            TaskWorkflow::new(
                store.clone(),
                executions,
                workspaces.clone(),
                review,
                pulls,
                LabelManager::new(tracker.clone()),
            )
            .with_metrics(metrics.clone()),
        );
        let sync = Arc::new(
            SyncEngine::new(tracker, store.clone(), conflicts, config.sync.marker_label.clone())
                .with_metrics(metrics.clone()),
        );

        info!(repo = %root.display(), "Tackle service ready");
        Ok(Self::new(Components {
            store,
            workflow,
            sync,
            workspaces,
            labels,
            breakers,
            metrics,
        }))
    }

    pub fn sync_engine(&self) -> Arc<SyncEngine> {
        self.components.sync.clone()
    }

    pub fn store(&self) -> Arc<dyn TaskStore> {
        self.components.store.clone()
    }

    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        self.components.metrics.clone()
    }

    pub async fn start(&self, task_id: &str) -> Result<StartOutcome, ApiError> {
        Ok(self.components.workflow.start_task(require_task_id(task_id)?).await?)
    }

    /// Review a task; an in-progress task is moved to review first.
    pub async fn review(&self, task_id: &str) -> Result<ReviewApplied, ApiError> {
        let task_id = require_task_id(task_id)?;
        let task = self.components.store.require(task_id).await?;
        if task.status == TaskStatus::InProgress {
            self.components.workflow.transition(task_id, TaskStatus::Review).await?;
        }
        Ok(self.components.workflow.run_review(task_id).await?)
    }

    pub async fn ship(&self, task_id: &str) -> Result<ShipOutcome, ApiError> {
        Ok(self.components.workflow.ship(require_task_id(task_id)?).await?)
    }

    pub async fn transition(&self, task_id: &str, status: TaskStatus) -> Result<TransitionResult, ApiError> {
        Ok(self.components.workflow.transition(require_task_id(task_id)?, status).await?)
    }

    /// Push the task's status and metadata labels to its linked issue.
    pub async fn update_labels(&self, task_id: &str) -> Result<LabelSummary, ApiError> {
        let task: Task = self.components.store.require(require_task_id(task_id)?).await?;
        let issue_number = task
            .issue_number()
            .ok_or_else(|| ApiError::Validation(format!("task {} is not linked to an issue", task.id)))?;
        self.components.labels.update_status_label(issue_number, task.status).await?;
        let labels = self
            .components
            .labels
            .update_metadata_labels(issue_number, Some(task.priority), task.effort, task.value)
            .await?;
        Ok(LabelSummary { issue_number, labels })
    }

    pub async fn sync(&self) -> Result<SyncReport, ApiError> {
        Ok(self.components.sync.sync_all().await?)
    }

    pub async fn resolve(&self, task_id: &str, keep: &str) -> Result<Task, ApiError> {
        let resolution = parse_resolution(keep)?;
        Ok(self
            .components
            .sync
            .resolve_conflict(require_task_id(task_id)?, resolution)
            .await?)
    }

    pub fn conflicts(&self) -> Vec<SyncConflict> {
        self.components.sync.conflicts()
    }

    pub async fn dedupe(&self, dry_run: bool) -> Result<DedupReport, ApiError> {
        Ok(self.components.sync.deduplicate(dry_run).await?)
    }

    pub async fn cleanup(&self, dry_run: bool, orphans: bool) -> Result<CleanupSummary, ApiError> {
        let workspaces = &self.components.workspaces;
        let stale = workspaces.cleanup_stale(workspaces.default_policy(dry_run)).await;
        let orphans = if orphans {
            Some(workspaces.remove_orphans(dry_run).await?)
        } else {
            None
        };
        Ok(CleanupSummary { stale, orphans })
    }

    pub async fn agent_event(&self, kind: AgentEventKind, working_dir: PathBuf) -> Result<AgentEventOutcome, ApiError> {
        let event = match kind {
            AgentEventKind::Session => AgentEvent::SessionCompleted { working_dir },
            AgentEventKind::Subagent => AgentEvent::SubagentCompleted { working_dir },
        };
        Ok(self.components.workflow.handle_agent_event(&event).await?)
    }

    pub async fn status(&self) -> Result<StatusSnapshot, ApiError> {
        Ok(StatusSnapshot::capture(self.components.store.as_ref()).await?)
    }

    pub fn health(&self) -> HealthSummary {
        HealthSummary {
            breakers: self.components.breakers.health(),
            pipeline: self.components.metrics.get_stats(),
            unresolved_conflicts: self.components.sync.conflicts().len(),
        }
    }

    pub async fn handle(&self, request: ApiRequest) -> ApiResponse {
        match request {
            ApiRequest::Start { task_id } => ApiResponse::from_result(self.start(&task_id).await),
            ApiRequest::Review { task_id } => ApiResponse::from_result(self.review(&task_id).await),
            ApiRequest::Ship { task_id } => ApiResponse::from_result(self.ship(&task_id).await),
            ApiRequest::Transition { task_id, status } => {
                ApiResponse::from_result(self.transition(&task_id, status).await)
            }
            ApiRequest::UpdateLabels { task_id } => ApiResponse::from_result(self.update_labels(&task_id).await),
            ApiRequest::Sync => ApiResponse::from_result(self.sync().await),
            ApiRequest::Resolve { task_id, keep } => ApiResponse::from_result(self.resolve(&task_id, &keep).await),
            ApiRequest::Dedupe { dry_run } => ApiResponse::from_result(self.dedupe(dry_run).await),
            ApiRequest::Cleanup { dry_run, orphans } => ApiResponse::from_result(self.cleanup(dry_run, orphans).await),
            ApiRequest::AgentEvent { kind, working_dir } => {
                ApiResponse::from_result(self.agent_event(kind, working_dir).await)
            }
            ApiRequest::Conflicts => ApiResponse::ok(&self.conflicts()),
            ApiRequest::Status => ApiResponse::from_result(self.status().await),
            ApiRequest::Health => ApiResponse::ok(&self.health()),
        }
    }

    /// Decode a JSON request and answer it; malformed input is a validation error.
    pub async fn handle_json(&self, body: &str) -> ApiResponse {
        match serde_json::from_str::<ApiRequest>(body) {
            Ok(request) => self.handle(request).await,
            Err(e) => ApiResponse::failure(&ApiError::Validation(e.to_string())),
        }
    }
}
