//! Task status transitions tied to workspaces, reviews and pull requests.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn, Instrument};

use crate::github::{LabelManager, MergeOutcome, MergeTarget, PullRequestError, PullRequestManager};
use crate::observability::{create_workflow_span, PipelineMetrics};
use crate::review::{ReviewError, ReviewOutcome, ReviewPipeline, ReviewRequest};
use crate::tasks::{
    Execution, ExecutionStatus, ExecutionStore, PullRequestRef, StoreError, Task, TaskStatus,
    TaskStore,
};
use crate::telemetry::generate_correlation_id;
use crate::workspace::{DeferredCleanup, Workspace, WorkspaceError, WorkspaceManager};

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Task {task_id} cannot move from {from} to {to}")]
    InvalidTransition {
        task_id: String,
        from: TaskStatus,
        to: TaskStatus,
    },
    #[error("Task {0} has no workspace")]
    NoWorkspace(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
    #[error(transparent)]
    Review(#[from] ReviewError),
    #[error(transparent)]
    PullRequest(#[from] PullRequestError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum TransitionResult {
    Success {
        previous_state: TaskStatus,
        new_state: TaskStatus,
        warnings: Vec<String>,
    },
    /// The task was already in the requested state.
    Unchanged { state: TaskStatus },
}

/// Signals emitted by the external coding agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgentEvent {
    SessionCompleted { working_dir: PathBuf },
    SubagentCompleted { working_dir: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReviewApplied {
    pub task: Task,
    pub outcome: ReviewOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AgentEventOutcome {
    Reviewed(Box<ReviewApplied>),
    /// Subagent completion noted; status untouched.
    Recorded { task_id: String },
    Ignored { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StartOutcome {
    pub task: Task,
    pub workspace: Workspace,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ShipOutcome {
    Shipped {
        task: Task,
        pr_number: u64,
        cleanup: Option<DeferredCleanup>,
        warnings: Vec<String>,
    },
    Refused {
        reason: String,
    },
}

/// Drives a task through in_progress, review and ready_to_ship.
pub struct TaskWorkflow {
    store: Arc<dyn TaskStore>,
    executions: Arc<dyn ExecutionStore>,
    workspaces: Arc<WorkspaceManager>,
    review: Arc<ReviewPipeline>,
    pulls: Arc<PullRequestManager>,
    labels: LabelManager,
    task_source: String,
    metrics: Option<Arc<PipelineMetrics>>,
}

impl TaskWorkflow {
    pub fn new(
        store: Arc<dyn TaskStore>,
        executions: Arc<dyn ExecutionStore>,
        workspaces: Arc<WorkspaceManager>,
        review: Arc<ReviewPipeline>,
        pulls: Arc<PullRequestManager>,
        labels: LabelManager,
    ) -> Self {
        Self {
            store,
            executions,
            workspaces,
            review,
            pulls,
            labels,
            task_source: "local".to_string(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Mirror the status to the linked issue; failures become warnings.
    async fn sync_status_label(&self, task: &Task, warnings: &mut Vec<String>) {
        let Some(issue_number) = task.issue_number() else {
            return;
        };
        if let Err(e) = self.labels.update_status_label(issue_number, task.status).await {
            warn!(task_id = %task.id, issue_number, error = %e, "Status label update failed");
            warnings.push(format!("status label not updated: {e}"));
        }
    }

    async fn persist(&self, task: &Task) -> Result<(), WorkflowError> {
        self.store.save(task).await?;
        self.store.flush().await?;
        Ok(())
    }

    fn check(task: &Task, to: TaskStatus) -> Result<(), WorkflowError> {
        if task.status.can_transition_to(to) {
            Ok(())
        } else {
            Err(WorkflowError::InvalidTransition {
                task_id: task.id.clone(),
                from: task.status,
                to,
            })
        }
    }

    /// Move a task to `to` if the transition table allows it.
    pub async fn transition(&self, task_id: &str, to: TaskStatus) -> Result<TransitionResult, WorkflowError> {
        let mut task = self.store.require(task_id).await?;
        if task.status == to {
            return Ok(TransitionResult::Unchanged { state: to });
        }
        Self::check(&task, to)?;

        let previous_state = task.status;
        task.status = to;
        task.touch();
        self.persist(&task).await?;
        info!(task_id, from = %previous_state, to = %to, "Task status changed");

        let mut warnings = Vec::new();
        self.sync_status_label(&task, &mut warnings).await;
        Ok(TransitionResult::Success {
            previous_state,
            new_state: to,
            warnings,
        })
    }

    /// Move a task to in_progress and provision its workspace.
    pub async fn start_task(&self, task_id: &str) -> Result<StartOutcome, WorkflowError> {
        let mut task = self.store.require(task_id).await?;
        if task.status != TaskStatus::InProgress {
            Self::check(&task, TaskStatus::InProgress)?;
        }

        let workspace = self.workspaces.create(&self.task_source, &task).await?;
        let recreated = task.workspace_path.as_deref() != Some(workspace.path.as_path());
        if recreated {
            task.branch = Some(workspace.branch.clone());
            task.workspace_path = Some(workspace.path.clone());
        }

        let mut warnings = Vec::new();
        if task.status == TaskStatus::InProgress && !recreated {
            debug!(task_id, "Task already in progress");
            return Ok(StartOutcome {
                task,
                workspace,
                warnings,
            });
        }

        task.status = TaskStatus::InProgress;
        task.touch();
        self.persist(&task).await?;

        if !self.executions.has_running(task_id).await? {
            self.executions
                .save(&Execution::start(task_id, &workspace.path))
                .await?;
        }
        info!(task_id, branch = %workspace.branch, "Task started");

        self.sync_status_label(&task, &mut warnings).await;
        Ok(StartOutcome {
            task,
            workspace,
            warnings,
        })
    }

    async fn finish_executions(&self, task_id: &str, working_dir: &Path, status: ExecutionStatus) -> Result<(), WorkflowError> {
        for mut execution in self.executions.list_for_task(task_id).await? {
            if execution.status == ExecutionStatus::Running && execution.working_dir == working_dir {
                execution.finish(status);
                self.executions.save(&execution).await?;
            }
        }
        Ok(())
    }

    /// Handle an agent lifecycle signal. Duplicate signals are no-ops.
    pub async fn handle_agent_event(&self, event: &AgentEvent) -> Result<AgentEventOutcome, WorkflowError> {
        let (AgentEvent::SessionCompleted { working_dir } | AgentEvent::SubagentCompleted { working_dir }) = event;
        let Some(workspace) = self.workspaces.find_by_path(working_dir) else {
            debug!(dir = %working_dir.display(), "Agent event outside any task workspace");
            return Ok(AgentEventOutcome::Ignored {
                reason: format!("{} is not a task workspace", working_dir.display()),
            });
        };
        let task_id = workspace.task_id.clone();

        if let AgentEvent::SubagentCompleted { .. } = event {
            info!(task_id = %task_id, "Subagent completed");
            return Ok(AgentEventOutcome::Recorded { task_id });
        }

        let Some(task) = self.store.get(&task_id).await? else {
            return Ok(AgentEventOutcome::Ignored {
                reason: format!("task {task_id} no longer exists"),
            });
        };
        if task.status != TaskStatus::InProgress {
            debug!(task_id = %task_id, status = %task.status, "Session completion ignored");
            return Ok(AgentEventOutcome::Ignored {
                reason: format!("task {task_id} is {}, not in_progress", task.status),
            });
        }

        self.finish_executions(&task_id, &workspace.path, ExecutionStatus::Completed)
            .await?;
        self.transition(&task_id, TaskStatus::Review).await?;
        let applied = self.run_review(&task_id).await?;
        Ok(AgentEventOutcome::Reviewed(Box::new(applied)))
    }

    /// Review the task's workspace and apply the verdict.
    ///
    /// A failed review moves the task back to in_progress with the feedback
    /// attached; a passing one records the pull request and stays in review.
    pub async fn run_review(&self, task_id: &str) -> Result<ReviewApplied, WorkflowError> {
        let mut task = self.store.require(task_id).await?;
        if task.status != TaskStatus::Review {
            return Err(WorkflowError::InvalidTransition {
                task_id: task_id.to_string(),
                from: task.status,
                to: TaskStatus::Review,
            });
        }
        let workspace = self
            .workspaces
            .find(&self.task_source, task_id)
            .ok_or_else(|| WorkflowError::NoWorkspace(task_id.to_string()))?;

        let request = ReviewRequest {
            task_id: task.id.clone(),
            title: task.title.clone(),
            description: task.description.clone(),
            workspace_path: workspace.path.clone(),
            branch: workspace.branch.clone(),
            target_branch: Some(workspace.base_branch.clone()),
            linked_issue: task.issue_number(),
        };
        let span = create_workflow_span("review", task_id, &generate_correlation_id());
        let mut outcome = self.review.run(&request).instrument(span).await?;
        if let Some(metrics) = &self.metrics {
            metrics.record_review(outcome.result.passed);
        }

        if outcome.result.passed {
            task.review_feedback = None;
            if let Some(pr) = &outcome.pr {
                task.pull_request = Some(PullRequestRef {
                    number: pr.number,
                    url: pr.url.clone(),
                });
            }
        } else {
            task.status = TaskStatus::InProgress;
            task.review_feedback = Some(outcome.result.feedback());
        }
        task.touch();
        self.persist(&task).await?;
        info!(task_id, passed = outcome.result.passed, status = %task.status, "Review applied");

        self.sync_status_label(&task, &mut outcome.warnings).await;
        Ok(ReviewApplied { task, outcome })
    }

    /// Merge the task's pull request, move it to ready_to_ship and defer
    /// workspace removal. Only a task sitting in review after a passing
    /// review is merged.
    pub async fn ship(&self, task_id: &str) -> Result<ShipOutcome, WorkflowError> {
        let mut task = self.store.require(task_id).await?;
        if task.status != TaskStatus::Review {
            let reason = format!("task is {}, only reviewed tasks can ship", task.status);
            info!(task_id, status = %task.status, "Ship refused");
            return Ok(ShipOutcome::Refused { reason });
        }

        let target = match (&task.pull_request, &task.branch) {
            (Some(pr), _) => MergeTarget::Number(pr.number),
            (None, Some(branch)) => MergeTarget::Branch(branch.clone()),
            (None, None) => return Err(WorkflowError::NoWorkspace(task_id.to_string())),
        };
        let default_branch = self.workspaces.default_branch().await?;

        let (pr_number, mut warnings) = match self.pulls.merge_pr(&target, &default_branch).await? {
            MergeOutcome::Merged { number, warnings, .. } => (number, warnings),
            MergeOutcome::Refused { reason } => {
                info!(task_id, reason = %reason, "Merge refused");
                return Ok(ShipOutcome::Refused { reason });
            }
        };

        task.status = TaskStatus::ReadyToShip;
        task.touch();
        self.persist(&task).await?;

        let cleanup = match self.workspaces.defer_cleanup(&self.task_source, task_id).await {
            Ok(cleanup) => Some(cleanup),
            Err(e) => {
                warnings.push(format!("workspace cleanup not scheduled: {e}"));
                None
            }
        };
        self.sync_status_label(&task, &mut warnings).await;
        info!(task_id, pr_number, "Task shipped");

        Ok(ShipOutcome::Shipped {
            task,
            pr_number,
            cleanup,
            warnings,
        })
    }
}
