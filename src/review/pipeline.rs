use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::prompt::{build_prompt, parse_verdict, SYSTEM_PROMPT};
use super::types::{ReviewOutcome, ReviewRequest, ReviewResult};
use crate::ai::{AiError, InferenceClient};
use crate::config::{AiConfig, ReviewConfig};
use crate::external::{GitClient, GitError};
use crate::github::{PrRequest, PullRequestManager};
use crate::observability::OperationTimer;
use crate::resilience::{with_timeout, CircuitBreaker};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReviewError {
    #[error("Failed to commit pending changes: {0}")]
    Commit(GitError),
    #[error("Failed to compute diff: {0}")]
    Diff(GitError),
    #[error("AI review failed: {0}")]
    Review(#[from] AiError),
}

impl ReviewError {
    pub fn is_timeout(&self) -> bool {
        match self {
            ReviewError::Commit(e) | ReviewError::Diff(e) => e.is_timeout(),
            ReviewError::Review(e) => matches!(e, AiError::Timeout(_)),
        }
    }
}

/// Commits, pushes, diffs and AI-reviews a task workspace.
pub struct ReviewPipeline {
    git: GitClient,
    ai: Arc<dyn InferenceClient>,
    ai_breaker: Arc<CircuitBreaker>,
    pulls: Option<Arc<PullRequestManager>>,
    commit_timeout: Duration,
    push_timeout: Duration,
    diff_timeout: Duration,
    ai_timeout: Duration,
    target_branch: String,
    max_diff_chars: usize,
}

impl ReviewPipeline {
    pub fn new(
        git: GitClient,
        ai: Arc<dyn InferenceClient>,
        ai_breaker: Arc<CircuitBreaker>,
        review: &ReviewConfig,
        ai_config: &AiConfig,
    ) -> Self {
        Self {
            git,
            ai,
            ai_breaker,
            pulls: None,
            commit_timeout: Duration::from_secs(review.commit_timeout_secs),
            push_timeout: Duration::from_secs(review.push_timeout_secs),
            diff_timeout: Duration::from_secs(review.diff_timeout_secs),
            ai_timeout: Duration::from_secs(ai_config.timeout_secs),
            target_branch: review.target_branch.clone(),
            max_diff_chars: ai_config.max_diff_chars,
        }
    }

    /// Open (or find) a pull request after a passing review.
    pub fn with_pull_requests(mut self, pulls: Arc<PullRequestManager>) -> Self {
        self.pulls = Some(pulls);
        self
    }

    pub async fn run(&self, request: &ReviewRequest) -> Result<ReviewOutcome, ReviewError> {
        let timer = OperationTimer::new("review");
        let target = request
            .target_branch
            .clone()
            .unwrap_or_else(|| self.target_branch.clone());
        let mut warnings = Vec::new();

        let committed = self.commit_pending(request).await?;
        self.push(request, &mut warnings).await;
        let diff = self.diff(request, &target).await?;

        if diff.trim().is_empty() {
            info!(task_id = %request.task_id, branch = %request.branch, "Empty diff, review passes trivially");
            timer.finish();
            return Ok(ReviewOutcome {
                result: ReviewResult::trivial_pass(),
                committed,
                pr: None,
                warnings,
            });
        }

        let result = self.ask(request, &diff).await?;
        info!(
            task_id = %request.task_id,
            passed = result.passed,
            issues = result.issues.len(),
            needs_rescope = result.needs_rescope(),
            "Review completed"
        );

        let mut pr = None;
        if result.passed {
            if let Some(pulls) = &self.pulls {
                let pr_request = PrRequest {
                    branch: request.branch.clone(),
                    base: target.clone(),
                    title: request.title.clone(),
                    body: result.summary.clone(),
                    linked_issue: request.linked_issue,
                    workdir: None,
                };
                match pulls.ensure_pr(&pr_request).await {
                    Ok(outcome) => {
                        warnings.extend(outcome.warnings);
                        pr = Some(outcome.pr);
                    }
                    Err(e) => {
                        warn!(task_id = %request.task_id, error = %e, "Could not open pull request");
                        warnings.push(format!("pull request not opened: {e}"));
                    }
                }
            }
        }

        timer.finish();
        Ok(ReviewOutcome {
            result,
            committed,
            pr,
            warnings,
        })
    }

    async fn commit_pending(&self, request: &ReviewRequest) -> Result<bool, ReviewError> {
        let cwd = &request.workspace_path;
        let status = self
            .git
            .status_porcelain(cwd, self.commit_timeout)
            .await
            .map_err(ReviewError::Commit)?;
        if status.trim().is_empty() {
            return Ok(false);
        }

        let message = format!("WIP: {}", request.title);
        self.git
            .add_all(cwd, self.commit_timeout)
            .await
            .map_err(ReviewError::Commit)?;
        self.git
            .commit(cwd, &message, self.commit_timeout)
            .await
            .map_err(ReviewError::Commit)?;
        debug!(task_id = %request.task_id, "Committed pending work");
        Ok(true)
    }

    async fn push(&self, request: &ReviewRequest, warnings: &mut Vec<String>) {
        let cwd = &request.workspace_path;
        let branch = request.branch.as_str();
        let Err(first) = self.git.push(cwd, branch, true, self.push_timeout).await else {
            return;
        };
        debug!(branch, error = %first, "Push with upstream failed, retrying plain push");

        if let Err(e) = self.git.push(cwd, branch, false, self.push_timeout).await {
            warn!(task_id = %request.task_id, branch, error = %e, "Push failed");
            warnings.push(format!("push failed: {e}"));
        }
    }

    async fn diff(&self, request: &ReviewRequest, target: &str) -> Result<String, ReviewError> {
        let cwd = &request.workspace_path;
        let branch = request.branch.as_str();
        match self.git.diff(cwd, target, branch, true, self.diff_timeout).await {
            Ok(diff) => Ok(diff),
            Err(e) => {
                debug!(target, branch, error = %e, "Three-dot diff failed, falling back");
                self.git
                    .diff(cwd, target, branch, false, self.diff_timeout)
                    .await
                    .map_err(ReviewError::Diff)
            }
        }
    }

    async fn ask(&self, request: &ReviewRequest, diff: &str) -> Result<ReviewResult, ReviewError> {
        let prompt = build_prompt(&request.title, &request.description, diff, self.max_diff_chars);
        let ai = Arc::clone(&self.ai);
        let response = self
            .ai_breaker
            .execute(|| async move {
                with_timeout(ai.complete(SYSTEM_PROMPT, &prompt), self.ai_timeout, "ai review").await
            })
            .await?;
        Ok(parse_verdict(&response)?)
    }
}
