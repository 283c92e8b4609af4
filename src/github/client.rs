use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use octocrab::models::issues::Issue;
use octocrab::models::pulls::PullRequest;
use octocrab::params::pulls::MergeMethod;
use octocrab::{params, Octocrab};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::errors::GitHubError;
use super::types::{
    IssueDraft, IssueState, IssueUpdate, MergeResult, PrState, PullRequestDraft, PullRequestInfo,
    StateFilter, TrackerIssue,
};
use crate::config::GitHubConfig;
use crate::resilience::{with_retry_if, with_timeout, CircuitBreaker, RetryConfig};

/// Issue tracker and pull request operations used by the pipeline.
///
/// Implemented by [`GitHubClient`] for real calls and wrapped by
/// [`ResilientTracker`] to add timeouts, the circuit breaker and read retries.
#[async_trait]
pub trait IssueTracker: Send + Sync {
    async fn list_issues(&self, label: &str, state: StateFilter) -> Result<Vec<TrackerIssue>, GitHubError>;
    async fn get_issue(&self, number: u64) -> Result<TrackerIssue, GitHubError>;
    async fn create_issue(&self, draft: &IssueDraft) -> Result<TrackerIssue, GitHubError>;
    async fn update_issue(&self, number: u64, update: &IssueUpdate) -> Result<TrackerIssue, GitHubError>;
    async fn create_comment(&self, number: u64, body: &str) -> Result<(), GitHubError>;
    async fn find_open_pr(&self, head_branch: &str) -> Result<Option<PullRequestInfo>, GitHubError>;
    async fn get_pr(&self, number: u64) -> Result<PullRequestInfo, GitHubError>;
    async fn create_pr(&self, draft: &PullRequestDraft) -> Result<PullRequestInfo, GitHubError>;
    async fn merge_pr(&self, number: u64) -> Result<MergeResult, GitHubError>;
}

/// Octocrab-backed tracker with a client-side rate limiter.
#[derive(Debug)]
pub struct GitHubClient {
    octocrab: Octocrab,
    owner: String,
    repo: String,
    rate_limiter: Arc<DefaultDirectRateLimiter>,
}

impl GitHubClient {
    pub fn new(config: &GitHubConfig) -> Result<Self, GitHubError> {
        let token = config
            .token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| GitHubError::TokenNotFound("no token in configuration or environment".to_string()))?;
        if config.owner.is_empty() || config.repo.is_empty() {
            return Err(GitHubError::ConfigNotFound(
                "github.owner and github.repo must be set".to_string(),
            ));
        }

        let octocrab = Octocrab::builder().personal_token(token.to_string()).build()?;

        let per_hour = NonZeroU32::new(config.rate_limit.requests_per_hour).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(config.rate_limit.burst_capacity).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_hour(per_hour).allow_burst(burst)));

        Ok(Self {
            octocrab,
            owner: config.owner.clone(),
            repo: config.repo.clone(),
            rate_limiter,
        })
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn repo(&self) -> &str {
        &self.repo
    }

    async fn throttle(&self) {
        self.rate_limiter.until_ready().await;
    }
}

fn convert_issue(issue: Issue) -> TrackerIssue {
    let state = match issue.state {
        octocrab::models::IssueState::Closed => IssueState::Closed,
        _ => IssueState::Open,
    };
    TrackerIssue {
        number: issue.number,
        title: issue.title,
        body: issue.body.unwrap_or_default(),
        labels: issue.labels.into_iter().map(|l| l.name).collect(),
        state,
        html_url: issue.html_url.to_string(),
        created_at: issue.created_at,
        updated_at: issue.updated_at,
    }
}

fn convert_pr(pr: PullRequest) -> PullRequestInfo {
    let state = if pr.merged_at.is_some() || pr.merged.unwrap_or(false) {
        PrState::Merged
    } else {
        match pr.state {
            Some(octocrab::models::IssueState::Closed) => PrState::Closed,
            _ => PrState::Open,
        }
    };
    PullRequestInfo {
        number: pr.number,
        url: pr.html_url.map(|u| u.to_string()).unwrap_or_default(),
        title: pr.title.unwrap_or_default(),
        state,
        mergeable: pr.mergeable,
        head_branch: pr.head.ref_field,
        base_branch: pr.base.ref_field,
    }
}

fn to_octocrab_state(state: IssueState) -> octocrab::models::IssueState {
    match state {
        IssueState::Open => octocrab::models::IssueState::Open,
        IssueState::Closed => octocrab::models::IssueState::Closed,
    }
}

#[async_trait]
impl IssueTracker for GitHubClient {
    async fn list_issues(&self, label: &str, state: StateFilter) -> Result<Vec<TrackerIssue>, GitHubError> {
        self.throttle().await;
        let state = match state {
            StateFilter::Open => params::State::Open,
            StateFilter::Closed => params::State::Closed,
            StateFilter::All => params::State::All,
        };
        let labels = [label.to_string()];
        let first = self
            .octocrab
            .issues(&self.owner, &self.repo)
            .list()
            .labels(&labels)
            .state(state)
            .per_page(100)
            .send()
            .await?;
        let issues = self.octocrab.all_pages(first).await?;

        // The issues endpoint also returns pull requests
        Ok(issues
            .into_iter()
            .filter(|issue| issue.pull_request.is_none())
            .map(convert_issue)
            .collect())
    }

    async fn get_issue(&self, number: u64) -> Result<TrackerIssue, GitHubError> {
        self.throttle().await;
        let issue = self.octocrab.issues(&self.owner, &self.repo).get(number).await?;
        Ok(convert_issue(issue))
    }

    async fn create_issue(&self, draft: &IssueDraft) -> Result<TrackerIssue, GitHubError> {
        self.throttle().await;
        let issue = self
            .octocrab
            .issues(&self.owner, &self.repo)
            .create(&draft.title)
            .body(&draft.body)
            .labels(draft.labels.clone())
            .send()
            .await?;
        info!(issue_number = issue.number, "Created issue");
        Ok(convert_issue(issue))
    }

    async fn update_issue(&self, number: u64, update: &IssueUpdate) -> Result<TrackerIssue, GitHubError> {
        self.throttle().await;
        let handler = self.octocrab.issues(&self.owner, &self.repo);
        let mut builder = handler.update(number);
        if let Some(title) = &update.title {
            builder = builder.title(title);
        }
        if let Some(body) = &update.body {
            builder = builder.body(body);
        }
        if let Some(state) = update.state {
            builder = builder.state(to_octocrab_state(state));
        }
        if let Some(labels) = &update.labels {
            builder = builder.labels(labels);
        }
        let issue = builder.send().await?;
        debug!(issue_number = number, "Updated issue");
        Ok(convert_issue(issue))
    }

    async fn create_comment(&self, number: u64, body: &str) -> Result<(), GitHubError> {
        self.throttle().await;
        self.octocrab
            .issues(&self.owner, &self.repo)
            .create_comment(number, body)
            .await?;
        Ok(())
    }

    async fn find_open_pr(&self, head_branch: &str) -> Result<Option<PullRequestInfo>, GitHubError> {
        self.throttle().await;
        let page = self
            .octocrab
            .pulls(&self.owner, &self.repo)
            .list()
            .state(params::State::Open)
            .head(format!("{}:{}", self.owner, head_branch))
            .send()
            .await?;
        Ok(page
            .items
            .into_iter()
            .find(|pr| pr.head.ref_field == head_branch)
            .map(convert_pr))
    }

    async fn get_pr(&self, number: u64) -> Result<PullRequestInfo, GitHubError> {
        self.throttle().await;
        let pr = self.octocrab.pulls(&self.owner, &self.repo).get(number).await?;
        Ok(convert_pr(pr))
    }

    async fn create_pr(&self, draft: &PullRequestDraft) -> Result<PullRequestInfo, GitHubError> {
        self.throttle().await;
        let pr = self
            .octocrab
            .pulls(&self.owner, &self.repo)
            .create(&draft.title, &draft.head, &draft.base)
            .body(&draft.body)
            .send()
            .await?;
        info!(pr_number = pr.number, branch = %draft.head, "Created pull request");
        Ok(convert_pr(pr))
    }

    async fn merge_pr(&self, number: u64) -> Result<MergeResult, GitHubError> {
        self.throttle().await;
        let merge = self
            .octocrab
            .pulls(&self.owner, &self.repo)
            .merge(number)
            .method(MergeMethod::Squash)
            .send()
            .await?;
        Ok(MergeResult {
            merged: merge.merged,
            sha: merge.sha,
            message: merge.message,
        })
    }
}

/// Decorator applying a per-call timeout and the `github` circuit breaker to every
/// call. Idempotent reads that time out are retried once.
pub struct ResilientTracker {
    inner: Arc<dyn IssueTracker>,
    breaker: Arc<CircuitBreaker>,
    timeout: Duration,
    read_retry: RetryConfig,
}

impl ResilientTracker {
    pub fn new(inner: Arc<dyn IssueTracker>, breaker: Arc<CircuitBreaker>, timeout: Duration) -> Self {
        Self {
            inner,
            breaker,
            timeout,
            read_retry: RetryConfig::once(),
        }
    }

    async fn guarded<T, F, Fut>(&self, label: &str, call: F) -> Result<T, GitHubError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, GitHubError>>,
    {
        self.breaker
            .execute_counting(
                || with_timeout(call(), self.timeout, label),
                |err| !matches!(err, GitHubError::NotFound(_) | GitHubError::Validation(_)),
            )
            .await
    }

    async fn guarded_read<T, F, Fut>(&self, label: &str, call: F) -> Result<T, GitHubError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, GitHubError>>,
    {
        with_retry_if(
            &self.read_retry,
            label,
            || self.guarded(label, &call),
            |err| matches!(err, GitHubError::Timeout(_)),
        )
        .await
    }
}

#[async_trait]
impl IssueTracker for ResilientTracker {
    async fn list_issues(&self, label: &str, state: StateFilter) -> Result<Vec<TrackerIssue>, GitHubError> {
        self.guarded_read("list issues", || self.inner.list_issues(label, state))
            .await
    }

    async fn get_issue(&self, number: u64) -> Result<TrackerIssue, GitHubError> {
        self.guarded_read("get issue", || self.inner.get_issue(number)).await
    }

    async fn create_issue(&self, draft: &IssueDraft) -> Result<TrackerIssue, GitHubError> {
        self.guarded("create issue", || self.inner.create_issue(draft)).await
    }

    async fn update_issue(&self, number: u64, update: &IssueUpdate) -> Result<TrackerIssue, GitHubError> {
        self.guarded("update issue", || self.inner.update_issue(number, update))
            .await
    }

    async fn create_comment(&self, number: u64, body: &str) -> Result<(), GitHubError> {
        self.guarded("create comment", || self.inner.create_comment(number, body))
            .await
    }

    async fn find_open_pr(&self, head_branch: &str) -> Result<Option<PullRequestInfo>, GitHubError> {
        self.guarded_read("find pull request", || self.inner.find_open_pr(head_branch))
            .await
    }

    async fn get_pr(&self, number: u64) -> Result<PullRequestInfo, GitHubError> {
        self.guarded_read("get pull request", || self.inner.get_pr(number))
            .await
    }

    async fn create_pr(&self, draft: &PullRequestDraft) -> Result<PullRequestInfo, GitHubError> {
        self.guarded("create pull request", || self.inner.create_pr(draft))
            .await
    }

    async fn merge_pr(&self, number: u64) -> Result<MergeResult, GitHubError> {
        self.guarded("merge pull request", || self.inner.merge_pr(number))
            .await
    }
}
