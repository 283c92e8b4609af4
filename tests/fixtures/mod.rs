//! Shared fixtures for integration tests: an in-memory issue tracker that
//! speaks the public `IssueTracker` trait.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::BTreeMap;
use std::sync::Mutex;

use tackle::github::{
    GitHubError, IssueDraft, IssueState, IssueTracker, IssueUpdate, MergeResult, PullRequestDraft,
    PullRequestInfo, StateFilter, TrackerIssue,
};

#[derive(Default)]
struct State {
    issues: BTreeMap<u64, TrackerIssue>,
    ticks: i64,
    writes: usize,
}

impl State {
    fn tick(&mut self) -> chrono::DateTime<Utc> {
        self.ticks += 1;
        Utc::now() + Duration::seconds(self.ticks)
    }
}

#[derive(Default)]
pub struct MemoryTracker {
    state: Mutex<State>,
}

impl MemoryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issues(&self) -> Vec<TrackerIssue> {
        self.state.lock().unwrap().issues.values().cloned().collect()
    }

    pub fn issue(&self, number: u64) -> TrackerIssue {
        self.state.lock().unwrap().issues[&number].clone()
    }

    /// Issue creations and updates so far.
    pub fn writes(&self) -> usize {
        self.state.lock().unwrap().writes
    }

    /// Simulate someone editing the issue on GitHub.
    pub fn edit(&self, number: u64, edit: impl FnOnce(&mut TrackerIssue)) {
        let mut state = self.state.lock().unwrap();
        let now = state.tick();
        let issue = state.issues.get_mut(&number).unwrap();
        edit(issue);
        issue.updated_at = now;
    }

    pub fn seed(&self, title: &str, body: &str, labels: &[&str]) -> TrackerIssue {
        let mut state = self.state.lock().unwrap();
        let now = state.tick();
        let number = state.issues.len() as u64 + 1;
        let issue = TrackerIssue {
            number,
            title: title.to_string(),
            body: body.to_string(),
            labels: labels.iter().map(|l| l.to_string()).collect(),
            state: IssueState::Open,
            html_url: format!("https://github.com/acme/widgets/issues/{number}"),
            created_at: now,
            updated_at: now,
        };
        state.issues.insert(number, issue.clone());
        issue
    }
}

fn matches_filter(issue: &TrackerIssue, filter: StateFilter) -> bool {
    match filter {
        StateFilter::All => true,
        StateFilter::Open => issue.state == IssueState::Open,
        StateFilter::Closed => issue.state == IssueState::Closed,
    }
}

#[async_trait]
impl IssueTracker for MemoryTracker {
    async fn list_issues(&self, label: &str, filter: StateFilter) -> Result<Vec<TrackerIssue>, GitHubError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .issues
            .values()
            .filter(|i| i.has_label(label) && matches_filter(i, filter))
            .cloned()
            .collect())
    }

    async fn get_issue(&self, number: u64) -> Result<TrackerIssue, GitHubError> {
        self.state
            .lock()
            .unwrap()
            .issues
            .get(&number)
            .cloned()
            .ok_or_else(|| GitHubError::NotFound(format!("issue #{number}")))
    }

    async fn create_issue(&self, draft: &IssueDraft) -> Result<TrackerIssue, GitHubError> {
        let labels: Vec<&str> = draft.labels.iter().map(String::as_str).collect();
        let issue = self.seed(&draft.title, &draft.body, &labels);
        self.state.lock().unwrap().writes += 1;
        Ok(issue)
    }

    async fn update_issue(&self, number: u64, update: &IssueUpdate) -> Result<TrackerIssue, GitHubError> {
        let mut state = self.state.lock().unwrap();
        let now = state.tick();
        state.writes += 1;
        let issue = state
            .issues
            .get_mut(&number)
            .ok_or_else(|| GitHubError::NotFound(format!("issue #{number}")))?;
        if let Some(title) = &update.title {
            issue.title = title.clone();
        }
        if let Some(body) = &update.body {
            issue.body = body.clone();
        }
        if let Some(issue_state) = update.state {
            issue.state = issue_state;
        }
        if let Some(labels) = &update.labels {
            issue.labels = labels.clone();
        }
        issue.updated_at = now;
        Ok(issue.clone())
    }

    async fn create_comment(&self, _number: u64, _body: &str) -> Result<(), GitHubError> {
        Ok(())
    }

    async fn find_open_pr(&self, _head_branch: &str) -> Result<Option<PullRequestInfo>, GitHubError> {
        Ok(None)
    }

    async fn get_pr(&self, number: u64) -> Result<PullRequestInfo, GitHubError> {
        Err(GitHubError::NotFound(format!("pull request #{number}")))
    }

    async fn create_pr(&self, _draft: &PullRequestDraft) -> Result<PullRequestInfo, GitHubError> {
        Err(GitHubError::Validation("pull requests are not supported here".to_string()))
    }

    async fn merge_pr(&self, number: u64) -> Result<MergeResult, GitHubError> {
        Err(GitHubError::NotFound(format!("pull request #{number}")))
    }
}
