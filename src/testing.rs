//! Hand-written fakes shared by unit tests.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::external::{CommandError, CommandExecutor, CommandOutput};
use crate::github::{
    GitHubError, IssueDraft, IssueState, IssueTracker, IssueUpdate, MergeResult, PrState,
    PullRequestDraft, PullRequestInfo, StateFilter, TrackerIssue,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Command executor answering from a script keyed by the full command line.
///
/// Unscripted commands succeed with empty output. When several responses are
/// queued for one command they are consumed in order and the last one repeats.
#[derive(Default)]
pub struct ScriptedExecutor {
    responses: Mutex<HashMap<String, VecDeque<Result<CommandOutput, CommandError>>>>,
    calls: Mutex<Vec<String>>,
    fs_effects: bool,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `git worktree add` create, and `git worktree remove` delete, the
    /// worktree directory.
    pub fn with_fs_effects() -> Self {
        Self {
            fs_effects: true,
            ..Self::default()
        }
    }

    fn push(&self, command: &str, response: Result<CommandOutput, CommandError>) {
        lock(&self.responses)
            .entry(command.to_string())
            .or_default()
            .push_back(response);
    }

    pub fn respond(&self, command: &str, status_code: i32, stdout: &str) {
        self.push(
            command,
            Ok(CommandOutput {
                status_code,
                stdout: stdout.to_string(),
                stderr: String::new(),
            }),
        );
    }

    pub fn respond_err(&self, command: &str, status_code: i32, stderr: &str) {
        self.push(
            command,
            Ok(CommandOutput {
                status_code,
                stdout: String::new(),
                stderr: stderr.to_string(),
            }),
        );
    }

    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    pub fn was_called(&self, command: &str) -> bool {
        self.call_count(command) > 0
    }

    pub fn call_count(&self, command: &str) -> usize {
        lock(&self.calls).iter().filter(|c| c.as_str() == command).count()
    }

    fn apply_fs_effects(&self, args: &[&str]) {
        match args {
            ["worktree", "add", "-b", _, path, _] | ["worktree", "add", path, _] => {
                let _ = std::fs::create_dir_all(path);
            }
            ["worktree", "remove", "--force", path] => {
                let _ = std::fs::remove_dir_all(path);
            }
            _ => {}
        }
    }
}

#[async_trait]
impl CommandExecutor for ScriptedExecutor {
    async fn run(
        &self,
        program: &str,
        args: &[&str],
        _cwd: &Path,
        _timeout: Duration,
    ) -> Result<CommandOutput, CommandError> {
        let key = format!("{} {}", program, args.join(" "));
        lock(&self.calls).push(key.clone());

        let response = {
            let mut responses = lock(&self.responses);
            match responses.get_mut(&key) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            }
        };
        let response = response.unwrap_or_else(|| {
            Ok(CommandOutput {
                status_code: 0,
                stdout: String::new(),
                stderr: String::new(),
            })
        });

        if self.fs_effects && matches!(&response, Ok(output) if output.success()) {
            self.apply_fs_effects(args);
        }
        response
    }
}

#[derive(Default)]
struct TrackerState {
    issues: BTreeMap<u64, TrackerIssue>,
    prs: BTreeMap<u64, (PullRequestInfo, String)>,
    comments: Vec<(u64, String)>,
    next_number: u64,
    clock_ticks: i64,
    update_failures: VecDeque<GitHubError>,
    create_failures: VecDeque<GitHubError>,
    get_delays: VecDeque<Duration>,
    counters: HashMap<&'static str, usize>,
}

impl TrackerState {
    /// Strictly increasing timestamps so every remote edit is observable.
    fn tick(&mut self) -> DateTime<Utc> {
        self.clock_ticks += 1;
        Utc::now() + ChronoDuration::seconds(self.clock_ticks)
    }

    fn next_number(&mut self) -> u64 {
        self.next_number += 1;
        self.next_number
    }

    fn count(&mut self, name: &'static str) {
        *self.counters.entry(name).or_default() += 1;
    }
}

/// In-memory issue tracker with call counters and failure injection.
#[derive(Default)]
pub struct FakeTracker {
    state: Mutex<TrackerState>,
}

impl FakeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_issue(&self, title: &str, body: &str, labels: &[&str]) -> TrackerIssue {
        let mut state = lock(&self.state);
        let number = state.next_number();
        let now = state.tick();
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

    /// Apply a remote edit, bumping `updated_at`.
    pub fn edit_issue(&self, number: u64, edit: impl FnOnce(&mut TrackerIssue)) -> Option<TrackerIssue> {
        let mut state = lock(&self.state);
        let now = state.tick();
        let issue = state.issues.get_mut(&number)?;
        edit(issue);
        issue.updated_at = now;
        Some(issue.clone())
    }

    pub fn issue(&self, number: u64) -> Option<TrackerIssue> {
        lock(&self.state).issues.get(&number).cloned()
    }

    pub fn issues(&self) -> Vec<TrackerIssue> {
        lock(&self.state).issues.values().cloned().collect()
    }

    pub fn comments(&self, number: u64) -> Vec<String> {
        lock(&self.state)
            .comments
            .iter()
            .filter(|(n, _)| *n == number)
            .map(|(_, body)| body.clone())
            .collect()
    }

    pub fn pr(&self, number: u64) -> Option<(PullRequestInfo, String)> {
        lock(&self.state).prs.get(&number).cloned()
    }

    pub fn set_pr_mergeable(&self, number: u64, mergeable: Option<bool>) {
        if let Some((pr, _)) = lock(&self.state).prs.get_mut(&number) {
            pr.mergeable = mergeable;
        }
    }

    pub fn fail_next_updates(&self, count: usize, error: GitHubError) {
        let mut state = lock(&self.state);
        for _ in 0..count {
            state.update_failures.push_back(error.clone());
        }
    }

    pub fn fail_next_creates(&self, count: usize, error: GitHubError) {
        let mut state = lock(&self.state);
        for _ in 0..count {
            state.create_failures.push_back(error.clone());
        }
    }

    pub fn delay_next_gets(&self, count: usize, delay: Duration) {
        let mut state = lock(&self.state);
        for _ in 0..count {
            state.get_delays.push_back(delay);
        }
    }

    fn counter(&self, name: &str) -> usize {
        lock(&self.state).counters.get(name).copied().unwrap_or(0)
    }

    pub fn update_calls(&self) -> usize {
        self.counter("update_issue")
    }

    pub fn create_calls(&self) -> usize {
        self.counter("create_issue")
    }

    pub fn get_calls(&self) -> usize {
        self.counter("get_issue")
    }

    pub fn list_calls(&self) -> usize {
        self.counter("list_issues")
    }

    pub fn create_pr_calls(&self) -> usize {
        self.counter("create_pr")
    }

    pub fn get_pr_calls(&self) -> usize {
        self.counter("get_pr")
    }

    pub fn merge_calls(&self) -> usize {
        self.counter("merge_pr")
    }
}

#[async_trait]
impl IssueTracker for FakeTracker {
    async fn list_issues(&self, label: &str, filter: StateFilter) -> Result<Vec<TrackerIssue>, GitHubError> {
        let mut state = lock(&self.state);
        state.count("list_issues");
        Ok(state
            .issues
            .values()
            .filter(|issue| issue.has_label(label))
            .filter(|issue| match filter {
                StateFilter::Open => issue.state == IssueState::Open,
                StateFilter::Closed => issue.state == IssueState::Closed,
                StateFilter::All => true,
            })
            .cloned()
            .collect())
    }

    async fn get_issue(&self, number: u64) -> Result<TrackerIssue, GitHubError> {
        let delay = {
            let mut state = lock(&self.state);
            state.count("get_issue");
            state.get_delays.pop_front()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.issue(number)
            .ok_or_else(|| GitHubError::NotFound(format!("issue #{number}")))
    }

    async fn create_issue(&self, draft: &IssueDraft) -> Result<TrackerIssue, GitHubError> {
        let mut state = lock(&self.state);
        state.count("create_issue");
        if let Some(err) = state.create_failures.pop_front() {
            return Err(err);
        }
        let number = state.next_number();
        let now = state.tick();
        let issue = TrackerIssue {
            number,
            title: draft.title.clone(),
            body: draft.body.clone(),
            labels: draft.labels.clone(),
            state: IssueState::Open,
            html_url: format!("https://github.com/acme/widgets/issues/{number}"),
            created_at: now,
            updated_at: now,
        };
        state.issues.insert(number, issue.clone());
        Ok(issue)
    }

    async fn update_issue(&self, number: u64, update: &IssueUpdate) -> Result<TrackerIssue, GitHubError> {
        let mut state = lock(&self.state);
        state.count("update_issue");
        if let Some(err) = state.update_failures.pop_front() {
            return Err(err);
        }
        let now = state.tick();
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

    async fn create_comment(&self, number: u64, body: &str) -> Result<(), GitHubError> {
        let mut state = lock(&self.state);
        state.count("create_comment");
        state.comments.push((number, body.to_string()));
        Ok(())
    }

    async fn find_open_pr(&self, head_branch: &str) -> Result<Option<PullRequestInfo>, GitHubError> {
        let mut state = lock(&self.state);
        state.count("find_open_pr");
        Ok(state
            .prs
            .values()
            .map(|(pr, _)| pr)
            .find(|pr| pr.head_branch == head_branch && pr.state == PrState::Open)
            .cloned())
    }

    async fn get_pr(&self, number: u64) -> Result<PullRequestInfo, GitHubError> {
        let mut state = lock(&self.state);
        state.count("get_pr");
        state
            .prs
            .get(&number)
            .map(|(pr, _)| pr.clone())
            .ok_or_else(|| GitHubError::NotFound(format!("pull request #{number}")))
    }

    async fn create_pr(&self, draft: &PullRequestDraft) -> Result<PullRequestInfo, GitHubError> {
        // Yield so concurrent callers interleave here.
        tokio::task::yield_now().await;
        let mut state = lock(&self.state);
        state.count("create_pr");
        let number = state.next_number();
        let pr = PullRequestInfo {
            number,
            url: format!("https://github.com/acme/widgets/pull/{number}"),
            title: draft.title.clone(),
            state: PrState::Open,
            mergeable: Some(true),
            head_branch: draft.head.clone(),
            base_branch: draft.base.clone(),
        };
        state.prs.insert(number, (pr.clone(), draft.body.clone()));
        Ok(pr)
    }

    async fn merge_pr(&self, number: u64) -> Result<MergeResult, GitHubError> {
        let mut state = lock(&self.state);
        state.count("merge_pr");
        let (pr, _) = state
            .prs
            .get_mut(&number)
            .ok_or_else(|| GitHubError::NotFound(format!("pull request #{number}")))?;
        pr.state = PrState::Merged;
        Ok(MergeResult {
            merged: true,
            sha: Some(format!("{number:040x}")),
            message: None,
        })
    }
}
