use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use super::client::IssueTracker;
use super::errors::GitHubError;
use super::types::{PrState, PullRequestDraft, PullRequestInfo};
use crate::external::GitClient;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PullRequestError {
    #[error(transparent)]
    GitHub(#[from] GitHubError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrRequest {
    pub branch: String,
    pub base: String,
    pub title: String,
    pub body: String,
    pub linked_issue: Option<u64>,
    /// Worktree to push from before creating the pull request.
    pub workdir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnsurePrOutcome {
    pub pr: PullRequestInfo,
    pub created: bool,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeTarget {
    Branch(String),
    Number(u64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    Merged {
        number: u64,
        sha: Option<String>,
        warnings: Vec<String>,
    },
    Refused {
        reason: String,
    },
}

impl MergeOutcome {
    fn refused(reason: impl Into<String>) -> Self {
        MergeOutcome::Refused { reason: reason.into() }
    }
}

/// Appends the closing keyword for the linked issue unless the body already has it.
pub fn pr_body(body: &str, linked_issue: Option<u64>) -> String {
    match linked_issue {
        Some(number) => {
            let closing = format!("Closes #{number}");
            if body.contains(&closing) {
                body.to_string()
            } else if body.trim().is_empty() {
                closing
            } else {
                format!("{}\n\n{closing}", body.trim_end())
            }
        }
        None => body.to_string(),
    }
}

pub struct PullRequestManager {
    tracker: Arc<dyn IssueTracker>,
    git: GitClient,
    repo_root: PathBuf,
    recheck_delay: Duration,
    branch_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl PullRequestManager {
    pub fn new(tracker: Arc<dyn IssueTracker>, git: GitClient, repo_root: impl Into<PathBuf>) -> Self {
        Self {
            tracker,
            git,
            repo_root: repo_root.into(),
            recheck_delay: Duration::from_secs(3),
            branch_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_recheck_delay(mut self, delay: Duration) -> Self {
        self.recheck_delay = delay;
        self
    }

    fn branch_lock(&self, branch: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.branch_locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(branch.to_string()).or_default())
    }

    /// Drop the branch's lock entry once no other caller holds it.
    fn release_branch_lock(&self, branch: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.branch_locks.lock().unwrap_or_else(PoisonError::into_inner);
        drop(lock);
        if locks.get(branch).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(branch);
        }
    }

    /// Return the open pull request for the branch, creating it if none exists.
    pub async fn ensure_pr(&self, request: &PrRequest) -> Result<EnsurePrOutcome, PullRequestError> {
        let lock = self.branch_lock(&request.branch);
        let result = {
            let _guard = lock.lock().await;
            self.find_or_create_pr(request).await
        };
        self.release_branch_lock(&request.branch, lock);
        result
    }

    async fn find_or_create_pr(&self, request: &PrRequest) -> Result<EnsurePrOutcome, PullRequestError> {
        if let Some(pr) = self.tracker.find_open_pr(&request.branch).await? {
            info!(branch = %request.branch, pr_number = pr.number, "Pull request already open");
            return Ok(EnsurePrOutcome {
                pr,
                created: false,
                warnings: Vec::new(),
            });
        }

        let mut warnings = Vec::new();
        if let Some(workdir) = &request.workdir {
            if let Err(e) = self.git.push(workdir, &request.branch, true, self.git.command_timeout()).await {
                warn!(branch = %request.branch, error = %e, "Push before PR creation failed");
                warnings.push(format!("push failed: {e}"));
            }
        }

        let draft = PullRequestDraft {
            title: request.title.clone(),
            head: request.branch.clone(),
            base: request.base.clone(),
            body: pr_body(&request.body, request.linked_issue),
        };
        let pr = self.tracker.create_pr(&draft).await?;
        info!(branch = %request.branch, pr_number = pr.number, "Opened pull request");

        Ok(EnsurePrOutcome {
            pr,
            created: true,
            warnings,
        })
    }

    /// Squash-merge a pull request and delete its branch.
    ///
    /// Returns [`MergeOutcome::Refused`] when the pull request is not open, not
    /// mergeable, or its head is the default branch.
    pub async fn merge_pr(&self, target: &MergeTarget, default_branch: &str) -> Result<MergeOutcome, PullRequestError> {
        let pr = match target {
            MergeTarget::Branch(branch) => match self.tracker.find_open_pr(branch).await? {
                Some(pr) => pr,
                None => {
                    return Ok(MergeOutcome::refused(format!(
                        "no open pull request for branch {branch}"
                    )))
                }
            },
            MergeTarget::Number(number) => self.tracker.get_pr(*number).await?,
        };

        if pr.state != PrState::Open {
            return Ok(MergeOutcome::refused(format!(
                "pull request #{} is {:?}, not open",
                pr.number, pr.state
            )));
        }
        if pr.head_branch == default_branch {
            return Ok(MergeOutcome::refused(format!(
                "pull request #{} comes from the default branch {default_branch}",
                pr.number
            )));
        }

        let mergeable = match pr.mergeable {
            Some(value) => Some(value),
            None => {
                // GitHub computes mergeability lazily; ask once more.
                tokio::time::sleep(self.recheck_delay).await;
                self.tracker.get_pr(pr.number).await?.mergeable
            }
        };
        match mergeable {
            Some(true) => {}
            Some(false) => {
                return Ok(MergeOutcome::refused(format!(
                    "pull request #{} is not mergeable",
                    pr.number
                )))
            }
            None => {
                return Ok(MergeOutcome::refused(format!(
                    "mergeability of pull request #{} is still unknown",
                    pr.number
                )))
            }
        }

        let result = self.tracker.merge_pr(pr.number).await?;
        if !result.merged {
            return Ok(MergeOutcome::refused(
                result
                    .message
                    .unwrap_or_else(|| format!("GitHub declined to merge #{}", pr.number)),
            ));
        }
        info!(pr_number = pr.number, branch = %pr.head_branch, "Merged pull request");

        let mut warnings = Vec::new();
        if let Err(e) = self.git.delete_remote_branch(&self.repo_root, &pr.head_branch).await {
            warn!(branch = %pr.head_branch, error = %e, "Could not delete merged branch");
            warnings.push(format!("branch {} was not deleted: {e}", pr.head_branch));
        }

        Ok(MergeOutcome::Merged {
            number: pr.number,
            sha: result.sha,
            warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeTracker, ScriptedExecutor};

    fn manager(fake: Arc<FakeTracker>, executor: Arc<ScriptedExecutor>) -> PullRequestManager {
        let git = GitClient::new(executor, Duration::from_secs(5), Duration::from_secs(5));
        PullRequestManager::new(fake, git, "/repo").with_recheck_delay(Duration::from_millis(10))
    }

    fn request(branch: &str) -> PrRequest {
        PrRequest {
            branch: branch.to_string(),
            base: "main".to_string(),
            title: "Fix login bug".to_string(),
            body: "Automated change".to_string(),
            linked_issue: Some(42),
            workdir: None,
        }
    }

    #[test]
    fn test_pr_body_appends_closing_keyword_once() {
        assert_eq!(pr_body("Body", Some(7)), "Body\n\nCloses #7");
        assert_eq!(pr_body("Body\n\nCloses #7", Some(7)), "Body\n\nCloses #7");
        assert_eq!(pr_body("", Some(7)), "Closes #7");
        assert_eq!(pr_body("Body", None), "Body");
    }

    #[tokio::test]
    async fn test_ensure_pr_creates_at_most_once() {
        let fake = Arc::new(FakeTracker::new());
        let manager = manager(fake.clone(), Arc::new(ScriptedExecutor::new()));

        let first = manager.ensure_pr(&request("task/abc")).await.unwrap();
        let second = manager.ensure_pr(&request("task/abc")).await.unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.pr.number, second.pr.number);
        assert_eq!(fake.create_pr_calls(), 1);
        assert!(fake.pr(first.pr.number).unwrap().1.contains("Closes #42"));
    }

    #[tokio::test]
    async fn test_concurrent_ensure_pr_creates_once() {
        let fake = Arc::new(FakeTracker::new());
        let manager = Arc::new(manager(fake.clone(), Arc::new(ScriptedExecutor::new())));

        let a = tokio::spawn({
            let manager = manager.clone();
            async move { manager.ensure_pr(&request("task/race")).await }
        });
        let b = tokio::spawn({
            let manager = manager.clone();
            async move { manager.ensure_pr(&request("task/race")).await }
        });
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        assert_eq!(fake.create_pr_calls(), 1);
        assert!(manager.branch_locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_branch_locks_do_not_accumulate() {
        let fake = Arc::new(FakeTracker::new());
        let manager = manager(fake.clone(), Arc::new(ScriptedExecutor::new()));

        manager.ensure_pr(&request("task/one")).await.unwrap();
        manager.ensure_pr(&request("task/two")).await.unwrap();

        assert!(manager.branch_locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_push_failure_is_a_warning() {
        let fake = Arc::new(FakeTracker::new());
        let executor = Arc::new(ScriptedExecutor::new());
        executor.respond_err("git push -u origin task/abc", 1, "rejected");
        let manager = manager(fake.clone(), executor);

        let mut req = request("task/abc");
        req.workdir = Some(PathBuf::from("/repo/.tasks/task-abc"));
        let outcome = manager.ensure_pr(&req).await.unwrap();

        assert!(outcome.created);
        assert_eq!(outcome.warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_merge_refuses_unknown_mergeability_after_recheck() {
        let fake = Arc::new(FakeTracker::new());
        let manager = manager(fake.clone(), Arc::new(ScriptedExecutor::new()));
        let pr = manager.ensure_pr(&request("task/abc")).await.unwrap().pr;
        fake.set_pr_mergeable(pr.number, None);

        let outcome = manager.merge_pr(&MergeTarget::Number(pr.number), "main").await.unwrap();

        assert!(matches!(outcome, MergeOutcome::Refused { .. }));
        assert_eq!(fake.merge_calls(), 0);
        assert_eq!(fake.get_pr_calls(), 2);
    }

    #[tokio::test]
    async fn test_merge_refuses_default_branch_and_missing_pr() {
        let fake = Arc::new(FakeTracker::new());
        let manager = manager(fake.clone(), Arc::new(ScriptedExecutor::new()));
        manager.ensure_pr(&request("main")).await.unwrap();

        let outcome = manager
            .merge_pr(&MergeTarget::Branch("main".into()), "main")
            .await
            .unwrap();
        assert!(matches!(outcome, MergeOutcome::Refused { .. }));

        let outcome = manager
            .merge_pr(&MergeTarget::Branch("task/none".into()), "main")
            .await
            .unwrap();
        assert!(matches!(outcome, MergeOutcome::Refused { .. }));
        assert_eq!(fake.merge_calls(), 0);
    }

    #[tokio::test]
    async fn test_merge_squashes_and_deletes_branch() {
        let fake = Arc::new(FakeTracker::new());
        let executor = Arc::new(ScriptedExecutor::new());
        let manager = manager(fake.clone(), executor.clone());
        let pr = manager.ensure_pr(&request("task/abc")).await.unwrap().pr;

        let outcome = manager
            .merge_pr(&MergeTarget::Branch("task/abc".into()), "main")
            .await
            .unwrap();

        match outcome {
            MergeOutcome::Merged { number, warnings, .. } => {
                assert_eq!(number, pr.number);
                assert!(warnings.is_empty());
            }
            other => panic!("expected merge, got {other:?}"),
        }
        assert!(executor.was_called("git push origin --delete task/abc"));

        // Merged pull requests are no longer open
        let again = manager.merge_pr(&MergeTarget::Number(pr.number), "main").await.unwrap();
        assert!(matches!(again, MergeOutcome::Refused { .. }));
    }
}
