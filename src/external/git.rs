//! Git subprocess client
//!
//! Thin wrappers over the git CLI used by the workspace manager and the review
//! pipeline. Every call takes an explicit working directory and runs under a
//! time budget.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use super::command::{CommandError, CommandExecutor, CommandOutput};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GitError {
    #[error("Not a git repository: {path}")]
    RepositoryNotFound { path: String },
    #[error("git {command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },
    #[error("Command execution error: {source}")]
    Command {
        #[from]
        source: CommandError,
    },
}

impl GitError {
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            GitError::Command {
                source: CommandError::Timeout { .. }
            }
        )
    }
}

/// An entry of `git worktree list --porcelain`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeEntry {
    pub path: PathBuf,
    pub branch: Option<String>,
}

#[derive(Clone)]
pub struct GitClient {
    executor: Arc<dyn CommandExecutor>,
    command_timeout: Duration,
    worktree_timeout: Duration,
}

impl GitClient {
    pub fn new(
        executor: Arc<dyn CommandExecutor>,
        command_timeout: Duration,
        worktree_timeout: Duration,
    ) -> Self {
        Self {
            executor,
            command_timeout,
            worktree_timeout,
        }
    }

    pub fn command_timeout(&self) -> Duration {
        self.command_timeout
    }

    async fn raw(&self, cwd: &Path, args: &[&str], timeout: Duration) -> Result<CommandOutput, GitError> {
        Ok(self.executor.run("git", args, cwd, timeout).await?)
    }

    /// Run git and return stdout, mapping a non-zero exit to an error.
    pub async fn run(&self, cwd: &Path, args: &[&str], timeout: Duration) -> Result<String, GitError> {
        let output = self.raw(cwd, args, timeout).await?;
        if !output.success() {
            return Err(classify_failure(cwd, args, &output.stderr));
        }
        Ok(output.stdout)
    }

    async fn run_default(&self, cwd: &Path, args: &[&str]) -> Result<String, GitError> {
        self.run(cwd, args, self.command_timeout).await
    }

    /// `git worktree add -b <branch> <path> <base>`, reusing the branch when it
    /// already exists.
    pub async fn worktree_add(&self, repo: &Path, path: &Path, branch: &str, base: &str) -> Result<(), GitError> {
        let path_str = path.to_string_lossy();
        if self.branch_exists(repo, branch).await? {
            debug!(branch, "Branch exists, attaching worktree to it");
            self.run(repo, &["worktree", "add", &path_str, branch], self.worktree_timeout)
                .await?;
        } else {
            self.run(
                repo,
                &["worktree", "add", "-b", branch, &path_str, base],
                self.worktree_timeout,
            )
            .await?;
        }
        Ok(())
    }

    pub async fn worktree_remove(&self, repo: &Path, path: &Path) -> Result<(), GitError> {
        let path_str = path.to_string_lossy();
        self.run(repo, &["worktree", "remove", "--force", &path_str], self.worktree_timeout)
            .await?;
        Ok(())
    }

    pub async fn worktree_list(&self, repo: &Path) -> Result<Vec<WorktreeEntry>, GitError> {
        let stdout = self.run_default(repo, &["worktree", "list", "--porcelain"]).await?;
        Ok(parse_worktree_list(&stdout))
    }

    pub async fn worktree_prune(&self, repo: &Path) -> Result<(), GitError> {
        self.run_default(repo, &["worktree", "prune"]).await?;
        Ok(())
    }

    pub async fn status_porcelain(&self, cwd: &Path, timeout: Duration) -> Result<String, GitError> {
        self.run(cwd, &["status", "--porcelain"], timeout).await
    }

    pub async fn has_uncommitted_changes(&self, cwd: &Path) -> Result<bool, GitError> {
        let status = self.status_porcelain(cwd, self.command_timeout).await?;
        Ok(!status.trim().is_empty())
    }

    pub async fn add_all(&self, cwd: &Path, timeout: Duration) -> Result<(), GitError> {
        self.run(cwd, &["add", "-A"], timeout).await?;
        Ok(())
    }

    pub async fn commit(&self, cwd: &Path, message: &str, timeout: Duration) -> Result<(), GitError> {
        self.run(cwd, &["commit", "-m", message], timeout).await?;
        Ok(())
    }

    pub async fn push(&self, cwd: &Path, branch: &str, set_upstream: bool, timeout: Duration) -> Result<(), GitError> {
        if set_upstream {
            self.run(cwd, &["push", "-u", "origin", branch], timeout).await?;
        } else {
            self.run(cwd, &["push", "origin", branch], timeout).await?;
        }
        Ok(())
    }

    pub async fn delete_remote_branch(&self, cwd: &Path, branch: &str) -> Result<(), GitError> {
        self.run_default(cwd, &["push", "origin", "--delete", branch]).await?;
        Ok(())
    }

    /// `git diff <base>...<head>` when `three_dot`, otherwise `git diff <base> <head>`.
    pub async fn diff(
        &self,
        cwd: &Path,
        base: &str,
        head: &str,
        three_dot: bool,
        timeout: Duration,
    ) -> Result<String, GitError> {
        if three_dot {
            let range = format!("{base}...{head}");
            self.run(cwd, &["diff", &range], timeout).await
        } else {
            self.run(cwd, &["diff", base, head], timeout).await
        }
    }

    pub async fn branch_exists(&self, repo: &Path, branch: &str) -> Result<bool, GitError> {
        let stdout = self.run_default(repo, &["branch", "--list", branch]).await?;
        Ok(!stdout.trim().is_empty())
    }

    /// Default branch advertised by `origin`, if the remote HEAD is known.
    pub async fn remote_default_branch(&self, repo: &Path) -> Result<Option<String>, GitError> {
        let output = self
            .raw(repo, &["symbolic-ref", "refs/remotes/origin/HEAD"], self.command_timeout)
            .await?;
        if !output.success() {
            return Ok(None);
        }
        Ok(output
            .stdout
            .trim()
            .strip_prefix("refs/remotes/origin/")
            .filter(|b| !b.is_empty())
            .map(str::to_string))
    }

    /// Shared `.git` directory, resolved against `repo` when git reports a
    /// relative path.
    pub async fn common_dir(&self, repo: &Path) -> Result<PathBuf, GitError> {
        let stdout = self.run_default(repo, &["rev-parse", "--git-common-dir"]).await?;
        let dir = PathBuf::from(stdout.trim());
        Ok(if dir.is_absolute() { dir } else { repo.join(dir) })
    }
}

fn classify_failure(cwd: &Path, args: &[&str], stderr: &str) -> GitError {
    if stderr.contains("not a git repository") {
        return GitError::RepositoryNotFound {
            path: cwd.display().to_string(),
        };
    }
    let command = args.first().copied().unwrap_or_default().to_string();
    warn!(command = %command, stderr = %stderr.trim(), "git command failed");
    GitError::CommandFailed {
        command,
        stderr: stderr.trim().to_string(),
    }
}

fn parse_worktree_list(output: &str) -> Vec<WorktreeEntry> {
    let mut entries = Vec::new();
    let mut current: Option<WorktreeEntry> = None;

    for line in output.lines() {
        if let Some(path) = line.strip_prefix("worktree ") {
            if let Some(entry) = current.take() {
                entries.push(entry);
            }
            current = Some(WorktreeEntry {
                path: PathBuf::from(path),
                branch: None,
            });
        } else if let Some(branch) = line.strip_prefix("branch ") {
            if let Some(entry) = current.as_mut() {
                entry.branch = Some(branch.trim_start_matches("refs/heads/").to_string());
            }
        }
    }
    if let Some(entry) = current {
        entries.push(entry);
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedExecutor;

    fn client(executor: Arc<ScriptedExecutor>) -> GitClient {
        GitClient::new(executor, Duration::from_secs(5), Duration::from_secs(30))
    }

    #[test]
    fn test_parse_worktree_list() {
        let output = "worktree /repo\nHEAD abc\nbranch refs/heads/main\n\n\
                      worktree /repo/.tasks/task-abcdef12\nHEAD def\nbranch refs/heads/task/abcdef12-fix\n\n\
                      worktree /repo/.tasks/detached\nHEAD 123\ndetached\n";
        let entries = parse_worktree_list(output);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].branch.as_deref(), Some("main"));
        assert_eq!(entries[1].path, PathBuf::from("/repo/.tasks/task-abcdef12"));
        assert_eq!(entries[1].branch.as_deref(), Some("task/abcdef12-fix"));
        assert_eq!(entries[2].branch, None);
    }

    #[tokio::test]
    async fn test_remote_default_branch_strips_prefix() {
        let executor = Arc::new(ScriptedExecutor::new());
        executor.respond("git symbolic-ref refs/remotes/origin/HEAD", 0, "refs/remotes/origin/trunk\n");
        let git = client(executor);
        let branch = git.remote_default_branch(Path::new("/repo")).await.unwrap();
        assert_eq!(branch.as_deref(), Some("trunk"));
    }

    #[tokio::test]
    async fn test_remote_default_branch_missing() {
        let executor = Arc::new(ScriptedExecutor::new());
        executor.respond("git symbolic-ref refs/remotes/origin/HEAD", 128, "");
        let git = client(executor);
        assert_eq!(git.remote_default_branch(Path::new("/repo")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_worktree_add_creates_branch_from_base() {
        let executor = Arc::new(ScriptedExecutor::new());
        executor.respond("git branch --list task/x", 0, "");
        executor.respond("git worktree add -b task/x /repo/.tasks/task-x main", 0, "");
        let git = client(executor.clone());

        git.worktree_add(Path::new("/repo"), Path::new("/repo/.tasks/task-x"), "task/x", "main")
            .await
            .unwrap();

        assert!(executor.was_called("git worktree add -b task/x /repo/.tasks/task-x main"));
    }

    #[tokio::test]
    async fn test_failure_is_classified() {
        let executor = Arc::new(ScriptedExecutor::new());
        executor.respond_err("git status --porcelain", 128, "fatal: not a git repository");
        let git = client(executor);
        let err = git.status_porcelain(Path::new("/tmp/nowhere"), Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, GitError::RepositoryNotFound { .. }));
    }
}
