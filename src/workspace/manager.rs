use chrono::Utc;
use moka::future::Cache;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::naming::{branch_name, workspace_dir_name};
use super::registry::WorkspaceRegistry;
use super::types::{
    registry_key, CleanupEntry, CleanupOutcome, CleanupPolicy, CleanupReport, DeferredCleanup,
    OrphanReport, Workspace,
};
use super::WorkspaceError;
use crate::config::WorkspaceConfig;
use crate::external::GitClient;
use crate::tasks::{ExecutionStore, Task};

fn canonical(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Creates, finds and removes per-task git worktrees.
pub struct WorkspaceManager {
    git: GitClient,
    repo_root: PathBuf,
    root_dir_name: String,
    retention_days: u32,
    registry: WorkspaceRegistry,
    executions: Arc<dyn ExecutionStore>,
    default_branches: Cache<PathBuf, String>,
}

impl WorkspaceManager {
    pub fn new(
        git: GitClient,
        config: &WorkspaceConfig,
        executions: Arc<dyn ExecutionStore>,
    ) -> Result<Self, WorkspaceError> {
        let repo_root = std::path::absolute(&config.repo_root).map_err(|e| WorkspaceError::Io(e.to_string()))?;
        let registry = WorkspaceRegistry::open(repo_root.join(&config.registry_file))?;
        let default_branches = Cache::builder()
            .max_capacity(64)
            .time_to_live(Duration::from_secs(config.default_branch_cache_secs.max(1)))
            .build();

        Ok(Self {
            git,
            repo_root,
            root_dir_name: config.root_dir.trim_matches('/').to_string(),
            retention_days: config.retention_days,
            registry,
            executions,
            default_branches,
        })
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    pub fn workspace_root(&self) -> PathBuf {
        self.repo_root.join(&self.root_dir_name)
    }

    pub fn path_for(&self, task_id: &str) -> PathBuf {
        self.workspace_root().join(workspace_dir_name(task_id))
    }

    /// Provision the worktree for a task. Returns the existing workspace
    /// unchanged when its directory is already present.
    pub async fn create(&self, task_source: &str, task: &Task) -> Result<Workspace, WorkspaceError> {
        let key = registry_key(task_source, &task.id);
        let path = self.path_for(&task.id);

        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            if let Some(existing) = self.registry.get(&key) {
                debug!(task_id = %task.id, path = %path.display(), "Workspace already exists");
                return Ok(existing);
            }
            // Directory from an earlier run without a record; adopt it as-is.
            let adopted = Workspace {
                task_source: task_source.to_string(),
                task_id: task.id.clone(),
                path,
                branch: task.branch.clone().unwrap_or_else(|| branch_name(&task.id, &task.title)),
                base_branch: self.default_branch().await?,
                created_at: Utc::now(),
                pending_cleanup: false,
                retention_days: None,
            };
            self.registry.upsert(adopted.clone()).await?;
            return Ok(adopted);
        }

        self.ensure_excluded().await?;
        let base_branch = self.default_branch().await?;
        let branch = branch_name(&task.id, &task.title);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| WorkspaceError::Io(e.to_string()))?;
        }
        self.git
            .worktree_add(&self.repo_root, &path, &branch, &base_branch)
            .await?;

        let workspace = Workspace {
            task_source: task_source.to_string(),
            task_id: task.id.clone(),
            path,
            branch,
            base_branch,
            created_at: Utc::now(),
            pending_cleanup: false,
            retention_days: None,
        };
        self.registry.upsert(workspace.clone()).await?;
        info!(task_id = %task.id, branch = %workspace.branch, path = %workspace.path.display(), "Created workspace");
        Ok(workspace)
    }

    /// Add the workspace root to `info/exclude` so worktrees never show up as
    /// untracked files in the main checkout.
    pub async fn ensure_excluded(&self) -> Result<(), WorkspaceError> {
        let common_dir = self.git.common_dir(&self.repo_root).await?;
        let info_dir = common_dir.join("info");
        let exclude_path = info_dir.join("exclude");
        let entry = format!("/{}/", self.root_dir_name);

        let current = match tokio::fs::read_to_string(&exclude_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(WorkspaceError::Io(e.to_string())),
        };
        if current.lines().any(|line| line.trim() == entry) {
            return Ok(());
        }

        let mut updated = current;
        if !updated.is_empty() && !updated.ends_with('\n') {
            updated.push('\n');
        }
        updated.push_str(&entry);
        updated.push('\n');

        tokio::fs::create_dir_all(&info_dir)
            .await
            .map_err(|e| WorkspaceError::Io(e.to_string()))?;
        tokio::fs::write(&exclude_path, updated)
            .await
            .map_err(|e| WorkspaceError::Io(e.to_string()))?;
        debug!(entry = %entry, "Excluded workspace root from version control");
        Ok(())
    }

    /// Default branch of the repository: remote HEAD, then a local `main` or
    /// `master`, then "main". Cached per repository.
    pub async fn default_branch(&self) -> Result<String, WorkspaceError> {
        let git = self.git.clone();
        let repo = self.repo_root.clone();
        self.default_branches
            .try_get_with(self.repo_root.clone(), async move {
                if let Some(branch) = git.remote_default_branch(&repo).await? {
                    return Ok(branch);
                }
                for candidate in ["main", "master"] {
                    if git.branch_exists(&repo, candidate).await? {
                        return Ok(candidate.to_string());
                    }
                }
                Ok::<_, crate::external::GitError>("main".to_string())
            })
            .await
            .map_err(|e| WorkspaceError::Git((*e).clone()))
    }

    pub fn find(&self, task_source: &str, task_id: &str) -> Option<Workspace> {
        self.registry.get(&registry_key(task_source, task_id))
    }

    /// Workspace whose directory is `dir` or contains it.
    pub fn find_by_path(&self, dir: &Path) -> Option<Workspace> {
        let dir = canonical(dir);
        self.registry
            .all()
            .into_iter()
            .find(|ws| dir.starts_with(canonical(&ws.path)))
    }

    pub fn list(&self) -> Vec<Workspace> {
        self.registry.all()
    }

    /// Flag a workspace for later removal and tell the user how to remove it now.
    pub async fn defer_cleanup(&self, task_source: &str, task_id: &str) -> Result<DeferredCleanup, WorkspaceError> {
        let mut workspace = self
            .find(task_source, task_id)
            .ok_or_else(|| WorkspaceError::NotFound(task_id.to_string()))?;
        workspace.pending_cleanup = true;
        self.registry.upsert(workspace.clone()).await?;

        let instructions = format!(
            "git -C {} worktree remove {} && git -C {} branch -D {}",
            self.repo_root.display(),
            workspace.path.display(),
            self.repo_root.display(),
            workspace.branch
        );
        info!(task_id, path = %workspace.path.display(), "Workspace cleanup deferred");
        Ok(DeferredCleanup {
            path: workspace.path,
            branch: workspace.branch,
            instructions,
        })
    }

    fn is_stale(&self, workspace: &Workspace, retention_days: u32) -> bool {
        let days = workspace.retention_days.unwrap_or(retention_days);
        workspace.created_at + chrono::Duration::days(i64::from(days)) < Utc::now()
    }

    /// Remove one workspace if every safety gate passes.
    pub async fn remove(&self, workspace: &Workspace, dry_run: bool) -> CleanupOutcome {
        if !tokio::fs::try_exists(&workspace.path).await.unwrap_or(true) {
            if dry_run {
                return CleanupOutcome::WouldClean;
            }
            return match self.registry.remove(&workspace.key()).await {
                Ok(_) => CleanupOutcome::Cleaned,
                Err(e) => CleanupOutcome::Failed(e.to_string()),
            };
        }

        match self.executions.has_running(&workspace.task_id).await {
            Ok(false) => {}
            Ok(true) => return CleanupOutcome::SkippedRunning,
            Err(e) => {
                warn!(task_id = %workspace.task_id, error = %e, "Execution lookup failed, keeping workspace");
                return CleanupOutcome::SkippedRunning;
            }
        }

        match self.git.has_uncommitted_changes(&workspace.path).await {
            Ok(false) => {}
            Ok(true) => return CleanupOutcome::SkippedDirty("uncommitted changes".to_string()),
            Err(e) => return CleanupOutcome::SkippedDirty(format!("status check failed: {e}")),
        }

        if dry_run {
            return CleanupOutcome::WouldRemove;
        }

        if let Err(e) = self.git.worktree_remove(&self.repo_root, &workspace.path).await {
            return CleanupOutcome::Failed(e.to_string());
        }
        match self.registry.remove(&workspace.key()).await {
            Ok(_) => {
                info!(task_id = %workspace.task_id, path = %workspace.path.display(), "Removed workspace");
                CleanupOutcome::Removed
            }
            Err(e) => CleanupOutcome::Failed(e.to_string()),
        }
    }

    /// Remove workspaces past retention or flagged for cleanup.
    pub async fn cleanup_stale(&self, policy: CleanupPolicy) -> CleanupReport {
        let mut report = CleanupReport {
            dry_run: policy.dry_run,
            entries: Vec::new(),
        };

        for workspace in self.registry.all() {
            if !workspace.pending_cleanup && !self.is_stale(&workspace, policy.retention_days) {
                continue;
            }
            let outcome = self.remove(&workspace, policy.dry_run).await;
            if outcome.is_skip() {
                debug!(task_id = %workspace.task_id, ?outcome, "Skipped workspace cleanup");
            }
            report.entries.push(CleanupEntry {
                task_id: workspace.task_id.clone(),
                path: workspace.path.clone(),
                outcome,
            });
        }
        report
    }

    pub fn default_policy(&self, dry_run: bool) -> CleanupPolicy {
        CleanupPolicy {
            retention_days: self.retention_days,
            dry_run,
        }
    }

    /// Directories under the workspace root that git does not know as worktrees.
    pub async fn find_orphans(&self) -> Result<Vec<PathBuf>, WorkspaceError> {
        let root = self.workspace_root();
        let mut entries = match tokio::fs::read_dir(&root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(WorkspaceError::Io(e.to_string())),
        };

        let known: Vec<PathBuf> = self
            .git
            .worktree_list(&self.repo_root)
            .await?
            .into_iter()
            .map(|entry| canonical(&entry.path))
            .collect();

        let mut orphans = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| WorkspaceError::Io(e.to_string()))?
        {
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            if !is_dir {
                continue;
            }
            let path = entry.path();
            if !known.contains(&canonical(&path)) {
                orphans.push(path);
            }
        }
        orphans.sort();
        Ok(orphans)
    }

    /// Delete orphaned directories, then prune git's worktree metadata.
    pub async fn remove_orphans(&self, dry_run: bool) -> Result<OrphanReport, WorkspaceError> {
        let orphans = self.find_orphans().await?;
        let mut report = OrphanReport {
            dry_run,
            orphans: orphans.clone(),
            ..OrphanReport::default()
        };
        if dry_run {
            return Ok(report);
        }

        for path in orphans {
            match tokio::fs::remove_dir_all(&path).await {
                Ok(()) => {
                    info!(path = %path.display(), "Removed orphaned workspace directory");
                    if let Some(record) = self.find_by_path(&path) {
                        self.registry.remove(&record.key()).await?;
                    }
                    report.removed.push(path);
                }
                Err(e) => report.errors.push(format!("{}: {e}", path.display())),
            }
        }
        self.git.worktree_prune(&self.repo_root).await?;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::{Execution, InMemoryExecutionStore};
    use crate::testing::ScriptedExecutor;

    struct Fixture {
        _dir: tempfile::TempDir,
        repo: PathBuf,
        executor: Arc<ScriptedExecutor>,
        executions: Arc<InMemoryExecutionStore>,
        manager: WorkspaceManager,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let repo = canonical(dir.path());
        let executor = Arc::new(ScriptedExecutor::with_fs_effects());
        executor.respond("git rev-parse --git-common-dir", 0, ".git\n");
        executor.respond("git symbolic-ref refs/remotes/origin/HEAD", 0, "refs/remotes/origin/main\n");
        let git = GitClient::new(executor.clone(), Duration::from_secs(5), Duration::from_secs(30));
        let executions = Arc::new(InMemoryExecutionStore::new());
        let config = WorkspaceConfig {
            repo_root: repo.clone(),
            ..WorkspaceConfig::default()
        };
        let manager = WorkspaceManager::new(git, &config, executions.clone()).unwrap();
        Fixture {
            _dir: dir,
            repo,
            executor,
            executions,
            manager,
        }
    }

    fn task() -> Task {
        Task::new("abcdef1234567890", "Fix login bug!!", "")
    }

    #[tokio::test]
    async fn test_create_is_idempotent() {
        let fx = fixture();
        let first = fx.manager.create("local", &task()).await.unwrap();
        let second = fx.manager.create("local", &task()).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.branch, "task/abcdef12-fix-login-bug");
        assert_eq!(first.path, fx.repo.join(".tasks").join("task-abcdef12"));
        assert_eq!(first.base_branch, "main");

        let add = format!(
            "git worktree add -b task/abcdef12-fix-login-bug {} main",
            first.path.display()
        );
        assert_eq!(fx.executor.call_count(&add), 1);

        let exclude = std::fs::read_to_string(fx.repo.join(".git/info/exclude")).unwrap();
        assert_eq!(exclude.lines().filter(|l| *l == "/.tasks/").count(), 1);
    }

    #[tokio::test]
    async fn test_default_branch_falls_back_and_is_cached() {
        let dir = tempfile::tempdir().unwrap();
        let executor = Arc::new(ScriptedExecutor::new());
        executor.respond("git symbolic-ref refs/remotes/origin/HEAD", 128, "");
        executor.respond("git branch --list main", 0, "");
        executor.respond("git branch --list master", 0, "  master\n");
        let git = GitClient::new(executor.clone(), Duration::from_secs(5), Duration::from_secs(5));
        let config = WorkspaceConfig {
            repo_root: dir.path().to_path_buf(),
            ..WorkspaceConfig::default()
        };
        let manager = WorkspaceManager::new(git, &config, Arc::new(InMemoryExecutionStore::new())).unwrap();

        assert_eq!(manager.default_branch().await.unwrap(), "master");
        assert_eq!(manager.default_branch().await.unwrap(), "master");
        assert_eq!(executor.call_count("git symbolic-ref refs/remotes/origin/HEAD"), 1);
    }

    async fn three_flagged(fx: &Fixture) -> [Workspace; 3] {
        let running = fx.manager.create("local", &Task::new("11111111aaaa", "Running", "")).await.unwrap();
        let dirty = fx.manager.create("local", &Task::new("22222222bbbb", "Dirty", "")).await.unwrap();
        let other = fx.manager.create("local", &Task::new("33333333cccc", "Other", "")).await.unwrap();
        for ws in [&running, &dirty, &other] {
            fx.manager.defer_cleanup("local", &ws.task_id).await.unwrap();
        }
        fx.executions.save(&Execution::start(&running.task_id, &running.path)).await.unwrap();
        [running, dirty, other]
    }

    #[tokio::test]
    async fn test_dry_run_reports_without_touching_anything() {
        let fx = fixture();
        let [running, dirty, clean] = three_flagged(&fx).await;
        // The running workspace never reaches the status check.
        fx.executor.respond("git status --porcelain", 0, " M src/lib.rs\n");
        fx.executor.respond("git status --porcelain", 0, "");

        let report = fx.manager.cleanup_stale(fx.manager.default_policy(true)).await;

        assert!(report.dry_run);
        assert_eq!(report.count(&CleanupOutcome::SkippedRunning), 1);
        assert_eq!(report.count(&CleanupOutcome::SkippedDirty("uncommitted changes".into())), 1);
        assert_eq!(report.count(&CleanupOutcome::WouldRemove), 1);
        assert!(running.path.exists() && dirty.path.exists() && clean.path.exists());
        assert_eq!(fx.manager.list().len(), 3);
    }

    #[tokio::test]
    async fn test_status_failure_counts_as_dirty() {
        let fx = fixture();
        let [running, dirty, broken] = three_flagged(&fx).await;
        fx.executor.respond("git status --porcelain", 0, " M src/lib.rs\n");
        fx.executor.respond_err("git status --porcelain", 128, "fatal: bad object HEAD");

        let report = fx.manager.cleanup_stale(fx.manager.default_policy(false)).await;

        assert_eq!(report.count(&CleanupOutcome::SkippedRunning), 1);
        assert_eq!(
            report.entries.iter().filter(|e| matches!(e.outcome, CleanupOutcome::SkippedDirty(_))).count(),
            2
        );
        assert!(running.path.exists() && dirty.path.exists() && broken.path.exists());
        assert_eq!(fx.manager.list().len(), 3);
        assert!(!fx.executor.calls().iter().any(|c| c.starts_with("git worktree remove")));
    }

    #[tokio::test]
    async fn test_cleanup_removes_clean_and_drops_missing() {
        let fx = fixture();
        let clean = fx.manager.create("local", &Task::new("33333333cccc", "Clean", "")).await.unwrap();
        let gone = fx.manager.create("local", &Task::new("44444444dddd", "Gone", "")).await.unwrap();
        fx.manager.defer_cleanup("local", &clean.task_id).await.unwrap();
        fx.manager.defer_cleanup("local", &gone.task_id).await.unwrap();
        std::fs::remove_dir_all(&gone.path).unwrap();

        let report = fx.manager.cleanup_stale(fx.manager.default_policy(false)).await;

        assert_eq!(report.count(&CleanupOutcome::Removed), 1);
        assert_eq!(report.count(&CleanupOutcome::Cleaned), 1);
        assert!(!clean.path.exists());
        assert!(fx.manager.list().is_empty());
    }

    #[tokio::test]
    async fn test_fresh_workspaces_are_not_candidates() {
        let fx = fixture();
        fx.manager.create("local", &task()).await.unwrap();
        let report = fx.manager.cleanup_stale(fx.manager.default_policy(false)).await;
        assert!(report.entries.is_empty());
    }

    #[tokio::test]
    async fn test_orphans_removed_and_pruned() {
        let fx = fixture();
        let registered = fx.manager.create("local", &task()).await.unwrap();
        let orphan = fx.repo.join(".tasks").join("task-deadbeef");
        std::fs::create_dir_all(&orphan).unwrap();
        fx.executor.respond(
            "git worktree list --porcelain",
            0,
            &format!(
                "worktree {}\nbranch refs/heads/main\n\nworktree {}\nbranch refs/heads/{}\n",
                fx.repo.display(),
                registered.path.display(),
                registered.branch
            ),
        );

        let dry = fx.manager.remove_orphans(true).await.unwrap();
        assert_eq!(dry.orphans, vec![orphan.clone()]);
        assert!(orphan.exists());
        assert!(!fx.executor.was_called("git worktree prune"));

        let report = fx.manager.remove_orphans(false).await.unwrap();
        assert_eq!(report.removed, vec![orphan.clone()]);
        assert!(!orphan.exists());
        assert!(registered.path.exists());
        assert!(fx.executor.was_called("git worktree prune"));
    }

    #[tokio::test]
    async fn test_find_by_path_matches_subdirectories() {
        let fx = fixture();
        let ws = fx.manager.create("local", &task()).await.unwrap();
        std::fs::create_dir_all(ws.path.join("src")).unwrap();
        assert_eq!(fx.manager.find_by_path(&ws.path.join("src")).unwrap().task_id, ws.task_id);
        assert!(fx.manager.find_by_path(&fx.repo).is_none());
    }
}
