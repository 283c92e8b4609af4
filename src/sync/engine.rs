use chrono::Utc;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::conflicts::{ConflictLog, LocalSnapshot, RemoteSnapshot, SyncConflict};
use super::dedup::{duplicate_comment, find_duplicates, DedupReport};
use super::mapping::{apply_issue, issue_draft, issue_update, mark_synced, task_from_issue};
use super::markers::{embed_marker, extract_task_id};
use crate::fs::FsError;
use crate::github::{GitHubError, IssueState, IssueTracker, IssueUpdate, StateFilter, TrackerIssue};
use crate::observability::{OperationTimer, PipelineMetrics};
use crate::tasks::{StoreError, SyncStatus, Task, TaskStatus, TaskStore, TrackerRef};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("A sync operation is already in progress")]
    InFlight,
    #[error(transparent)]
    Tracker(#[from] GitHubError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Conflict log error: {0}")]
    ConflictLog(#[from] FsError),
    #[error("No unresolved conflict for task {0}")]
    NoConflict(String),
    #[error("Task {0} is not linked to an issue")]
    NotLinked(String),
    #[error("Issue #{issue_number} changed again after the conflict for task {task_id} was recorded; review the refreshed conflict and resolve again")]
    StaleConflict { task_id: String, issue_number: u64 },
}

impl SyncError {
    /// Errors that make the rest of a pass pointless.
    fn aborts_pass(&self) -> bool {
        matches!(
            self,
            SyncError::Tracker(GitHubError::CircuitOpen(_) | GitHubError::Unauthorized { .. })
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    KeepLocal,
    KeepRemote,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Issues created for local tasks
    pub created: Vec<String>,
    /// Local tasks linked to an issue that already carried their marker
    pub linked: Vec<String>,
    pub pushed: Vec<String>,
    pub pulled: Vec<String>,
    /// Local tasks created from remote issues
    pub pulled_new: Vec<String>,
    /// Conflicts detected in this pass
    pub conflicts: Vec<String>,
    /// Conflicts from earlier passes still awaiting resolution
    pub unresolved: Vec<String>,
    pub unchanged: usize,
    pub errors: Vec<String>,
}

impl SyncReport {
    pub fn writes(&self) -> usize {
        self.created.len() + self.pushed.len() + self.pulled.len() + self.pulled_new.len()
    }
}

struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Bidirectional reconciliation between the local task store and tracker issues
/// carrying the marker label.
pub struct SyncEngine {
    tracker: Arc<dyn IssueTracker>,
    store: Arc<dyn TaskStore>,
    conflicts: Arc<ConflictLog>,
    marker_label: String,
    in_flight: AtomicBool,
    metrics: Arc<PipelineMetrics>,
}

impl SyncEngine {
    pub fn new(
        tracker: Arc<dyn IssueTracker>,
        store: Arc<dyn TaskStore>,
        conflicts: Arc<ConflictLog>,
        marker_label: impl Into<String>,
    ) -> Self {
        Self {
            tracker,
            store,
            conflicts,
            marker_label: marker_label.into(),
            in_flight: AtomicBool::new(false),
            metrics: Arc::new(PipelineMetrics::new()),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    fn begin(&self) -> Result<InFlightGuard<'_>, SyncError> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| SyncError::InFlight)?;
        Ok(InFlightGuard(&self.in_flight))
    }

    /// List open marker-labelled issues to confirm the tracker answers.
    pub async fn check_tracker(&self) -> Result<(), SyncError> {
        self.tracker
            .list_issues(&self.marker_label, StateFilter::Open)
            .await?;
        Ok(())
    }

    pub fn conflicts(&self) -> Vec<SyncConflict> {
        self.conflicts.all()
    }

    /// Run one full reconciliation pass.
    pub async fn sync_all(&self) -> Result<SyncReport, SyncError> {
        let _guard = self.begin()?;
        let timer = OperationTimer::new("sync");
        let result = self.run_pass().await;
        match &result {
            Ok(report) => {
                self.metrics.record_sync_pass(report.conflicts.len());
                info!(
                    created = report.created.len(),
                    pushed = report.pushed.len(),
                    pulled = report.pulled.len() + report.pulled_new.len(),
                    conflicts = report.conflicts.len(),
                    errors = report.errors.len(),
                    "Sync pass finished"
                );
            }
            Err(e) => {
                self.metrics.record_sync_failure();
                warn!(error = %e, "Sync pass failed");
            }
        }
        timer.finish();
        result
    }

    /// Bookkeeping for writes already made is flushed even when the pass aborts.
    async fn run_pass(&self) -> Result<SyncReport, SyncError> {
        let result = self.reconcile().await;
        let flushed = self.store.flush().await;
        let report = result?;
        flushed?;
        Ok(report)
    }

    async fn reconcile(&self) -> Result<SyncReport, SyncError> {
        let remote = self
            .tracker
            .list_issues(&self.marker_label, StateFilter::All)
            .await?;
        let tasks = self.store.list().await?;

        let by_number: HashMap<u64, &TrackerIssue> = remote.iter().map(|i| (i.number, i)).collect();
        let mut by_marker: HashMap<String, &TrackerIssue> = HashMap::new();
        for issue in &remote {
            if let Some(task_id) = extract_task_id(&issue.body) {
                by_marker
                    .entry(task_id)
                    .and_modify(|kept| {
                        if (issue.created_at, issue.number) < (kept.created_at, kept.number) {
                            *kept = issue;
                        }
                    })
                    .or_insert(issue);
            }
        }

        let mut claimed: HashSet<u64> = tasks.iter().filter_map(Task::issue_number).collect();
        let mut known_ids: HashSet<String> = tasks.iter().map(|t| t.id.clone()).collect();
        let mut report = SyncReport::default();

        for task in tasks {
            let task_id = task.id.clone();
            if let Err(e) = self
                .sync_task(task, &by_number, &by_marker, &mut claimed, &mut report)
                .await
            {
                warn!(task_id = %task_id, error = %e, "Task sync failed");
                if e.aborts_pass() {
                    return Err(e);
                }
                report.errors.push(format!("{task_id}: {e}"));
            }
        }

        for issue in &remote {
            if issue.state != IssueState::Open || claimed.contains(&issue.number) {
                continue;
            }
            let marker = extract_task_id(&issue.body);
            if marker.as_ref().is_some_and(|id| known_ids.contains(id)) {
                continue;
            }
            match self.pull_create(issue, marker).await {
                Ok(task_id) => {
                    claimed.insert(issue.number);
                    known_ids.insert(task_id.clone());
                    report.pulled_new.push(task_id);
                }
                Err(e) => {
                    warn!(issue_number = issue.number, error = %e, "Pull-create failed");
                    if e.aborts_pass() {
                        return Err(e);
                    }
                    report.errors.push(format!("#{}: {e}", issue.number));
                }
            }
        }

        Ok(report)
    }

    async fn sync_task(
        &self,
        mut task: Task,
        by_number: &HashMap<u64, &TrackerIssue>,
        by_marker: &HashMap<String, &TrackerIssue>,
        claimed: &mut HashSet<u64>,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        if task.sync.status == SyncStatus::Conflict && self.conflicts.get(&task.id).is_some() {
            report.unresolved.push(task.id);
            return Ok(());
        }

        let Some(number) = task.issue_number() else {
            return self.publish(task, by_marker, claimed, report).await;
        };

        let issue = match by_number.get(&number) {
            Some(issue) => (*issue).clone(),
            None => self.tracker.get_issue(number).await?,
        };
        let local_changed = task.changed_since_sync();
        let remote_changed = task
            .tracker
            .as_ref()
            .and_then(|t| t.remote_updated_at)
            .is_some_and(|seen| issue.updated_at > seen);

        match (local_changed, remote_changed) {
            (true, true) => {
                let conflict = SyncConflict {
                    task_id: task.id.clone(),
                    local: LocalSnapshot::from(&task),
                    remote: RemoteSnapshot::from(&issue),
                    detected_at: Utc::now(),
                };
                self.conflicts.insert(conflict).await?;
                task.sync.status = SyncStatus::Conflict;
                self.store.save(&task).await?;
                warn!(task_id = %task.id, issue_number = number, "Sync conflict detected");
                report.conflicts.push(task.id);
            }
            (true, false) => {
                let update = issue_update(&task, &issue.labels, &self.marker_label);
                let updated = self.tracker.update_issue(number, &update).await?;
                mark_synced(&mut task, &updated, Utc::now());
                self.store.save(&task).await?;
                debug!(task_id = %task.id, issue_number = number, "Pushed local changes");
                report.pushed.push(task.id);
            }
            (false, true) => {
                apply_issue(&mut task, &issue, false, Utc::now());
                self.store.save(&task).await?;
                debug!(task_id = %task.id, issue_number = number, "Pulled remote changes");
                report.pulled.push(task.id);
            }
            (false, false) => report.unchanged += 1,
        }
        Ok(())
    }

    /// Link or create the issue for a task that has none yet.
    async fn publish(
        &self,
        mut task: Task,
        by_marker: &HashMap<String, &TrackerIssue>,
        claimed: &mut HashSet<u64>,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        if task.status == TaskStatus::Done {
            report.unchanged += 1;
            return Ok(());
        }

        if let Some(issue) = by_marker.get(&task.id).filter(|i| !claimed.contains(&i.number)) {
            mark_synced(&mut task, issue, Utc::now());
            self.store.save(&task).await?;
            claimed.insert(issue.number);
            info!(task_id = %task.id, issue_number = issue.number, "Linked task to existing issue");
            report.linked.push(task.id);
            return Ok(());
        }

        let issue = self
            .tracker
            .create_issue(&issue_draft(&task, &self.marker_label))
            .await?;
        mark_synced(&mut task, &issue, Utc::now());
        self.store.save(&task).await?;
        claimed.insert(issue.number);
        info!(task_id = %task.id, issue_number = issue.number, "Created issue for task");
        report.created.push(task.id);
        Ok(())
    }

    async fn pull_create(&self, issue: &TrackerIssue, marker: Option<String>) -> Result<String, SyncError> {
        let (task_id, issue) = match marker {
            Some(task_id) => (task_id, issue.clone()),
            None => {
                let task_id = Uuid::new_v4().to_string();
                let update = IssueUpdate {
                    body: Some(embed_marker(&issue.body, &task_id)),
                    ..IssueUpdate::default()
                };
                let updated = self.tracker.update_issue(issue.number, &update).await?;
                (task_id, updated)
            }
        };

        let task = task_from_issue(&task_id, &issue, Utc::now());
        self.store.save(&task).await?;
        info!(task_id = %task_id, issue_number = issue.number, "Created task from issue");
        Ok(task_id)
    }

    /// Resolve a recorded conflict with exactly one corrective write.
    ///
    /// Fails with [`SyncError::StaleConflict`] when the issue changed again since
    /// the conflict was recorded; the stored remote snapshot is refreshed first.
    pub async fn resolve_conflict(&self, task_id: &str, resolution: Resolution) -> Result<Task, SyncError> {
        let _guard = self.begin()?;
        let conflict = self
            .conflicts
            .get(task_id)
            .ok_or_else(|| SyncError::NoConflict(task_id.to_string()))?;
        let mut task = self.store.require(task_id).await?;
        let number = task
            .issue_number()
            .ok_or_else(|| SyncError::NotLinked(task_id.to_string()))?;

        let remote = self.tracker.get_issue(number).await?;
        if remote.updated_at > conflict.remote.updated_at {
            self.conflicts
                .insert(SyncConflict {
                    remote: RemoteSnapshot::from(&remote),
                    detected_at: Utc::now(),
                    ..conflict
                })
                .await?;
            warn!(task_id, issue_number = number, "Issue changed again, conflict refreshed");
            return Err(SyncError::StaleConflict {
                task_id: task_id.to_string(),
                issue_number: number,
            });
        }

        match resolution {
            Resolution::KeepLocal => {
                if let Some(tracker) = task.tracker.as_mut() {
                    tracker.remote_updated_at = None;
                }
                let update = issue_update(&task, &remote.labels, &self.marker_label);
                let updated = self.tracker.update_issue(number, &update).await?;
                mark_synced(&mut task, &updated, Utc::now());
            }
            Resolution::KeepRemote => apply_issue(&mut task, &remote, true, Utc::now()),
        }

        self.store.save(&task).await?;
        self.conflicts.remove(task_id).await?;
        self.store.flush().await?;
        info!(task_id, issue_number = number, ?resolution, "Conflict resolved");
        Ok(task)
    }

    /// Close every duplicate issue but the oldest per task, stripping the marker
    /// label in the same write, and relink local tasks that pointed at a duplicate.
    pub async fn deduplicate(&self, dry_run: bool) -> Result<DedupReport, SyncError> {
        let _guard = self.begin()?;
        let issues = self
            .tracker
            .list_issues(&self.marker_label, StateFilter::Open)
            .await?;
        let groups = find_duplicates(&issues);
        let mut report = DedupReport {
            dry_run,
            groups: groups.clone(),
            ..DedupReport::default()
        };
        if dry_run || groups.is_empty() {
            return Ok(report);
        }

        let by_number: HashMap<u64, &TrackerIssue> = issues.iter().map(|i| (i.number, i)).collect();
        for group in &groups {
            for &duplicate in &group.close {
                let Some(issue) = by_number.get(&duplicate) else {
                    continue;
                };
                match self.close_duplicate(issue, group.keep).await {
                    Ok(()) => report.closed.push(duplicate),
                    Err(e) => {
                        warn!(issue_number = duplicate, error = %e, "Could not close duplicate");
                        report.errors.push(format!("#{duplicate}: {e}"));
                    }
                }
            }

            let Some(mut task) = self.store.get(&group.task_id).await? else {
                continue;
            };
            let points_at_duplicate = task.issue_number().is_some_and(|n| group.close.contains(&n));
            if let Some(kept) = by_number.get(&group.keep).filter(|_| points_at_duplicate) {
                task.tracker = Some(TrackerRef {
                    issue_number: kept.number,
                    url: kept.html_url.clone(),
                    remote_updated_at: Some(kept.updated_at),
                });
                self.store.save(&task).await?;
                report.relinked.push(task.id);
            }
        }

        self.store.flush().await?;
        info!(groups = groups.len(), closed = report.closed.len(), "Deduplication finished");
        Ok(report)
    }

    async fn close_duplicate(&self, issue: &TrackerIssue, keep: u64) -> Result<(), SyncError> {
        self.tracker
            .create_comment(issue.number, &duplicate_comment(keep))
            .await?;
        let labels = issue
            .labels
            .iter()
            .filter(|l| **l != self.marker_label)
            .cloned()
            .collect();
        let update = IssueUpdate {
            state: Some(IssueState::Closed),
            labels: Some(labels),
            ..IssueUpdate::default()
        };
        self.tracker.update_issue(issue.number, &update).await?;
        Ok(())
    }
}
