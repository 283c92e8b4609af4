//! Field mapping between local tasks and tracker issues.

use chrono::{DateTime, Utc};
use tracing::debug;

use super::markers::{embed_marker, strip_markers};
use crate::github::labels::MANAGED_PREFIXES;
use crate::github::{merge_labels, task_labels, IssueDraft, IssueState, IssueUpdate, TrackerIssue};
use crate::priority::{Effort, Priority, Value};
use crate::tasks::{SyncStatus, Task, TaskStatus, TrackerRef};

pub fn issue_body(task: &Task) -> String {
    embed_marker(&task.description, &task.id)
}

fn issue_state(status: TaskStatus) -> IssueState {
    if status == TaskStatus::Done {
        IssueState::Closed
    } else {
        IssueState::Open
    }
}

pub fn issue_draft(task: &Task, marker_label: &str) -> IssueDraft {
    let mut labels = vec![marker_label.to_string()];
    labels.extend(task_labels(task));
    IssueDraft {
        title: task.title.clone(),
        body: issue_body(task),
        labels,
    }
}

/// Full update pushing local state; managed labels are swapped, others kept.
pub fn issue_update(task: &Task, existing_labels: &[String], marker_label: &str) -> IssueUpdate {
    let mut wanted = vec![marker_label.to_string()];
    wanted.extend(task_labels(task));
    IssueUpdate {
        title: Some(task.title.clone()),
        body: Some(issue_body(task)),
        state: Some(issue_state(task.status)),
        labels: Some(merge_labels(existing_labels, &MANAGED_PREFIXES, &wanted)),
    }
}

/// Status the remote issue implies, if it implies one.
pub fn remote_status(issue: &TrackerIssue) -> Option<TaskStatus> {
    if issue.state == IssueState::Closed {
        return Some(TaskStatus::Done);
    }
    TaskStatus::from_labels(&issue.labels)
}

/// Record a successful exchange with the tracker.
pub fn mark_synced(task: &mut Task, issue: &TrackerIssue, at: DateTime<Utc>) {
    task.tracker = Some(TrackerRef {
        issue_number: issue.number,
        url: issue.html_url.clone(),
        remote_updated_at: Some(issue.updated_at),
    });
    task.sync.last_synced_at = Some(at);
    task.sync.status = SyncStatus::Synced;
}

fn apply_metadata(task: &mut Task, issue: &TrackerIssue) {
    if let Some(priority) = Priority::from_labels(&issue.labels) {
        task.priority = priority;
    }
    if let Some(effort) = Effort::from_labels(&issue.labels) {
        task.effort = Some(effort);
    }
    if let Some(value) = Value::from_labels(&issue.labels) {
        task.value = Some(value);
    }
}

/// Pull remote fields into `task`. A remote status that would move the task
/// backwards is ignored unless `force` is set.
pub fn apply_issue(task: &mut Task, issue: &TrackerIssue, force: bool, at: DateTime<Utc>) {
    task.title = issue.title.clone();
    task.description = strip_markers(&issue.body);
    apply_metadata(task, issue);

    if let Some(status) = remote_status(issue) {
        if force || status == task.status || task.status.can_transition_to(status) {
            task.status = status;
        } else {
            debug!(task_id = %task.id, local = %task.status, remote = %status, "Ignoring backwards remote status");
        }
    }

    task.updated_at = at;
    mark_synced(task, issue, at);
}

/// New local task for a remote issue.
pub fn task_from_issue(task_id: &str, issue: &TrackerIssue, at: DateTime<Utc>) -> Task {
    let mut task = Task::new(task_id, issue.title.clone(), String::new());
    task.status = TaskStatus::Backlog;
    task.created_at = issue.created_at;
    task.sync.last_local_modified_at = at;
    apply_issue(&mut task, issue, true, at);
    task
}
