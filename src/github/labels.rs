//! Label mutation.
//!
//! GitHub has no compare-and-set for labels, so every update reads the full set,
//! swaps the managed prefixes and writes the complete set back in a single call.
//! A failed write therefore leaves the previous set in place.

use std::sync::Arc;
use tracing::debug;

use super::client::IssueTracker;
use super::errors::GitHubError;
use super::types::IssueUpdate;
use crate::priority::{Effort, Priority, Value, EFFORT_PREFIX, PRIORITY_PREFIX, VALUE_PREFIX};
use crate::tasks::{Task, TaskStatus};
use crate::tasks::types::STATUS_LABEL_PREFIX;

pub const METADATA_PREFIXES: [&str; 3] = [PRIORITY_PREFIX, EFFORT_PREFIX, VALUE_PREFIX];
pub const MANAGED_PREFIXES: [&str; 4] = [STATUS_LABEL_PREFIX, PRIORITY_PREFIX, EFFORT_PREFIX, VALUE_PREFIX];

/// Drop labels starting with any of `prefixes`, then append `additions`
/// (skipping duplicates). Unrelated labels keep their order.
pub fn merge_labels(existing: &[String], prefixes: &[&str], additions: &[String]) -> Vec<String> {
    let mut merged: Vec<String> = existing
        .iter()
        .filter(|label| !prefixes.iter().any(|p| label.starts_with(p)))
        .cloned()
        .collect();
    for label in additions {
        if !merged.contains(label) {
            merged.push(label.clone());
        }
    }
    merged
}

pub fn metadata_labels(priority: Option<Priority>, effort: Option<Effort>, value: Option<Value>) -> Vec<String> {
    priority
        .map(Priority::label)
        .into_iter()
        .chain(effort.map(Effort::label))
        .chain(value.map(Value::label))
        .collect()
}

/// Every managed label a task should carry.
pub fn task_labels(task: &Task) -> Vec<String> {
    let mut labels: Vec<String> = task.status.label().into_iter().collect();
    labels.extend(metadata_labels(Some(task.priority), task.effort, task.value));
    labels
}

fn same_set(a: &[String], b: &[String]) -> bool {
    a.len() == b.len() && a.iter().all(|l| b.contains(l))
}

pub struct LabelManager {
    tracker: Arc<dyn IssueTracker>,
}

impl LabelManager {
    pub fn new(tracker: Arc<dyn IssueTracker>) -> Self {
        Self { tracker }
    }

    async fn replace_prefixed(
        &self,
        issue_number: u64,
        prefixes: &[&str],
        additions: Vec<String>,
    ) -> Result<Vec<String>, GitHubError> {
        let issue = self.tracker.get_issue(issue_number).await?;
        let merged = merge_labels(&issue.labels, prefixes, &additions);
        if same_set(&merged, &issue.labels) {
            debug!(issue_number, "Labels already up to date");
            return Ok(merged);
        }
        let updated = self
            .tracker
            .update_issue(issue_number, &IssueUpdate::labels(merged))
            .await?;
        Ok(updated.labels)
    }

    pub async fn update_status_label(&self, issue_number: u64, status: TaskStatus) -> Result<Vec<String>, GitHubError> {
        self.replace_prefixed(issue_number, &[STATUS_LABEL_PREFIX], status.label().into_iter().collect())
            .await
    }

    pub async fn update_metadata_labels(
        &self,
        issue_number: u64,
        priority: Option<Priority>,
        effort: Option<Effort>,
        value: Option<Value>,
    ) -> Result<Vec<String>, GitHubError> {
        self.replace_prefixed(issue_number, &METADATA_PREFIXES, metadata_labels(priority, effort, value))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeTracker;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_merge_replaces_only_managed_prefixes() {
        let existing = strings(&["bug", "status: backlog", "priority:low", "tackle:sync"]);
        let merged = merge_labels(&existing, &MANAGED_PREFIXES, &strings(&["status: review", "priority:high"]));
        assert_eq!(merged, strings(&["bug", "tackle:sync", "status: review", "priority:high"]));
    }

    #[test]
    fn test_merge_does_not_duplicate() {
        let existing = strings(&["tackle:sync"]);
        let merged = merge_labels(&existing, &[], &strings(&["tackle:sync"]));
        assert_eq!(merged, strings(&["tackle:sync"]));
    }

    #[tokio::test]
    async fn test_status_update_writes_full_set_once() {
        let fake = Arc::new(FakeTracker::new());
        let issue = fake.seed_issue("Task", "", &["bug", "status: backlog", "priority:high"]);
        let manager = LabelManager::new(fake.clone());

        let labels = manager
            .update_status_label(issue.number, TaskStatus::InProgress)
            .await
            .unwrap();

        assert_eq!(labels, strings(&["bug", "priority:high", "status: in-progress"]));
        assert_eq!(fake.update_calls(), 1);
    }

    #[tokio::test]
    async fn test_failed_write_leaves_labels_unchanged() {
        let fake = Arc::new(FakeTracker::new());
        let issue = fake.seed_issue("Task", "", &["status: backlog", "effort:small"]);
        fake.fail_next_updates(1, GitHubError::Server { status: 500, message: "boom".into() });
        let manager = LabelManager::new(fake.clone());

        let result = manager
            .update_metadata_labels(issue.number, Some(Priority::High), Some(Effort::Large), None)
            .await;

        assert!(result.is_err());
        assert_eq!(fake.issue(issue.number).unwrap().labels, strings(&["status: backlog", "effort:small"]));
    }

    #[tokio::test]
    async fn test_unchanged_labels_skip_write() {
        let fake = Arc::new(FakeTracker::new());
        let issue = fake.seed_issue("Task", "", &["status: review"]);
        let manager = LabelManager::new(fake.clone());

        manager.update_status_label(issue.number, TaskStatus::Review).await.unwrap();
        assert_eq!(fake.update_calls(), 0);
    }
}
