//! Detection of tracker issues that carry the same task marker.

use serde::Serialize;
use std::collections::BTreeMap;

use super::markers::extract_task_id;
use crate::github::TrackerIssue;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateGroup {
    pub task_id: String,
    /// Oldest issue, kept open.
    pub keep: u64,
    pub close: Vec<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DedupReport {
    pub dry_run: bool,
    pub groups: Vec<DuplicateGroup>,
    pub closed: Vec<u64>,
    /// Local tasks moved from a closed duplicate to the kept issue.
    pub relinked: Vec<String>,
    pub errors: Vec<String>,
}

/// Group issues by embedded task id; groups with a single issue are dropped.
pub fn find_duplicates(issues: &[TrackerIssue]) -> Vec<DuplicateGroup> {
    let mut by_task: BTreeMap<String, Vec<&TrackerIssue>> = BTreeMap::new();
    for issue in issues {
        if let Some(task_id) = extract_task_id(&issue.body) {
            by_task.entry(task_id).or_default().push(issue);
        }
    }

    by_task
        .into_iter()
        .filter(|(_, group)| group.len() > 1)
        .map(|(task_id, mut group)| {
            group.sort_by_key(|issue| (issue.created_at, issue.number));
            DuplicateGroup {
                task_id,
                keep: group[0].number,
                close: group[1..].iter().map(|issue| issue.number).collect(),
            }
        })
        .collect()
}

pub fn duplicate_comment(keep: u64) -> String {
    format!("Closing as a duplicate of #{keep}, which tracks the same task.")
}
