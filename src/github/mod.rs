pub mod client;
pub mod errors;
pub mod labels;
pub mod pulls;
pub mod types;

pub use client::{GitHubClient, IssueTracker, ResilientTracker};
pub use errors::GitHubError;
pub use labels::{merge_labels, task_labels, LabelManager};
pub use pulls::{
    EnsurePrOutcome, MergeOutcome, MergeTarget, PrRequest, PullRequestError, PullRequestManager,
};
pub use types::{
    IssueDraft, IssueState, IssueUpdate, MergeResult, PrState, PullRequestDraft, PullRequestInfo,
    StateFilter, TrackerIssue,
};
