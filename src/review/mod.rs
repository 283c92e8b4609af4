//! Automated review of a task's workspace before a pull request is opened.

pub mod pipeline;
pub mod prompt;
pub mod types;

pub use pipeline::{ReviewError, ReviewPipeline};
pub use prompt::{build_prompt, parse_verdict, truncate_diff};
pub use types::{
    Completeness, ReviewIssue, ReviewOutcome, ReviewRequest, ReviewResult, ScopeAnalysis, Severity,
};
