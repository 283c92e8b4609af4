use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::github::PullRequestInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Major,
    Minor,
    Suggestion,
}

impl Severity {
    /// Lenient parse; unrecognised severities are treated as suggestions.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "critical" | "blocker" => Severity::Critical,
            "major" | "high" => Severity::Major,
            "minor" | "low" | "medium" => Severity::Minor,
            _ => Severity::Suggestion,
        }
    }

    /// Only critical and major issues can fail a review.
    pub fn is_blocking(&self) -> bool {
        matches!(self, Severity::Critical | Severity::Major)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Major => "major",
            Severity::Minor => "minor",
            Severity::Suggestion => "suggestion",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewIssue {
    pub severity: Severity,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Completeness {
    #[default]
    Complete,
    Partial,
    Minimal,
}

impl Completeness {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "partial" => Completeness::Partial,
            "minimal" => Completeness::Minimal,
            _ => Completeness::Complete,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeAnalysis {
    pub aligned: bool,
    pub needs_rescope: bool,
    pub completeness: Completeness,
    pub missing_requirements: Vec<String>,
    pub scope_creep: Vec<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewResult {
    pub passed: bool,
    pub summary: String,
    pub issues: Vec<ReviewIssue>,
    pub scope: Option<ScopeAnalysis>,
}

impl ReviewResult {
    pub fn trivial_pass() -> Self {
        Self {
            passed: true,
            summary: "No changes against the target branch; nothing to review.".to_string(),
            issues: Vec::new(),
            scope: None,
        }
    }

    pub fn needs_rescope(&self) -> bool {
        self.scope.as_ref().is_some_and(|s| s.needs_rescope)
    }

    /// Human-readable feedback stored on the task when the review fails.
    pub fn feedback(&self) -> String {
        let mut out = self.summary.clone();
        for issue in &self.issues {
            out.push_str(&format!("\n- [{}] ", issue.severity));
            if let Some(file) = &issue.file {
                out.push_str(file);
                if let Some(line) = issue.line {
                    out.push_str(&format!(":{line}"));
                }
                out.push_str(": ");
            }
            out.push_str(&issue.message);
        }
        if let Some(scope) = self.scope.as_ref().filter(|s| s.needs_rescope) {
            out.push_str("\nNeeds rescope");
            if let Some(reason) = &scope.reason {
                out.push_str(&format!(": {reason}"));
            }
        }
        out
    }
}

/// Input to one review run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewRequest {
    pub task_id: String,
    pub title: String,
    pub description: String,
    pub workspace_path: PathBuf,
    pub branch: String,
    /// Falls back to the configured target branch.
    pub target_branch: Option<String>,
    pub linked_issue: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReviewOutcome {
    pub result: ReviewResult,
    pub committed: bool,
    pub pr: Option<PullRequestInfo>,
    pub warnings: Vec<String>,
}
