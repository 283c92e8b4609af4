//! Review prompt construction and verdict interpretation.

use serde::Deserialize;

use super::types::{Completeness, ReviewIssue, ReviewResult, ScopeAnalysis, Severity};
use crate::ai::{extract_json_object, AiError};

pub const SYSTEM_PROMPT: &str = "You are a senior engineer reviewing a change made by an autonomous coding agent. \
Judge whether the diff implements the task correctly and safely. Reply with a single JSON object:\n\
{\"passed\": bool, \"summary\": string, \
\"issues\": [{\"severity\": \"critical|major|minor|suggestion\", \"file\": string|null, \"line\": number|null, \"message\": string}], \
\"scope\": {\"aligned\": bool, \"needs_rescope\": bool, \"completeness\": \"complete|partial|minimal\", \
\"missing_requirements\": [string], \"scope_creep\": [string], \"reason\": string|null}}\n\
Only critical or major problems should fail a review. Set needs_rescope only when the change \
fundamentally does not address the task.";

/// Cut `diff` to at most `max_chars` characters, noting the truncation.
pub fn truncate_diff(diff: &str, max_chars: usize) -> String {
    let total = diff.chars().count();
    if total <= max_chars {
        return diff.to_string();
    }
    let kept: String = diff.chars().take(max_chars).collect();
    format!("{kept}\n\n[diff truncated: showing {max_chars} of {total} characters]")
}

pub fn build_prompt(title: &str, description: &str, diff: &str, max_diff_chars: usize) -> String {
    let description = if description.trim().is_empty() {
        "(no description)"
    } else {
        description.trim()
    };
    format!(
        "## Task\n{title}\n\n## Description\n{description}\n\n## Diff\n```diff\n{}\n```\n",
        truncate_diff(diff, max_diff_chars)
    )
}

#[derive(Debug, Deserialize)]
struct RawVerdict {
    #[serde(default)]
    passed: bool,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    issues: Vec<RawIssue>,
    #[serde(default, alias = "scope_analysis")]
    scope: Option<RawScope>,
}

#[derive(Debug, Deserialize)]
struct RawIssue {
    #[serde(default)]
    severity: String,
    #[serde(default)]
    file: Option<String>,
    #[serde(default)]
    line: Option<u32>,
    #[serde(default, alias = "description")]
    message: String,
}

#[derive(Debug, Deserialize)]
struct RawScope {
    #[serde(default = "default_aligned")]
    aligned: bool,
    #[serde(default)]
    needs_rescope: bool,
    #[serde(default)]
    completeness: String,
    #[serde(default)]
    missing_requirements: Vec<String>,
    #[serde(default)]
    scope_creep: Vec<String>,
    #[serde(default)]
    reason: Option<String>,
}

fn default_aligned() -> bool {
    true
}

/// Parse the model's reply into a normalized [`ReviewResult`].
pub fn parse_verdict(text: &str) -> Result<ReviewResult, AiError> {
    let value = extract_json_object(text)
        .ok_or_else(|| AiError::Parse("no JSON object in review response".to_string()))?;
    let raw: RawVerdict =
        serde_json::from_value(value).map_err(|e| AiError::Parse(e.to_string()))?;
    Ok(normalize(raw))
}

fn normalize(raw: RawVerdict) -> ReviewResult {
    let mut issues: Vec<ReviewIssue> = raw
        .issues
        .into_iter()
        .filter(|issue| !issue.message.trim().is_empty())
        .map(|issue| ReviewIssue {
            severity: Severity::parse(&issue.severity),
            file: issue.file.filter(|f| !f.is_empty()),
            line: issue.line,
            message: issue.message,
        })
        .collect();
    issues.sort_by_key(|issue| issue.severity);

    let blocking = issues.iter().any(|issue| issue.severity.is_blocking());
    let passed = raw.passed || !blocking;

    let scope = raw.scope.map(|scope| ScopeAnalysis {
        // Partial work or extra changes alone never warrant a rescope.
        needs_rescope: scope.needs_rescope && !scope.aligned,
        aligned: scope.aligned,
        completeness: Completeness::parse(&scope.completeness),
        missing_requirements: scope.missing_requirements,
        scope_creep: scope.scope_creep,
        reason: scope.reason.filter(|r| !r.trim().is_empty()),
    });

    let summary = if raw.summary.trim().is_empty() {
        let fallback = if passed { "Review passed." } else { "Review failed." };
        fallback.to_string()
    } else {
        raw.summary.trim().to_string()
    };

    ReviewResult {
        passed,
        summary,
        issues,
        scope,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fail_without_blocking_issues_becomes_pass() {
        let result = parse_verdict(
            r#"{"passed": false, "summary": "Nits only", "issues": [{"severity": "minor", "message": "rename x"}]}"#,
        )
        .unwrap();
        assert!(result.passed);
        assert_eq!(result.issues.len(), 1);
    }

    #[test]
    fn test_major_issue_keeps_failure() {
        let result = parse_verdict(
            "Verdict below.\n```json\n{\"passed\": false, \"summary\": \"Broken\", \"issues\": [\
             {\"severity\": \"suggestion\", \"message\": \"docs\"}, \
             {\"severity\": \"major\", \"file\": \"src/a.rs\", \"line\": 3, \"message\": \"panics on empty input\"}]}\n```",
        )
        .unwrap();
        assert!(!result.passed);
        assert_eq!(result.issues[0].severity, Severity::Major);
        assert_eq!(result.issues[0].file.as_deref(), Some("src/a.rs"));
    }

    #[test]
    fn test_rescope_only_on_fundamental_mismatch() {
        let partial = parse_verdict(
            r#"{"passed": true, "scope": {"aligned": true, "needs_rescope": true, "completeness": "partial", "scope_creep": ["extra logging"]}}"#,
        )
        .unwrap();
        let scope = partial.scope.unwrap();
        assert!(!scope.needs_rescope);
        assert_eq!(scope.completeness, Completeness::Partial);

        let mismatch = parse_verdict(
            r#"{"passed": false, "issues": [{"severity": "critical", "message": "wrong feature"}],
                "scope": {"aligned": false, "needs_rescope": true, "reason": "implements export, task asks for import"}}"#,
        )
        .unwrap();
        assert!(mismatch.needs_rescope());
    }

    #[test]
    fn test_missing_json_is_a_parse_error() {
        assert!(matches!(parse_verdict("Looks good to me!"), Err(AiError::Parse(_))));
    }

    #[test]
    fn test_truncation() {
        assert_eq!(truncate_diff("abc", 10), "abc");
        let cut = truncate_diff("abcdef", 4);
        assert!(cut.starts_with("abcd\n"));
        assert!(cut.contains("showing 4 of 6 characters"));

        let prompt = build_prompt("Fix login", "", "+fn login() {}", 100);
        assert!(prompt.contains("(no description)"));
        assert!(prompt.contains("+fn login() {}"));
    }
}
