//! Hidden task-id markers embedded in issue bodies.

use regex::Regex;
use std::sync::OnceLock;

const MARKER_PREFIX: &str = "<!-- tackle-task-id:";

static MARKER_PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();

/// Primary HTML-comment marker first, then the visible fallback line.
fn marker_patterns() -> &'static Vec<Regex> {
    MARKER_PATTERNS.get_or_init(|| {
        [
            r"<!--\s*tackle-task-id:\s*([A-Za-z0-9_-]+)\s*-->",
            r"(?m)^\s*Task ID:\s*([A-Za-z0-9_-]+)\s*$",
        ]
        .iter()
        .filter_map(|pattern| Regex::new(pattern).ok())
        .collect()
    })
}

pub fn task_marker(task_id: &str) -> String {
    format!("{MARKER_PREFIX} {task_id} -->")
}

/// Task id embedded in an issue body, if any.
pub fn extract_task_id(body: &str) -> Option<String> {
    marker_patterns()
        .iter()
        .find_map(|pattern| pattern.captures(body))
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str().to_string())
}

/// `body` with the marker for `task_id` appended unless it already carries one.
pub fn embed_marker(body: &str, task_id: &str) -> String {
    if extract_task_id(body).as_deref() == Some(task_id) {
        return body.to_string();
    }
    let body = strip_markers(body);
    if body.is_empty() {
        task_marker(task_id)
    } else {
        format!("{body}\n\n{}", task_marker(task_id))
    }
}

/// Issue body without any task markers, as stored in the task description.
pub fn strip_markers(body: &str) -> String {
    let mut stripped = body.to_string();
    for pattern in marker_patterns() {
        stripped = pattern.replace_all(&stripped, "").into_owned();
    }
    stripped.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_round_trip() {
        let body = embed_marker("Users cannot log in.", "abc-123");
        assert_eq!(body, "Users cannot log in.\n\n<!-- tackle-task-id: abc-123 -->");
        assert_eq!(extract_task_id(&body).as_deref(), Some("abc-123"));
        assert_eq!(strip_markers(&body), "Users cannot log in.");
    }

    #[test]
    fn test_fallback_line() {
        let body = "Some text\nTask ID: deadbeef\nmore";
        assert_eq!(extract_task_id(body).as_deref(), Some("deadbeef"));
        assert_eq!(strip_markers(body), "Some text\n\nmore");
    }

    #[test]
    fn test_primary_marker_wins() {
        let body = "Task ID: old\n<!-- tackle-task-id: new -->";
        assert_eq!(extract_task_id(body).as_deref(), Some("new"));
    }

    #[test]
    fn test_embed_is_idempotent_and_replaces_foreign_marker() {
        let once = embed_marker("", "t1");
        assert_eq!(embed_marker(&once, "t1"), once);
        assert_eq!(embed_marker("x\n<!-- tackle-task-id: other -->", "t1"), "x\n\n<!-- tackle-task-id: t1 -->");
        assert_eq!(extract_task_id("no marker"), None);
    }
}
