//! Locating a JSON object inside free-form model output.

/// Return the first well-formed JSON object in `text`.
///
/// Prose and markdown fences around the object are ignored. Candidates start at
/// each `{` in turn; braces inside string literals do not count toward nesting.
pub fn extract_json_object(text: &str) -> Option<serde_json::Value> {
    let bytes = text.as_bytes();
    let mut search_from = 0;

    while let Some(offset) = text[search_from..].find('{') {
        let start = search_from + offset;
        if let Some(end) = matching_brace(bytes, start) {
            if let Ok(value @ serde_json::Value::Object(_)) = serde_json::from_str::<serde_json::Value>(&text[start..=end]) {
                return Some(value);
            }
        }
        search_from = start + 1;
    }
    None
}

fn matching_brace(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_object() {
        assert_eq!(extract_json_object(r#"{"passed": true}"#), Some(json!({"passed": true})));
    }

    #[test]
    fn test_prose_and_fences() {
        let text = "Here is my review:\n```json\n{\"passed\": false, \"issues\": []}\n```\nThanks!";
        assert_eq!(
            extract_json_object(text),
            Some(json!({"passed": false, "issues": []}))
        );
    }

    #[test]
    fn test_braces_inside_strings() {
        let text = r#"{"summary": "use {braces} and \"quotes\"", "passed": true}"#;
        let value = extract_json_object(text).unwrap();
        assert_eq!(value["summary"], "use {braces} and \"quotes\"");
    }

    #[test]
    fn test_skips_malformed_candidate() {
        let text = "The set {a, b} is wrong. Verdict: {\"passed\": true}";
        assert_eq!(extract_json_object(text), Some(json!({"passed": true})));
    }

    #[test]
    fn test_no_object() {
        assert_eq!(extract_json_object("no json here"), None);
        assert_eq!(extract_json_object("{ unterminated"), None);
    }
}
