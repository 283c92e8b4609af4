//! Deterministic branch and directory names for task workspaces.

pub const MAX_SLUG_LEN: usize = 40;
const SHORT_ID_LEN: usize = 8;

/// Lowercase, dash-separated form of `title`, at most `max_len` characters.
pub fn slugify(title: &str, max_len: usize) -> String {
    let mut dashed = String::with_capacity(title.len());
    for c in title.to_lowercase().chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            dashed.push(c);
        } else if !dashed.ends_with('-') {
            dashed.push('-');
        }
    }
    let trimmed = dashed.trim_matches('-');
    let truncated: String = trimmed.chars().take(max_len).collect();
    let slug = truncated.trim_end_matches('-');
    if slug.is_empty() {
        "task".to_string()
    } else {
        slug.to_string()
    }
}

/// First eight alphanumeric characters of the task id, lowercased.
pub fn short_id(task_id: &str) -> String {
    task_id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(SHORT_ID_LEN)
        .collect::<String>()
        .to_ascii_lowercase()
}

pub fn branch_name(task_id: &str, title: &str) -> String {
    format!("task/{}-{}", short_id(task_id), slugify(title, MAX_SLUG_LEN))
}

pub fn workspace_dir_name(task_id: &str) -> String {
    format!("task-{}", short_id(task_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_branch_name_example() {
        assert_eq!(branch_name("abcdef1234567890", "Fix login bug!!"), "task/abcdef12-fix-login-bug");
        assert_eq!(workspace_dir_name("abcdef1234567890"), "task-abcdef12");
    }

    #[test]
    fn test_uuid_ids_drop_dashes() {
        assert_eq!(short_id("AB-CD-EF12-3456"), "abcdef12");
    }

    #[test]
    fn test_slug_edge_cases() {
        assert_eq!(slugify("  --Hello,   World--  ", 40), "hello-world");
        assert_eq!(slugify("!!!", 40), "task");
        assert_eq!(slugify("abc def", 4), "abc");
        assert_eq!(slugify("Übersicht", 40), "bersicht");
    }

    proptest! {
        #[test]
        fn prop_branch_names_are_bounded_and_safe(id in "[a-f0-9-]{1,40}", title in ".{0,200}") {
            let branch = branch_name(&id, &title);
            let slug = slugify(&title, MAX_SLUG_LEN);
            prop_assert!(slug.len() <= MAX_SLUG_LEN);
            prop_assert!(!slug.starts_with('-') && !slug.ends_with('-'));
            prop_assert!(!slug.contains("--"));
            prop_assert!(branch.starts_with("task/"));
            prop_assert!(branch.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '/'));
        }

        #[test]
        fn prop_names_are_deterministic(id in "[a-z0-9]{8,32}", title in ".{0,80}") {
            prop_assert_eq!(branch_name(&id, &title), branch_name(&id, &title));
        }
    }
}
