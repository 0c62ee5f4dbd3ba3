//! Glob pattern matching for tool names

use crate::error::{Error, Result};

/// Matches a tool name against a glob pattern.
///
/// Supports `*` (any sequence) and `?` (single character); anything else is
/// matched literally. A bare `*` pattern matches every tool name.
pub fn matches_pattern(pattern: &str, name: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    match_bytes(pattern.as_bytes(), name.as_bytes())
}

/// Returns true if the name matches any of the given patterns.
pub fn matches_any(name: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|p| matches_pattern(p, name))
}

fn match_bytes(pattern: &[u8], name: &[u8]) -> bool {
    match (pattern.split_first(), name.split_first()) {
        (None, None) => true,
        (None, Some(_)) => false,
        (Some((&b'*', rest)), None) => match_bytes(rest, name),
        (Some(_), None) => false,
        (Some((&b'*', rest)), Some(_)) => {
            // Either the star consumes nothing, or it swallows one more byte.
            match_bytes(rest, name) || match_bytes(pattern, &name[1..])
        }
        (Some((&b'?', rest)), Some((_, tail))) => match_bytes(rest, tail),
        (Some((&p, rest)), Some((&n, tail))) if p == n => match_bytes(rest, tail),
        _ => false,
    }
}

/// Validates a glob pattern before it is stored in a permission entry.
pub fn validate_pattern(pattern: &str) -> Result<()> {
    if pattern.is_empty() {
        return Err(Error::InvalidGlobPattern(
            "pattern cannot be empty".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        assert!(matches_pattern("get_users", "get_users"));
        assert!(!matches_pattern("get_users", "get_user"));
        assert!(!matches_pattern("get_users", "get_users_v2"));
    }

    #[test]
    fn test_star_prefix_and_suffix() {
        assert!(matches_pattern("get_*", "get_users"));
        assert!(matches_pattern("get_*", "get_"));
        assert!(!matches_pattern("get_*", "post_users"));
        assert!(matches_pattern("*_users", "get_users"));
        assert!(!matches_pattern("*_users", "users"));
    }

    #[test]
    fn test_star_in_middle() {
        assert!(matches_pattern("get_*_count", "get_user_count"));
        assert!(matches_pattern("get_*_count", "get_a_b_count"));
        assert!(!matches_pattern("get_*_count", "get_count"));
    }

    #[test]
    fn test_universal_wildcard() {
        assert!(matches_pattern("*", "anything"));
        assert!(matches_pattern("*", ""));
    }

    #[test]
    fn test_question_mark() {
        assert!(matches_pattern("tool_?", "tool_a"));
        assert!(!matches_pattern("tool_?", "tool_ab"));
        assert!(!matches_pattern("tool_?", "tool_"));
    }

    #[test]
    fn test_matches_any() {
        let patterns = vec!["get_*".to_string(), "list_users".to_string()];
        assert!(matches_any("get_secret", &patterns));
        assert!(matches_any("list_users", &patterns));
        assert!(!matches_any("delete_users", &patterns));
    }

    #[test]
    fn test_validate_pattern() {
        assert!(validate_pattern("get_*").is_ok());
        assert!(validate_pattern("").is_err());
    }
}
