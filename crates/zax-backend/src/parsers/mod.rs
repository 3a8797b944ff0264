//! Tool output parsers.
//!
//! Each parser consumes the raw JSON a tool wrote and extracts the rows the
//! store persists. Paths arriving here are normally already
//! workspace-relative (the engine normalizes at the producer boundary); the
//! parsers still strip a root prefix when given a non-empty one.

pub mod eslint;
pub mod vitest;

use thiserror::Error;

/// Parsing failures.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The payload was not the JSON shape the tool documents.
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

/// Truncates to a character budget, appending `...` when cut.
pub(crate) fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() > max_chars {
        let kept: String = s.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{kept}...")
    } else {
        s.to_string()
    }
}

/// Strips a workspace root prefix, leaving foreign paths untouched.
pub(crate) fn relative_to_root(path: &str, workspace_root: &str) -> String {
    if workspace_root.is_empty() {
        return path.to_string();
    }
    match path.strip_prefix(workspace_root) {
        Some(rest) => rest.strip_prefix('/').unwrap_or(rest).to_string(),
        None => path.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_preserves_short_strings() {
        assert_eq!(truncate_chars("short", 10), "short");
    }

    #[test]
    fn truncate_cuts_at_char_boundaries() {
        let long = "\u{1f525}".repeat(20);
        let cut = truncate_chars(&long, 10);
        assert_eq!(cut.chars().count(), 10);
        assert!(cut.ends_with("..."));
    }

    #[test]
    fn relative_to_root_strips_only_the_prefix() {
        assert_eq!(relative_to_root("/ws/src/a.ts", "/ws"), "src/a.ts");
        assert_eq!(relative_to_root("/other/a.ts", "/ws"), "/other/a.ts");
        assert_eq!(relative_to_root("src/a.ts", ""), "src/a.ts");
    }
}
