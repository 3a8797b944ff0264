//! ESLint JSON formatter parser.
//!
//! Only error-severity messages (severity 2) become findings; warnings are
//! noise for a regression gate. Positions are clamped to 1-based and the
//! end position defaults to the start when the formatter omits it.

use serde::Deserialize;

use super::{relative_to_root, truncate_chars, ParseError};

const MAX_RULE_LEN: usize = 256;
const MAX_FILE_LEN: usize = 4096;
const MAX_MESSAGE_LEN: usize = 1000;

/// One error-level lint finding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub rule: String,
    pub file: String,
    pub start_line: i64,
    pub start_column: i64,
    pub end_line: i64,
    pub end_column: i64,
    pub message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileEntry {
    file_path: Option<String>,
    #[serde(default)]
    messages: Vec<Message>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Message {
    rule_id: Option<String>,
    #[serde(default)]
    severity: i64,
    #[serde(default)]
    line: i64,
    #[serde(default)]
    column: i64,
    end_line: Option<i64>,
    end_column: Option<i64>,
    #[serde(default)]
    message: String,
}

/// Parses eslint `-f json` output and returns every error-level finding.
///
/// # Errors
///
/// Returns [`ParseError::InvalidJson`] for malformed input.
pub fn parse(json: &str, workspace_root: &str) -> Result<Vec<Finding>, ParseError> {
    let entries: Vec<FileEntry> = serde_json::from_str(json)?;
    let mut findings = Vec::new();

    for entry in &entries {
        let Some(file_path) = &entry.file_path else {
            continue;
        };
        let file = truncate_chars(&relative_to_root(file_path, workspace_root), MAX_FILE_LEN);

        for msg in &entry.messages {
            if msg.severity != 2 {
                continue;
            }
            let start_line = clamp_position(msg.line);
            let start_column = clamp_position(msg.column);
            findings.push(Finding {
                rule: truncate_chars(msg.rule_id.as_deref().unwrap_or("unknown"), MAX_RULE_LEN),
                file: file.clone(),
                start_line,
                start_column,
                end_line: msg.end_line.map_or(start_line, clamp_position),
                end_column: msg.end_column.map_or(start_column, clamp_position),
                message: truncate_chars(&msg.message, MAX_MESSAGE_LEN),
            });
        }
    }

    Ok(findings)
}

/// Lines and columns are 1-based; anything lower is reporter garbage.
const fn clamp_position(value: i64) -> i64 {
    if value < 1 {
        1
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_errors_become_findings() {
        let json = r#"[{
            "filePath": "/ws/src/a.js",
            "messages": [
                {"ruleId": "no-unused-vars", "severity": 2, "line": 10, "column": 5,
                 "message": "x is unused"},
                {"ruleId": "no-console", "severity": 1, "line": 20, "column": 1,
                 "message": "console call"}
            ]
        }]"#;
        let findings = parse(json, "/ws").unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].rule, "no-unused-vars");
        assert_eq!(findings[0].file, "src/a.js");
        assert_eq!(findings[0].start_line, 10);
    }

    #[test]
    fn empty_and_pathless_entries_are_skipped() {
        assert!(parse("[]", "/ws").unwrap().is_empty());
        let json = r#"[{"messages": [{"severity": 2, "line": 1, "column": 1, "message": "m"}]}]"#;
        assert!(parse(json, "/ws").unwrap().is_empty());
    }

    #[test]
    fn missing_rule_defaults_to_unknown() {
        let json = r#"[{"filePath": "f.js",
            "messages": [{"severity": 2, "line": 1, "column": 1, "message": "m"}]}]"#;
        assert_eq!(parse(json, "").unwrap()[0].rule, "unknown");
    }

    #[test]
    fn positions_are_clamped_to_one() {
        let json = r#"[{"filePath": "f.js",
            "messages": [{"ruleId": "r", "severity": 2, "line": -5, "column": 0, "message": "m"}]}]"#;
        let findings = parse(json, "").unwrap();
        assert_eq!(findings[0].start_line, 1);
        assert_eq!(findings[0].start_column, 1);
    }

    #[test]
    fn end_position_defaults_to_start() {
        let json = r#"[{"filePath": "f.js",
            "messages": [{"ruleId": "r", "severity": 2, "line": 10, "column": 5, "message": "m"}]}]"#;
        let findings = parse(json, "").unwrap();
        assert_eq!(findings[0].end_line, 10);
        assert_eq!(findings[0].end_column, 5);
    }

    #[test]
    fn explicit_end_position_is_kept() {
        let json = r#"[{"filePath": "f.js",
            "messages": [{"ruleId": "r", "severity": 2, "line": 10, "column": 5,
                          "endLine": 12, "endColumn": 8, "message": "m"}]}]"#;
        let findings = parse(json, "").unwrap();
        assert_eq!(findings[0].end_line, 12);
        assert_eq!(findings[0].end_column, 8);
    }

    #[test]
    fn oversized_fields_are_truncated() {
        let rule = "r".repeat(400);
        let msg = "m".repeat(1500);
        let json = format!(
            r#"[{{"filePath": "f.js",
                "messages": [{{"ruleId": "{rule}", "severity": 2, "line": 1, "column": 1,
                              "message": "{msg}"}}]}}]"#
        );
        let findings = parse(&json, "").unwrap();
        assert_eq!(findings[0].rule.chars().count(), MAX_RULE_LEN);
        assert_eq!(findings[0].message.chars().count(), MAX_MESSAGE_LEN);
        assert!(findings[0].rule.ends_with("..."));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(matches!(
            parse(r#"{"not": "an array"}"#, ""),
            Err(ParseError::InvalidJson(_))
        ));
    }
}
