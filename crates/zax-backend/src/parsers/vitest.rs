//! Vitest JSON reporter parser.
//!
//! Extracts failed assertions and file-level errors (a file that failed to
//! even run, e.g. a syntax error, reports `status: "failed"` with an empty
//! assertion list and a top-level message).

use serde::Deserialize;

use super::{relative_to_root, truncate_chars, ParseError};

/// Failure messages are truncated to this many characters.
const MAX_MESSAGE_LEN: usize = 1000;

/// One failed test extracted from the report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestFailure {
    /// Breadcrumbed identity, `Suite > nested > title`.
    pub test_id: String,
    /// Workspace-relative test file.
    pub file: String,
    /// First failure message, truncated.
    pub message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Report {
    #[serde(default)]
    test_results: Vec<FileResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileResult {
    /// Path of the test file as the reporter wrote it.
    name: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    assertion_results: Vec<Assertion>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Assertion {
    #[serde(default)]
    ancestor_titles: Vec<String>,
    #[serde(default)]
    title: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    failure_messages: Vec<String>,
}

/// Parses a vitest JSON report and returns every failure.
///
/// # Errors
///
/// Returns [`ParseError::InvalidJson`] for malformed input.
pub fn parse(json: &str, workspace_root: &str) -> Result<Vec<TestFailure>, ParseError> {
    let report: Report = serde_json::from_str(json)?;
    let mut failures = Vec::new();

    for result in &report.test_results {
        let file = relative_to_root(&result.name, workspace_root);

        // A file that never ran its assertions is one failure on its own.
        if result.status == "failed" && result.assertion_results.is_empty() {
            if let Some(message) = &result.message {
                failures.push(TestFailure {
                    test_id: format!("{file}::file-error"),
                    file: file.clone(),
                    message: truncate_chars(message, MAX_MESSAGE_LEN),
                });
                continue;
            }
        }

        for assertion in &result.assertion_results {
            if assertion.status != "failed" {
                continue;
            }
            failures.push(TestFailure {
                test_id: breadcrumb(&assertion.ancestor_titles, &assertion.title),
                file: file.clone(),
                message: truncate_chars(
                    assertion
                        .failure_messages
                        .first()
                        .map_or("", String::as_str),
                    MAX_MESSAGE_LEN,
                ),
            });
        }
    }

    Ok(failures)
}

fn breadcrumb(ancestors: &[String], title: &str) -> String {
    if ancestors.is_empty() {
        title.to_string()
    } else {
        format!("{} > {}", ancestors.join(" > "), title)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PASSING: &str = r#"{
        "testResults": [{
            "name": "/ws/src/ok.test.ts",
            "status": "passed",
            "assertionResults": [
                {"ancestorTitles": [], "title": "works", "status": "passed", "failureMessages": []}
            ]
        }]
    }"#;

    #[test]
    fn passing_report_yields_nothing() {
        assert!(parse(PASSING, "/ws").unwrap().is_empty());
        assert!(parse(r#"{"testResults":[]}"#, "/ws").unwrap().is_empty());
        assert!(parse(r"{}", "/ws").unwrap().is_empty());
    }

    #[test]
    fn failed_assertion_is_extracted_with_breadcrumb() {
        let json = r#"{
            "testResults": [{
                "name": "/ws/src/math.test.ts",
                "status": "failed",
                "assertionResults": [
                    {"ancestorTitles": ["Math", "add"], "title": "handles negatives",
                     "status": "failed", "failureMessages": ["expected -1, got 1"]},
                    {"ancestorTitles": [], "title": "passes", "status": "passed", "failureMessages": []}
                ]
            }]
        }"#;
        let failures = parse(json, "/ws").unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].test_id, "Math > add > handles negatives");
        assert_eq!(failures[0].file, "src/math.test.ts");
        assert_eq!(failures[0].message, "expected -1, got 1");
    }

    #[test]
    fn file_level_error_becomes_a_single_failure() {
        let json = r#"{
            "testResults": [{
                "name": "/ws/src/broken.test.ts",
                "status": "failed",
                "message": "SyntaxError: unexpected token",
                "assertionResults": []
            }]
        }"#;
        let failures = parse(json, "/ws").unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].test_id, "src/broken.test.ts::file-error");
        assert!(failures[0].message.starts_with("SyntaxError"));
    }

    #[test]
    fn empty_failure_messages_yield_empty_message() {
        let json = r#"{
            "testResults": [{
                "name": "t.ts", "status": "failed",
                "assertionResults": [
                    {"ancestorTitles": [], "title": "t", "status": "failed", "failureMessages": []}
                ]
            }]
        }"#;
        assert_eq!(parse(json, "").unwrap()[0].message, "");
    }

    #[test]
    fn long_messages_are_truncated() {
        let long = "x".repeat(1500);
        let json = format!(
            r#"{{"testResults":[{{"name":"t.ts","status":"failed","assertionResults":[
                {{"ancestorTitles":[],"title":"t","status":"failed","failureMessages":["{long}"]}}]}}]}}"#
        );
        let failures = parse(&json, "").unwrap();
        assert_eq!(failures[0].message.chars().count(), MAX_MESSAGE_LEN);
        assert!(failures[0].message.ends_with("..."));
    }

    #[test]
    fn already_relative_paths_pass_through() {
        let json = r#"{
            "testResults": [{
                "name": "src/a.test.ts", "status": "failed",
                "assertionResults": [
                    {"ancestorTitles": [], "title": "t", "status": "failed", "failureMessages": ["m"]}
                ]
            }]
        }"#;
        assert_eq!(parse(json, "").unwrap()[0].file, "src/a.test.ts");
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(matches!(
            parse("not json", "/ws"),
            Err(ParseError::InvalidJson(_))
        ));
    }
}
