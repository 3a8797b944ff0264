//! Stable defect ids.
//!
//! A stable id is a rerun-stable fingerprint for one defect: the same test
//! failing in the same file, or the same rule firing at the same position,
//! hashes to the same id across runs. Ids are blake3 digests truncated to
//! 32 lowercase hex characters.

/// Stable id for a test failure: blake3 of `<file>:<test_id>`.
///
/// `file` must already be workspace-root-relative so the id survives clones
/// at different absolute paths.
#[must_use]
pub fn test_failure(file: &str, test_id: &str) -> String {
    truncated_hash(&format!("{file}:{test_id}"))
}

/// Stable id for a lint finding: blake3 of
/// `<tool>:<rule>:<file>:<line>:<column>`.
#[must_use]
pub fn finding(tool: &str, rule: &str, file: &str, line: i64, column: i64) -> String {
    truncated_hash(&format!("{tool}:{rule}:{file}:{line}:{column}"))
}

fn truncated_hash(input: &str) -> String {
    let hex = blake3::hash(input.as_bytes()).to_hex();
    hex[..32].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_failure_same_id() {
        let a = test_failure("src/math.test.ts", "Math > add > handles negatives");
        let b = test_failure("src/math.test.ts", "Math > add > handles negatives");
        assert_eq!(a, b);
    }

    #[test]
    fn different_test_different_id() {
        let a = test_failure("src/math.test.ts", "add");
        let b = test_failure("src/math.test.ts", "subtract");
        assert_ne!(a, b);
        let c = test_failure("src/other.test.ts", "add");
        assert_ne!(a, c);
    }

    #[test]
    fn ids_are_32_lowercase_hex() {
        for id in [
            test_failure("a.ts", "t"),
            finding("eslint", "no-unused-vars", "src/a.js", 10, 5),
        ] {
            assert_eq!(id.len(), 32);
            assert!(id
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
        }
    }

    #[test]
    fn finding_position_is_part_of_identity() {
        let a = finding("eslint", "r", "f.js", 1, 1);
        let b = finding("eslint", "r", "f.js", 2, 1);
        assert_ne!(a, b);
    }
}
