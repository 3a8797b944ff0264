//! Artifact manifest and check summary types.
//!
//! The manifest describes the tool outputs one run produced; the backend
//! ingests it transactionally. The summary is what `/check` returns and what
//! the CLI renders.

use serde::{Deserialize, Serialize};

/// Kind of artifact a tool run produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArtifactKind {
    /// Test-runner JSON output (vitest).
    TestFailure,
    /// Linter JSON output (eslint).
    Finding,
}

/// Reference to one artifact file on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// Unique id, `<run_id>-vitest` / `<run_id>-eslint`.
    pub artifact_id: String,
    /// What the file contains.
    pub kind: ArtifactKind,
    /// Absolute path inside `<cache>/artifacts/<run_id>/`.
    pub path: String,
    /// Hex blake3 of the file contents.
    pub hash: String,
}

/// Manifest for one check run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactManifest {
    /// Owning workspace (16 lowercase hex).
    pub workspace_id: String,
    /// Run UUID.
    pub run_id: String,
    /// Artifacts produced by this run. May be empty when every tool was
    /// skipped; the run row is still recorded.
    pub artifacts: Vec<ArtifactRef>,
}

/// New/fixed counts for one delta query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaSummary {
    pub new_test_failures: u64,
    pub fixed_test_failures: u64,
    pub new_findings: u64,
    pub fixed_findings: u64,
}

impl DeltaSummary {
    /// True when the run introduced no new problems.
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.new_test_failures == 0 && self.new_findings == 0
    }
}

/// Full `/check` response: the delta plus what the pipeline did to get it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckSummary {
    pub new_test_failures: u64,
    pub fixed_test_failures: u64,
    pub new_findings: u64,
    pub fixed_findings: u64,
    /// Whether the linter was skipped.
    pub eslint_skipped: bool,
    /// Why, when it was (`not found`, `no config`, `timeout`, `failed`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eslint_skip_reason: Option<String>,
    /// Test files selected for this run.
    pub affected_count: u64,
    /// Discovered test files not selected (0 on full runs).
    pub skipped_count: u64,
    /// Files reported dirty since the last run.
    pub dirty_count: u64,
    /// Whether the test runner was skipped (nothing affected).
    pub vitest_skipped: bool,
    /// Whether the test runner exited cleanly (true when skipped).
    pub all_tests_passed: bool,
}

impl CheckSummary {
    /// Builds a summary from a delta and the pipeline's run facts.
    #[must_use]
    pub fn from_delta(delta: DeltaSummary) -> Self {
        Self {
            new_test_failures: delta.new_test_failures,
            fixed_test_failures: delta.fixed_test_failures,
            new_findings: delta.new_findings,
            fixed_findings: delta.fixed_findings,
            eslint_skipped: false,
            eslint_skip_reason: None,
            affected_count: 0,
            skipped_count: 0,
            dirty_count: 0,
            vitest_skipped: false,
            all_tests_passed: true,
        }
    }

    /// Exit-code contract: 0 iff no new failures and no new findings.
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.new_test_failures == 0 && self.new_findings == 0
    }
}
