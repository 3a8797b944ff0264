//! Affected-test selection.
//!
//! The dirty set is derived on demand from VCS state (`git status
//! --porcelain`). Mapping dirty files to tests is deliberately conservative:
//! a dirty test file selects itself, a dirty source file selects its
//! conventional test files (colocated `foo.test.ts` siblings, `__tests__/`
//! directories, a mirrored `test/` tree). Conditions that make the dirty
//! set untrustworthy fall back to a full run - never to silently skipping
//! tests.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, warn};

use zax_core::discovery::{is_source_file, is_test_file, matches_package_scope};

const TEST_MARKERS: &[&str] = &["test", "spec"];
const TEST_EXTENSIONS: &[&str] = &["ts", "tsx", "js", "jsx", "mts", "mjs"];

/// Result of one selection query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AffectedTests {
    /// Workspace-relative files reported changed.
    pub dirty_files: Vec<String>,
    /// Workspace-relative test files worth running. Empty on a full run
    /// (the caller runs everything) and on a no-op run (the caller skips
    /// the test runner).
    pub test_files: Vec<String>,
    /// Whether the caller should run the whole suite.
    pub is_full_run: bool,
}

impl AffectedTests {
    fn full_run(dirty_files: Vec<String>) -> Self {
        Self {
            dirty_files,
            test_files: Vec::new(),
            is_full_run: true,
        }
    }
}

/// Maps the current dirty set to test files for one workspace.
#[derive(Debug)]
pub struct AffectedSelector {
    workspace_root: PathBuf,
}

impl AffectedSelector {
    #[must_use]
    pub const fn new(workspace_root: PathBuf) -> Self {
        Self { workspace_root }
    }

    /// Selects the tests worth running.
    ///
    /// `force_full` short-circuits to a full run. An indeterminate dirty
    /// set (no git, git failure) also forces a full run; an empty dirty set
    /// means no tests need to run at all.
    #[must_use]
    pub fn select(&self, force_full: bool, package_scope: &str) -> AffectedTests {
        if force_full {
            return AffectedTests::full_run(Vec::new());
        }

        let Some(dirty) = self.dirty_files() else {
            warn!("dirty set is indeterminate; falling back to a full run");
            return AffectedTests::full_run(Vec::new());
        };
        if dirty.is_empty() {
            debug!("dirty set empty; no tests affected");
            return AffectedTests::default();
        }

        let mut tests = BTreeSet::new();
        for rel in &dirty {
            let path = Path::new(rel);
            if is_test_file(path) {
                if self.workspace_root.join(path).is_file()
                    && matches_package_scope(rel, package_scope)
                {
                    tests.insert(rel.clone());
                }
            } else if is_source_file(path) {
                for test in self.tests_for_source(path) {
                    if matches_package_scope(&test, package_scope) {
                        tests.insert(test);
                    }
                }
            }
        }

        debug!(
            dirty = dirty.len(),
            tests = tests.len(),
            scope = %if package_scope.is_empty() { "<none>" } else { package_scope },
            "affected selection complete"
        );
        AffectedTests {
            dirty_files: dirty,
            test_files: tests.into_iter().collect(),
            is_full_run: false,
        }
    }

    /// Workspace-relative dirty files from `git status --porcelain`, or
    /// `None` when the answer cannot be trusted.
    #[must_use]
    pub fn dirty_files(&self) -> Option<Vec<String>> {
        // -uall lists untracked files individually instead of collapsing
        // whole directories into one entry.
        let output = Command::new("git")
            .args(["status", "--porcelain", "-uall"])
            .current_dir(&self.workspace_root)
            .output()
            .ok()?;
        if !output.status.success() {
            return None;
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut files: Vec<String> = stdout
            .lines()
            .filter_map(parse_porcelain_line)
            .collect();
        files.sort();
        files.dedup();
        Some(files)
    }

    /// Conventional test files for a workspace-relative source file.
    fn tests_for_source(&self, source: &Path) -> Vec<String> {
        let Some(stem) = source.file_stem().and_then(|s| s.to_str()) else {
            return Vec::new();
        };
        let parent = source.parent().unwrap_or_else(|| Path::new(""));
        let mut found = Vec::new();

        // Colocated: src/foo.ts -> src/foo.test.ts
        self.push_existing_candidates(parent, stem, &mut found);
        // __tests__ sibling dir: src/foo.ts -> src/__tests__/foo.test.ts
        self.push_existing_candidates(&parent.join("__tests__"), stem, &mut found);
        // Mirrored test tree: src/lib/foo.ts -> test/lib/foo.test.ts
        if let Ok(under_src) = parent.strip_prefix("src") {
            self.push_existing_candidates(&Path::new("test").join(under_src), stem, &mut found);
        }

        found
    }

    fn push_existing_candidates(&self, dir: &Path, stem: &str, out: &mut Vec<String>) {
        for marker in TEST_MARKERS {
            for ext in TEST_EXTENSIONS {
                let candidate = dir.join(format!("{stem}.{marker}.{ext}"));
                if self.workspace_root.join(&candidate).is_file() {
                    out.push(candidate.to_string_lossy().replace('\\', "/"));
                }
            }
        }
    }
}

/// Extracts the path from one `git status --porcelain` line; renames yield
/// the new name.
fn parse_porcelain_line(line: &str) -> Option<String> {
    if line.len() < 4 {
        return None;
    }
    let path = &line[3..];
    let path = path.rsplit(" -> ").next().unwrap_or(path);
    let path = path.trim().trim_matches('"');
    if path.is_empty() {
        None
    } else {
        Some(path.to_string())
    }
}
