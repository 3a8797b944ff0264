//! Test-file conventions and discovery.
//!
//! Test files are named `*.test.*` / `*.spec.*` across the ts/js extension
//! family, or live under a `__tests__` directory. Discovery walks the
//! workspace honoring `.gitignore`.

use std::path::Path;

use ignore::WalkBuilder;

const TEST_MARKERS: &[&str] = &[".test.", ".spec."];
const SOURCE_EXTENSIONS: &[&str] = &["ts", "tsx", "js", "jsx", "mts", "mjs", "cts", "cjs"];

/// Whether a path is a JavaScript-family source file.
#[must_use]
pub fn is_source_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| SOURCE_EXTENSIONS.contains(&ext))
}

/// Whether a path is a test file by naming convention.
#[must_use]
pub fn is_test_file(path: &Path) -> bool {
    if !is_source_file(path) {
        return false;
    }
    if path.components().any(|c| c.as_os_str() == "__tests__") {
        return true;
    }
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    TEST_MARKERS.iter().any(|m| name.contains(m))
}

/// Directory-aware scope prefix match: `path == scope` or
/// `path` starts with `scope/`. An empty scope matches everything.
#[must_use]
pub fn matches_package_scope(path: &str, scope: &str) -> bool {
    if scope.is_empty() {
        return true;
    }
    path == scope || path.strip_prefix(scope).is_some_and(|r| r.starts_with('/'))
}

/// Walks the workspace and returns root-relative test files within the
/// scope, sorted for determinism. Gitignored and hidden trees are skipped.
#[must_use]
pub fn discover_test_files(workspace_root: &Path, package_scope: &str) -> Vec<String> {
    let mut tests = Vec::new();
    let walker = WalkBuilder::new(workspace_root)
        .hidden(true)
        .git_ignore(true)
        .build();

    for entry in walker.flatten() {
        let path = entry.path();
        if !is_test_file(path) {
            continue;
        }
        let Ok(rel) = path.strip_prefix(workspace_root) else {
            continue;
        };
        let rel = rel.to_string_lossy().replace('\\', "/");
        if matches_package_scope(&rel, package_scope) {
            tests.push(rel);
        }
    }
    tests.sort();
    tests
}
