//! Workspace root and package scope resolution.
//!
//! The workspace is the outermost relevant ancestor of the starting
//! directory: the nearest monorepo-marker directory at or below the VCS
//! root, else the VCS root, else the starting directory itself. The package
//! scope is the nearest package-manifest-bearing ancestor strictly below
//! the root, expressed as a forward-slash relative path.
//!
//! Resolution is a pure function of the filesystem; the only side effect is
//! a warning when a symlinked start escapes the resolved root.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::warn;

/// Monorepo marker files checked in every ancestor.
const MONOREPO_MARKERS: &[&str] = &["pnpm-workspace.yaml", "turbo.json", "lerna.json"];

/// Longest accepted package scope.
const MAX_PACKAGE_SCOPE_LEN: usize = 1024;

/// Resolved workspace identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceInfo {
    /// Canonical workspace root.
    pub root: PathBuf,
    /// Forward-slash relative scope, absent at the root itself.
    pub package_scope: Option<String>,
}

/// Package scope validation failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScopeError {
    /// The scope contains a `..` component.
    #[error("package scope contains a disallowed '..' component")]
    PathTraversal,
    /// The scope contains characters outside the allowed set.
    #[error("package scope contains invalid characters")]
    InvalidChars,
    /// The scope exceeds the maximum length.
    #[error("package scope exceeds maximum length of {0} characters")]
    TooLong(usize),
}

/// Resolves the workspace root and package scope for a starting directory.
///
/// # Errors
///
/// Returns an error when the starting directory cannot be canonicalized.
pub fn resolve(start_dir: &Path) -> io::Result<WorkspaceInfo> {
    let start = start_dir.canonicalize()?;

    let mut marker_root: Option<PathBuf> = None;
    let mut vcs_root: Option<PathBuf> = None;
    for dir in start.ancestors() {
        if marker_root.is_none() && has_monorepo_marker(dir) {
            marker_root = Some(dir.to_path_buf());
        }
        if vcs_root.is_none() && dir.join(".git").exists() {
            vcs_root = Some(dir.to_path_buf());
        }
    }

    let root = match (marker_root, vcs_root) {
        (Some(marker), Some(vcs)) => {
            if marker.starts_with(&vcs) {
                marker
            } else {
                vcs
            }
        },
        (Some(marker), None) => marker,
        (None, Some(vcs)) => vcs,
        (None, None) => start.clone(),
    };

    let package_scope = resolve_scope(&start, &root);
    Ok(WorkspaceInfo {
        root,
        package_scope,
    })
}

/// Nearest package-manifest ancestor at or above `start` and below `root`.
fn resolve_scope(start: &Path, root: &Path) -> Option<String> {
    if start == root {
        return None;
    }
    if !start.starts_with(root) {
        warn!(
            start = %start.display(),
            root = %root.display(),
            "starting directory escapes the workspace root; ignoring package scope"
        );
        return None;
    }

    for dir in start.ancestors() {
        if dir == root {
            return None;
        }
        if dir.join("package.json").is_file() {
            let rel = dir.strip_prefix(root).ok()?;
            return Some(rel.to_string_lossy().replace('\\', "/"));
        }
    }
    None
}

fn has_monorepo_marker(dir: &Path) -> bool {
    if MONOREPO_MARKERS.iter().any(|m| dir.join(m).is_file()) {
        return true;
    }
    has_workspaces_field(&dir.join("package.json"))
}

/// Whether a package manifest declares a top-level `workspaces` field.
fn has_workspaces_field(manifest: &Path) -> bool {
    let Ok(contents) = std::fs::read_to_string(manifest) else {
        return false;
    };
    serde_json::from_str::<serde_json::Value>(&contents)
        .ok()
        .is_some_and(|v| v.get("workspaces").is_some())
}

/// Validates a user-supplied package scope.
///
/// Allowed: alphanumerics, `-`, `_`, `/`, `.`, `@`; no `..` components; at
/// most 1024 characters. The empty string is valid and means "no scoping".
///
/// # Errors
///
/// Returns the specific [`ScopeError`] for the first violated rule.
pub fn validate_package_scope(scope: &str) -> Result<(), ScopeError> {
    if scope.is_empty() {
        return Ok(());
    }
    if scope.len() > MAX_PACKAGE_SCOPE_LEN {
        return Err(ScopeError::TooLong(MAX_PACKAGE_SCOPE_LEN));
    }
    if scope.split('/').any(|component| component == "..") {
        return Err(ScopeError::PathTraversal);
    }
    let allowed =
        |c: char| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '/' | '.' | '@');
    if !scope.chars().all(allowed) {
        return Err(ScopeError::InvalidChars);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "").unwrap();
    }

    #[test]
    fn bare_directory_is_its_own_root() {
        let dir = tempdir().unwrap();
        let info = resolve(dir.path()).unwrap();
        assert_eq!(info.root, dir.path().canonicalize().unwrap());
        assert_eq!(info.package_scope, None);
    }

    #[test]
    fn vcs_root_wins_without_markers() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join(".git")).unwrap();
        let deep = dir.path().join("src/nested");
        fs::create_dir_all(&deep).unwrap();

        let info = resolve(&deep).unwrap();
        assert_eq!(info.root, dir.path().canonicalize().unwrap());
    }

    #[test]
    fn marker_below_vcs_root_wins() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join(".git")).unwrap();
        let mono = dir.path().join("frontend");
        touch(&mono.join("pnpm-workspace.yaml"));
        let deep = mono.join("packages/app/src");
        fs::create_dir_all(&deep).unwrap();

        let info = resolve(&deep).unwrap();
        assert_eq!(info.root, mono.canonicalize().unwrap());
    }

    #[test]
    fn marker_above_vcs_root_is_ignored() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("turbo.json"));
        let repo = dir.path().join("repo");
        fs::create_dir_all(repo.join(".git")).unwrap();
        let deep = repo.join("src");
        fs::create_dir_all(&deep).unwrap();

        let info = resolve(&deep).unwrap();
        assert_eq!(info.root, repo.canonicalize().unwrap());
    }

    #[test]
    fn workspaces_field_is_a_marker() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join(".git")).unwrap();
        fs::write(
            dir.path().join("package.json"),
            r#"{"name":"mono","workspaces":["packages/*"]}"#,
        )
        .unwrap();
        let deep = dir.path().join("packages/app");
        fs::create_dir_all(&deep).unwrap();

        let info = resolve(&deep).unwrap();
        assert_eq!(info.root, dir.path().canonicalize().unwrap());
    }

    #[test]
    fn plain_manifest_is_not_a_marker() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join(".git")).unwrap();
        let pkg = dir.path().join("packages/app");
        fs::create_dir_all(&pkg).unwrap();
        fs::write(pkg.join("package.json"), r#"{"name":"app"}"#).unwrap();

        let info = resolve(&pkg).unwrap();
        assert_eq!(info.root, dir.path().canonicalize().unwrap());
        assert_eq!(info.package_scope.as_deref(), Some("packages/app"));
    }

    #[test]
    fn scope_is_nearest_manifest_below_root() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join(".git")).unwrap();
        fs::write(dir.path().join("package.json"), r"{}").unwrap();
        let pkg = dir.path().join("packages/auth");
        fs::create_dir_all(&pkg).unwrap();
        fs::write(pkg.join("package.json"), r"{}").unwrap();
        let deep = pkg.join("src/lib");
        fs::create_dir_all(&deep).unwrap();

        let info = resolve(&deep).unwrap();
        assert_eq!(info.package_scope.as_deref(), Some("packages/auth"));
    }

    #[test]
    fn scope_absent_at_root_or_without_manifest() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join(".git")).unwrap();
        fs::write(dir.path().join("package.json"), r"{}").unwrap();

        // Starting at the root: no scope even though the root has a manifest.
        let at_root = resolve(dir.path()).unwrap();
        assert_eq!(at_root.package_scope, None);

        // No intermediate manifest: no scope.
        let deep = dir.path().join("src/inner");
        fs::create_dir_all(&deep).unwrap();
        let below = resolve(&deep).unwrap();
        assert_eq!(below.package_scope, None);
    }

    #[test]
    fn scope_validation_accepts_reasonable_values() {
        assert!(validate_package_scope("").is_ok());
        assert!(validate_package_scope("packages/auth").is_ok());
        assert!(validate_package_scope("@scope/pkg-name_v1.0").is_ok());
    }

    #[test]
    fn scope_validation_rejects_traversal_chars_and_length() {
        assert_eq!(
            validate_package_scope("a/../b"),
            Err(ScopeError::PathTraversal)
        );
        assert_eq!(validate_package_scope(".."), Err(ScopeError::PathTraversal));
        assert_eq!(
            validate_package_scope("pack ages"),
            Err(ScopeError::InvalidChars)
        );
        assert_eq!(
            validate_package_scope("a;b"),
            Err(ScopeError::InvalidChars)
        );
        assert_eq!(
            validate_package_scope(&"a".repeat(MAX_PACKAGE_SCOPE_LEN + 1)),
            Err(ScopeError::TooLong(MAX_PACKAGE_SCOPE_LEN))
        );
        assert!(validate_package_scope(&"a".repeat(MAX_PACKAGE_SCOPE_LEN)).is_ok());
    }
}
