//! Tool-output path normalization.
//!
//! Absolute paths inside tool JSON are an information leak across machines;
//! the store only ever sees workspace-root-relative paths. Normalization
//! happens once, at the producer boundary, before ingestion. Rewrites are
//! atomic: a sibling `.tmp` file is written and renamed over the original.

use std::path::Path;

use serde_json::Value;

use zax_core::error::CheckError;

/// Rewrites `testResults[].name` in a vitest report to be root-relative.
///
/// # Errors
///
/// [`CheckError::Parse`] when the file is not JSON, [`CheckError::Internal`]
/// on I/O failure.
pub fn normalize_vitest_output(path: &Path, workspace_root: &Path) -> Result<(), CheckError> {
    rewrite_file(path, |value, root| {
        if let Some(results) = value.get_mut("testResults").and_then(Value::as_array_mut) {
            for result in results {
                rewrite_string_field(result, "name", root);
            }
        }
    }, workspace_root)
}

/// Rewrites `[].filePath` in an eslint report to be root-relative.
///
/// # Errors
///
/// Same as [`normalize_vitest_output`].
pub fn normalize_eslint_output(path: &Path, workspace_root: &Path) -> Result<(), CheckError> {
    rewrite_file(path, |value, root| {
        if let Some(entries) = value.as_array_mut() {
            for entry in entries {
                rewrite_string_field(entry, "filePath", root);
            }
        }
    }, workspace_root)
}

fn rewrite_file(
    path: &Path,
    rewrite: impl Fn(&mut Value, &str),
    workspace_root: &Path,
) -> Result<(), CheckError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| CheckError::internal(format!("failed to read {}: {e}", path.display())))?;
    let mut value: Value = serde_json::from_str(&contents).map_err(|e| CheckError::Parse {
        message: format!("{}: {e}", path.display()),
    })?;

    let root = workspace_root.to_string_lossy();
    rewrite(&mut value, &root);

    let serialized = serde_json::to_vec(&value)
        .map_err(|e| CheckError::internal(format!("failed to serialize {}: {e}", path.display())))?;
    write_atomic(path, &serialized)
        .map_err(|e| CheckError::internal(format!("failed to write {}: {e}", path.display())))
}

fn rewrite_string_field(object: &mut Value, field: &str, root: &str) {
    if let Some(Value::String(s)) = object.get_mut(field) {
        *s = make_relative(s, root);
    }
}

/// Strips the root prefix at a path-component boundary. Paths not under the
/// root are returned unchanged.
fn make_relative(path: &str, root: &str) -> String {
    if root.is_empty() || path == root {
        return path.to_string();
    }
    let root = root.strip_suffix('/').unwrap_or(root);
    if path == root {
        return path.to_string();
    }
    match path.strip_prefix(root) {
        Some(rest) if rest.starts_with('/') => rest[1..].to_string(),
        _ => path.to_string(),
    }
}

/// Sibling-tmp-then-rename write; a crash never leaves a partial file.
fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)
}
