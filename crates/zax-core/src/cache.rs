//! Per-workspace cache directory management.
//!
//! Every workspace gets one private directory keyed by a stable 16-hex id
//! derived from the canonical root path. The directory holds the daemon
//! lifetime files (lock, pid, log, socket, port) and the backend's SQLite
//! database; it must be mode `0700` and the system refuses to use it
//! otherwise.

use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Application directory name under the platform cache root.
pub const APP_DIR: &str = "zax";

/// Lock directory created by the CLI during daemon bring-up.
pub const ENGINE_LOCK_DIR: &str = "engine.lock";
/// PID file written by the live engine.
pub const ENGINE_PID_FILE: &str = "engine.pid";
/// Append-only engine log.
pub const ENGINE_LOG_FILE: &str = "engine.log";
/// Unix stream socket for CLI-to-engine HTTP.
pub const ENGINE_SOCKET_FILE: &str = "zax.sock";
/// Plain-text TCP port the backend is listening on.
pub const BACKEND_PORT_FILE: &str = "rust.port";
/// Backend SQLite database.
pub const STATE_DB_FILE: &str = "state.db";
/// Per-run tool output directory.
pub const ARTIFACTS_DIR: &str = "artifacts";

/// Required mode of the cache directory.
const CACHE_DIR_MODE: u32 = 0o700;

/// Errors from cache directory management.
#[derive(Debug, Error)]
pub enum CacheError {
    /// `$HOME` is not set; the cache root cannot be derived.
    #[error("HOME is not set; cannot locate the cache directory")]
    HomeNotSet,

    /// An existing cache directory has the wrong permissions. Fatal: using
    /// it would expose workspace state to other users.
    #[error("cache directory {path} has mode {mode:o}, expected 700; refusing to use it")]
    WrongPermissions {
        /// The offending directory.
        path: PathBuf,
        /// Its current permission bits.
        mode: u32,
    },

    /// Filesystem failure.
    #[error("cache directory I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Computes the stable workspace id for a root directory.
///
/// The id is the first 16 hex characters of the blake3 hash of the absolute,
/// symlink-resolved root path. Two invocations with the same canonical root
/// always produce the same id; it is a local cache key, nothing more.
///
/// # Errors
///
/// Returns an error when the root cannot be canonicalized.
pub fn workspace_id(root: &Path) -> io::Result<String> {
    let canonical = root.canonicalize()?;
    let hex = blake3::hash(canonical.to_string_lossy().as_bytes()).to_hex();
    Ok(hex[..16].to_string())
}

/// Platform cache root: `$HOME/Library/Caches/zax` on macOS,
/// `$HOME/.cache/zax` elsewhere.
///
/// # Errors
///
/// Returns [`CacheError::HomeNotSet`] when `$HOME` is missing or empty.
pub fn cache_root() -> Result<PathBuf, CacheError> {
    let home = std::env::var_os("HOME")
        .filter(|h| !h.is_empty())
        .ok_or(CacheError::HomeNotSet)?;
    let home = PathBuf::from(home);

    #[cfg(target_os = "macos")]
    let root = home.join("Library").join("Caches").join(APP_DIR);
    #[cfg(not(target_os = "macos"))]
    let root = home.join(".cache").join(APP_DIR);

    Ok(root)
}

/// Cache directory for one workspace id.
///
/// # Errors
///
/// Returns [`CacheError::HomeNotSet`] when `$HOME` is missing.
pub fn cache_dir(workspace_id: &str) -> Result<PathBuf, CacheError> {
    Ok(cache_root()?.join(workspace_id))
}

/// Creates the cache directory with mode `0700`, or validates an existing
/// one.
///
/// # Errors
///
/// Returns [`CacheError::WrongPermissions`] when the directory pre-exists
/// with any mode other than `0700`, or an I/O error on creation failure.
pub fn ensure_cache_dir(dir: &Path) -> Result<(), CacheError> {
    if dir.exists() {
        let mode = fs::metadata(dir)?.permissions().mode() & 0o7777;
        if mode != CACHE_DIR_MODE {
            return Err(CacheError::WrongPermissions {
                path: dir.to_path_buf(),
                mode,
            });
        }
        return Ok(());
    }

    fs::create_dir_all(dir)?;
    fs::set_permissions(dir, fs::Permissions::from_mode(CACHE_DIR_MODE))?;
    Ok(())
}

/// Artifact directory for one run, `<cache>/artifacts/<run_id>/`.
#[must_use]
pub fn run_artifacts_dir(cache_dir: &Path, run_id: &str) -> PathBuf {
    cache_dir.join(ARTIFACTS_DIR).join(run_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn workspace_id_is_16_lowercase_hex() {
        let dir = tempdir().unwrap();
        let id = workspace_id(dir.path()).unwrap();
        assert_eq!(id.len(), 16);
        assert!(id
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn workspace_id_is_stable_across_calls() {
        let dir = tempdir().unwrap();
        assert_eq!(
            workspace_id(dir.path()).unwrap(),
            workspace_id(dir.path()).unwrap()
        );
    }

    #[test]
    fn workspace_id_follows_symlinks() {
        let dir = tempdir().unwrap();
        let real = dir.path().join("real");
        let link = dir.path().join("link");
        fs::create_dir(&real).unwrap();
        std::os::unix::fs::symlink(&real, &link).unwrap();

        assert_eq!(
            workspace_id(&real).unwrap(),
            workspace_id(&link).unwrap(),
            "same realpath must yield the same id"
        );
    }

    #[test]
    fn different_roots_get_different_ids() {
        let a = tempdir().unwrap();
        let b = tempdir().unwrap();
        assert_ne!(
            workspace_id(a.path()).unwrap(),
            workspace_id(b.path()).unwrap()
        );
    }

    #[test]
    fn workspace_id_fails_for_missing_path() {
        assert!(workspace_id(Path::new("/nonexistent/zax-test-path")).is_err());
    }

    #[test]
    fn ensure_creates_with_0700() {
        let dir = tempdir().unwrap();
        let cache = dir.path().join("ws");
        ensure_cache_dir(&cache).unwrap();
        let mode = fs::metadata(&cache).unwrap().permissions().mode() & 0o7777;
        assert_eq!(mode, 0o700);

        // Second call validates and succeeds.
        ensure_cache_dir(&cache).unwrap();
    }

    #[test]
    fn ensure_refuses_wrong_mode() {
        let dir = tempdir().unwrap();
        let cache = dir.path().join("ws");
        fs::create_dir(&cache).unwrap();
        fs::set_permissions(&cache, fs::Permissions::from_mode(0o755)).unwrap();

        let err = ensure_cache_dir(&cache).unwrap_err();
        assert!(matches!(err, CacheError::WrongPermissions { mode, .. } if mode == 0o755));
    }

    #[test]
    fn run_artifacts_dir_layout() {
        let path = run_artifacts_dir(Path::new("/cache/abc"), "run-1");
        assert_eq!(path, PathBuf::from("/cache/abc/artifacts/run-1"));
    }
}
