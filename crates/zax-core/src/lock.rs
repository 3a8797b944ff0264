//! Cross-process mutex for engine bring-up.
//!
//! The atomic primitive is `mkdir` of `engine.lock/` inside the cache
//! directory; the `pid` file written inside it exists purely for stale
//! recovery. A holder that died leaves a directory whose pid no longer
//! answers signal 0 - the next acquirer removes it and retries.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use thiserror::Error;
use tracing::{debug, warn};

use crate::cache::ENGINE_LOCK_DIR;

/// Poll interval while the lock is contended.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Total acquisition budget.
pub const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// Lock acquisition errors.
#[derive(Debug, Error)]
pub enum LockError {
    /// The lock stayed contended past the acquisition budget.
    #[error("timed out after {elapsed_ms}ms waiting for {path}")]
    Timeout {
        /// The contended lock directory.
        path: PathBuf,
        /// How long we waited.
        elapsed_ms: u128,
    },

    /// Filesystem failure while acquiring.
    #[error("lock I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Held lock; released (best-effort) on drop.
#[derive(Debug)]
pub struct LockGuard {
    lock_dir: PathBuf,
    released: bool,
}

impl LockGuard {
    /// Releases the lock explicitly. Cleanup is best-effort: a failure to
    /// remove the directory only means the next acquirer takes the stale
    /// path.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let _ = fs::remove_file(self.lock_dir.join("pid"));
        if let Err(e) = fs::remove_dir(&self.lock_dir) {
            warn!(path = %self.lock_dir.display(), error = %e, "failed to remove lock dir");
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.release_inner();
    }
}

/// Acquires the bring-up lock for a cache directory, waiting up to
/// [`ACQUIRE_TIMEOUT`].
///
/// # Errors
///
/// Returns [`LockError::Timeout`] when the budget is exhausted, or an I/O
/// error on unexpected filesystem failure.
pub fn acquire(cache_dir: &Path) -> Result<LockGuard, LockError> {
    acquire_with_timeout(cache_dir, ACQUIRE_TIMEOUT)
}

/// [`acquire`] with an explicit budget. Exposed for tests and callers that
/// want a shorter wait.
///
/// # Errors
///
/// Same as [`acquire`].
pub fn acquire_with_timeout(cache_dir: &Path, timeout: Duration) -> Result<LockGuard, LockError> {
    let lock_dir = cache_dir.join(ENGINE_LOCK_DIR);
    let start = Instant::now();

    loop {
        match try_acquire(&lock_dir)? {
            Some(guard) => return Ok(guard),
            None => {
                // One stale-recovery attempt per contention observation.
                if remove_if_stale(&lock_dir) {
                    if let Some(guard) = try_acquire(&lock_dir)? {
                        return Ok(guard);
                    }
                }
            },
        }

        if start.elapsed() >= timeout {
            return Err(LockError::Timeout {
                path: lock_dir,
                elapsed_ms: start.elapsed().as_millis(),
            });
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

/// One `mkdir` attempt. `Ok(None)` means the lock is held by someone else.
fn try_acquire(lock_dir: &Path) -> Result<Option<LockGuard>, LockError> {
    match fs::create_dir(lock_dir) {
        Ok(()) => {
            fs::write(lock_dir.join("pid"), std::process::id().to_string())?;
            Ok(Some(LockGuard {
                lock_dir: lock_dir.to_path_buf(),
                released: false,
            }))
        },
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Removes the lock directory when its recorded holder is dead.
/// Returns true when a stale lock was cleared.
fn remove_if_stale(lock_dir: &Path) -> bool {
    let Ok(contents) = fs::read_to_string(lock_dir.join("pid")) else {
        // No pid yet: the holder may be between mkdir and write. Keep
        // polling; the acquisition timeout bounds a holder that never
        // finishes.
        return false;
    };
    let Ok(pid) = contents.trim().parse::<i32>() else {
        return false;
    };
    if pid_alive(pid) {
        return false;
    }

    debug!(pid, path = %lock_dir.display(), "recovering stale lock");
    let _ = fs::remove_file(lock_dir.join("pid"));
    fs::remove_dir(lock_dir).is_ok()
}

/// Signal-0 liveness probe. EPERM means the pid exists but belongs to
/// another user, which still counts as alive. Also used by the CLI to judge
/// a recorded `engine.pid`.
#[must_use]
pub fn pid_alive(pid: i32) -> bool {
    match kill(Pid::from_raw(pid), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}
