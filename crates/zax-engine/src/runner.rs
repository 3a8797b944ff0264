//! External tool spawning.
//!
//! Both tools run under the detected package manager's runner convention
//! with a wall-clock watchdog. A watchdog expiry escalates SIGTERM →
//! bounded wait → SIGKILL. The test runner surfaces hard errors; the linter
//! only ever classifies itself into a skip reason - lint errors with output
//! present are expected and count as success.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use zax_core::error::CheckError;
use zax_core::pm::{eslint_command, vitest_command, PackageManager};

/// Wall-clock budget for each tool.
pub const TOOL_TIMEOUT: Duration = Duration::from_secs(300);
/// Grace period between SIGTERM and SIGKILL.
const KILL_GRACE: Duration = Duration::from_secs(2);
/// How much stderr to carry in error messages.
const STDERR_SNIPPET_LEN: usize = 2000;

/// Result of a completed (non-skipped) test run.
#[derive(Debug, Clone)]
pub struct TestRunOutcome {
    /// The reporter output, when the run produced one.
    pub output_path: Option<PathBuf>,
    /// Whether vitest exited zero (every selected test passed).
    pub all_passed: bool,
}

/// Why the linter was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Timeout,
    NotFound,
    NoConfig,
    Failed,
}

impl SkipReason {
    /// User-facing reason string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::NotFound => "not found",
            Self::NoConfig => "no config",
            Self::Failed => "failed",
        }
    }
}

/// Outcome of a linter run.
#[derive(Debug, Clone)]
pub enum LintOutcome {
    /// The linter produced usable output (lint errors included).
    Completed { output_path: PathBuf },
    /// The linter produced nothing usable; the check continues.
    Skipped { reason: SkipReason },
}

/// Fails fast when the workspace has no installed dependencies.
///
/// # Errors
///
/// [`CheckError::DepsNotInstalled`] naming the install command.
pub fn preflight(workspace_root: &Path, manager: PackageManager) -> Result<(), CheckError> {
    if workspace_root.join("node_modules").is_dir() {
        Ok(())
    } else {
        Err(CheckError::DepsNotInstalled {
            install_cmd: manager.install_command().to_string(),
        })
    }
}

/// Runs vitest, restricted to `test_files` when given.
///
/// # Errors
///
/// `VITEST_TIMEOUT` / `VITEST_NOT_FOUND` / `VITEST_FAILED` per the
/// exit-code policy.
pub async fn run_vitest(
    workspace_root: &Path,
    manager: PackageManager,
    output_file: &Path,
    test_files: Option<&[String]>,
) -> Result<TestRunOutcome, CheckError> {
    let argv = vitest_command(manager, output_file, test_files);
    info!(command = %argv.join(" "), "running vitest");

    let exit = spawn_with_watchdog(&argv, workspace_root, TOOL_TIMEOUT).await?;
    classify_vitest(&exit, output_file)
}

/// Runs eslint against the scope target (`.` when unscoped).
///
/// Never errors: every failure mode folds into a [`SkipReason`].
pub async fn run_eslint(
    workspace_root: &Path,
    manager: PackageManager,
    output_file: &Path,
    target: &str,
) -> LintOutcome {
    let argv = eslint_command(manager, output_file, target);
    info!(command = %argv.join(" "), "running eslint");

    let exit = match spawn_with_watchdog(&argv, workspace_root, TOOL_TIMEOUT).await {
        Ok(exit) => exit,
        Err(e) => {
            warn!(error = %e, "eslint spawn failed");
            return LintOutcome::Skipped {
                reason: SkipReason::Failed,
            };
        },
    };

    match classify_eslint(&exit, output_file.exists()) {
        Some(reason) => {
            info!(reason = reason.as_str(), "eslint skipped");
            LintOutcome::Skipped { reason }
        },
        None => LintOutcome::Completed {
            output_path: output_file.to_path_buf(),
        },
    }
}

/// What a watchdog-supervised spawn observed.
#[derive(Debug)]
struct ToolExit {
    timed_out: bool,
    /// None exactly when the watchdog fired.
    success: Option<bool>,
    stderr: String,
}

/// Spawns `argv` with piped output and a wall-clock watchdog.
async fn spawn_with_watchdog(
    argv: &[String],
    cwd: &Path,
    timeout: Duration,
) -> Result<ToolExit, CheckError> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| CheckError::internal("empty tool command"))?;

    let mut child = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| CheckError::internal(format!("failed to spawn {program}: {e}")))?;

    // Drain both pipes concurrently so a chatty tool can never block on a
    // full pipe while we wait on its exit.
    let mut stdout_pipe = child.stdout.take();
    let stdout_task = tokio::spawn(async move {
        let mut sink = Vec::new();
        if let Some(ref mut pipe) = stdout_pipe {
            let _ = pipe.read_to_end(&mut sink).await;
        }
        sink
    });
    let mut stderr_pipe = child.stderr.take();
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(ref mut pipe) = stderr_pipe {
            let _ = pipe.read_to_end(&mut buf).await;
        }
        buf
    });

    let status = tokio::select! {
        status = child.wait() => Some(
            status.map_err(|e| CheckError::internal(format!("wait failed: {e}")))?,
        ),
        () = tokio::time::sleep(timeout) => None,
    };

    let timed_out = status.is_none();
    if timed_out {
        warn!(program = %program, timeout_secs = timeout.as_secs(), "watchdog fired");
        terminate(&mut child).await;
    }

    let _ = stdout_task.await;
    let stderr_bytes = stderr_task.await.unwrap_or_default();
    let stderr = String::from_utf8_lossy(&stderr_bytes).into_owned();
    debug!(program = %program, timed_out, "tool finished");

    Ok(ToolExit {
        timed_out,
        success: status.map(|s| s.success()),
        stderr,
    })
}

/// SIGTERM, bounded wait, SIGKILL.
async fn terminate(child: &mut tokio::process::Child) {
    if let Some(pid) = child.id() {
        #[allow(clippy::cast_possible_wrap)]
        let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
    }
    if tokio::time::timeout(KILL_GRACE, child.wait()).await.is_err() {
        let _ = child.kill().await;
    }
}

/// Vitest exit-code policy.
fn classify_vitest(exit: &ToolExit, output_file: &Path) -> Result<TestRunOutcome, CheckError> {
    if exit.timed_out {
        return Err(CheckError::VitestTimeout {
            timeout_secs: TOOL_TIMEOUT.as_secs(),
        });
    }
    let success = exit.success.unwrap_or(false);
    if !success && !output_file.exists() {
        if stderr_says_not_found(&exit.stderr, "vitest") {
            return Err(CheckError::VitestNotFound);
        }
        return Err(CheckError::VitestFailed {
            stderr: snippet(&exit.stderr),
        });
    }
    Ok(TestRunOutcome {
        output_path: output_file.exists().then(|| output_file.to_path_buf()),
        all_passed: success,
    })
}

/// ESLint skip classification; `None` means usable output.
fn classify_eslint(exit: &ToolExit, output_exists: bool) -> Option<SkipReason> {
    if exit.timed_out {
        return Some(SkipReason::Timeout);
    }
    if stderr_says_not_found(&exit.stderr, "eslint") {
        return Some(SkipReason::NotFound);
    }
    if exit.stderr.contains("No ESLint configuration") || exit.stderr.contains("eslint.config") {
        return Some(SkipReason::NoConfig);
    }
    if !exit.success.unwrap_or(false) && !output_exists {
        return Some(SkipReason::Failed);
    }
    None
}

fn stderr_says_not_found(stderr: &str, tool: &str) -> bool {
    stderr.contains("command not found")
        || stderr.contains(&format!("{tool}: not found"))
        || stderr.contains(&format!("{tool}: command not found"))
}

fn snippet(stderr: &str) -> String {
    if stderr.chars().count() > STDERR_SNIPPET_LEN {
        stderr.chars().take(STDERR_SNIPPET_LEN).collect()
    } else {
        stderr.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string()]
    }

    fn exit(timed_out: bool, success: Option<bool>, stderr: &str) -> ToolExit {
        ToolExit {
            timed_out,
            success,
            stderr: stderr.to_string(),
        }
    }

    #[test]
    fn preflight_requires_node_modules() {
        let dir = tempdir().unwrap();
        let err = preflight(dir.path(), PackageManager::Pnpm).unwrap_err();
        match err {
            CheckError::DepsNotInstalled { install_cmd } => {
                assert_eq!(install_cmd, "pnpm install");
            },
            other => panic!("expected DepsNotInstalled, got {other:?}"),
        }

        std::fs::create_dir(dir.path().join("node_modules")).unwrap();
        assert!(preflight(dir.path(), PackageManager::Pnpm).is_ok());
    }

    #[tokio::test]
    async fn watchdog_captures_exit_and_stderr() {
        let dir = tempdir().unwrap();
        let exit = spawn_with_watchdog(
            &sh("echo oops >&2; exit 3"),
            dir.path(),
            Duration::from_secs(10),
        )
        .await
        .unwrap();

        assert!(!exit.timed_out);
        assert_eq!(exit.success, Some(false));
        assert!(exit.stderr.contains("oops"));
    }

    #[tokio::test]
    async fn watchdog_kills_overrunning_tools() {
        let dir = tempdir().unwrap();
        let started = std::time::Instant::now();
        let exit = spawn_with_watchdog(
            &sh("sleep 30"),
            dir.path(),
            Duration::from_millis(200),
        )
        .await
        .unwrap();

        assert!(exit.timed_out);
        assert!(exit.success.is_none());
        assert!(
            started.elapsed() < Duration::from_secs(10),
            "escalation must not wait out the sleep"
        );
    }

    #[tokio::test]
    async fn missing_program_is_an_internal_error() {
        let dir = tempdir().unwrap();
        let argv = vec!["zax-definitely-not-a-binary".to_string()];
        let err = spawn_with_watchdog(&argv, dir.path(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, CheckError::Internal { .. }));
    }

    #[test]
    fn vitest_timeout_classification() {
        let err = classify_vitest(&exit(true, None, ""), Path::new("/nonexistent/out.json"))
            .unwrap_err();
        assert!(matches!(err, CheckError::VitestTimeout { .. }));
    }

    #[test]
    fn vitest_not_found_classification() {
        let err = classify_vitest(
            &exit(false, Some(false), "sh: vitest: command not found"),
            Path::new("/nonexistent/out.json"),
        )
        .unwrap_err();
        assert!(matches!(err, CheckError::VitestNotFound));
    }

    #[test]
    fn vitest_nonzero_without_output_carries_stderr() {
        let err = classify_vitest(
            &exit(false, Some(false), "something exploded"),
            Path::new("/nonexistent/out.json"),
        )
        .unwrap_err();
        match err {
            CheckError::VitestFailed { stderr } => assert!(stderr.contains("exploded")),
            other => panic!("expected VitestFailed, got {other:?}"),
        }
    }

    #[test]
    fn vitest_nonzero_with_output_is_a_failing_test_run() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("out.json");
        std::fs::write(&out, "{}").unwrap();

        let outcome = classify_vitest(&exit(false, Some(false), ""), &out).unwrap();
        assert!(!outcome.all_passed);
        assert_eq!(outcome.output_path.as_deref(), Some(out.as_path()));
    }

    #[test]
    fn vitest_clean_exit_passes() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("out.json");
        std::fs::write(&out, "{}").unwrap();

        let outcome = classify_vitest(&exit(false, Some(true), ""), &out).unwrap();
        assert!(outcome.all_passed);
    }

    #[test]
    fn eslint_skip_classification_table() {
        let cases: &[(ToolExit, bool, Option<SkipReason>)] = &[
            (exit(true, None, ""), false, Some(SkipReason::Timeout)),
            (
                exit(false, Some(false), "npx: command not found"),
                false,
                Some(SkipReason::NotFound),
            ),
            (
                exit(false, Some(false), "eslint: not found"),
                false,
                Some(SkipReason::NotFound),
            ),
            (
                exit(false, Some(false), "No ESLint configuration found"),
                false,
                Some(SkipReason::NoConfig),
            ),
            (
                exit(false, Some(false), "could not find eslint.config.js"),
                false,
                Some(SkipReason::NoConfig),
            ),
            (exit(false, Some(false), "crash"), false, Some(SkipReason::Failed)),
            // Nonzero exit with output present: lint errors are expected.
            (exit(false, Some(false), ""), true, None),
            (exit(false, Some(true), ""), true, None),
        ];
        for (tool_exit, output_exists, expected) in cases {
            assert_eq!(
                classify_eslint(tool_exit, *output_exists),
                *expected,
                "case: {tool_exit:?} output_exists={output_exists}"
            );
        }
    }

    #[test]
    fn skip_reasons_render_as_contract_strings() {
        assert_eq!(SkipReason::Timeout.as_str(), "timeout");
        assert_eq!(SkipReason::NotFound.as_str(), "not found");
        assert_eq!(SkipReason::NoConfig.as_str(), "no config");
        assert_eq!(SkipReason::Failed.as_str(), "failed");
    }
}
