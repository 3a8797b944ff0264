//! The `check` subcommand.
//!
//! Flow: resolve the workspace → ensure its cache directory → make sure an
//! engine is serving the socket (bringing one up under the cross-process
//! lock when needed, recovering stale daemons) → POST `/check` → render the
//! summary → pick the exit code.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tracing::{debug, info, warn};

use zax_core::cache::{self, ENGINE_PID_FILE, ENGINE_SOCKET_FILE};
use zax_core::lock::{self, pid_alive};
use zax_core::manifest::CheckSummary;
use zax_core::workspace::{self, validate_package_scope};

use crate::client::EngineClient;
use crate::output::{exit_code, render_summary};

/// How long to wait for a freshly spawned engine's socket.
const SOCKET_WAIT_TIMEOUT: Duration = Duration::from_secs(10);
const SOCKET_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Serialize)]
struct CheckRequestBody<'a> {
    workspace_id: &'a str,
    workspace_root: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    package_scope: Option<&'a str>,
    deopt: bool,
}

/// Runs one check and returns the process exit code.
///
/// # Errors
///
/// Any setup or transport failure; the caller prints it with an `Error: `
/// prefix and exits 1.
pub fn run(deopt: bool, package: Option<&str>) -> Result<i32> {
    let started = Instant::now();

    let cwd = std::env::current_dir().context("cannot determine current directory")?;
    let info = workspace::resolve(&cwd).context("failed to resolve workspace")?;
    let package_scope = match package {
        Some(scope) => {
            validate_package_scope(scope).context("invalid --package value")?;
            Some(scope.to_string())
        },
        None => info.package_scope.clone(),
    };

    let workspace_id = cache::workspace_id(&info.root).context("failed to derive workspace id")?;
    let cache_dir = cache::cache_dir(&workspace_id)?;
    cache::ensure_cache_dir(&cache_dir)?;
    debug!(
        workspace_id = %workspace_id,
        root = %info.root.display(),
        scope = ?package_scope,
        "workspace resolved"
    );

    let client = EngineClient::new(cache_dir.join(ENGINE_SOCKET_FILE));
    ensure_engine(&cache_dir, &info.root, &client)?;

    let workspace_root = info.root.to_string_lossy();
    let body = CheckRequestBody {
        workspace_id: &workspace_id,
        workspace_root: &workspace_root,
        package_scope: package_scope.as_deref(),
        deopt,
    };
    let response = client
        .post_json("/check", &body)
        .context("check request failed")?;

    if response.status != 200 {
        bail!("{}", response.error_message());
    }
    let summary: CheckSummary =
        serde_json::from_slice(&response.body).context("engine returned an invalid summary")?;

    print!(
        "{}",
        render_summary(&summary, deopt, started.elapsed().as_secs())
    );
    Ok(exit_code(&summary))
}

/// Makes sure an engine is serving the socket, spawning one under the
/// bring-up lock when necessary.
fn ensure_engine(cache_dir: &Path, workspace_root: &Path, client: &EngineClient) -> Result<()> {
    if client.is_socket_live() {
        return Ok(());
    }

    let guard = lock::acquire(cache_dir).context("failed to acquire engine lock")?;

    // Someone else may have finished bring-up while we waited on the lock.
    if client.is_socket_live() {
        guard.release();
        return Ok(());
    }

    recover_stale_daemon(cache_dir, client);

    spawn_engine(cache_dir, workspace_root)?;
    let result = wait_for_socket(client);
    guard.release();
    result
}

/// Removes leftovers of a dead engine: an unconnectable socket file and a
/// pid file whose process is gone.
fn recover_stale_daemon(cache_dir: &Path, client: &EngineClient) {
    let socket_path = client.socket_path();
    if socket_path.exists() {
        info!(socket = %socket_path.display(), "removing stale engine socket");
        let _ = std::fs::remove_file(socket_path);
    }

    let pid_path = cache_dir.join(ENGINE_PID_FILE);
    if let Ok(contents) = std::fs::read_to_string(&pid_path) {
        match contents.trim().parse::<i32>() {
            Ok(pid) if pid_alive(pid) => {
                // Alive but not serving: likely wedged mid-shutdown. A new
                // engine will rebind the socket; the old one exits on its
                // own signal handling.
                warn!(pid, "engine pid is alive but its socket is dead");
            },
            _ => {
                info!("removing stale engine.pid");
                let _ = std::fs::remove_file(&pid_path);
            },
        }
    }
}

fn spawn_engine(cache_dir: &Path, workspace_root: &Path) -> Result<()> {
    let binary = engine_binary();
    info!(binary = %binary.display(), "starting engine");
    Command::new(&binary)
        .arg("--cache-dir")
        .arg(cache_dir)
        .arg("--workspace-root")
        .arg(workspace_root)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .with_context(|| format!("failed to start {}", binary.display()))?;
    Ok(())
}

/// Resolves the engine binary: explicit override, sibling of the current
/// executable, then PATH.
fn engine_binary() -> PathBuf {
    if let Some(explicit) = std::env::var_os("ZAX_ENGINE_BIN") {
        return PathBuf::from(explicit);
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let sibling = dir.join("zax-engine");
            if sibling.is_file() {
                return sibling;
            }
        }
    }
    PathBuf::from("zax-engine")
}

fn wait_for_socket(client: &EngineClient) -> Result<()> {
    let deadline = Instant::now() + SOCKET_WAIT_TIMEOUT;
    loop {
        if client.is_socket_live() {
            return Ok(());
        }
        if Instant::now() >= deadline {
            bail!(
                "engine did not open its socket within {}s; see engine.log in the cache directory",
                SOCKET_WAIT_TIMEOUT.as_secs()
            );
        }
        std::thread::sleep(SOCKET_POLL_INTERVAL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_omits_absent_scope() {
        let body = CheckRequestBody {
            workspace_id: "0123456789abcdef",
            workspace_root: "/ws",
            package_scope: None,
            deopt: false,
        };
        let json = serde_json::to_string(&body).unwrap();
        assert!(!json.contains("package_scope"));
        assert!(json.contains(r#""deopt":false"#));

        let body = CheckRequestBody {
            workspace_id: "0123456789abcdef",
            workspace_root: "/ws",
            package_scope: Some("packages/auth"),
            deopt: true,
        };
        let json = serde_json::to_string(&body).unwrap();
        assert!(json.contains(r#""package_scope":"packages/auth""#));
        assert!(json.contains(r#""deopt":true"#));
    }

    #[test]
    fn engine_binary_honors_the_override() {
        // Serialized via the env var itself; no other test touches it.
        std::env::set_var("ZAX_ENGINE_BIN", "/custom/zax-engine");
        assert_eq!(engine_binary(), PathBuf::from("/custom/zax-engine"));
        std::env::remove_var("ZAX_ENGINE_BIN");
    }
}
