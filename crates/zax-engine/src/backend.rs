//! Backend subprocess supervision and RPC client.
//!
//! The engine owns exactly one backend child. Bring-up follows the
//! handshake contract: delete any stale `rust.port`, spawn the child with
//! its output folded into `engine.log`, poll for the port file the child
//! writes after binding, then ping until healthy. The client re-reads the
//! port file on every call and never trusts a remembered port.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tracing::{info, warn};

use zax_core::cache::BACKEND_PORT_FILE;
use zax_core::error::CheckError;
use zax_core::ipc::{frame_message, parse_frame_length, BackendRequest, BackendResponse, ErrorCode};
use zax_core::manifest::{ArtifactManifest, DeltaSummary};

/// Deadline for ordinary backend RPCs.
pub const RPC_TIMEOUT: Duration = Duration::from_secs(30);
/// Deadline for version queries.
pub const VERSION_RPC_TIMEOUT: Duration = Duration::from_secs(5);
/// How long to wait for the backend to publish its port.
pub const PORT_WAIT_TIMEOUT: Duration = Duration::from_secs(10);
/// Poll interval while waiting for the port file.
const PORT_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Grace period between SIGTERM and SIGKILL at shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);
/// Ping backoff schedule during bring-up.
const PING_RETRY_MS: &[u64] = &[500, 1000, 2000];

/// A running backend child process.
#[derive(Debug)]
pub struct BackendProcess {
    child: Child,
}

impl BackendProcess {
    /// Spawns the backend with stdout/stderr appended to the engine log.
    ///
    /// The caller must have deleted any stale `rust.port` first; this
    /// function only spawns.
    ///
    /// # Errors
    ///
    /// Returns an error when the binary cannot be spawned. Fatal for the
    /// engine.
    pub fn spawn(
        cache_dir: &Path,
        workspace_root: &Path,
        log_file: &File,
    ) -> anyhow::Result<Self> {
        let binary = backend_binary();
        let child = Command::new(&binary)
            .arg(cache_dir)
            .arg(workspace_root)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log_file.try_clone()?))
            .stderr(Stdio::from(log_file.try_clone()?))
            .spawn()
            .map_err(|e| anyhow::anyhow!("failed to spawn {}: {e}", binary.display()))?;
        info!(binary = %binary.display(), pid = child.id(), "backend spawned");
        Ok(Self { child })
    }

    /// Stops the backend: SIGTERM, bounded wait, SIGKILL escalation.
    pub async fn shutdown(mut self) {
        if let Some(pid) = self.child.id() {
            #[allow(clippy::cast_possible_wrap)]
            let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
        }
        match tokio::time::timeout(SHUTDOWN_GRACE, self.child.wait()).await {
            Ok(_) => info!("backend exited"),
            Err(_) => {
                warn!("backend ignored SIGTERM, killing");
                let _ = self.child.kill().await;
            },
        }
    }
}

/// Resolves the backend binary: explicit override, sibling of the current
/// executable, then PATH.
fn backend_binary() -> PathBuf {
    if let Some(explicit) = std::env::var_os("ZAX_BACKEND_BIN") {
        return PathBuf::from(explicit);
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let sibling = dir.join("zax-backend");
            if sibling.is_file() {
                return sibling;
            }
        }
    }
    PathBuf::from("zax-backend")
}

/// Waits for the backend to publish a valid port.
///
/// # Errors
///
/// Returns an error when no valid port appears within
/// [`PORT_WAIT_TIMEOUT`].
pub async fn wait_for_port(cache_dir: &Path) -> anyhow::Result<u16> {
    let port_file = cache_dir.join(BACKEND_PORT_FILE);
    let deadline = tokio::time::Instant::now() + PORT_WAIT_TIMEOUT;

    loop {
        if let Some(port) = read_port_file(&port_file) {
            return Ok(port);
        }
        if tokio::time::Instant::now() >= deadline {
            anyhow::bail!(
                "backend did not publish a valid port within {}s",
                PORT_WAIT_TIMEOUT.as_secs()
            );
        }
        tokio::time::sleep(PORT_POLL_INTERVAL).await;
    }
}

/// Parses the port file, accepting only `1..=65535`.
fn read_port_file(path: &Path) -> Option<u16> {
    let contents = std::fs::read_to_string(path).ok()?;
    let value: u32 = contents.trim().parse().ok()?;
    if (1..=65_535).contains(&value) {
        #[allow(clippy::cast_possible_truncation)]
        Some(value as u16)
    } else {
        None
    }
}

/// Framed-JSON RPC client for the backend.
#[derive(Debug, Clone)]
pub struct BackendClient {
    cache_dir: PathBuf,
}

impl BackendClient {
    #[must_use]
    pub const fn new(cache_dir: PathBuf) -> Self {
        Self { cache_dir }
    }

    /// Liveness probe returning the backend's version.
    ///
    /// # Errors
    ///
    /// [`CheckError::RpcTimeout`] past the deadline, [`CheckError::Internal`]
    /// on transport failure.
    pub async fn ping(&self, deadline: Duration) -> Result<String, CheckError> {
        match self.call(&BackendRequest::Ping, deadline).await? {
            BackendResponse::Pong { version } => Ok(version),
            other => Err(unexpected(&other)),
        }
    }

    /// Pings with the bring-up backoff schedule until the backend answers.
    ///
    /// # Errors
    ///
    /// Returns the final ping error when every attempt failed.
    pub async fn ping_until_healthy(&self) -> Result<String, CheckError> {
        let mut last_err = CheckError::internal("backend never answered");
        for (attempt, delay_ms) in PING_RETRY_MS.iter().enumerate() {
            match self.ping(VERSION_RPC_TIMEOUT).await {
                Ok(version) => return Ok(version),
                Err(e) => {
                    warn!(attempt, error = %e, "backend ping failed, retrying");
                    last_err = e;
                },
            }
            tokio::time::sleep(Duration::from_millis(*delay_ms)).await;
        }
        self.ping(VERSION_RPC_TIMEOUT).await.map_err(|_| last_err)
    }

    /// `GetAffectedTests` RPC.
    ///
    /// # Errors
    ///
    /// Typed transport/validation failures as for [`BackendClient::ping`].
    pub async fn get_affected_tests(
        &self,
        workspace_id: &str,
        force_full: bool,
        package_scope: &str,
    ) -> Result<AffectedReply, CheckError> {
        let request = BackendRequest::GetAffectedTests {
            workspace_id: workspace_id.to_string(),
            force_full,
            package_scope: package_scope.to_string(),
        };
        match self.call(&request, RPC_TIMEOUT).await? {
            BackendResponse::AffectedTests {
                dirty_files,
                test_files,
                is_full_run,
            } => Ok(AffectedReply {
                dirty_files,
                test_files,
                is_full_run,
            }),
            other => Err(unexpected(&other)),
        }
    }

    /// `IngestManifest` RPC.
    ///
    /// # Errors
    ///
    /// Typed transport/validation failures as for [`BackendClient::ping`].
    pub async fn ingest_manifest(
        &self,
        manifest: ArtifactManifest,
        package_scope: &str,
    ) -> Result<(), CheckError> {
        let request = BackendRequest::IngestManifest {
            manifest,
            package_scope: package_scope.to_string(),
        };
        match self.call(&request, RPC_TIMEOUT).await? {
            BackendResponse::ManifestIngested => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    /// `GetDeltaSummary` RPC.
    ///
    /// # Errors
    ///
    /// Typed transport/validation failures as for [`BackendClient::ping`].
    pub async fn get_delta_summary(
        &self,
        workspace_id: &str,
        package_scope: &str,
    ) -> Result<DeltaSummary, CheckError> {
        let request = BackendRequest::GetDeltaSummary {
            workspace_id: workspace_id.to_string(),
            package_scope: package_scope.to_string(),
        };
        match self.call(&request, RPC_TIMEOUT).await? {
            BackendResponse::Delta { summary } => Ok(summary),
            other => Err(unexpected(&other)),
        }
    }

    /// One framed request/response exchange against the currently published
    /// port.
    async fn call(
        &self,
        request: &BackendRequest,
        deadline: Duration,
    ) -> Result<BackendResponse, CheckError> {
        let exchange = async {
            let port = read_port_file(&self.cache_dir.join(BACKEND_PORT_FILE))
                .ok_or_else(|| CheckError::internal("backend port file is missing or invalid"))?;
            let mut stream = TcpStream::connect(("127.0.0.1", port))
                .await
                .map_err(|e| CheckError::internal(format!("backend unreachable: {e}")))?;

            let payload = serde_json::to_vec(request)
                .map_err(|e| CheckError::internal(format!("request encode failed: {e}")))?;
            let framed = frame_message(&payload)
                .map_err(|e| CheckError::internal(format!("request framing failed: {e}")))?;
            stream
                .write_all(&framed)
                .await
                .map_err(|e| CheckError::internal(format!("request write failed: {e}")))?;

            let mut prefix = [0u8; 4];
            stream
                .read_exact(&mut prefix)
                .await
                .map_err(|e| CheckError::internal(format!("response read failed: {e}")))?;
            let len = parse_frame_length(&prefix)
                .map_err(|e| CheckError::internal(e.to_string()))?;
            let mut payload = vec![0u8; len];
            stream
                .read_exact(&mut payload)
                .await
                .map_err(|e| CheckError::internal(format!("response read failed: {e}")))?;

            serde_json::from_slice::<BackendResponse>(&payload)
                .map_err(|e| CheckError::internal(format!("response decode failed: {e}")))
        };

        let response = tokio::time::timeout(deadline, exchange)
            .await
            .map_err(|_| CheckError::RpcTimeout)??;

        match response {
            BackendResponse::Error { code, message } => Err(match code {
                ErrorCode::InvalidArgument => CheckError::validation(message),
                ErrorCode::NotFound | ErrorCode::Internal => CheckError::internal(message),
            }),
            other => Ok(other),
        }
    }
}

/// `GetAffectedTests` reply.
#[derive(Debug, Clone)]
pub struct AffectedReply {
    pub dirty_files: Vec<String>,
    pub test_files: Vec<String>,
    pub is_full_run: bool,
}

fn unexpected(response: &BackendResponse) -> CheckError {
    CheckError::internal(format!("unexpected backend response: {response:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn port_file_parsing_accepts_only_valid_ports() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(BACKEND_PORT_FILE);

        std::fs::write(&path, "43210\n").unwrap();
        assert_eq!(read_port_file(&path), Some(43_210));

        std::fs::write(&path, "0\n").unwrap();
        assert_eq!(read_port_file(&path), None);

        std::fs::write(&path, "65536\n").unwrap();
        assert_eq!(read_port_file(&path), None);

        std::fs::write(&path, "not a port").unwrap();
        assert_eq!(read_port_file(&path), None);

        assert_eq!(read_port_file(&dir.path().join("absent")), None);
    }

    #[tokio::test]
    async fn missing_port_file_fails_fast_per_call() {
        let dir = tempdir().unwrap();
        let client = BackendClient::new(dir.path().to_path_buf());
        let err = client.ping(Duration::from_millis(500)).await.unwrap_err();
        assert!(matches!(err, CheckError::Internal { .. }));
    }

    #[tokio::test]
    async fn unreachable_backend_is_an_internal_error_not_a_hang() {
        let dir = tempdir().unwrap();
        // A port nothing listens on: bind-then-drop guarantees it was free.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        std::fs::write(dir.path().join(BACKEND_PORT_FILE), format!("{port}\n")).unwrap();

        let client = BackendClient::new(dir.path().to_path_buf());
        let err = client.ping(Duration::from_secs(2)).await.unwrap_err();
        assert!(matches!(
            err,
            CheckError::Internal { .. } | CheckError::RpcTimeout
        ));
    }
}
