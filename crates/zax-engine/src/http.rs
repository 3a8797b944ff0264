//! HTTP/JSON front served over the engine's Unix socket.
//!
//! | Method | Path       | Behavior                                         |
//! |--------|------------|--------------------------------------------------|
//! | GET    | `/health`  | `{"status":"ok"}`                                |
//! | GET    | `/version` | Backend version via Ping (502/504 on failure)    |
//! | POST   | `/check`   | Runs the pipeline; 400/409/429 before any work   |
//! | any    | other      | 404 `{"error":"not found"}`                      |
//!
//! At most one check executes at a time: the in-flight flag is taken before
//! any filesystem side effect and cleared on every exit path. A second
//! `/check` inside the one-second window is answered 429 with `Retry-After`.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use zax_core::error::CheckError;
use zax_core::ipc::is_valid_workspace_id;
use zax_core::workspace::validate_package_scope;

use crate::backend::{BackendClient, VERSION_RPC_TIMEOUT};
use crate::check::run_check;

/// Minimum spacing between `/check` admissions.
pub const CHECK_RATE_LIMIT: Duration = Duration::from_secs(1);

/// Shared engine state behind the router.
#[derive(Debug)]
pub struct EngineState {
    pub cache_dir: PathBuf,
    pub client: BackendClient,
    check_in_flight: AtomicBool,
    last_check_started: Mutex<Option<Instant>>,
}

impl EngineState {
    #[must_use]
    pub fn new(cache_dir: PathBuf, client: BackendClient) -> Self {
        Self {
            cache_dir,
            client,
            check_in_flight: AtomicBool::new(false),
            last_check_started: Mutex::new(None),
        }
    }

    /// Admits a check or rejects it with 409/429, atomically. The returned
    /// guard clears the in-flight flag on every exit path.
    fn admit_check(self: &Arc<Self>) -> Result<InFlightGuard, CheckError> {
        if self
            .check_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(CheckError::ConcurrentCheck);
        }
        let guard = InFlightGuard {
            state: Arc::clone(self),
        };

        let mut last = self
            .last_check_started
            .lock()
            .map_err(|_| CheckError::internal("rate limiter poisoned"))?;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < CHECK_RATE_LIMIT {
                let remaining = CHECK_RATE_LIMIT - elapsed;
                return Err(CheckError::RateLimited {
                    retry_after_secs: remaining.as_secs().max(1),
                });
            }
        }
        *last = Some(Instant::now());
        drop(last);
        Ok(guard)
    }
}

/// Clears the in-flight flag when the check ends, however it ends.
#[derive(Debug)]
struct InFlightGuard {
    state: Arc<EngineState>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.state.check_in_flight.store(false, Ordering::SeqCst);
    }
}

/// `/check` request body.
#[derive(Debug, Deserialize)]
struct CheckBody {
    workspace_id: String,
    workspace_root: String,
    #[serde(default)]
    package_scope: Option<String>,
    #[serde(default)]
    deopt: bool,
}

/// Builds the engine router.
pub fn router(state: Arc<EngineState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/version", get(version))
        .route("/check", post(check))
        .fallback(not_found)
        .with_state(state)
}

async fn health() -> Response {
    Json(json!({ "status": "ok" })).into_response()
}

async fn version(State(state): State<Arc<EngineState>>) -> Response {
    match state.client.ping(VERSION_RPC_TIMEOUT).await {
        Ok(version) => Json(json!({ "version": version })).into_response(),
        Err(CheckError::RpcTimeout) => {
            error_body(StatusCode::GATEWAY_TIMEOUT, "backend timed out")
        },
        Err(e) => {
            warn!(error = %e, "version query failed");
            error_body(StatusCode::BAD_GATEWAY, "backend unavailable")
        },
    }
}

async fn check(State(state): State<Arc<EngineState>>, body: Bytes) -> Response {
    // Admission first: the 409 must win before any parsing or disk work.
    let _guard = match state.admit_check() {
        Ok(guard) => guard,
        Err(e) => return check_error(&e),
    };

    let body: CheckBody = match serde_json::from_slice(&body) {
        Ok(body) => body,
        Err(e) => {
            return check_error(&CheckError::validation(format!("invalid request body: {e}")))
        },
    };
    if let Err(e) = validate_check_body(&body) {
        return check_error(&e);
    }

    let package_scope = body.package_scope.unwrap_or_default();
    match run_check(
        &state.cache_dir,
        Path::new(&body.workspace_root),
        &state.client,
        &body.workspace_id,
        &package_scope,
        body.deopt,
    )
    .await
    {
        Ok(summary) => Json(summary).into_response(),
        Err(e) => {
            warn!(kind = e.kind(), error = %e, "check failed");
            check_error(&e)
        },
    }
}

async fn not_found() -> Response {
    error_body(StatusCode::NOT_FOUND, "not found")
}

fn validate_check_body(body: &CheckBody) -> Result<(), CheckError> {
    if !is_valid_workspace_id(&body.workspace_id) {
        return Err(CheckError::validation(
            "workspace_id must be 16 lowercase hex characters",
        ));
    }
    if body.workspace_root.is_empty() || !Path::new(&body.workspace_root).is_dir() {
        return Err(CheckError::validation(
            "workspace_root must be an existing directory",
        ));
    }
    if let Some(scope) = &body.package_scope {
        validate_package_scope(scope)
            .map_err(|e| CheckError::validation(format!("package_scope: {e}")))?;
    }
    Ok(())
}

/// Maps a pipeline error onto its status code and JSON body.
fn check_error(error: &CheckError) -> Response {
    let status =
        StatusCode::from_u16(error.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = error_body(status, &error.to_string());
    if let CheckError::RateLimited { retry_after_secs } = error {
        if let Ok(value) = header::HeaderValue::from_str(&retry_after_secs.to_string()) {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
    }
    response
}

fn error_body(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::os::unix::net::UnixStream;
    use tempfile::tempdir;

    fn test_state(cache_dir: &Path) -> Arc<EngineState> {
        Arc::new(EngineState::new(
            cache_dir.to_path_buf(),
            BackendClient::new(cache_dir.to_path_buf()),
        ))
    }

    /// Serves the router on a Unix socket and issues one raw HTTP/1.0
    /// request against it.
    async fn serve_once(state: Arc<EngineState>, request: &str) -> (u16, String) {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("zax.sock");
        let listener = tokio::net::UnixListener::bind(&socket_path).unwrap();
        let app = router(state);
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let request = request.to_string();
        let raw = tokio::task::spawn_blocking(move || {
            let mut stream = UnixStream::connect(&socket_path).unwrap();
            stream.write_all(request.as_bytes()).unwrap();
            let mut raw = String::new();
            stream.read_to_string(&mut raw).unwrap();
            raw
        })
        .await
        .unwrap();
        server.abort();

        let status: u16 = raw
            .split_whitespace()
            .nth(1)
            .and_then(|s| s.parse().ok())
            .unwrap();
        let body = raw
            .split_once("\r\n\r\n")
            .map(|(_, b)| b.to_string())
            .unwrap_or_default();
        (status, body)
    }

    fn post_check(body: &str) -> String {
        format!(
            "POST /check HTTP/1.0\r\nHost: zax\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        )
    }

    #[tokio::test]
    async fn health_answers_ok() {
        let dir = tempdir().unwrap();
        let (status, body) = serve_once(
            test_state(dir.path()),
            "GET /health HTTP/1.0\r\nHost: zax\r\n\r\n",
        )
        .await;
        assert_eq!(status, 200);
        assert!(body.contains(r#""status":"ok""#));
    }

    #[tokio::test]
    async fn unknown_paths_get_a_json_404() {
        let dir = tempdir().unwrap();
        let (status, body) = serve_once(
            test_state(dir.path()),
            "GET /nope HTTP/1.0\r\nHost: zax\r\n\r\n",
        )
        .await;
        assert_eq!(status, 404);
        assert!(body.contains(r#""error":"not found""#));
    }

    #[tokio::test]
    async fn version_without_backend_is_a_502() {
        let dir = tempdir().unwrap();
        let (status, _) = serve_once(
            test_state(dir.path()),
            "GET /version HTTP/1.0\r\nHost: zax\r\n\r\n",
        )
        .await;
        assert_eq!(status, 502);
    }

    #[tokio::test]
    async fn check_rejects_malformed_bodies() {
        let dir = tempdir().unwrap();
        let (status, body) = serve_once(test_state(dir.path()), &post_check("{not json")).await;
        assert_eq!(status, 400);
        assert!(body.contains("invalid request body"));
    }

    #[tokio::test]
    async fn check_rejects_bad_workspace_id_and_missing_root() {
        let dir = tempdir().unwrap();

        let bad_id = format!(
            r#"{{"workspace_id":"NOPE","workspace_root":"{}"}}"#,
            dir.path().display()
        );
        let (status, body) = serve_once(test_state(dir.path()), &post_check(&bad_id)).await;
        assert_eq!(status, 400);
        assert!(body.contains("workspace_id"));

        let bad_root =
            r#"{"workspace_id":"0123456789abcdef","workspace_root":"/nonexistent/zax-root"}"#;
        let (status, body) = serve_once(test_state(dir.path()), &post_check(bad_root)).await;
        assert_eq!(status, 400);
        assert!(body.contains("workspace_root"));
    }

    #[tokio::test]
    async fn concurrent_admission_yields_409_then_429_inside_the_window() {
        let dir = tempdir().unwrap();
        let state = test_state(dir.path());

        let first = state.admit_check().unwrap();
        let second = state.admit_check().unwrap_err();
        assert!(matches!(second, CheckError::ConcurrentCheck));
        drop(first);

        // The flag is clear but the window has not elapsed.
        let third = state.admit_check().unwrap_err();
        assert!(matches!(third, CheckError::RateLimited { .. }));

        // Rejection must also clear the flag, or nothing ever runs again.
        std::thread::sleep(CHECK_RATE_LIMIT + Duration::from_millis(50));
        assert!(state.admit_check().is_ok());
    }

    #[tokio::test]
    async fn rate_limited_response_carries_retry_after() {
        let response = check_error(&CheckError::RateLimited {
            retry_after_secs: 1,
        });
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get(header::RETRY_AFTER).unwrap(),
            &header::HeaderValue::from_static("1")
        );
    }
}
