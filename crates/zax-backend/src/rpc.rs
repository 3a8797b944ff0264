//! RPC dispatch.
//!
//! Every request is validated, executed against the store (one transaction
//! per RPC), and answered with a typed response. Artifact files named by a
//! manifest must live inside `<cache>/artifacts/<run_id>/`; anything else
//! is rejected before a single byte is read.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{info, warn};

use zax_core::ipc::{is_valid_workspace_id, BackendRequest, BackendResponse, ErrorCode};
use zax_core::manifest::{ArtifactKind, ArtifactManifest, ArtifactRef};
use zax_core::stable_id;
use zax_core::workspace::validate_package_scope;

use crate::affected::AffectedSelector;
use crate::parsers::{eslint, vitest};
use crate::store::{FindingRow, Store, TestFailureRow};

/// Maximum artifact file size (100 MB).
const MAX_ARTIFACT_SIZE: u64 = 100 * 1024 * 1024;

/// Shared state for RPC handlers.
pub struct RpcState {
    /// Canonical cache directory (artifact containment anchor).
    pub cache_dir: PathBuf,
    pub store: Mutex<Store>,
    pub selector: AffectedSelector,
}

/// Handles one request end to end. Never panics; every failure is a typed
/// error response.
pub fn dispatch(state: &RpcState, request: BackendRequest) -> BackendResponse {
    match request {
        BackendRequest::Ping => BackendResponse::Pong {
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
        BackendRequest::IngestManifest {
            manifest,
            package_scope,
        } => ingest_manifest(state, &manifest, &package_scope),
        BackendRequest::GetDeltaSummary {
            workspace_id,
            package_scope,
        } => get_delta_summary(state, &workspace_id, &package_scope),
        BackendRequest::GetAffectedTests {
            workspace_id,
            force_full,
            package_scope,
        } => get_affected_tests(state, &workspace_id, force_full, &package_scope),
    }
}

fn ingest_manifest(
    state: &RpcState,
    manifest: &ArtifactManifest,
    package_scope: &str,
) -> BackendResponse {
    if let Some(resp) = reject_invalid(&manifest.workspace_id, package_scope) {
        return resp;
    }
    if manifest.run_id.is_empty() {
        return invalid("run_id is required");
    }

    let mut failures: Vec<TestFailureRow> = Vec::new();
    let mut findings: Vec<FindingRow> = Vec::new();
    for artifact in &manifest.artifacts {
        let path = match contained_artifact_path(&state.cache_dir, &manifest.run_id, artifact) {
            Ok(path) => path,
            Err(resp) => return resp,
        };
        let content = match read_artifact(&path) {
            Ok(content) => content,
            Err(resp) => return resp,
        };
        match artifact.kind {
            ArtifactKind::TestFailure => match vitest::parse(&content, "") {
                Ok(parsed) => failures.extend(parsed.into_iter().map(|f| TestFailureRow {
                    stable_id: stable_id::test_failure(&f.file, &f.test_id),
                    test_id: f.test_id,
                    file: f.file,
                    message: f.message,
                })),
                Err(e) => return invalid(format!("vitest artifact: {e}")),
            },
            ArtifactKind::Finding => match eslint::parse(&content, "") {
                Ok(parsed) => findings.extend(parsed.into_iter().map(|f| FindingRow {
                    stable_id: stable_id::finding(
                        "eslint",
                        &f.rule,
                        &f.file,
                        f.start_line,
                        f.start_column,
                    ),
                    tool: "eslint".to_string(),
                    rule: f.rule,
                    file: f.file,
                    start_line: f.start_line,
                    start_column: f.start_column,
                    end_line: f.end_line,
                    end_column: f.end_column,
                    message: f.message,
                })),
                Err(e) => return invalid(format!("eslint artifact: {e}")),
            },
        }
    }

    let now_ms = chrono::Utc::now().timestamp_millis();
    let mut store = match state.store.lock() {
        Ok(store) => store,
        Err(_) => return internal("store lock poisoned"),
    };
    if let Err(e) = store.ingest_run(
        &manifest.workspace_id,
        &manifest.run_id,
        package_scope,
        now_ms,
        &failures,
        &findings,
    ) {
        return internal(format!("ingest failed: {e}"));
    }

    info!(
        run_id = %manifest.run_id,
        failures = failures.len(),
        findings = findings.len(),
        "ingested run"
    );
    BackendResponse::ManifestIngested
}

fn get_delta_summary(state: &RpcState, workspace_id: &str, package_scope: &str) -> BackendResponse {
    if let Some(resp) = reject_invalid(workspace_id, package_scope) {
        return resp;
    }
    let store = match state.store.lock() {
        Ok(store) => store,
        Err(_) => return internal("store lock poisoned"),
    };
    match store.delta_summary(workspace_id, package_scope) {
        Ok(summary) => BackendResponse::Delta { summary },
        Err(e) => internal(format!("delta query failed: {e}")),
    }
}

fn get_affected_tests(
    state: &RpcState,
    workspace_id: &str,
    force_full: bool,
    package_scope: &str,
) -> BackendResponse {
    if let Some(resp) = reject_invalid(workspace_id, package_scope) {
        return resp;
    }

    let result = state.selector.select(force_full, package_scope);

    // Audit trail; selection already happened, so failure here only warns.
    if !result.dirty_files.is_empty() {
        if let Ok(mut store) = state.store.lock() {
            let now_ms = chrono::Utc::now().timestamp_millis();
            if let Err(e) = store.record_dirty_files(workspace_id, &result.dirty_files, now_ms) {
                warn!(error = %e, "failed to record dirty files");
            }
        }
    }

    BackendResponse::AffectedTests {
        dirty_files: result.dirty_files,
        test_files: result.test_files,
        is_full_run: result.is_full_run,
    }
}

/// Shared workspace-id + scope validation; `Some` is the rejection.
fn reject_invalid(workspace_id: &str, package_scope: &str) -> Option<BackendResponse> {
    if !is_valid_workspace_id(workspace_id) {
        return Some(invalid("workspace_id must be 16 lowercase hex characters"));
    }
    if let Err(e) = validate_package_scope(package_scope) {
        return Some(invalid(format!("package_scope: {e}")));
    }
    None
}

/// Canonicalizes an artifact path and proves it lives under
/// `<cache>/artifacts/<run_id>/`.
fn contained_artifact_path(
    cache_dir: &Path,
    run_id: &str,
    artifact: &ArtifactRef,
) -> Result<PathBuf, BackendResponse> {
    let canonical = Path::new(&artifact.path)
        .canonicalize()
        .map_err(|_| not_found(format!("artifact file not found: {}", artifact.path)))?;
    let allowed = cache_dir.join(zax_core::cache::ARTIFACTS_DIR).join(run_id);
    if !canonical.starts_with(&allowed) {
        return Err(not_found("artifact path outside the run's artifact directory"));
    }
    Ok(canonical)
}

fn read_artifact(path: &Path) -> Result<String, BackendResponse> {
    let metadata =
        std::fs::metadata(path).map_err(|_| not_found("artifact file not found"))?;
    if metadata.len() > MAX_ARTIFACT_SIZE {
        return Err(invalid(format!(
            "artifact exceeds {MAX_ARTIFACT_SIZE} byte limit: {} bytes",
            metadata.len()
        )));
    }
    std::fs::read_to_string(path).map_err(|e| internal(format!("failed to read artifact: {e}")))
}

fn invalid(message: impl Into<String>) -> BackendResponse {
    BackendResponse::Error {
        code: ErrorCode::InvalidArgument,
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> BackendResponse {
    BackendResponse::Error {
        code: ErrorCode::NotFound,
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> BackendResponse {
    BackendResponse::Error {
        code: ErrorCode::Internal,
        message: message.into(),
    }
}
