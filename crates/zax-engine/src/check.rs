//! The check pipeline.
//!
//! One invocation, in order: preflight → affected-test selection → tool
//! spawns (every spawn completes or is classified before ingestion) →
//! path normalization → manifest ingestion → delta summary. The caller
//! guarantees only one pipeline runs at a time.

use std::path::Path;

use tracing::info;
use uuid::Uuid;

use zax_core::cache::run_artifacts_dir;
use zax_core::discovery::discover_test_files;
use zax_core::error::CheckError;
use zax_core::manifest::{ArtifactKind, ArtifactManifest, ArtifactRef, CheckSummary};
use zax_core::pm::PackageManager;

use crate::backend::BackendClient;
use crate::normalize::{normalize_eslint_output, normalize_vitest_output};
use crate::runner::{self, LintOutcome, TestRunOutcome};

/// Runs one full check and returns the summary `/check` responds with.
///
/// # Errors
///
/// Any [`CheckError`] from preflight, the tool runner, or a backend RPC.
pub async fn run_check(
    cache_dir: &Path,
    workspace_root: &Path,
    client: &BackendClient,
    workspace_id: &str,
    package_scope: &str,
    deopt: bool,
) -> Result<CheckSummary, CheckError> {
    let manager = PackageManager::detect(workspace_root);
    runner::preflight(workspace_root, manager)?;

    let run_id = Uuid::new_v4().to_string();
    let artifacts_dir = run_artifacts_dir(cache_dir, &run_id);
    std::fs::create_dir_all(&artifacts_dir)
        .map_err(|e| CheckError::internal(format!("failed to create artifact dir: {e}")))?;
    info!(run_id = %run_id, manager = %manager, deopt, "starting check");

    let affected = client
        .get_affected_tests(workspace_id, deopt, package_scope)
        .await?;

    // Test runner.
    let vitest_output = artifacts_dir.join("vitest.json");
    let mut vitest_skipped = false;
    let test_outcome: Option<TestRunOutcome> = if affected.is_full_run {
        Some(runner::run_vitest(workspace_root, manager, &vitest_output, None).await?)
    } else if affected.test_files.is_empty() {
        info!("no tests affected, skipping vitest");
        vitest_skipped = true;
        None
    } else {
        Some(
            runner::run_vitest(
                workspace_root,
                manager,
                &vitest_output,
                Some(&affected.test_files),
            )
            .await?,
        )
    };
    if let Some(outcome) = &test_outcome {
        if let Some(path) = &outcome.output_path {
            normalize_vitest_output(path, workspace_root)?;
        }
    }

    // Linter. Skips are outcomes, never errors.
    let eslint_output = artifacts_dir.join("eslint.json");
    let target = if package_scope.is_empty() {
        "."
    } else {
        package_scope
    };
    let lint_outcome = runner::run_eslint(workspace_root, manager, &eslint_output, target).await;
    if let LintOutcome::Completed { output_path } = &lint_outcome {
        normalize_eslint_output(output_path, workspace_root)?;
    }

    // Manifest: one entry per tool that produced output.
    let mut artifacts = Vec::new();
    if let Some(TestRunOutcome {
        output_path: Some(path),
        ..
    }) = &test_outcome
    {
        artifacts.push(artifact_ref(&run_id, "vitest", ArtifactKind::TestFailure, path)?);
    }
    if let LintOutcome::Completed { output_path } = &lint_outcome {
        artifacts.push(artifact_ref(&run_id, "eslint", ArtifactKind::Finding, output_path)?);
    }

    let manifest = ArtifactManifest {
        workspace_id: workspace_id.to_string(),
        run_id: run_id.clone(),
        artifacts,
    };
    client.ingest_manifest(manifest, package_scope).await?;
    let delta = client.get_delta_summary(workspace_id, package_scope).await?;

    // Counting detail for the summary line: how many discovered tests the
    // selection left out.
    let total_tests = discover_test_files(workspace_root, package_scope).len() as u64;
    let affected_count = if affected.is_full_run {
        total_tests
    } else {
        affected.test_files.len() as u64
    };

    let mut summary = CheckSummary::from_delta(delta);
    summary.dirty_count = affected.dirty_files.len() as u64;
    summary.affected_count = affected_count;
    summary.skipped_count = total_tests.saturating_sub(affected_count);
    summary.vitest_skipped = vitest_skipped;
    summary.all_tests_passed = test_outcome.as_ref().is_none_or(|o| o.all_passed);
    if let LintOutcome::Skipped { reason } = &lint_outcome {
        summary.eslint_skipped = true;
        summary.eslint_skip_reason = Some(reason.as_str().to_string());
    }

    info!(
        run_id = %run_id,
        new_failures = summary.new_test_failures,
        fixed_failures = summary.fixed_test_failures,
        new_findings = summary.new_findings,
        fixed_findings = summary.fixed_findings,
        "check complete"
    );
    Ok(summary)
}

fn artifact_ref(
    run_id: &str,
    tool: &str,
    kind: ArtifactKind,
    path: &Path,
) -> Result<ArtifactRef, CheckError> {
    let contents = std::fs::read(path)
        .map_err(|e| CheckError::internal(format!("failed to hash artifact: {e}")))?;
    Ok(ArtifactRef {
        artifact_id: format!("{run_id}-{tool}"),
        kind,
        path: path.to_string_lossy().into_owned(),
        hash: blake3::hash(&contents).to_hex().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_ref_hashes_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vitest.json");
        std::fs::write(&path, r#"{"testResults":[]}"#).unwrap();

        let artifact =
            artifact_ref("run-1", "vitest", ArtifactKind::TestFailure, &path).unwrap();
        assert_eq!(artifact.artifact_id, "run-1-vitest");
        assert_eq!(artifact.hash.len(), 64);
        assert_eq!(
            artifact.hash,
            blake3::hash(br#"{"testResults":[]}"#).to_hex().to_string()
        );
    }

    #[test]
    fn artifact_ref_fails_for_missing_file() {
        let err = artifact_ref(
            "run-1",
            "eslint",
            ArtifactKind::Finding,
            Path::new("/nonexistent/eslint.json"),
        )
        .unwrap_err();
        assert!(matches!(err, CheckError::Internal { .. }));
    }
}
