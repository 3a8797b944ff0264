//! CLI stdout rendering and the exit-code contract.
//!
//! The format is part of the tool's contract - scripts grep these lines.
//! Field order and punctuation are fixed; conditional lines appear exactly
//! when their condition holds.

use zax_core::manifest::CheckSummary;

/// Renders the success-path stdout block.
#[must_use]
pub fn render_summary(summary: &CheckSummary, deopt: bool, elapsed_secs: u64) -> String {
    let mut out = String::new();

    if !deopt {
        out.push_str(&format!(
            "Δ {} files changed → {} tests affected\n",
            summary.dirty_count, summary.affected_count
        ));
    }
    if summary.eslint_skipped {
        let reason = summary.eslint_skip_reason.as_deref().unwrap_or("unknown");
        out.push_str(&format!("eslint: skipped ({reason})\n"));
    }
    if summary.vitest_skipped {
        out.push_str("No tests affected, skipping vitest\n");
    }

    out.push_str(&format!(
        "{} new failures, {} fixed | {} new findings, {} fixed\n",
        summary.new_test_failures,
        summary.fixed_test_failures,
        summary.new_findings,
        summary.fixed_findings
    ));

    let verdict = if summary.all_tests_passed { "all" } else { "some" };
    out.push_str(&format!("{verdict} tests passed in {elapsed_secs}s"));
    if summary.skipped_count > 0 {
        out.push_str(&format!(" (skipped {} unaffected)", summary.skipped_count));
    }
    out.push('\n');

    out
}

/// Exit code: 0 iff no new failures and no new findings.
#[must_use]
pub const fn exit_code(summary: &CheckSummary) -> i32 {
    if summary.is_clean() {
        0
    } else {
        1
    }
}
