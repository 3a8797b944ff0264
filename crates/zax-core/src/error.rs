//! Error taxonomy for the check pipeline.
//!
//! Every failure a check can surface is one of these kinds. The engine maps
//! them onto HTTP status codes; the CLI prints them with an `Error: ` prefix
//! and exits 1. Linter skips are deliberately *not* represented here - a
//! skipped eslint run is a reported outcome, not an error.

use thiserror::Error;

/// A failure surfaced by the check pipeline or one of its dependencies.
#[derive(Debug, Error)]
pub enum CheckError {
    /// Another check is already running in this daemon.
    #[error("check already in progress")]
    ConcurrentCheck,

    /// `node_modules` is missing from the workspace.
    #[error("dependencies not installed - run `{install_cmd}` first")]
    DepsNotInstalled {
        /// Install command for the detected package manager.
        install_cmd: String,
    },

    /// The test runner binary could not be resolved.
    #[error("vitest could not be found - is it installed in this workspace?")]
    VitestNotFound,

    /// The test runner was killed by the watchdog.
    #[error("vitest timed out after {timeout_secs}s")]
    VitestTimeout {
        /// Watchdog budget that was exceeded.
        timeout_secs: u64,
    },

    /// The test runner exited nonzero without producing usable output.
    #[error("vitest failed without producing output: {stderr}")]
    VitestFailed {
        /// Captured stderr, truncated.
        stderr: String,
    },

    /// Tool output did not match the expected schema.
    #[error("failed to parse tool output: {message}")]
    Parse {
        /// What went wrong.
        message: String,
    },

    /// A backend RPC exceeded its deadline.
    #[error("backend RPC timed out")]
    RpcTimeout,

    /// `/check` was called again inside the rate-limit window.
    #[error("rate limited - retry after {retry_after_secs}s")]
    RateLimited {
        /// Seconds until the next check is admitted.
        retry_after_secs: u64,
    },

    /// Request validation failed (bad workspace id, missing root, bad body).
    #[error("{message}")]
    Validation {
        /// Human-readable validation failure.
        message: String,
    },

    /// Unclassified internal failure.
    #[error("{message}")]
    Internal {
        /// Human-readable failure description.
        message: String,
    },
}

impl CheckError {
    /// HTTP status code this error surfaces as on the engine's front.
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        match self {
            Self::ConcurrentCheck => 409,
            Self::RateLimited { .. } => 429,
            Self::Validation { .. } => 400,
            Self::VitestTimeout { .. } | Self::RpcTimeout => 504,
            Self::DepsNotInstalled { .. }
            | Self::VitestNotFound
            | Self::VitestFailed { .. }
            | Self::Parse { .. }
            | Self::Internal { .. } => 500,
        }
    }

    /// Stable machine-readable kind tag, carried in error response bodies.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ConcurrentCheck => "CONCURRENT_CHECK",
            Self::DepsNotInstalled { .. } => "DEPS_NOT_INSTALLED",
            Self::VitestNotFound => "VITEST_NOT_FOUND",
            Self::VitestTimeout { .. } => "VITEST_TIMEOUT",
            Self::VitestFailed { .. } => "VITEST_FAILED",
            Self::Parse { .. } => "PARSE_ERROR",
            Self::RpcTimeout => "RPC_TIMEOUT",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::Validation { .. } => "VALIDATION",
            Self::Internal { .. } => "INTERNAL",
        }
    }

    /// Convenience constructor for internal errors.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Convenience constructor for validation errors.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_the_taxonomy() {
        assert_eq!(CheckError::ConcurrentCheck.http_status(), 409);
        assert_eq!(
            CheckError::RateLimited {
                retry_after_secs: 1
            }
            .http_status(),
            429
        );
        assert_eq!(CheckError::validation("bad id").http_status(), 400);
        assert_eq!(CheckError::RpcTimeout.http_status(), 504);
        assert_eq!(
            CheckError::VitestTimeout { timeout_secs: 300 }.http_status(),
            504
        );
        assert_eq!(CheckError::VitestNotFound.http_status(), 500);
        assert_eq!(CheckError::internal("boom").http_status(), 500);
    }

    #[test]
    fn kind_tags_are_stable() {
        assert_eq!(
            CheckError::DepsNotInstalled {
                install_cmd: "npm install".into()
            }
            .kind(),
            "DEPS_NOT_INSTALLED"
        );
        assert_eq!(CheckError::RpcTimeout.kind(), "RPC_TIMEOUT");
        assert_eq!(
            CheckError::Parse {
                message: "x".into()
            }
            .kind(),
            "PARSE_ERROR"
        );
    }

    #[test]
    fn deps_message_names_the_install_command() {
        let err = CheckError::DepsNotInstalled {
            install_cmd: "pnpm install".into(),
        };
        assert!(err.to_string().contains("pnpm install"));
    }
}
