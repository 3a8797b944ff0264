//! Backend RPC transport: length-prefixed JSON framing and message types.
//!
//! # Protocol
//!
//! - Transport: localhost TCP, port published via `<cache>/rust.port`
//! - Framing: 4-byte big-endian length prefix followed by a JSON payload
//! - Pattern: unary request/response, stateless per request
//!
//! Both sides enforce [`MAX_FRAME_SIZE`] before reading a payload so a
//! corrupt prefix can never trigger an unbounded allocation.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::manifest::{ArtifactManifest, DeltaSummary};

/// Maximum frame size for RPC messages (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Framing errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// A frame exceeded [`MAX_FRAME_SIZE`].
    #[error("frame too large: {size} bytes (max: {max})")]
    TooLarge {
        /// Declared or actual payload size.
        size: usize,
        /// The enforced cap.
        max: usize,
    },
}

/// Frames a payload with its 4-byte big-endian length prefix.
///
/// # Errors
///
/// Returns [`FrameError::TooLarge`] when the payload exceeds the cap.
pub fn frame_message(payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    if payload.len() > MAX_FRAME_SIZE {
        return Err(FrameError::TooLarge {
            size: payload.len(),
            max: MAX_FRAME_SIZE,
        });
    }
    #[allow(clippy::cast_possible_truncation)]
    let len = (payload.len() as u32).to_be_bytes();
    let mut framed = Vec::with_capacity(4 + payload.len());
    framed.extend_from_slice(&len);
    framed.extend_from_slice(payload);
    Ok(framed)
}

/// Parses a length prefix, enforcing the frame cap.
///
/// # Errors
///
/// Returns [`FrameError::TooLarge`] when the declared length exceeds the cap.
pub fn parse_frame_length(prefix: &[u8; 4]) -> Result<usize, FrameError> {
    let len = u32::from_be_bytes(*prefix) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(FrameError::TooLarge {
            size: len,
            max: MAX_FRAME_SIZE,
        });
    }
    Ok(len)
}

/// Validates a workspace id: exactly 16 lowercase hex characters.
#[must_use]
pub fn is_valid_workspace_id(id: &str) -> bool {
    id.len() == 16
        && id
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
}

/// Error codes the backend can return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// A request field failed validation.
    InvalidArgument,
    /// A referenced file or row does not exist.
    NotFound,
    /// Storage or parsing failed inside the backend.
    Internal,
}

/// Request messages, engine → backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendRequest {
    /// Liveness + version echo.
    Ping,
    /// Ingest one run's artifacts transactionally.
    IngestManifest {
        manifest: ArtifactManifest,
        package_scope: String,
    },
    /// Compute the delta against the previous run.
    GetDeltaSummary {
        workspace_id: String,
        package_scope: String,
    },
    /// Select the tests worth running for the current dirty set.
    GetAffectedTests {
        workspace_id: String,
        force_full: bool,
        package_scope: String,
    },
}

/// Response messages, backend → engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendResponse {
    /// Reply to [`BackendRequest::Ping`].
    Pong { version: String },
    /// Reply to [`BackendRequest::IngestManifest`].
    ManifestIngested,
    /// Reply to [`BackendRequest::GetDeltaSummary`].
    Delta { summary: DeltaSummary },
    /// Reply to [`BackendRequest::GetAffectedTests`].
    AffectedTests {
        dirty_files: Vec<String>,
        test_files: Vec<String>,
        is_full_run: bool,
    },
    /// Any RPC can fail with a typed error.
    Error { code: ErrorCode, message: String },
}
