//! # zax-core
//!
//! Core library for zax - an incremental check runner for JavaScript-family
//! repositories.
//!
//! This crate provides the building blocks shared by the CLI, the engine
//! daemon, and the backend service:
//!
//! - **Workspace identity**: root/scope resolution and the stable
//!   16-hex workspace id derived from the canonical root path
//! - **Cache directory**: the private per-workspace state directory and its
//!   well-known file names
//! - **Locking**: the cross-process mutex that serializes daemon bring-up
//! - **IPC**: length-prefixed JSON framing and the backend RPC message types
//! - **Tool commands**: package-manager detection and vitest/eslint command
//!   assembly
//!
//! ## Example
//!
//! ```rust,no_run
//! use zax_core::workspace;
//! use zax_core::cache;
//!
//! let info = workspace::resolve(std::path::Path::new(".")).unwrap();
//! let id = cache::workspace_id(&info.root).unwrap();
//! assert_eq!(id.len(), 16);
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod cache;
pub mod discovery;
pub mod error;
pub mod ipc;
pub mod lock;
pub mod manifest;
pub mod pm;
pub mod stable_id;
pub mod workspace;

pub use cache::workspace_id;
pub use error::CheckError;
pub use manifest::{ArtifactKind, ArtifactManifest, ArtifactRef, CheckSummary, DeltaSummary};
pub use pm::PackageManager;
