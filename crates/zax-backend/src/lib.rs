//! # zax-backend
//!
//! Library surface of the backend service: the SQLite artifact store, the
//! vitest/eslint parsers, affected-test selection, and the RPC dispatch
//! layer. The `zax-backend` binary wires these to a localhost TCP listener
//! and the `rust.port` handshake.
//!
//! Exposed as a library so integration tests can drive the dispatch layer
//! without a socket in the way.

#![warn(clippy::all)]

pub mod affected;
pub mod parsers;
pub mod rpc;
pub mod store;
