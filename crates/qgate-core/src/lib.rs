//! qgate core: transport-agnostic protocol primitives and the error surface.
//!
//! This crate defines the wire-level contracts shared by the gateway, the
//! worker loops and any out-of-process worker: request/reply envelopes,
//! resource-key normalization and the closed set of data commands. It carries
//! no runtime dependencies so it can be reused wherever a worker is written.
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here.
//! All fallible paths must surface as `QgateError`/`Result` so production
//! processes do not crash on malformed input.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod protocol;

/// Shared result type.
pub use error::{ClientCode, QgateError, Result};
