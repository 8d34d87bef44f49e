//! Top-level facade crate for qgate.
//!
//! Re-exports the protocol/error types and the gateway library so users can
//! depend on a single crate.

pub mod core {
    pub use qgate_core::*;
}

pub mod gateway {
    pub use qgate_gateway::*;
}

pub use qgate_core::{QgateError, Result};
