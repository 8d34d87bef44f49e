//! Request context shared across layers.
//!
//! The HTTP layer resolves the caller once; the permission engine and the
//! call path only see a [`Caller`].

pub mod caller;

pub use caller::{caller_from_headers, Caller, StaticTokenVerifier, TokenVerifier};
