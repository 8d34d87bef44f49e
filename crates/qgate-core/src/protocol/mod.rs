//! Protocol modules.
//!
//! - `envelope`: request/reply envelopes exchanged over named queues.
//! - `key`: resource-key normalization used to group per-entity keys.
//! - `command`: the closed set of data commands accepted at the boundary.
//!
//! All parsers are panic-free: malformed input is reported as `QgateError`.

pub mod command;
pub mod envelope;
pub mod key;
