//! Generic data/call endpoint.
//!
//! One path; the HTTP method selects the access kind (GET read, PUT write,
//! DELETE delete, POST call). The query string carries `cmd`, `key` and
//! the command's own arguments (`field`, `member`, `start`/`stop`,
//! `min`/`max`, `withscores`, `score`). Every request is parsed once into a
//! [`Command`], checked against reserved keys, gated by the permission
//! engine, then executed against the store or dispatched to a service queue.
//!
//! [`Command`]: qgate_core::protocol::command::Command

pub mod codec;
pub mod error;
pub mod handlers;

pub use codec::{DataQuery, DataRequest};
pub use error::ApiError;
