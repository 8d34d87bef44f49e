//! Self-learning permission engine.
//!
//! Every data and call operation is checked against a per-resource
//! allow/deny policy. Operations seen for the first time are classified by
//! the configured mode and the result is persisted in the background.

pub mod engine;
pub mod persist;
pub mod policy;
pub mod scope;
pub mod table;

pub use engine::PermissionEngine;
pub use persist::{run_persister, PersistHandle, PolicyWrite};
pub use policy::PermissionPolicy;
pub use scope::ScopedField;
pub use table::PermissionTable;
