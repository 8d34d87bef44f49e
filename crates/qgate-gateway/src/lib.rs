//! qgate gateway library entry.
//!
//! Wires the store, permission engine, dispatch client, worker loops and the
//! HTTP layer into one gateway. Consumed by the binary (`main.rs`) and by
//! integration tests.

pub mod app_state;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod http;
pub mod lifecycle;
pub mod obs;
pub mod ops;
pub mod permission;
pub mod router;
pub mod services;
pub mod store;
