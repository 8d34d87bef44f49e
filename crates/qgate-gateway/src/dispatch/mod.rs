//! RPC over named queues.
//!
//! [`DispatchClient`] pushes a request envelope onto a service queue and
//! blocks on the caller's private reply queue. [`Worker`] is the consumer
//! side: one loop per registered [`Service`], replying through the queue
//! named in each envelope. [`ThroughputCounter`] counts handled envelopes
//! per service for periodic reporting.

pub mod client;
pub mod registry;
pub mod throughput;
pub mod worker;

pub use client::DispatchClient;
pub use registry::{Service, ServiceRegistry};
pub use throughput::ThroughputCounter;
pub use worker::{Worker, WorkerConfig};
