//! In-process metrics rendered by `/metrics` in Prometheus text format.

pub mod metrics;

pub use metrics::GatewayMetrics;
