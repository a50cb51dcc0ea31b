//! Operations and observability.
//!
//! - [`observability`] - lock metrics and health checks
//! - [`metrics_server`] - HTTP endpoint exposing both

pub mod metrics_server;
pub mod observability;

pub use metrics_server::MetricsServer;
pub use observability::{HealthProbe, HealthStatus, LockMetrics};
