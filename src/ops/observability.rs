//! Metrics and health checks.
//!
//! Metric names use the `livelock.` namespace and are exported with dots
//! replaced by underscores (`livelock_acquires_total`). The metric set is
//! fixed at construction, so recording never takes a lock and lock operations
//! never wait on a scrape.

use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Health check result for /healthz.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthStatus {
    /// Overall healthy state.
    pub healthy: bool,
    /// Status message.
    pub message: String,
}

impl HealthStatus {
    /// Create a healthy status.
    pub fn healthy() -> Self {
        Self {
            healthy: true,
            message: "OK".to_string(),
        }
    }

    /// Create an unhealthy status.
    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            healthy: false,
            message: message.into(),
        }
    }
}

/// Metric names.
pub mod metrics {
    /// Successful acquires (including re-entrant refreshes).
    pub const ACQUIRES_TOTAL: &str = "livelock.acquires_total";
    /// Successful releases.
    pub const RELEASES_TOTAL: &str = "livelock.releases_total";
    /// Acquires rejected because another session held the lock.
    pub const CONTESTED_ACQUIRES_TOTAL: &str = "livelock.contested_acquires_total";
    /// Successful extends.
    pub const EXTENDS_TOTAL: &str = "livelock.extends_total";
    /// Locks found past their TTL.
    pub const EXPIRATIONS_TOTAL: &str = "livelock.expirations_total";
    /// Sessions reclaimed after their grace period.
    pub const RECLAIMS_TOTAL: &str = "livelock.reclaims_total";
    /// Locks released by reclaims.
    pub const RECLAIMED_LOCKS_TOTAL: &str = "livelock.reclaimed_locks_total";
    /// Sessions resumed with HELLO.
    pub const SESSIONS_RESUMED_TOTAL: &str = "livelock.sessions_resumed_total";
    /// Connections closed on undecodable input.
    pub const PROTOCOL_ERRORS_TOTAL: &str = "livelock.protocol_errors_total";
    /// Accepted connections.
    pub const CONNECTIONS_TOTAL: &str = "livelock.connections_total";
    /// Lock records currently held.
    pub const ACTIVE_LOCKS: &str = "livelock.active_locks";
    /// Sessions currently registered.
    pub const ACTIVE_SESSIONS: &str = "livelock.active_sessions";
    /// Sessions waiting out their grace period.
    pub const SESSIONS_IN_GRACE: &str = "livelock.sessions_in_grace";
    /// Open client connections.
    pub const ACTIVE_CONNECTIONS: &str = "livelock.active_connections";

    /// Counters with their help text.
    pub(super) const COUNTERS: [(&str, &str); 10] = [
        (ACQUIRES_TOTAL, "Successful lock acquisitions"),
        (RELEASES_TOTAL, "Explicit lock releases"),
        (CONTESTED_ACQUIRES_TOTAL, "Acquisitions refused because the lock was held"),
        (EXTENDS_TOTAL, "Successful TTL extensions"),
        (EXPIRATIONS_TOTAL, "Locks removed after their TTL elapsed"),
        (RECLAIMS_TOTAL, "Sessions reclaimed after the grace period"),
        (RECLAIMED_LOCKS_TOTAL, "Locks released by session reclaims"),
        (SESSIONS_RESUMED_TOTAL, "Sessions resumed with HELLO"),
        (PROTOCOL_ERRORS_TOTAL, "Connections closed on protocol errors"),
        (CONNECTIONS_TOTAL, "Accepted client connections"),
    ];

    /// Gauges with their help text.
    pub(super) const GAUGES: [(&str, &str); 4] = [
        (ACTIVE_LOCKS, "Locks currently held"),
        (ACTIVE_SESSIONS, "Registered sessions"),
        (SESSIONS_IN_GRACE, "Sessions waiting out their grace period"),
        (ACTIVE_CONNECTIONS, "Open client connections"),
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MetricKind {
    Counter,
    Gauge,
}

impl MetricKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Counter => "counter",
            Self::Gauge => "gauge",
        }
    }
}

#[derive(Debug)]
struct Metric {
    kind: MetricKind,
    help: &'static str,
    value: AtomicU64,
}

/// A fixed set of named counters and gauges.
///
/// Names are declared up front; updates are a map lookup plus an atomic op
/// and never block. Updates to undeclared names are dropped.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    metrics: BTreeMap<&'static str, Metric>,
}

impl MetricsRegistry {
    /// Create a registry holding `counters` and `gauges` (name, help).
    pub fn with_metrics(
        counters: &[(&'static str, &'static str)],
        gauges: &[(&'static str, &'static str)],
    ) -> Self {
        let declare = |kind: MetricKind| {
            move |&(name, help): &(&'static str, &'static str)| {
                (
                    name,
                    Metric {
                        kind,
                        help,
                        value: AtomicU64::new(0),
                    },
                )
            }
        };
        let metrics = counters
            .iter()
            .map(declare(MetricKind::Counter))
            .chain(gauges.iter().map(declare(MetricKind::Gauge)))
            .collect();
        Self { metrics }
    }

    fn get(&self, name: &str, kind: MetricKind) -> Option<&AtomicU64> {
        match self.metrics.get(name) {
            Some(metric) if metric.kind == kind => Some(&metric.value),
            _ => None,
        }
    }

    /// Increment a counter.
    pub fn counter_inc(&self, name: &str) {
        self.counter_add(name, 1);
    }

    /// Add to a counter.
    pub fn counter_add(&self, name: &str, value: u64) {
        if let Some(counter) = self.get(name, MetricKind::Counter) {
            counter.fetch_add(value, Ordering::Relaxed);
        }
    }

    /// Current counter value (0 for undeclared names).
    pub fn counter_get(&self, name: &str) -> u64 {
        self.get(name, MetricKind::Counter)
            .map_or(0, |c| c.load(Ordering::Relaxed))
    }

    /// Set a gauge.
    pub fn gauge_set(&self, name: &str, value: u64) {
        if let Some(gauge) = self.get(name, MetricKind::Gauge) {
            gauge.store(value, Ordering::Relaxed);
        }
    }

    /// Current gauge value (0 for undeclared names).
    pub fn gauge_get(&self, name: &str) -> u64 {
        self.get(name, MetricKind::Gauge)
            .map_or(0, |g| g.load(Ordering::Relaxed))
    }

    /// Increment a gauge.
    pub fn gauge_inc(&self, name: &str) {
        if let Some(gauge) = self.get(name, MetricKind::Gauge) {
            gauge.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Decrement a gauge, saturating at zero.
    pub fn gauge_dec(&self, name: &str) {
        if let Some(gauge) = self.get(name, MetricKind::Gauge) {
            let _ = gauge.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some(v.saturating_sub(1))
            });
        }
    }

    /// Render every metric in Prometheus text format, sorted by name.
    pub fn export_prometheus(&self) -> String {
        let mut output = String::new();
        for (name, metric) in &self.metrics {
            let exported = name.replace('.', "_");
            let _ = write!(
                output,
                "# HELP {exported} {}\n# TYPE {exported} {}\n{exported} {}\n",
                metric.help,
                metric.kind.as_str(),
                metric.value.load(Ordering::Relaxed),
            );
        }
        output
    }
}

/// Livelock-specific metrics collector.
#[derive(Debug)]
pub struct LockMetrics {
    registry: MetricsRegistry,
}

impl LockMetrics {
    /// Create a collector with every metric registered at zero.
    pub fn new() -> Self {
        Self {
            registry: MetricsRegistry::with_metrics(&metrics::COUNTERS, &metrics::GAUGES),
        }
    }

    /// Get the underlying registry.
    pub fn registry(&self) -> &MetricsRegistry {
        &self.registry
    }

    // === Lock operations ===

    /// Record a successful acquire.
    pub fn record_acquire(&self) {
        self.registry.counter_inc(metrics::ACQUIRES_TOTAL);
    }

    /// Record an acquire rejected by another holder.
    pub fn record_contested_acquire(&self) {
        self.registry.counter_inc(metrics::CONTESTED_ACQUIRES_TOTAL);
    }

    /// Record a successful release.
    pub fn record_release(&self) {
        self.registry.counter_inc(metrics::RELEASES_TOTAL);
    }

    /// Record a successful extend.
    pub fn record_extend(&self) {
        self.registry.counter_inc(metrics::EXTENDS_TOTAL);
    }

    /// Record locks found expired.
    pub fn record_expirations(&self, count: u64) {
        if count > 0 {
            self.registry.counter_add(metrics::EXPIRATIONS_TOTAL, count);
        }
    }

    // === Sessions ===

    /// Record a session reclaimed after grace and the locks it lost.
    pub fn record_reclaim(&self, locks: u64) {
        self.registry.counter_inc(metrics::RECLAIMS_TOTAL);
        self.registry.counter_add(metrics::RECLAIMED_LOCKS_TOTAL, locks);
    }

    /// Record a resumed session.
    pub fn record_resume(&self) {
        self.registry.counter_inc(metrics::SESSIONS_RESUMED_TOTAL);
    }

    /// Update registry gauges.
    pub fn set_registry_sizes(&self, locks: usize, sessions: usize, in_grace: usize) {
        self.registry.gauge_set(metrics::ACTIVE_LOCKS, locks as u64);
        self.registry
            .gauge_set(metrics::ACTIVE_SESSIONS, sessions as u64);
        self.registry
            .gauge_set(metrics::SESSIONS_IN_GRACE, in_grace as u64);
    }

    // === Connections ===

    /// Record an accepted connection.
    pub fn record_connection_opened(&self) {
        self.registry.counter_inc(metrics::CONNECTIONS_TOTAL);
        self.registry.gauge_inc(metrics::ACTIVE_CONNECTIONS);
    }

    /// Record a closed connection.
    pub fn record_connection_closed(&self) {
        self.registry.gauge_dec(metrics::ACTIVE_CONNECTIONS);
    }

    /// Record a connection dropped on a protocol error.
    pub fn record_protocol_error(&self) {
        self.registry.counter_inc(metrics::PROTOCOL_ERRORS_TOTAL);
    }

    /// Export all metrics.
    pub fn export(&self) -> String {
        self.registry.export_prometheus()
    }
}

impl Default for LockMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Health probe handler.
#[derive(Debug, Default)]
pub struct HealthProbe {
    shutting_down: AtomicBool,
}

impl HealthProbe {
    /// Create a new health probe.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current health status.
    pub fn check(&self) -> HealthStatus {
        if self.shutting_down.load(Ordering::Acquire) {
            HealthStatus::unhealthy("shutting down")
        } else {
            HealthStatus::healthy()
        }
    }

    /// Mark the process as shutting down.
    pub fn mark_shutting_down(&self) {
        self.shutting_down.store(true, Ordering::Release);
    }
}
