//! Prometheus metrics for the cache core
//!
//! Recording goes through the `metrics` facade and is a no-op until a
//! recorder is installed, so the cache works the same with or without
//! [`init_metrics`].

use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use super::config::MetricsConfig;

pub mod names {
    pub const CACHE_HITS_TOTAL: &str = "cache_hits_total";
    pub const CACHE_MISSES_TOTAL: &str = "cache_misses_total";
    pub const CACHE_STORE_ERRORS_TOTAL: &str = "cache_store_errors_total";
    pub const CACHE_LOADS_TOTAL: &str = "cache_loads_total";
    pub const CACHE_LOAD_DURATION_SECONDS: &str = "cache_load_duration_seconds";
    pub const CACHE_WRITES_SKIPPED_TOTAL: &str = "cache_writes_skipped_total";
    pub const CACHE_LEASE_ACQUIRED_TOTAL: &str = "cache_lease_acquired_total";
    pub const CACHE_LEASE_CONTENDED_TOTAL: &str = "cache_lease_contended_total";
    pub const CACHE_LEASE_LOST_TOTAL: &str = "cache_lease_lost_total";
    pub const CACHE_LEASE_RELEASE_FAILED_TOTAL: &str = "cache_lease_release_failed_total";
}

/// Prometheus metrics handle
#[derive(Clone)]
pub struct PrometheusMetrics {
    handle: Arc<PrometheusHandle>,
}

impl PrometheusMetrics {
    /// Renders the metrics in Prometheus exposition format
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Initialize Prometheus metrics
pub fn init_metrics(config: &MetricsConfig) -> Option<PrometheusMetrics> {
    if !config.enabled {
        tracing::info!("Prometheus metrics disabled");
        return None;
    }

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            gauge!("cacheflight_info", "version" => env!("CARGO_PKG_VERSION")).set(1.0);
            tracing::info!("Prometheus metrics initialized");

            Some(PrometheusMetrics {
                handle: Arc::new(handle),
            })
        }
        Err(e) => {
            tracing::error!("Failed to initialize Prometheus metrics: {}", e);
            None
        }
    }
}

/// Which path produced a loaded value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPath {
    /// Loaded by the lease holder
    Holder,
    /// Loaded by a waiter whose poll window ran out
    Fallback,
    /// Loaded without a lease because the store was unreachable
    Degraded,
}

impl LoadPath {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadPath::Holder => "holder",
            LoadPath::Fallback => "fallback",
            LoadPath::Degraded => "degraded",
        }
    }
}

pub fn record_cache_hit() {
    counter!(names::CACHE_HITS_TOTAL).increment(1);
}

pub fn record_cache_miss() {
    counter!(names::CACHE_MISSES_TOTAL).increment(1);
}

/// Record a failed store round trip; `op` names the store operation
pub fn record_store_error(op: &'static str) {
    counter!(names::CACHE_STORE_ERRORS_TOTAL, "op" => op).increment(1);
}

/// Record a loader invocation and how long it took
pub fn record_load(path: LoadPath, duration: Duration) {
    counter!(names::CACHE_LOADS_TOTAL, "path" => path.as_str()).increment(1);
    histogram!(names::CACHE_LOAD_DURATION_SECONDS, "path" => path.as_str())
        .record(duration.as_secs_f64());
}

pub fn record_write_skipped() {
    counter!(names::CACHE_WRITES_SKIPPED_TOTAL).increment(1);
}

pub fn record_lease_acquired() {
    counter!(names::CACHE_LEASE_ACQUIRED_TOTAL).increment(1);
}

pub fn record_lease_contended() {
    counter!(names::CACHE_LEASE_CONTENDED_TOTAL).increment(1);
}

pub fn record_lease_lost() {
    counter!(names::CACHE_LEASE_LOST_TOTAL).increment(1);
}

pub fn record_lease_release_failed() {
    counter!(names::CACHE_LEASE_RELEASE_FAILED_TOTAL).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_path_labels() {
        assert_eq!(LoadPath::Holder.as_str(), "holder");
        assert_eq!(LoadPath::Fallback.as_str(), "fallback");
        assert_eq!(LoadPath::Degraded.as_str(), "degraded");
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_cache_hit();
        record_cache_miss();
        record_store_error("get");
        record_load(LoadPath::Holder, Duration::from_millis(5));
        record_lease_lost();
    }

    #[test]
    fn test_init_metrics_disabled() {
        let metrics = init_metrics(&MetricsConfig { enabled: false });
        assert!(metrics.is_none());
    }
}
