//! Observability infrastructure - Metrics

mod config;
pub mod metrics;

pub use self::config::MetricsConfig;
pub use self::metrics::{init_metrics, LoadPath, PrometheusMetrics};
