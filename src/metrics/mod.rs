//! Centralized metrics infrastructure for the ETL pipeline
//!
//! Each pipeline phase defines its own metrics in a dedicated submodule, ensuring
//! clear ownership and preventing naming conflicts.

pub mod loader;
pub mod processing;
pub mod registry;
pub mod sink;
pub mod streaming;

pub use loader::LoaderMetrics;
pub use processing::ProcessingMetrics;
pub use sink::SinkMetrics;
pub use streaming::StreamingMetrics;

use std::sync::{Once, OnceLock};
use tracing::{info, warn};

static INIT: Once = Once::new();
static HANDLE: OnceLock<metrics_exporter_prometheus::PrometheusHandle> = OnceLock::new();

/// Initialize the global metrics infrastructure
///
/// Idempotent. Installs a Prometheus recorder and registers all phase metrics.
/// When `SHOP_ETL_METRICS_ADDR` is set an HTTP exporter is started on that
/// address, which needs a running tokio runtime.
pub fn init_metrics() {
    INIT.call_once(|| {
        let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

        let addr = std::env::var(crate::constants::ENV_METRICS_ADDR)
            .ok()
            .and_then(|s| match s.parse::<std::net::SocketAddr>() {
                Ok(addr) => Some(addr),
                Err(_) => {
                    warn!("Invalid metrics addr '{}', exporter disabled", s);
                    None
                }
            });

        let installed = match addr {
            Some(addr) => builder
                .with_http_listener(addr)
                .install()
                .map(|_| {
                    info!("Prometheus HTTP exporter started at http://{}/metrics", addr);
                }),
            None => builder.install_recorder().map(|handle| {
                let _ = HANDLE.set(handle);
                info!("Prometheus recorder installed (in-process render only)");
            }),
        };

        match installed {
            Ok(()) => {
                registry::register_all_metrics();
            }
            Err(e) => {
                warn!("Failed to install Prometheus recorder: {}", e);
            }
        }
    });
}

/// Render the current snapshot in Prometheus text format, if a local recorder is installed
pub fn render() -> Option<String> {
    HANDLE.get().map(|h| h.render())
}

/// Trait for phase-specific metrics collections
///
/// Each pipeline phase implements this trait to provide:
/// - Metric registration at startup
/// - Consistent naming conventions
/// - Documentation of what each metric measures
pub trait PhaseMetrics {
    /// Register all metrics for this phase
    fn register_metrics();

    /// Get the phase name for prefixing metrics
    fn phase_name() -> &'static str;

    /// Get documentation for all metrics in this phase
    fn metrics_documentation() -> Vec<MetricDoc>;
}

/// Documentation for a single metric
#[derive(Debug, Clone)]
pub struct MetricDoc {
    pub name: &'static str,
    pub metric_type: MetricType,
    pub help: &'static str,
    #[allow(dead_code)]
    pub labels: Vec<&'static str>,
}

#[derive(Debug, Clone)]
pub enum MetricType {
    Counter,
    Histogram,
    Gauge,
}

/// Build a phase-specific metric name with consistent naming
///
/// All metrics follow the convention: etl_{phase}_{metric_name}[_total]
macro_rules! phase_metric {
    (counter, $phase:literal, $name:literal) => {
        concat!("etl_", $phase, "_", $name, "_total")
    };
    (histogram, $phase:literal, $name:literal) => {
        concat!("etl_", $phase, "_", $name)
    };
    (gauge, $phase:literal, $name:literal) => {
        concat!("etl_", $phase, "_", $name)
    };
}

pub(crate) use phase_metric;

#[cfg(test)]
mod tests {
    #[test]
    fn test_metric_naming_convention() {
        assert_eq!(
            phase_metric!(counter, "loader", "rows_read"),
            "etl_loader_rows_read_total"
        );
        assert_eq!(
            phase_metric!(histogram, "sink", "write_duration_seconds"),
            "etl_sink_write_duration_seconds"
        );
        assert_eq!(
            phase_metric!(gauge, "streaming", "open_windows"),
            "etl_streaming_open_windows"
        );
    }
}
