//! Loader Phase Metrics

use crate::metrics::{phase_metric, MetricDoc, MetricType, PhaseMetrics};

/// Metrics collection for the Loader phase
pub struct LoaderMetrics;

impl LoaderMetrics {
    /// Record a finished load
    pub fn record_load(record: &'static str, rows_read: usize, rows_skipped: usize, duration_secs: f64) {
        ::metrics::counter!(phase_metric!(counter, "loader", "rows_read"), "record" => record)
            .increment(rows_read as u64);
        ::metrics::counter!(phase_metric!(counter, "loader", "rows_skipped"), "record" => record)
            .increment(rows_skipped as u64);
        ::metrics::histogram!(phase_metric!(histogram, "loader", "duration_seconds"), "record" => record)
            .record(duration_secs);
    }

    /// Record a load that was aborted
    pub fn record_abort(record: &'static str, reason: &'static str) {
        ::metrics::counter!(
            phase_metric!(counter, "loader", "aborts"),
            "record" => record,
            "reason" => reason
        )
        .increment(1);
    }
}

impl PhaseMetrics for LoaderMetrics {
    fn register_metrics() {
        use metrics::{counter, histogram};

        let _ = counter!(phase_metric!(counter, "loader", "rows_read"));
        let _ = counter!(phase_metric!(counter, "loader", "rows_skipped"));
        let _ = counter!(phase_metric!(counter, "loader", "aborts"));
        let _ = histogram!(phase_metric!(histogram, "loader", "duration_seconds"));
    }

    fn phase_name() -> &'static str {
        "loader"
    }

    fn metrics_documentation() -> Vec<MetricDoc> {
        vec![
            MetricDoc {
                name: phase_metric!(counter, "loader", "rows_read"),
                metric_type: MetricType::Counter,
                help: "Total number of data rows read from input files",
                labels: vec!["record"],
            },
            MetricDoc {
                name: phase_metric!(counter, "loader", "rows_skipped"),
                metric_type: MetricType::Counter,
                help: "Total number of malformed rows skipped",
                labels: vec!["record"],
            },
            MetricDoc {
                name: phase_metric!(counter, "loader", "aborts"),
                metric_type: MetricType::Counter,
                help: "Total number of loads aborted on schema or format errors",
                labels: vec!["record", "reason"],
            },
            MetricDoc {
                name: phase_metric!(histogram, "loader", "duration_seconds"),
                metric_type: MetricType::Histogram,
                help: "Duration of a single file load in seconds",
                labels: vec!["record"],
            },
        ]
    }
}
