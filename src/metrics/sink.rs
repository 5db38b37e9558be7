//! Sink Phase Metrics

use crate::metrics::{phase_metric, MetricDoc, MetricType, PhaseMetrics};

pub struct SinkMetrics;

impl SinkMetrics {
    /// Record a part file written to a dataset
    pub fn record_write(dataset_kind: &'static str, rows: usize, bytes: u64, duration_secs: f64) {
        ::metrics::counter!(phase_metric!(counter, "sink", "rows_written"), "kind" => dataset_kind)
            .increment(rows as u64);
        ::metrics::histogram!(phase_metric!(histogram, "sink", "file_bytes"), "kind" => dataset_kind)
            .record(bytes as f64);
        ::metrics::histogram!(phase_metric!(histogram, "sink", "write_duration_seconds"), "kind" => dataset_kind)
            .record(duration_secs);
    }

    pub fn record_conflict() {
        ::metrics::counter!(phase_metric!(counter, "sink", "write_conflicts")).increment(1);
    }
}

impl PhaseMetrics for SinkMetrics {
    fn register_metrics() {
        use metrics::{counter, histogram};

        let _ = counter!(phase_metric!(counter, "sink", "rows_written"));
        let _ = counter!(phase_metric!(counter, "sink", "write_conflicts"));
        let _ = histogram!(phase_metric!(histogram, "sink", "file_bytes"));
        let _ = histogram!(phase_metric!(histogram, "sink", "write_duration_seconds"));
    }

    fn phase_name() -> &'static str {
        "sink"
    }

    fn metrics_documentation() -> Vec<MetricDoc> {
        vec![
            MetricDoc {
                name: phase_metric!(counter, "sink", "rows_written"),
                metric_type: MetricType::Counter,
                help: "Total number of rows persisted to columnar files",
                labels: vec!["kind"],
            },
            MetricDoc {
                name: phase_metric!(counter, "sink", "write_conflicts"),
                metric_type: MetricType::Counter,
                help: "Writes refused because the dataset already existed",
                labels: vec![],
            },
            MetricDoc {
                name: phase_metric!(histogram, "sink", "file_bytes"),
                metric_type: MetricType::Histogram,
                help: "Size of each written part file in bytes",
                labels: vec!["kind"],
            },
            MetricDoc {
                name: phase_metric!(histogram, "sink", "write_duration_seconds"),
                metric_type: MetricType::Histogram,
                help: "Duration of a dataset write in seconds",
                labels: vec!["kind"],
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_documentation() {
        SinkMetrics::register_metrics();
        let docs = SinkMetrics::metrics_documentation();
        assert_eq!(docs.len(), 4);
        for doc in docs {
            assert!(doc.name.starts_with("etl_sink_"));
        }
    }
}
