//! Processing Phase Metrics
//!
//! Cleaning, anonymization, join and aggregation all run in memory between
//! the loader and the sink; they share one phase prefix.

use crate::metrics::{phase_metric, MetricDoc, MetricType, PhaseMetrics};

pub struct ProcessingMetrics;

impl ProcessingMetrics {
    pub fn record_filtered(record: &'static str, kept: usize, rejected: usize) {
        ::metrics::counter!(phase_metric!(counter, "processing", "records_kept"), "record" => record)
            .increment(kept as u64);
        ::metrics::counter!(phase_metric!(counter, "processing", "records_rejected"), "record" => record)
            .increment(rejected as u64);
    }

    pub fn record_anonymized(count: usize) {
        ::metrics::counter!(phase_metric!(counter, "processing", "ids_anonymized"))
            .increment(count as u64);
    }

    pub fn record_join(joined: usize, unmatched_left: usize) {
        ::metrics::counter!(phase_metric!(counter, "processing", "rows_joined"))
            .increment(joined as u64);
        ::metrics::counter!(phase_metric!(counter, "processing", "rows_unmatched"))
            .increment(unmatched_left as u64);
    }

    pub fn record_aggregate(report: &'static str, groups: usize, duration_secs: f64) {
        ::metrics::histogram!(phase_metric!(histogram, "processing", "aggregate_groups"), "report" => report)
            .record(groups as f64);
        ::metrics::histogram!(
            phase_metric!(histogram, "processing", "aggregate_duration_seconds"),
            "report" => report
        )
        .record(duration_secs);
    }
}

impl PhaseMetrics for ProcessingMetrics {
    fn register_metrics() {
        use metrics::{counter, histogram};

        let _ = counter!(phase_metric!(counter, "processing", "records_kept"));
        let _ = counter!(phase_metric!(counter, "processing", "records_rejected"));
        let _ = counter!(phase_metric!(counter, "processing", "ids_anonymized"));
        let _ = counter!(phase_metric!(counter, "processing", "rows_joined"));
        let _ = counter!(phase_metric!(counter, "processing", "rows_unmatched"));
        let _ = histogram!(phase_metric!(histogram, "processing", "aggregate_groups"));
        let _ = histogram!(phase_metric!(histogram, "processing", "aggregate_duration_seconds"));
    }

    fn phase_name() -> &'static str {
        "processing"
    }

    fn metrics_documentation() -> Vec<MetricDoc> {
        vec![
            MetricDoc {
                name: phase_metric!(counter, "processing", "records_kept"),
                metric_type: MetricType::Counter,
                help: "Records that passed a cleaning rule",
                labels: vec!["record"],
            },
            MetricDoc {
                name: phase_metric!(counter, "processing", "records_rejected"),
                metric_type: MetricType::Counter,
                help: "Records dropped by a cleaning rule",
                labels: vec!["record"],
            },
            MetricDoc {
                name: phase_metric!(counter, "processing", "ids_anonymized"),
                metric_type: MetricType::Counter,
                help: "User identifiers replaced by their digest",
                labels: vec![],
            },
            MetricDoc {
                name: phase_metric!(counter, "processing", "rows_joined"),
                metric_type: MetricType::Counter,
                help: "Rows produced by the inventory join",
                labels: vec![],
            },
            MetricDoc {
                name: phase_metric!(counter, "processing", "rows_unmatched"),
                metric_type: MetricType::Counter,
                help: "Left rows with no matching inventory key",
                labels: vec![],
            },
            MetricDoc {
                name: phase_metric!(histogram, "processing", "aggregate_groups"),
                metric_type: MetricType::Histogram,
                help: "Number of groups produced before truncation",
                labels: vec!["report"],
            },
            MetricDoc {
                name: phase_metric!(histogram, "processing", "aggregate_duration_seconds"),
                metric_type: MetricType::Histogram,
                help: "Duration of a grouped reduction in seconds",
                labels: vec!["report"],
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_documentation() {
        ProcessingMetrics::register_metrics();
        let docs = ProcessingMetrics::metrics_documentation();
        assert_eq!(docs.len(), 7);
        assert!(docs.iter().all(|d| d.name.starts_with("etl_processing_")));
    }
}
