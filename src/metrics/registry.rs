//! Metrics registry for coordinating phase-specific metrics
//!
//! Registers the metrics of every phase, validates naming consistency, and
//! detects conflicts early.

use crate::metrics::{MetricDoc, PhaseMetrics};
use std::collections::HashMap;
use tracing::{info, warn};

/// Register all metrics from all phases
pub fn register_all_metrics() -> usize {
    let mut all_metrics = HashMap::new();

    register_phase_metrics::<super::loader::LoaderMetrics>(&mut all_metrics);
    register_phase_metrics::<super::processing::ProcessingMetrics>(&mut all_metrics);
    register_phase_metrics::<super::sink::SinkMetrics>(&mut all_metrics);
    register_phase_metrics::<super::streaming::StreamingMetrics>(&mut all_metrics);

    info!(
        "Registered {} total metrics across all phases",
        all_metrics.len()
    );

    if std::env::var("SHOP_ETL_METRICS_DEBUG").is_ok() {
        log_metrics_summary(&all_metrics);
    }
    all_metrics.len()
}

/// Register metrics for a specific phase and detect conflicts
fn register_phase_metrics<T: PhaseMetrics>(all_metrics: &mut HashMap<String, MetricDoc>) {
    T::register_metrics();
    let phase_docs = T::metrics_documentation();
    let phase_name = T::phase_name();

    for doc in phase_docs {
        if all_metrics.contains_key(doc.name) {
            warn!(
                "Metric name conflict detected: '{}' registered twice (phase '{}')",
                doc.name, phase_name
            );
        } else {
            all_metrics.insert(doc.name.to_string(), doc);
        }
    }
}

fn log_metrics_summary(all_metrics: &HashMap<String, MetricDoc>) {
    let mut by_phase: HashMap<&str, Vec<&MetricDoc>> = HashMap::new();
    for doc in all_metrics.values() {
        by_phase
            .entry(extract_phase_from_metric_name(doc.name))
            .or_default()
            .push(doc);
    }

    for (phase, metrics) in by_phase {
        info!("Phase '{}': {} metrics", phase, metrics.len());
        for metric in metrics {
            info!("  - {} ({:?}): {}", metric.name, metric.metric_type, metric.help);
        }
    }
}

/// Extract phase name from metric name (e.g., "etl_sink_rows_written_total" -> "sink")
fn extract_phase_from_metric_name(metric_name: &str) -> &str {
    if let Some(stripped) = metric_name.strip_prefix("etl_") {
        if let Some(next_underscore) = stripped.find('_') {
            return &stripped[..next_underscore];
        }
    }
    "unknown"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_phase_from_metric_name() {
        assert_eq!(
            extract_phase_from_metric_name("etl_sink_rows_written_total"),
            "sink"
        );
        assert_eq!(
            extract_phase_from_metric_name("etl_loader_duration_seconds"),
            "loader"
        );
        assert_eq!(extract_phase_from_metric_name("invalid_metric_name"), "unknown");
    }

    #[test]
    fn test_no_conflicts_across_phases() {
        assert_eq!(register_all_metrics(), 4 + 7 + 4 + 5);
    }
}
