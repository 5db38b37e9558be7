//! Streaming Phase Metrics
//!
//! Event intake, late drops and window emission for the active-user counter.

use crate::metrics::{phase_metric, MetricDoc, MetricType, PhaseMetrics};

pub struct StreamingMetrics;

impl StreamingMetrics {
    pub fn record_event_accepted() {
        ::metrics::counter!(phase_metric!(counter, "streaming", "events_accepted")).increment(1);
    }

    pub fn record_event_late() {
        ::metrics::counter!(phase_metric!(counter, "streaming", "events_late")).increment(1);
    }

    pub fn record_window_emitted(active_users: u64) {
        ::metrics::counter!(phase_metric!(counter, "streaming", "windows_emitted")).increment(1);
        ::metrics::histogram!(phase_metric!(histogram, "streaming", "window_active_users"))
            .record(active_users as f64);
    }

    pub fn record_open_windows(count: usize) {
        ::metrics::gauge!(phase_metric!(gauge, "streaming", "open_windows")).set(count as f64);
    }
}

impl PhaseMetrics for StreamingMetrics {
    fn register_metrics() {
        use metrics::{counter, gauge, histogram};

        let _ = counter!(phase_metric!(counter, "streaming", "events_accepted"));
        let _ = counter!(phase_metric!(counter, "streaming", "events_late"));
        let _ = counter!(phase_metric!(counter, "streaming", "windows_emitted"));
        let _ = histogram!(phase_metric!(histogram, "streaming", "window_active_users"));
        let _ = gauge!(phase_metric!(gauge, "streaming", "open_windows"));
    }

    fn phase_name() -> &'static str {
        "streaming"
    }

    fn metrics_documentation() -> Vec<MetricDoc> {
        vec![
            MetricDoc {
                name: phase_metric!(counter, "streaming", "events_accepted"),
                metric_type: MetricType::Counter,
                help: "Events assigned to an open window",
                labels: vec![],
            },
            MetricDoc {
                name: phase_metric!(counter, "streaming", "events_late"),
                metric_type: MetricType::Counter,
                help: "Events dropped because their window had already closed",
                labels: vec![],
            },
            MetricDoc {
                name: phase_metric!(counter, "streaming", "windows_emitted"),
                metric_type: MetricType::Counter,
                help: "Windows closed and emitted",
                labels: vec![],
            },
            MetricDoc {
                name: phase_metric!(histogram, "streaming", "window_active_users"),
                metric_type: MetricType::Histogram,
                help: "Distinct users per emitted window",
                labels: vec![],
            },
            MetricDoc {
                name: phase_metric!(gauge, "streaming", "open_windows"),
                metric_type: MetricType::Gauge,
                help: "Windows currently held in memory",
                labels: vec![],
            },
        ]
    }
}
