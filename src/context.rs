use crate::config::EtlConfig;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;
use uuid::Uuid;

/// Per-run state handed to every pipeline stage.
///
/// Built once from configuration at the start of a run and consumed by
/// [`ExecutionContext::finish`] when the run is over.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    run_id: Uuid,
    config: Arc<EtlConfig>,
    started_at: DateTime<Utc>,
    started: Instant,
    partitions: usize,
}

/// Summary returned when a context is torn down
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub duration_secs: f64,
}

impl ExecutionContext {
    pub fn new(config: EtlConfig) -> Self {
        let partitions = match config.aggregate.partitions {
            0 => rayon::current_num_threads().max(1),
            n => n,
        };
        let run_id = Uuid::new_v4();
        info!(%run_id, partitions, "Execution context created");
        metrics::counter!("etl_runs_total").increment(1);

        Self {
            run_id,
            config: Arc::new(config),
            started_at: Utc::now(),
            started: Instant::now(),
            partitions,
        }
    }

    pub fn config(&self) -> &EtlConfig {
        &self.config
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn partitions(&self) -> usize {
        self.partitions
    }

    /// Same context with a fixed partition count
    pub fn with_partitions(mut self, partitions: usize) -> Self {
        self.partitions = partitions.max(1);
        self
    }

    /// Tear down the context and report how long the run took.
    pub fn finish(self) -> RunSummary {
        let duration_secs = self.started.elapsed().as_secs_f64();
        metrics::histogram!("etl_run_duration_seconds").record(duration_secs);
        info!(run_id = %self.run_id, duration_secs, "Execution context finished");
        RunSummary {
            run_id: self.run_id,
            started_at: self.started_at,
            duration_secs,
        }
    }
}
