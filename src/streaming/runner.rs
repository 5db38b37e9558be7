use crate::config::StreamingConfig;
use crate::error::{EtlError, Result};
use crate::streaming::source::EventSource;
use crate::streaming::store::WindowStore;
use crate::streaming::window::{ActiveUserCounter, Observation};
use crate::streaming::TimeDomain;
use crate::types::{ActiveUserWindow, ActivityEvent};
use chrono::{NaiveDateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument};

/// Totals reported when the counter task stops
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StreamSummary {
    pub events_accepted: u64,
    pub events_late: u64,
    pub new_user_observations: u64,
    pub windows_emitted: u64,
    pub last_watermark: Option<NaiveDateTime>,
}

/// Control handle for a running counter task
pub struct CounterHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<Result<StreamSummary>>,
}

impl CounterHandle {
    /// Ask the task to flush its open windows and stop
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Wait for the source to run dry (or a prior `shutdown`)
    pub async fn wait(self) -> Result<StreamSummary> {
        self.run_until(std::future::pending::<()>()).await
    }

    /// Wait for the task, requesting shutdown as soon as `signal` completes
    pub async fn run_until<F>(self, signal: F) -> Result<StreamSummary>
    where
        F: Future<Output = ()>,
    {
        let CounterHandle { shutdown, mut task } = self;
        tokio::pin!(signal);
        let outcome = tokio::select! {
            joined = &mut task => joined,
            _ = &mut signal => {
                let _ = shutdown.send(true);
                (&mut task).await
            }
        };
        drop(shutdown);
        outcome.map_err(|e| EtlError::Stream(e.to_string()))?
    }

    pub async fn shutdown_and_wait(self) -> Result<StreamSummary> {
        self.shutdown();
        self.wait().await
    }
}

/// Run an [`ActiveUserCounter`] over `source` on its own task.
///
/// The task is the only owner of the window state: ingestion, ticks and
/// emission are serialized by one `select!` loop. When the source ends,
/// fails or shutdown is requested every open window is flushed to `store`
/// before the task returns. On shutdown, events already buffered in the
/// source are counted first.
pub fn spawn_counter<S, W>(config: &StreamingConfig, source: S, store: W) -> CounterHandle
where
    S: EventSource + 'static,
    W: WindowStore + 'static,
{
    let (shutdown, shutdown_rx) = watch::channel(false);
    let config = config.clone();
    let task = tokio::spawn(run_counter(config, source, store, shutdown_rx));
    CounterHandle { shutdown, task }
}

async fn emit<W: WindowStore>(
    store: &W,
    windows: Vec<ActiveUserWindow>,
    emitted: &mut u64,
) -> Result<()> {
    for window in windows {
        info!(
            window_start = %window.window_start,
            window_end = %window.window_end,
            active_users = window.active_users,
            "Window closed"
        );
        store.store(window).await?;
        *emitted += 1;
    }
    Ok(())
}

fn ingest(
    config: &StreamingConfig,
    counter: &mut ActiveUserCounter,
    summary: &mut StreamSummary,
    mut event: ActivityEvent,
) {
    if config.time_domain == TimeDomain::ProcessingTime {
        event.event_time = Utc::now().naive_utc();
    }
    match counter.observe(event) {
        Observation::Accepted { new_user } => {
            summary.events_accepted += 1;
            if new_user {
                summary.new_user_observations += 1;
            }
        }
        Observation::Late => summary.events_late += 1,
    }
}

#[instrument(skip_all, fields(window_seconds = config.window_seconds, time_domain = ?config.time_domain))]
async fn run_counter<S, W>(
    config: StreamingConfig,
    mut source: S,
    store: W,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<StreamSummary>
where
    S: EventSource,
    W: WindowStore,
{
    let mut counter = ActiveUserCounter::from_config(&config);
    let mut summary = StreamSummary::default();
    let mut failure: Option<EtlError> = None;
    let mut tick = tokio::time::interval(Duration::from_millis(config.tick_millis.max(1)));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!("Active-user counter started");
    loop {
        tokio::select! {
            biased;

            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    let mut drained = 0u64;
                    while let Some(event) = source.next_buffered() {
                        ingest(&config, &mut counter, &mut summary, event);
                        drained += 1;
                    }
                    info!(drained, "Shutdown requested");
                    break;
                }
            }

            event = source.next_event() => {
                match event {
                    Ok(Some(event)) => ingest(&config, &mut counter, &mut summary, event),
                    Ok(None) => {
                        info!("Event source exhausted");
                        break;
                    }
                    Err(e) => {
                        error!("Event source failed: {}", e);
                        failure = Some(e);
                        break;
                    }
                }
                if let Err(e) = emit(&store, counter.drain_closed(), &mut summary.windows_emitted).await {
                    error!("Window store failed: {}", e);
                    failure = Some(e);
                    break;
                }
            }

            _ = tick.tick() => {
                if config.time_domain == TimeDomain::ProcessingTime {
                    counter.advance_clock(Utc::now().naive_utc());
                }
                if let Err(e) = emit(&store, counter.drain_closed(), &mut summary.windows_emitted).await {
                    error!("Window store failed: {}", e);
                    failure = Some(e);
                    break;
                }
                debug!(open_windows = counter.open_windows(), "Tick");
            }
        }
    }

    // Open windows are flushed even when the loop stopped on an error
    if let Err(e) = emit(&store, counter.flush(), &mut summary.windows_emitted).await {
        failure.get_or_insert(e);
    }
    if let Err(e) = store.flush().await {
        failure.get_or_insert(e);
    }
    summary.last_watermark = counter.watermark();
    info!(
        accepted = summary.events_accepted,
        late = summary.events_late,
        windows = summary.windows_emitted,
        "Active-user counter stopped"
    );
    match failure {
        Some(e) => Err(e),
        None => Ok(summary),
    }
}
