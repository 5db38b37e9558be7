use crate::config::SinkConfig;
use crate::constants::ACTIVE_USERS_DATASET;
use crate::error::{EtlError, Result};
use crate::pipeline::storage::{self, SinkCompression, WriteMode};
use crate::types::ActiveUserWindow;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

/// Downstream consumer of closed windows
#[async_trait]
pub trait WindowStore: Send + Sync {
    async fn store(&self, window: ActiveUserWindow) -> Result<()>;

    /// Persist anything still buffered; called once when the counter stops
    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Keeps every emitted window in memory, for tests and short runs
#[derive(Clone, Default)]
pub struct InMemoryWindowStore {
    windows: Arc<Mutex<Vec<ActiveUserWindow>>>,
}

impl InMemoryWindowStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> Vec<ActiveUserWindow> {
        self.windows.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.windows.lock().await.len()
    }
}

#[async_trait]
impl WindowStore for InMemoryWindowStore {
    async fn store(&self, window: ActiveUserWindow) -> Result<()> {
        debug!(
            "Stored window {} - {}: {} active users",
            window.window_start, window.window_end, window.active_users
        );
        self.windows.lock().await.push(window);
        Ok(())
    }
}

/// Forwards windows to another task as they close
#[derive(Clone)]
pub struct ChannelWindowStore {
    tx: mpsc::Sender<ActiveUserWindow>,
}

impl ChannelWindowStore {
    pub fn new(tx: mpsc::Sender<ActiveUserWindow>) -> Self {
        Self { tx }
    }

    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ActiveUserWindow>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl WindowStore for ChannelWindowStore {
    async fn store(&self, window: ActiveUserWindow) -> Result<()> {
        // A vanished consumer must not stop the counter
        if let Err(e) = self.tx.send(window).await {
            warn!(
                "Window consumer gone, dropping window starting {}",
                e.0.window_start
            );
        }
        Ok(())
    }
}

/// Appends closed windows to the `active_users` parquet dataset.
///
/// At most `batch` windows are held in memory; each full batch becomes one
/// appended part file.
pub struct DatasetWindowStore {
    dir: PathBuf,
    compression: SinkCompression,
    batch: usize,
    pending: Mutex<Vec<ActiveUserWindow>>,
}

impl DatasetWindowStore {
    pub fn new(dir: impl Into<PathBuf>, compression: SinkCompression, batch: usize) -> Self {
        let batch = batch.max(1);
        Self {
            dir: dir.into(),
            compression,
            batch,
            pending: Mutex::new(Vec::with_capacity(batch)),
        }
    }

    /// The `active_users` dataset under `sink.output_dir`
    pub fn from_config(config: &SinkConfig) -> Self {
        Self::new(
            config.output_dir.join(ACTIVE_USERS_DATASET),
            config.compression,
            config.window_batch,
        )
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn pending(&self) -> usize {
        self.pending.lock().await.len()
    }

    async fn write_pending(&self, pending: &mut Vec<ActiveUserWindow>) -> Result<()> {
        if pending.is_empty() {
            return Ok(());
        }
        let batch = std::mem::take(pending);
        let dir = self.dir.clone();
        let compression = self.compression;
        let (batch, written) = tokio::task::spawn_blocking(move || {
            let written = storage::write_with(&batch, &dir, WriteMode::Append, compression);
            (batch, written)
        })
        .await
        .map_err(|e| EtlError::Stream(e.to_string()))?;

        match written {
            Ok(report) => {
                info!(
                    "Appended {} window(s) to {}",
                    report.rows,
                    report.part_file.display()
                );
                Ok(())
            }
            Err(e) => {
                // Keep the batch for the next attempt
                *pending = batch;
                Err(e)
            }
        }
    }
}

#[async_trait]
impl WindowStore for DatasetWindowStore {
    async fn store(&self, window: ActiveUserWindow) -> Result<()> {
        let mut pending = self.pending.lock().await;
        pending.push(window);
        if pending.len() >= self.batch {
            self.write_pending(&mut pending).await?;
        }
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        let mut pending = self.pending.lock().await;
        self.write_pending(&mut pending).await
    }
}
