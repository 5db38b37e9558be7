use crate::error::{EtlError, Result};
use crate::pipeline::ingestion::schema::parse_timestamp;
use crate::types::ActivityEvent;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime};
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Split};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// A live feed of activity events, pulled one at a time.
///
/// `Ok(None)` means the feed is exhausted. Implementations must be cancel
/// safe: the runner drops a pending `next_event` when a tick or shutdown wins.
#[async_trait]
pub trait EventSource: Send {
    async fn next_event(&mut self) -> Result<Option<ActivityEvent>>;

    /// An event that is already buffered, without waiting for more.
    /// Used to drain the feed on shutdown.
    fn next_buffered(&mut self) -> Option<ActivityEvent> {
        None
    }
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    user_id: Value,
    event_time: Value,
}

fn parse_event(line: &str) -> std::result::Result<ActivityEvent, String> {
    let raw: RawEvent = serde_json::from_str(line).map_err(|e| e.to_string())?;
    let user_id = match raw.user_id {
        Value::String(s) if !s.trim().is_empty() => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        other => return Err(format!("unusable user_id {}", other)),
    };
    let event_time = match &raw.event_time {
        Value::String(s) => parse_timestamp(s),
        // Epoch seconds
        Value::Number(n) => n.as_f64().and_then(epoch_seconds),
        _ => None,
    }
    .ok_or_else(|| format!("unusable event_time {}", raw.event_time))?;
    Ok(ActivityEvent {
        user_id,
        event_time,
    })
}

fn epoch_seconds(secs: f64) -> Option<NaiveDateTime> {
    if !secs.is_finite() {
        return None;
    }
    let micros = (secs * 1_000_000.0).round();
    if micros.abs() >= i64::MAX as f64 {
        return None;
    }
    DateTime::from_timestamp_micros(micros as i64).map(|d| d.naive_utc())
}

/// One JSON object per line: `{"user_id": "...", "event_time": "..."}`.
///
/// Blank lines are ignored; unreadable lines (invalid UTF-8 included) are
/// logged and skipped so one bad producer cannot stop the counter.
pub struct JsonLinesSource<R> {
    lines: Split<BufReader<R>>,
    line_no: usize,
    skipped: u64,
}

impl<R: AsyncRead + Unpin + Send> JsonLinesSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: BufReader::new(reader).split(b'\n'),
            line_no: 0,
            skipped: 0,
        }
    }

    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}

impl JsonLinesSource<tokio::fs::File> {
    pub async fn open(path: &Path) -> Result<Self> {
        let file = tokio::fs::File::open(path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => EtlError::NotFound(path.to_path_buf()),
            _ => EtlError::Io(e),
        })?;
        Ok(Self::new(file))
    }
}

impl JsonLinesSource<tokio::io::Stdin> {
    pub fn stdin() -> Self {
        Self::new(tokio::io::stdin())
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> EventSource for JsonLinesSource<R> {
    async fn next_event(&mut self) -> Result<Option<ActivityEvent>> {
        while let Some(bytes) = self.lines.next_segment().await? {
            self.line_no += 1;
            let line = match std::str::from_utf8(&bytes) {
                Ok(line) => line.trim_end_matches('\r'),
                Err(e) => {
                    self.skipped += 1;
                    warn!(line = self.line_no, "Skipping event that is not UTF-8: {}", e);
                    continue;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match parse_event(line) {
                Ok(event) => return Ok(Some(event)),
                Err(message) => {
                    self.skipped += 1;
                    warn!(line = self.line_no, "Skipping unreadable event: {}", message);
                }
            }
        }
        debug!("Event feed exhausted after {} line(s)", self.line_no);
        Ok(None)
    }
}

/// Events pushed by another task; exhausted once every sender is dropped
pub struct ChannelSource {
    rx: mpsc::Receiver<ActivityEvent>,
}

impl ChannelSource {
    pub fn new(rx: mpsc::Receiver<ActivityEvent>) -> Self {
        Self { rx }
    }

    /// A bounded channel and the source reading from it
    pub fn channel(capacity: usize) -> (mpsc::Sender<ActivityEvent>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (tx, Self::new(rx))
    }
}

#[async_trait]
impl EventSource for ChannelSource {
    async fn next_event(&mut self) -> Result<Option<ActivityEvent>> {
        Ok(self.rx.recv().await)
    }

    fn next_buffered(&mut self) -> Option<ActivityEvent> {
        self.rx.try_recv().ok()
    }
}
