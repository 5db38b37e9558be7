use anyhow::Result;
use chrono::{NaiveDate, NaiveDateTime};
use shop_etl::config::{SinkConfig, StreamingConfig};
use shop_etl::constants::ACTIVE_USERS_DATASET;
use shop_etl::pipeline::storage::{self, SinkCompression, WriteMode};
use shop_etl::streaming::{
    spawn_counter, DatasetWindowStore, InMemoryWindowStore, JsonLinesSource, TimeDomain,
};
use shop_etl::types::ActiveUserWindow;
use tempfile::tempdir;

fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 1)
        .and_then(|d| d.and_hms_opt(h, m, s))
        .unwrap()
}

fn minute_windows() -> StreamingConfig {
    StreamingConfig {
        window_seconds: 60,
        allowed_lateness_seconds: 0,
        time_domain: TimeDomain::EventTime,
        tick_millis: 50,
    }
}

#[tokio::test]
async fn test_event_file_to_active_user_dataset() -> Result<()> {
    let tmp = tempdir()?;
    let events = tmp.path().join("events.jsonl");
    tokio::fs::write(
        &events,
        concat!(
            "{\"user_id\": \"u1\", \"event_time\": \"2024-01-01T00:00:10Z\"}\n",
            "{\"user_id\": \"u1\", \"event_time\": \"2024-01-01T00:00:50Z\"}\n",
            "{\"user_id\": \"u2\", \"event_time\": \"2024-01-01T00:01:05Z\"}\n",
            "{\"user_id\": \"u3\", \"event_time\": \"2024-01-01T00:00:40Z\"}\n",
            "{\"user_id\": \"u3\", \"event_time\": \"2024-01-01T00:01:30Z\"}\n",
            "{\"user_id\": \"u4\", \"event_time\": \"2024-01-01T00:03:00Z\"}\n",
        ),
    )
    .await?;

    let store = InMemoryWindowStore::new();
    let source = JsonLinesSource::open(&events).await?;
    let summary = spawn_counter(&minute_windows(), source, store.clone())
        .wait()
        .await?;

    // u3 at 00:00:40 arrives after 00:01:05 closed the first window
    assert_eq!(summary.events_late, 1);
    assert_eq!(summary.events_accepted, 5);

    let windows = store.snapshot().await;
    assert_eq!(
        windows,
        vec![
            ActiveUserWindow {
                window_start: at(0, 0, 0),
                window_end: at(0, 1, 0),
                active_users: 1,
            },
            ActiveUserWindow {
                window_start: at(0, 1, 0),
                window_end: at(0, 2, 0),
                active_users: 2,
            },
            ActiveUserWindow {
                window_start: at(0, 3, 0),
                window_end: at(0, 4, 0),
                active_users: 1,
            },
        ]
    );

    let dataset = tmp.path().join("active_users");
    storage::write_with(&windows, &dataset, WriteMode::Append, SinkCompression::Snappy)?;
    let read_back: Vec<ActiveUserWindow> = storage::read(&dataset)?;
    assert_eq!(read_back, windows);
    Ok(())
}

#[tokio::test]
async fn test_empty_feed_emits_nothing() -> Result<()> {
    let store = InMemoryWindowStore::new();
    let summary = spawn_counter(&minute_windows(), JsonLinesSource::new(&b"\n\n"[..]), store.clone())
        .wait()
        .await?;
    assert_eq!(summary.windows_emitted, 0);
    assert_eq!(summary.last_watermark, None);
    assert!(store.snapshot().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_stream_appends_windows_to_dataset_in_batches() -> Result<()> {
    let tmp = tempdir()?;
    let events = tmp.path().join("events.jsonl");
    let feed: String = (0..5)
        .map(|minute| {
            format!(
                "{{\"user_id\": \"u{}\", \"event_time\": \"2024-01-01T00:0{}:30Z\"}}\n",
                minute, minute
            )
        })
        .collect();
    tokio::fs::write(&events, feed).await?;

    let sink = SinkConfig {
        output_dir: tmp.path().to_path_buf(),
        window_batch: 2,
        ..SinkConfig::default()
    };
    let store = DatasetWindowStore::from_config(&sink);
    let dataset = store.dir().to_path_buf();
    assert_eq!(dataset, tmp.path().join(ACTIVE_USERS_DATASET));

    let summary = spawn_counter(&minute_windows(), JsonLinesSource::open(&events).await?, store)
        .wait()
        .await?;
    assert_eq!(summary.windows_emitted, 5);

    // Two full batches plus the remainder flushed on stop
    assert_eq!(storage::part_files(&dataset)?.len(), 3);
    let windows: Vec<ActiveUserWindow> = storage::read(&dataset)?;
    assert_eq!(windows.len(), 5);
    assert_eq!(windows[0].window_start, at(0, 0, 0));
    assert_eq!(windows[4].window_start, at(0, 4, 0));
    assert!(windows.iter().all(|w| w.active_users == 1));
    Ok(())
}
