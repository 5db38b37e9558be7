/// Demo: synthetic sales data through the batch pipeline, then a burst of
/// activity events through the streaming counter.
use chrono::{Duration as ChronoDuration, NaiveDate, NaiveDateTime};
use rand::seq::SliceRandom;
use rand::Rng;
use shop_etl::config::StreamingConfig;
use shop_etl::constants::ACTIVE_USERS_DATASET;
use shop_etl::pipeline::storage::{self, WriteMode};
use shop_etl::pipeline::{BatchInputs, Pipeline};
use shop_etl::streaming::{spawn_counter, ChannelSource, InMemoryWindowStore, TimeDomain};
use shop_etl::types::ActivityEvent;
use shop_etl::{logging, metrics, EtlConfig, ExecutionContext};
use std::path::{Path, PathBuf};
use std::{env, fs};
use tracing::{info, warn};

const PRODUCTS: &[(&str, &str, &str, f64)] = &[
    ("P1", "Espresso Machine", "kitchen", 249.0),
    ("P2", "  Pour-Over Kettle ", "kitchen", 39.5),
    ("P3", "Trail Backpack", "outdoor", 89.99),
    ("P4", "Headlamp", "outdoor", 24.0),
    ("P5", "Desk Lamp", "office", 45.0),
    ("P6", "Standing Mat", "office", 59.0),
];

fn write_inventory(path: &Path) -> anyhow::Result<()> {
    let mut wtr = csv::Writer::from_path(path)?;
    wtr.write_record(["product_id", "product_name", "product_category", "stock_level", "price"])?;
    let mut rng = rand::thread_rng();
    for (id, name, category, price) in PRODUCTS {
        // Some rows lack a stock level and are dropped by the quality gate
        let stock = if rng.gen_bool(0.15) {
            String::new()
        } else {
            rng.gen_range(0..500).to_string()
        };
        wtr.write_record([*id, *name, *category, stock.as_str(), price.to_string().as_str()])?;
    }
    wtr.flush()?;
    Ok(())
}

fn write_transactions(path: &Path, count: usize) -> anyhow::Result<()> {
    let mut wtr = csv::Writer::from_path(path)?;
    wtr.write_record([
        "transaction_id",
        "user_id",
        "product_id",
        "quantity",
        "amount",
        "transaction_date",
    ])?;

    let mut rng = rand::thread_rng();
    let start = NaiveDate::from_ymd_opt(2024, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| anyhow::anyhow!("invalid demo start date"))?;
    let mut product_ids: Vec<&str> = PRODUCTS.iter().map(|p| p.0).collect();
    // Sold but never stocked: excluded by the join
    product_ids.push("X9");

    for i in 0..count {
        let product = product_ids.choose(&mut rng).copied().unwrap_or("P1");
        let quantity: i64 = rng.gen_range(1..5);
        // A few refunds and anonymous rows for the quality gate to reject
        let amount = if rng.gen_bool(0.05) {
            -rng.gen_range(1.0..50.0)
        } else {
            rng.gen_range(5.0..400.0)
        };
        let user = if rng.gen_bool(0.03) {
            String::new()
        } else {
            format!("user-{}", rng.gen_range(1..200))
        };
        let when = start + ChronoDuration::minutes(rng.gen_range(0..60 * 24 * 180));
        wtr.write_record([
            format!("T{:06}", i),
            user,
            product.to_string(),
            quantity.to_string(),
            format!("{:.2}", amount),
            when.format("%Y-%m-%d %H:%M:%S").to_string(),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

fn activity_burst(count: usize) -> Vec<ActivityEvent> {
    let mut rng = rand::thread_rng();
    let base: NaiveDateTime = NaiveDate::from_ymd_opt(2024, 6, 1)
        .and_then(|d| d.and_hms_opt(12, 0, 0))
        .unwrap_or_default();
    let mut events: Vec<ActivityEvent> = (0..count)
        .map(|i| ActivityEvent {
            user_id: format!("user-{}", rng.gen_range(1..40)),
            // Mostly ordered, with some jitter that produces late events
            event_time: base + ChronoDuration::seconds(i as i64 * 2 - rng.gen_range(0..90)),
        })
        .collect();
    events.sort_by_key(|e| e.event_time);
    let shuffled = events.len() / 10;
    events[..shuffled].shuffle(&mut rng);
    events.rotate_left(shuffled);
    events
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_logging();
    metrics::init_metrics();

    let args: Vec<String> = env::args().collect();
    let count: usize = args
        .get(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(5_000);

    let mut config = EtlConfig::load(None)?;
    let demo_dir = config.sink.output_dir.join("demo");
    fs::create_dir_all(&demo_dir)?;
    config.sink.output_dir = demo_dir.clone();

    println!("\n🚀 FULL PIPELINE DEMO: synthetic shop data");
    println!("{}", "=".repeat(60));
    println!("  Loader → Quality Gate → Anonymizer → Join → Aggregates → Parquet");
    println!("  Activity feed → Active-user windows → Parquet");

    let transactions: PathBuf = demo_dir.join("transactions.csv");
    let inventory: PathBuf = demo_dir.join("inventory.csv");
    write_transactions(&transactions, count)?;
    write_inventory(&inventory)?;
    println!("\n📝 Generated {} transactions and {} products", count, PRODUCTS.len());

    let ctx = ExecutionContext::new(config.clone());
    let result = Pipeline::run(&ctx, &BatchInputs::new(&transactions, &inventory), WriteMode::Overwrite)?;
    println!(
        "\n📊 Batch: {} loaded, {} rejected, {} joined",
        result.transactions.rows_loaded, result.transactions_rejected, result.joined_rows
    );
    for p in result.top_products.iter().take(3) {
        println!("   🏆 {:<24} {:>12.2}", p.group.as_deref().unwrap_or("<unknown>"), p.total);
    }
    for m in &result.monthly_sales {
        println!("   📅 {}-{:02} {:>12.2}", m.year, m.month, m.total);
    }
    let run = ctx.finish();
    info!(run_id = %run.run_id, "Batch half of the demo finished");

    println!("\n📡 Streaming {} activity events...", count / 5);
    let streaming = StreamingConfig {
        window_seconds: 60,
        allowed_lateness_seconds: 10,
        time_domain: TimeDomain::EventTime,
        tick_millis: 200,
    };
    let (tx, source) = ChannelSource::channel(256);
    let store = InMemoryWindowStore::new();
    let handle = spawn_counter(&streaming, source, store.clone());
    for event in activity_burst(count / 5) {
        if tx.send(event).await.is_err() {
            warn!("Counter stopped before the feed was exhausted");
            break;
        }
    }
    drop(tx);
    let summary = handle.wait().await?;

    let windows = store.snapshot().await;
    for w in windows.iter().take(5) {
        println!(
            "   🪟 {} → {}: {} active users",
            w.window_start.format("%H:%M"),
            w.window_end.format("%H:%M"),
            w.active_users
        );
    }
    println!(
        "   {} windows, {} events accepted, {} late events dropped",
        summary.windows_emitted, summary.events_accepted, summary.events_late
    );
    storage::write_with(
        &windows,
        &demo_dir.join(ACTIVE_USERS_DATASET),
        WriteMode::Overwrite,
        config.sink.compression,
    )?;

    println!("\n✅ Demo output under {}", demo_dir.display());
    Ok(())
}
