use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use shop_etl::pipeline::ingestion::InputFormat;
use shop_etl::pipeline::storage::{self, Columnar, WriteMode};
use shop_etl::pipeline::{BatchInputs, Pipeline};
use shop_etl::streaming::{
    spawn_counter, ChannelWindowStore, DatasetWindowStore, EventSource, JsonLinesSource,
    StreamSummary, TimeDomain, WindowStore,
};
use shop_etl::types::{
    ActiveUserWindow, InventoryRecord, JoinedRecord, MonthlyTotal, ProductTotal, TransactionRecord,
};
use shop_etl::{logging, metrics, EtlConfig, ExecutionContext};
use std::path::{Path, PathBuf};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "shop_etl")]
#[command(about = "Batch and streaming ETL over e-commerce sales data")]
#[command(version = "0.1.0")]
struct Cli {
    /// Config file (defaults to ./etl.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load, clean, anonymize, join, aggregate and write one batch
    Batch {
        #[arg(long)]
        transactions: PathBuf,
        #[arg(long)]
        inventory: PathBuf,
        /// Input format; picked from each file extension when omitted
        #[arg(long, value_enum)]
        format: Option<CliFormat>,
        /// Output directory (overrides sink.output_dir)
        #[arg(long)]
        output: Option<PathBuf>,
        /// Behaviour when a dataset already exists (overrides sink.mode)
        #[arg(long, value_enum)]
        mode: Option<CliMode>,
        /// Print the Prometheus metrics snapshot after the run
        #[arg(long)]
        metrics: bool,
    },
    /// Count distinct active users per window over a JSON-lines event feed
    Stream {
        /// Event file, or `-` for stdin
        #[arg(long, default_value = "-")]
        input: String,
        /// Window size in seconds (overrides streaming.window_seconds)
        #[arg(long)]
        window_seconds: Option<u64>,
        /// Stamp events on arrival and close windows on the wall clock
        #[arg(long)]
        processing_time: bool,
        /// Output directory for the active_users dataset
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Print the row count and first rows of a written dataset
    Inspect {
        dataset: PathBuf,
        #[arg(long, value_enum)]
        kind: DatasetKind,
        #[arg(long, default_value_t = 5)]
        limit: usize,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum CliFormat {
    Csv,
    Json,
}

#[derive(Clone, Copy, ValueEnum)]
enum CliMode {
    Overwrite,
    Append,
    Error,
}

impl From<CliMode> for WriteMode {
    fn from(mode: CliMode) -> Self {
        match mode {
            CliMode::Overwrite => WriteMode::Overwrite,
            CliMode::Append => WriteMode::Append,
            CliMode::Error => WriteMode::ErrorIfExists,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum DatasetKind {
    Transactions,
    Inventory,
    Joined,
    TopProducts,
    MonthlySales,
    Turnover,
    ActiveUsers,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_logging();
    let cli = Cli::parse();
    let mut config = EtlConfig::load(cli.config.as_deref()).context("loading configuration")?;
    metrics::init_metrics();

    match cli.command {
        Commands::Batch {
            transactions,
            inventory,
            format,
            output,
            mode,
            metrics: print_metrics,
        } => {
            if let Some(dir) = output {
                config.sink.output_dir = dir;
            }
            let mode = mode.map(WriteMode::from).unwrap_or(config.sink.mode);
            let delimiter = config.loader.delimiter_byte();
            let mut inputs = BatchInputs::new(transactions, inventory);
            if let Some(format) = format {
                inputs = inputs.with_format(match format {
                    CliFormat::Csv => InputFormat::Csv { delimiter },
                    CliFormat::Json => InputFormat::Json,
                });
            }
            run_batch(config, inputs, mode).await?;
            if print_metrics {
                if let Some(text) = metrics::render() {
                    println!("\n{}", text);
                }
            }
        }
        Commands::Stream {
            input,
            window_seconds,
            processing_time,
            output,
        } => {
            if let Some(secs) = window_seconds {
                config.streaming.window_seconds = secs;
            }
            if processing_time {
                config.streaming.time_domain = TimeDomain::ProcessingTime;
            }
            if let Some(dir) = output {
                config.sink.output_dir = dir;
            }
            config.validate()?;

            if input == "-" {
                run_stream(&config, JsonLinesSource::stdin()).await?;
            } else {
                let source = JsonLinesSource::open(Path::new(&input)).await?;
                run_stream(&config, source).await?;
            }
        }
        Commands::Inspect {
            dataset,
            kind,
            limit,
        } => match kind {
            DatasetKind::Transactions => inspect::<TransactionRecord>(&dataset, limit)?,
            DatasetKind::Inventory => inspect::<InventoryRecord>(&dataset, limit)?,
            DatasetKind::Joined => inspect::<JoinedRecord>(&dataset, limit)?,
            DatasetKind::TopProducts | DatasetKind::Turnover => {
                inspect::<ProductTotal>(&dataset, limit)?
            }
            DatasetKind::MonthlySales => inspect::<MonthlyTotal>(&dataset, limit)?,
            DatasetKind::ActiveUsers => inspect::<ActiveUserWindow>(&dataset, limit)?,
        },
    }

    Ok(())
}

async fn run_batch(config: EtlConfig, inputs: BatchInputs, mode: WriteMode) -> anyhow::Result<()> {
    println!("🔄 Running batch pipeline...");
    let ctx = ExecutionContext::new(config);

    // Aggregation is CPU bound; keep it off the async workers
    let worker_ctx = ctx.clone();
    let outcome = tokio::task::spawn_blocking(move || Pipeline::run(&worker_ctx, &inputs, mode))
        .await
        .context("batch worker panicked")?;

    let result = match outcome {
        Ok(result) => result,
        Err(e) => {
            error!("Batch pipeline failed: {}", e);
            println!("❌ Batch pipeline failed: {}", e);
            ctx.finish();
            return Err(e.into());
        }
    };

    println!("\n📊 Batch Results (run {}):", result.run_id);
    println!(
        "   Transactions: {} read, {} loaded, {} malformed, {} rejected",
        result.transactions.rows_read,
        result.transactions.rows_loaded,
        result.transactions.rows_skipped,
        result.transactions_rejected
    );
    println!(
        "   Inventory: {} read, {} loaded, {} malformed, {} rejected",
        result.inventory.rows_read,
        result.inventory.rows_loaded,
        result.inventory.rows_skipped,
        result.inventory_rejected
    );
    println!("   Joined rows: {}", result.joined_rows);

    println!("\n🏆 Top products by revenue:");
    for (rank, p) in result.top_products.iter().enumerate() {
        println!("   {:>2}. {:<30} {:>12.2}", rank + 1, label(&p.group), p.total);
    }
    println!("\n📅 Monthly sales:");
    for m in &result.monthly_sales {
        println!("   {}-{:02} {:>12.2}", m.year, m.month, m.total);
    }
    println!("\n🔁 Turnover (quantity × price):");
    for (rank, p) in result.turnover.iter().enumerate() {
        println!("   {:>2}. {:<30} {:>12.2}", rank + 1, label(&p.group), p.total);
    }

    println!("\n💾 Datasets written:");
    for out in &result.outputs {
        println!("   {} ({} rows, {} bytes)", out.part_file.display(), out.rows, out.bytes);
    }

    let summary = ctx.finish();
    println!("\n✅ Completed in {:.2}s", summary.duration_secs);
    Ok(())
}

fn label(group: &Option<String>) -> &str {
    group.as_deref().unwrap_or("<unknown>")
}

async fn run_stream<S: EventSource + 'static>(config: &EtlConfig, source: S) -> anyhow::Result<()> {
    println!(
        "📡 Counting active users in {}s windows ({:?}); Ctrl-C to stop",
        config.streaming.window_seconds, config.streaming.time_domain
    );

    // Windows are printed as they close and appended to the dataset in batches
    let dataset = DatasetWindowStore::from_config(&config.sink);
    let (store, mut rx) = ChannelWindowStore::channel(64);
    let printer = tokio::spawn(async move {
        while let Some(window) = rx.recv().await {
            match serde_json::to_string(&window) {
                Ok(line) => println!("{}", line),
                Err(e) => error!("Failed to encode window: {}", e),
            }
            dataset.store(window).await?;
        }
        dataset.flush().await?;
        Ok::<_, shop_etl::EtlError>(dataset)
    });

    let handle = spawn_counter(&config.streaming, source, store);
    let counted = handle
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Ctrl-C received, flushing open windows");
        })
        .await;
    let dataset = printer.await.context("window printer panicked")??;
    let summary: StreamSummary = counted?;

    println!("💾 Windows appended under {}", dataset.dir().display());
    println!(
        "\n✅ Stream stopped: {} events accepted, {} late, {} windows emitted",
        summary.events_accepted, summary.events_late, summary.windows_emitted
    );
    Ok(())
}

fn inspect<T: Columnar + Serialize>(dataset: &Path, limit: usize) -> anyhow::Result<()> {
    let rows = storage::row_count(dataset)?;
    let parts = storage::part_files(dataset)?.len();
    println!("📦 {} ({}): {} rows in {} part file(s)", dataset.display(), T::KIND, rows, parts);

    for record in storage::read::<T>(dataset)?.iter().take(limit) {
        println!("   {}", serde_json::to_string(record)?);
    }
    Ok(())
}
