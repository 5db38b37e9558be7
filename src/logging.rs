use std::fs;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initializes the logging system with both console and file output.
pub fn init_logging() {
    init_logging_in("logs");
}

/// Same as [`init_logging`] but writes the rotated JSON log under `log_dir`.
pub fn init_logging_in(log_dir: &str) {
    let _ = fs::create_dir_all(log_dir);

    // Daily rotation, written off the hot path
    let file_appender = tracing_appender::rolling::daily(log_dir, "shop_etl.log");
    let (non_blocking_writer, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer().json().with_writer(non_blocking_writer);

    let console_layer = fmt::layer()
        .with_target(true)
        .with_writer(std::io::stdout);

    // Respect RUST_LOG if set
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("shop_etl=info,warn"));

    // A second init (tests, demos) keeps the first subscriber
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init();

    // Keep the writer alive for the life of the process so logs are flushed on exit
    std::mem::forget(guard);
}
