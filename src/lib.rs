pub mod config;
pub mod constants;
pub mod context;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod streaming;
pub mod types;

pub use config::EtlConfig;
pub use context::ExecutionContext;
pub use error::{EtlError, Result};
