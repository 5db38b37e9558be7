use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("Malformed input {path}: {message}")]
    Format { path: PathBuf, message: String },

    #[error("Schema mismatch for {record}: {message}")]
    SchemaMismatch { record: &'static str, message: String },

    #[error("Dataset already exists at {0}")]
    WriteConflict(PathBuf),

    #[error("Input file not found: {0}")]
    NotFound(PathBuf),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Streaming task failed: {0}")]
    Stream(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EtlError {
    pub fn schema(record: &'static str, message: impl Into<String>) -> Self {
        EtlError::SchemaMismatch {
            record,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EtlError>;
