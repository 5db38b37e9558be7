use crate::constants;
use crate::error::{EtlError, Result};
use crate::pipeline::storage::{SinkCompression, WriteMode};
use crate::streaming::TimeDomain;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Top-level configuration for a batch or streaming run.
///
/// Every section has defaults, so an empty `etl.toml` (or none at all) is valid.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EtlConfig {
    pub loader: LoaderConfig,
    pub anonymizer: AnonymizerConfig,
    pub aggregate: AggregateConfig,
    pub sink: SinkConfig,
    pub streaming: StreamingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Fraction of bad rows above which a load aborts (0.0 aborts on the first one)
    pub max_bad_row_fraction: f64,
    /// Field delimiter for delimited input
    pub delimiter: char,
}

impl LoaderConfig {
    /// Delimiter as the byte the CSV reader expects
    pub fn delimiter_byte(&self) -> u8 {
        u8::try_from(self.delimiter).unwrap_or(b',')
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            max_bad_row_fraction: 0.1,
            delimiter: ',',
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnonymizerConfig {
    /// Prepended to every identifier before hashing
    pub salt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregateConfig {
    pub top_n: usize,
    pub turnover_n: usize,
    /// Number of partitions for grouped reductions; 0 means one per available core
    pub partitions: usize,
}

impl Default for AggregateConfig {
    fn default() -> Self {
        Self {
            top_n: 10,
            turnover_n: 20,
            partitions: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    pub output_dir: PathBuf,
    pub mode: WriteMode,
    pub compression: SinkCompression,
    /// Closed streaming windows buffered before a part file is appended
    pub window_batch: usize,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output"),
            mode: WriteMode::Overwrite,
            compression: SinkCompression::Snappy,
            window_batch: 32,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    pub window_seconds: u64,
    pub allowed_lateness_seconds: u64,
    pub time_domain: TimeDomain,
    pub tick_millis: u64,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            window_seconds: 60,
            allowed_lateness_seconds: 0,
            time_domain: TimeDomain::EventTime,
            tick_millis: 1000,
        }
    }
}

impl EtlConfig {
    /// Load configuration from `path`, or `etl.toml` in the working directory,
    /// or defaults; environment overrides are applied last.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenv::dotenv().ok();

        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => {
                let default_path = Path::new(constants::DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    Self::from_file(default_path)?
                } else {
                    debug!("No config file found, using defaults");
                    Self::default()
                }
            }
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            EtlError::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: EtlConfig = toml::from_str(&content)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(dir) = std::env::var(constants::ENV_OUTPUT_DIR) {
            if !dir.trim().is_empty() {
                self.sink.output_dir = PathBuf::from(dir);
            }
        }
        if let Ok(salt) = std::env::var(constants::ENV_SALT) {
            self.anonymizer.salt = salt;
        }
        if let Ok(p) = std::env::var(constants::ENV_PARTITIONS) {
            self.aggregate.partitions = p.trim().parse().map_err(|_| {
                EtlError::Config(format!(
                    "{} must be a non-negative integer, got '{}'",
                    constants::ENV_PARTITIONS,
                    p
                ))
            })?;
        }
        Ok(())
    }

    /// Reject values no stage can work with
    pub fn validate(&self) -> Result<()> {
        let fraction = self.loader.max_bad_row_fraction;
        if !(0.0..=1.0).contains(&fraction) {
            return Err(EtlError::Config(format!(
                "loader.max_bad_row_fraction must be within [0, 1], got {}",
                fraction
            )));
        }
        if !self.loader.delimiter.is_ascii() {
            return Err(EtlError::Config(format!(
                "loader.delimiter must be a single ASCII character, got '{}'",
                self.loader.delimiter
            )));
        }
        if self.aggregate.top_n == 0 || self.aggregate.turnover_n == 0 {
            return Err(EtlError::Config(
                "aggregate.top_n and aggregate.turnover_n must be at least 1".to_string(),
            ));
        }
        if self.sink.window_batch == 0 {
            return Err(EtlError::Config(
                "sink.window_batch must be at least 1".to_string(),
            ));
        }
        if self.streaming.window_seconds == 0 {
            return Err(EtlError::Config(
                "streaming.window_seconds must be at least 1".to_string(),
            ));
        }
        if self.streaming.tick_millis == 0 {
            return Err(EtlError::Config(
                "streaming.tick_millis must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
