// Pipeline storage: columnar datasets on local disk

pub mod columnar;

pub use columnar::Columnar;

use crate::context::ExecutionContext;
use crate::error::{EtlError, Result};
use crate::metrics::SinkMetrics;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use parquet::file::reader::{FileReader, SerializedFileReader};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// What to do when the target dataset already holds data
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Replace every existing part file
    #[default]
    Overwrite,
    /// Add one part file next to the existing ones
    Append,
    /// Refuse to touch a dataset that already has part files
    ErrorIfExists,
}

impl FromStr for WriteMode {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "overwrite" => Ok(WriteMode::Overwrite),
            "append" => Ok(WriteMode::Append),
            "error" | "error_if_exists" | "errorifexists" => Ok(WriteMode::ErrorIfExists),
            other => Err(EtlError::Config(format!("unknown write mode '{}'", other))),
        }
    }
}

/// Part file compression codec
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkCompression {
    #[default]
    Snappy,
    Uncompressed,
}

impl SinkCompression {
    fn codec(self) -> Compression {
        match self {
            SinkCompression::Snappy => Compression::SNAPPY,
            SinkCompression::Uncompressed => Compression::UNCOMPRESSED,
        }
    }
}

/// Outcome of one sink call
#[derive(Debug, Clone, Serialize)]
pub struct WriteReport {
    pub dataset: PathBuf,
    pub part_file: PathBuf,
    pub rows: usize,
    pub bytes: u64,
    /// Part files removed by an overwrite
    pub replaced: usize,
}

const PART_PREFIX: &str = "part-";
const PART_SUFFIX: &str = ".parquet";

/// Persist `records` as one new part file of the dataset at `dir`.
#[instrument(skip(ctx, records), fields(kind = T::KIND, rows = records.len()))]
pub fn write<T: Columnar>(
    ctx: &ExecutionContext,
    records: &[T],
    dir: &Path,
    mode: WriteMode,
) -> Result<WriteReport> {
    write_with(records, dir, mode, ctx.config().sink.compression)
}

/// [`write`] without a context, for callers outside a batch run
pub fn write_with<T: Columnar>(
    records: &[T],
    dir: &Path,
    mode: WriteMode,
    compression: SinkCompression,
) -> Result<WriteReport> {
    let started = Instant::now();
    let existing = part_files(dir)?;

    if mode == WriteMode::ErrorIfExists && !existing.is_empty() {
        SinkMetrics::record_conflict();
        warn!(
            "Refusing to write {}: {} part file(s) already present",
            dir.display(),
            existing.len()
        );
        return Err(EtlError::WriteConflict(dir.to_path_buf()));
    }

    fs::create_dir_all(dir)?;
    let index = match mode {
        WriteMode::Append => next_part_index(&existing),
        _ => 0,
    };
    let part_file = dir.join(format!(
        "{}{:05}-{}{}",
        PART_PREFIX,
        index,
        Uuid::new_v4().simple(),
        PART_SUFFIX
    ));

    let batch = T::to_batch(records)?;
    let props = WriterProperties::builder()
        .set_compression(compression.codec())
        .build();
    let file = File::create(&part_file)?;
    let mut writer = ArrowWriter::try_new(file, T::schema(), Some(props))?;
    if batch.num_rows() > 0 {
        writer.write(&batch)?;
    }
    writer.close()?;

    // The new part is complete before the old ones go away
    let replaced = if mode == WriteMode::Overwrite {
        for old in &existing {
            fs::remove_file(old)?;
        }
        existing.len()
    } else {
        0
    };

    let bytes = fs::metadata(&part_file)?.len();
    SinkMetrics::record_write(T::KIND, records.len(), bytes, started.elapsed().as_secs_f64());
    info!(
        "Wrote {} {} rows to {} ({} bytes, {} part file(s) replaced)",
        records.len(),
        T::KIND,
        part_file.display(),
        bytes,
        replaced
    );

    Ok(WriteReport {
        dataset: dir.to_path_buf(),
        part_file,
        rows: records.len(),
        bytes,
        replaced,
    })
}

/// Read every part file of a dataset, in part order.
#[instrument(fields(kind = T::KIND))]
pub fn read<T: Columnar>(dir: &Path) -> Result<Vec<T>> {
    if !dir.is_dir() {
        return Err(EtlError::NotFound(dir.to_path_buf()));
    }

    let mut records = Vec::new();
    for part in part_files(dir)? {
        let reader = ParquetRecordBatchReaderBuilder::try_new(File::open(&part)?)?.build()?;
        for batch in reader {
            records.extend(T::from_batch(&batch?)?);
        }
        debug!("Read part file {}", part.display());
    }
    Ok(records)
}

/// Total row count of a dataset from part file footers, without decoding rows
pub fn row_count(dir: &Path) -> Result<u64> {
    if !dir.is_dir() {
        return Err(EtlError::NotFound(dir.to_path_buf()));
    }
    let mut total = 0u64;
    for part in part_files(dir)? {
        let reader = SerializedFileReader::new(File::open(&part)?)?;
        total += reader.metadata().file_metadata().num_rows().max(0) as u64;
    }
    Ok(total)
}

/// Part files of a dataset sorted by name; empty when the directory is absent
pub fn part_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut parts = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_part = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(PART_PREFIX) && n.ends_with(PART_SUFFIX));
        if is_part && path.is_file() {
            parts.push(path);
        }
    }
    parts.sort();
    Ok(parts)
}

fn part_index(path: &Path) -> Option<usize> {
    let name = path.file_name()?.to_str()?;
    name.strip_prefix(PART_PREFIX)?.split('-').next()?.parse().ok()
}

fn next_part_index(existing: &[PathBuf]) -> usize {
    existing
        .iter()
        .filter_map(|p| part_index(p))
        .max()
        .map_or(0, |i| i + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{InventoryRecord, ProductTotal};
    use tempfile::TempDir;

    fn totals(values: &[(&str, f64)]) -> Vec<ProductTotal> {
        values
            .iter()
            .map(|(g, t)| ProductTotal {
                group: Some(g.to_string()),
                total: *t,
            })
            .collect()
    }

    #[test]
    fn test_round_trip() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("inventory");
        let records = vec![
            InventoryRecord {
                product_id: Some("P1".into()),
                product_name: Some("hammer".into()),
                product_category: None,
                stock_level: Some(0),
                price: Some(f64::MIN_POSITIVE),
            },
            InventoryRecord {
                product_id: None,
                product_name: None,
                product_category: Some("tools".into()),
                stock_level: None,
                price: None,
            },
        ];
        let report = write_with(&records, &dir, WriteMode::Overwrite, SinkCompression::Snappy).unwrap();
        assert_eq!(report.rows, 2);
        assert!(report.bytes > 0);
        assert_eq!(read::<InventoryRecord>(&dir).unwrap(), records);
        assert_eq!(row_count(&dir).unwrap(), 2);
    }

    #[test]
    fn test_loaded_nanosecond_timestamps_survive_round_trip() {
        use crate::pipeline::ingestion::{load_with_threshold, InputFormat};
        use crate::types::TransactionRecord;

        let tmp = TempDir::new().unwrap();
        let input = tmp.path().join("transactions.csv");
        fs::write(
            &input,
            "transaction_id,user_id,product_id,quantity,amount,transaction_date\n\
             T1,u1,P1,1,2.5,2024-01-01 00:00:00.123456789\n",
        )
        .unwrap();
        let loaded =
            load_with_threshold::<TransactionRecord>(&input, InputFormat::Csv { delimiter: b',' }, 0.0)
                .unwrap();
        let stamp = loaded.records[0].transaction_date.unwrap();
        assert_eq!(stamp.and_utc().timestamp_subsec_nanos(), 123_456_789);

        let dir = tmp.path().join("transactions");
        write_with(&loaded.records, &dir, WriteMode::Overwrite, SinkCompression::Snappy).unwrap();
        assert_eq!(read::<TransactionRecord>(&dir).unwrap(), loaded.records);
    }

    #[test]
    fn test_overwrite_replaces() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("top");
        write_with(&totals(&[("a", 1.0)]), &dir, WriteMode::Overwrite, SinkCompression::Snappy).unwrap();
        let report =
            write_with(&totals(&[("b", 2.0)]), &dir, WriteMode::Overwrite, SinkCompression::Uncompressed)
                .unwrap();
        assert_eq!(report.replaced, 1);
        assert_eq!(part_files(&dir).unwrap().len(), 1);
        assert_eq!(read::<ProductTotal>(&dir).unwrap(), totals(&[("b", 2.0)]));
    }

    #[test]
    fn test_append_adds_part_in_order() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("top");
        write_with(&totals(&[("a", 1.0)]), &dir, WriteMode::Append, SinkCompression::Snappy).unwrap();
        write_with(&totals(&[("b", 2.0), ("c", 3.0)]), &dir, WriteMode::Append, SinkCompression::Snappy)
            .unwrap();
        assert_eq!(part_files(&dir).unwrap().len(), 2);
        assert_eq!(
            read::<ProductTotal>(&dir).unwrap(),
            totals(&[("a", 1.0), ("b", 2.0), ("c", 3.0)])
        );
    }

    #[test]
    fn test_error_if_exists() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("top");
        // An empty directory holds no data yet
        fs::create_dir_all(&dir).unwrap();
        write_with(&totals(&[("a", 1.0)]), &dir, WriteMode::ErrorIfExists, SinkCompression::Snappy).unwrap();

        let err = write_with(&totals(&[("b", 2.0)]), &dir, WriteMode::ErrorIfExists, SinkCompression::Snappy)
            .unwrap_err();
        assert!(matches!(err, EtlError::WriteConflict(_)));
        assert_eq!(read::<ProductTotal>(&dir).unwrap(), totals(&[("a", 1.0)]));
    }

    #[test]
    fn test_empty_dataset_round_trip() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("empty");
        write_with::<ProductTotal>(&[], &dir, WriteMode::Overwrite, SinkCompression::Snappy).unwrap();
        assert!(read::<ProductTotal>(&dir).unwrap().is_empty());
    }

    #[test]
    fn test_read_missing_dataset() {
        let tmp = TempDir::new().unwrap();
        let err = read::<ProductTotal>(&tmp.path().join("nope")).unwrap_err();
        assert!(matches!(err, EtlError::NotFound(_)));
    }

    #[test]
    fn test_read_wrong_kind_is_schema_mismatch() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("top");
        write_with(&totals(&[("a", 1.0)]), &dir, WriteMode::Overwrite, SinkCompression::Snappy).unwrap();
        let err = read::<InventoryRecord>(&dir).unwrap_err();
        assert!(matches!(err, EtlError::SchemaMismatch { .. }));
    }

    #[test]
    fn test_write_mode_parsing() {
        assert_eq!("append".parse::<WriteMode>().unwrap(), WriteMode::Append);
        assert_eq!("error".parse::<WriteMode>().unwrap(), WriteMode::ErrorIfExists);
        assert!("merge".parse::<WriteMode>().is_err());
    }

    #[test]
    fn test_part_index() {
        assert_eq!(part_index(Path::new("/x/part-00007-abc.parquet")), Some(7));
        assert_eq!(part_index(Path::new("/x/other.parquet")), None);
        assert_eq!(
            next_part_index(&[PathBuf::from("part-00000-a.parquet"), PathBuf::from("part-00003-b.parquet")]),
            4
        );
    }
}
