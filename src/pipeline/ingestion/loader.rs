use crate::context::ExecutionContext;
use crate::error::{EtlError, Result};
use crate::metrics::LoaderMetrics;
use crate::pipeline::ingestion::schema::{Row, Tabular};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Declared layout of an input file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputFormat {
    /// Delimited text with a header row
    Csv { delimiter: u8 },
    /// A JSON array of objects, or one JSON object per line
    Json,
}

impl InputFormat {
    pub fn csv() -> Self {
        InputFormat::Csv { delimiter: b',' }
    }

    /// Pick a format from a file extension, falling back to delimited text
    pub fn from_path(path: &Path, delimiter: u8) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") | Some("jsonl") | Some("ndjson") => InputFormat::Json,
            _ => InputFormat::Csv { delimiter },
        }
    }
}

/// Counts observed while loading one file
#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    pub path: PathBuf,
    pub rows_read: usize,
    pub rows_loaded: usize,
    pub rows_skipped: usize,
    /// First row-level failure, kept for diagnostics
    pub first_error: Option<String>,
}

/// Records loaded from one file plus what happened along the way
#[derive(Debug, Clone)]
pub struct Loaded<T> {
    pub records: Vec<T>,
    pub report: LoadReport,
}

/// Load a file of `T` records using the bad-row policy from `ctx`.
#[instrument(skip(ctx), fields(record = T::NAME))]
pub fn load<T: Tabular>(ctx: &ExecutionContext, path: &Path, format: InputFormat) -> Result<Loaded<T>> {
    load_with_threshold(path, format, ctx.config().loader.max_bad_row_fraction)
}

/// Load a file of `T` records, skipping bad rows unless their share exceeds
/// `max_bad_row_fraction`.
pub fn load_with_threshold<T: Tabular>(
    path: &Path,
    format: InputFormat,
    max_bad_row_fraction: f64,
) -> Result<Loaded<T>> {
    let started = Instant::now();
    if !path.exists() {
        LoaderMetrics::record_abort(T::NAME, "not_found");
        return Err(EtlError::NotFound(path.to_path_buf()));
    }

    let mut collector = RowCollector::<T>::new(path);
    let outcome = match format {
        InputFormat::Csv { delimiter } => read_csv(path, delimiter, &mut collector),
        InputFormat::Json => read_json(path, &mut collector),
    };
    if let Err(e) = outcome {
        let reason = match e {
            EtlError::SchemaMismatch { .. } => "schema_mismatch",
            _ => "io",
        };
        LoaderMetrics::record_abort(T::NAME, reason);
        return Err(e);
    }

    let loaded = collector.finish();
    let report = &loaded.report;

    if report.rows_skipped > 0 {
        let fraction = report.rows_skipped as f64 / report.rows_read as f64;
        if fraction > max_bad_row_fraction {
            LoaderMetrics::record_abort(T::NAME, "bad_rows");
            return Err(EtlError::Format {
                path: path.to_path_buf(),
                message: format!(
                    "{} of {} rows malformed ({:.1}% > {:.1}% allowed); first: {}",
                    report.rows_skipped,
                    report.rows_read,
                    fraction * 100.0,
                    max_bad_row_fraction * 100.0,
                    report.first_error.as_deref().unwrap_or("unknown")
                ),
            });
        }
        warn!(
            "Skipped {} malformed {} rows in {}",
            report.rows_skipped,
            T::NAME,
            path.display()
        );
    }

    LoaderMetrics::record_load(
        T::NAME,
        report.rows_read,
        report.rows_skipped,
        started.elapsed().as_secs_f64(),
    );
    info!(
        "Loaded {} {} rows from {} ({} skipped)",
        report.rows_loaded,
        T::NAME,
        path.display(),
        report.rows_skipped
    );
    Ok(loaded)
}

/// Accumulates parsed records and row failures for one file
struct RowCollector<T> {
    path: PathBuf,
    records: Vec<T>,
    rows_read: usize,
    rows_skipped: usize,
    first_error: Option<String>,
}

impl<T: Tabular> RowCollector<T> {
    fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            records: Vec::new(),
            rows_read: 0,
            rows_skipped: 0,
            first_error: None,
        }
    }

    fn push(&mut self, line: usize, row: std::result::Result<Row, String>) {
        self.rows_read += 1;
        match row.and_then(|r| T::from_row(&r)) {
            Ok(record) => self.records.push(record),
            Err(message) => self.reject(line, message),
        }
    }

    fn reject(&mut self, line: usize, message: String) {
        debug!(line, "Rejected {} row: {}", T::NAME, message);
        self.rows_skipped += 1;
        if self.first_error.is_none() {
            self.first_error = Some(format!("row {}: {}", line, message));
        }
    }

    fn finish(self) -> Loaded<T> {
        let rows_loaded = self.records.len();
        Loaded {
            records: self.records,
            report: LoadReport {
                path: self.path,
                rows_read: self.rows_read,
                rows_loaded,
                rows_skipped: self.rows_skipped,
                first_error: self.first_error,
            },
        }
    }
}

fn read_csv<T: Tabular>(path: &Path, delimiter: u8, collector: &mut RowCollector<T>) -> Result<()> {
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)?;

    let headers = rdr.headers()?.clone();
    let mut positions = Vec::with_capacity(T::schema().len());
    let mut missing = Vec::new();
    for spec in T::schema() {
        match headers.iter().position(|h| h == spec.name) {
            Some(pos) => positions.push(pos),
            None => missing.push(spec.name),
        }
    }
    if !missing.is_empty() {
        return Err(EtlError::schema(
            T::NAME,
            format!(
                "{}: header is missing declared field(s) {}",
                path.display(),
                missing.join(", ")
            ),
        ));
    }
    let extra: Vec<&str> = headers
        .iter()
        .filter(|h| T::field_index(h).is_none())
        .collect();
    if !extra.is_empty() {
        debug!("Ignoring undeclared columns: {}", extra.join(", "));
    }

    for (i, record) in rdr.records().enumerate() {
        // Line 1 is the header
        let line = i + 2;
        let row = match record {
            Ok(record) if record.len() != headers.len() => Err(format!(
                "expected {} columns, found {}",
                headers.len(),
                record.len()
            )),
            Ok(record) => Ok(Row::new(
                positions
                    .iter()
                    .map(|&p| record.get(p).filter(|v| !v.is_empty()).map(str::to_string))
                    .collect(),
            )),
            Err(e) => Err(e.to_string()),
        };
        collector.push(line, row);
    }
    Ok(())
}

fn read_json<T: Tabular>(path: &Path, collector: &mut RowCollector<T>) -> Result<()> {
    let content = fs::read_to_string(path)?;
    let trimmed = content.trim_start();

    let mut seen = vec![false; T::schema().len()];
    // Field presence is only meaningful once some row was an object
    let mut saw_object = false;

    if trimmed.starts_with('[') {
        // One document; an unreadable array is a file-level failure
        let elements: Vec<Value> = serde_json::from_str(trimmed).map_err(|e| EtlError::Format {
            path: path.to_path_buf(),
            message: format!("invalid JSON array: {}", e),
        })?;
        for (i, element) in elements.iter().enumerate() {
            saw_object |= element.is_object();
            collector.push(i + 1, json_row::<T>(element, &mut seen));
        }
    } else {
        for (i, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let row = serde_json::from_str::<Value>(line)
                .map_err(|e| format!("invalid JSON: {}", e))
                .and_then(|v| {
                    saw_object |= v.is_object();
                    json_row::<T>(&v, &mut seen)
                });
            collector.push(i + 1, row);
        }
    }

    if saw_object {
        let missing: Vec<&str> = T::schema()
            .iter()
            .zip(&seen)
            .filter(|(_, seen)| !**seen)
            .map(|(spec, _)| spec.name)
            .collect();
        if !missing.is_empty() {
            return Err(EtlError::schema(
                T::NAME,
                format!(
                    "{}: no object carries declared field(s) {}",
                    path.display(),
                    missing.join(", ")
                ),
            ));
        }
    }
    Ok(())
}

fn json_row<T: Tabular>(value: &Value, seen: &mut [bool]) -> std::result::Result<Row, String> {
    let object = value
        .as_object()
        .ok_or_else(|| "expected a JSON object".to_string())?;

    for (idx, spec) in T::schema().iter().enumerate() {
        if object.contains_key(spec.name) {
            seen[idx] = true;
        }
    }

    let mut cells = Vec::with_capacity(T::schema().len());
    for spec in T::schema() {
        let cell = match object.get(spec.name) {
            None => None,
            Some(v) => {
                match v {
                    Value::Null => None,
                    Value::String(s) if s.trim().is_empty() => None,
                    Value::String(s) => Some(s.trim().to_string()),
                    Value::Number(n) => Some(n.to_string()),
                    Value::Bool(b) => Some(b.to_string()),
                    Value::Array(_) | Value::Object(_) => {
                        return Err(format!("field '{}' holds a nested value", spec.name));
                    }
                }
            }
        };
        cells.push(cell);
    }
    Ok(Row::new(cells))
}
