use crate::error::{EtlError, Result};
use crate::types::{
    ActiveUserWindow, InventoryRecord, JoinedRecord, MonthlyTotal, ProductTotal, TransactionRecord,
};
use arrow::array::{
    Array, ArrayRef, Float64Array, Int32Array, Int64Array, StringArray, TimestampNanosecondArray,
    UInt32Array, UInt64Array,
};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, NaiveDateTime};
use std::sync::Arc;

/// A record type with a fixed Arrow layout.
///
/// `from_batch(to_batch(r)) == r` field for field, nulls included.
pub trait Columnar: Sized {
    /// Dataset kind, used in logs, metrics and `inspect --kind`
    const KIND: &'static str;

    fn schema() -> SchemaRef;
    fn to_batch(records: &[Self]) -> Result<RecordBatch>;
    fn from_batch(batch: &RecordBatch) -> Result<Vec<Self>>;
}

fn timestamp_type() -> DataType {
    DataType::Timestamp(TimeUnit::Nanosecond, None)
}

/// Nanoseconds since the epoch; representable from 1677 to 2262
fn nanos(kind: &'static str, dt: &NaiveDateTime) -> Result<i64> {
    dt.and_utc().timestamp_nanos_opt().ok_or_else(|| {
        EtlError::schema(kind, format!("timestamp {} outside the nanosecond range", dt))
    })
}

fn text<'a>(values: impl Iterator<Item = Option<&'a str>>) -> ArrayRef {
    Arc::new(values.collect::<StringArray>())
}

fn int64(values: impl Iterator<Item = Option<i64>>) -> ArrayRef {
    Arc::new(values.collect::<Int64Array>())
}

fn float64(values: impl Iterator<Item = Option<f64>>) -> ArrayRef {
    Arc::new(values.collect::<Float64Array>())
}

fn timestamps(
    kind: &'static str,
    values: impl Iterator<Item = Option<NaiveDateTime>>,
) -> Result<ArrayRef> {
    let values = values
        .map(|v| v.as_ref().map(|dt| nanos(kind, dt)).transpose())
        .collect::<Result<Vec<_>>>()?;
    Ok(Arc::new(TimestampNanosecondArray::from(values)))
}

/// Typed, name-based access to the columns of one batch
struct Columns<'a> {
    kind: &'static str,
    batch: &'a RecordBatch,
}

impl<'a> Columns<'a> {
    fn new<T: Columnar>(batch: &'a RecordBatch) -> Self {
        Self {
            kind: T::KIND,
            batch,
        }
    }

    fn get<A: Array + 'static>(&self, name: &str) -> Result<&'a A> {
        let batch: &'a RecordBatch = self.batch;
        let column = batch
            .column_by_name(name)
            .ok_or_else(|| EtlError::schema(self.kind, format!("column '{}' missing", name)))?;
        column.as_any().downcast_ref::<A>().ok_or_else(|| {
            EtlError::schema(
                self.kind,
                format!("column '{}' has type {}", name, column.data_type()),
            )
        })
    }

    fn required<T>(&self, name: &str, row: usize, value: Option<T>) -> Result<T> {
        value.ok_or_else(|| {
            EtlError::schema(self.kind, format!("null in required column '{}' at row {}", name, row))
        })
    }
}

fn opt_text(a: &StringArray, i: usize) -> Option<String> {
    (!a.is_null(i)).then(|| a.value(i).to_string())
}

fn opt_i64(a: &Int64Array, i: usize) -> Option<i64> {
    (!a.is_null(i)).then(|| a.value(i))
}

fn opt_f64(a: &Float64Array, i: usize) -> Option<f64> {
    (!a.is_null(i)).then(|| a.value(i))
}

fn opt_ts(a: &TimestampNanosecondArray, i: usize) -> Option<NaiveDateTime> {
    if a.is_null(i) {
        return None;
    }
    Some(DateTime::from_timestamp_nanos(a.value(i)).naive_utc())
}

impl Columnar for TransactionRecord {
    const KIND: &'static str = "transaction";

    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("transaction_id", DataType::Utf8, true),
            Field::new("user_id", DataType::Utf8, true),
            Field::new("product_id", DataType::Utf8, true),
            Field::new("quantity", DataType::Int64, true),
            Field::new("amount", DataType::Float64, true),
            Field::new("transaction_date", timestamp_type(), true),
        ]))
    }

    fn to_batch(records: &[Self]) -> Result<RecordBatch> {
        Ok(RecordBatch::try_new(
            Self::schema(),
            vec![
                text(records.iter().map(|r| r.transaction_id.as_deref())),
                text(records.iter().map(|r| r.user_id.as_deref())),
                text(records.iter().map(|r| r.product_id.as_deref())),
                int64(records.iter().map(|r| r.quantity)),
                float64(records.iter().map(|r| r.amount)),
                timestamps(Self::KIND, records.iter().map(|r| r.transaction_date))?,
            ],
        )?)
    }

    fn from_batch(batch: &RecordBatch) -> Result<Vec<Self>> {
        let c = Columns::new::<Self>(batch);
        let transaction_id = c.get::<StringArray>("transaction_id")?;
        let user_id = c.get::<StringArray>("user_id")?;
        let product_id = c.get::<StringArray>("product_id")?;
        let quantity = c.get::<Int64Array>("quantity")?;
        let amount = c.get::<Float64Array>("amount")?;
        let date = c.get::<TimestampNanosecondArray>("transaction_date")?;

        Ok((0..batch.num_rows())
            .map(|i| TransactionRecord {
                transaction_id: opt_text(transaction_id, i),
                user_id: opt_text(user_id, i),
                product_id: opt_text(product_id, i),
                quantity: opt_i64(quantity, i),
                amount: opt_f64(amount, i),
                transaction_date: opt_ts(date, i),
            })
            .collect())
    }
}

impl Columnar for InventoryRecord {
    const KIND: &'static str = "inventory";

    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("product_id", DataType::Utf8, true),
            Field::new("product_name", DataType::Utf8, true),
            Field::new("product_category", DataType::Utf8, true),
            Field::new("stock_level", DataType::Int64, true),
            Field::new("price", DataType::Float64, true),
        ]))
    }

    fn to_batch(records: &[Self]) -> Result<RecordBatch> {
        Ok(RecordBatch::try_new(
            Self::schema(),
            vec![
                text(records.iter().map(|r| r.product_id.as_deref())),
                text(records.iter().map(|r| r.product_name.as_deref())),
                text(records.iter().map(|r| r.product_category.as_deref())),
                int64(records.iter().map(|r| r.stock_level)),
                float64(records.iter().map(|r| r.price)),
            ],
        )?)
    }

    fn from_batch(batch: &RecordBatch) -> Result<Vec<Self>> {
        let c = Columns::new::<Self>(batch);
        let product_id = c.get::<StringArray>("product_id")?;
        let product_name = c.get::<StringArray>("product_name")?;
        let product_category = c.get::<StringArray>("product_category")?;
        let stock_level = c.get::<Int64Array>("stock_level")?;
        let price = c.get::<Float64Array>("price")?;

        Ok((0..batch.num_rows())
            .map(|i| InventoryRecord {
                product_id: opt_text(product_id, i),
                product_name: opt_text(product_name, i),
                product_category: opt_text(product_category, i),
                stock_level: opt_i64(stock_level, i),
                price: opt_f64(price, i),
            })
            .collect())
    }
}

impl Columnar for JoinedRecord {
    const KIND: &'static str = "joined";

    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("product_id", DataType::Utf8, false),
            Field::new("transaction_id", DataType::Utf8, true),
            Field::new("user_id", DataType::Utf8, true),
            Field::new("quantity", DataType::Int64, true),
            Field::new("amount", DataType::Float64, true),
            Field::new("transaction_date", timestamp_type(), true),
            Field::new("product_name", DataType::Utf8, true),
            Field::new("product_category", DataType::Utf8, true),
            Field::new("stock_level", DataType::Int64, true),
            Field::new("price", DataType::Float64, true),
        ]))
    }

    fn to_batch(records: &[Self]) -> Result<RecordBatch> {
        Ok(RecordBatch::try_new(
            Self::schema(),
            vec![
                text(records.iter().map(|r| Some(r.product_id.as_str()))),
                text(records.iter().map(|r| r.transaction_id.as_deref())),
                text(records.iter().map(|r| r.user_id.as_deref())),
                int64(records.iter().map(|r| r.quantity)),
                float64(records.iter().map(|r| r.amount)),
                timestamps(Self::KIND, records.iter().map(|r| r.transaction_date))?,
                text(records.iter().map(|r| r.product_name.as_deref())),
                text(records.iter().map(|r| r.product_category.as_deref())),
                int64(records.iter().map(|r| r.stock_level)),
                float64(records.iter().map(|r| r.price)),
            ],
        )?)
    }

    fn from_batch(batch: &RecordBatch) -> Result<Vec<Self>> {
        let c = Columns::new::<Self>(batch);
        let product_id = c.get::<StringArray>("product_id")?;
        let transaction_id = c.get::<StringArray>("transaction_id")?;
        let user_id = c.get::<StringArray>("user_id")?;
        let quantity = c.get::<Int64Array>("quantity")?;
        let amount = c.get::<Float64Array>("amount")?;
        let date = c.get::<TimestampNanosecondArray>("transaction_date")?;
        let product_name = c.get::<StringArray>("product_name")?;
        let product_category = c.get::<StringArray>("product_category")?;
        let stock_level = c.get::<Int64Array>("stock_level")?;
        let price = c.get::<Float64Array>("price")?;

        (0..batch.num_rows())
            .map(|i| {
                Ok(JoinedRecord {
                    product_id: c.required("product_id", i, opt_text(product_id, i))?,
                    transaction_id: opt_text(transaction_id, i),
                    user_id: opt_text(user_id, i),
                    quantity: opt_i64(quantity, i),
                    amount: opt_f64(amount, i),
                    transaction_date: opt_ts(date, i),
                    product_name: opt_text(product_name, i),
                    product_category: opt_text(product_category, i),
                    stock_level: opt_i64(stock_level, i),
                    price: opt_f64(price, i),
                })
            })
            .collect()
    }
}

impl Columnar for ProductTotal {
    const KIND: &'static str = "product_total";

    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("group", DataType::Utf8, true),
            Field::new("total", DataType::Float64, false),
        ]))
    }

    fn to_batch(records: &[Self]) -> Result<RecordBatch> {
        Ok(RecordBatch::try_new(
            Self::schema(),
            vec![
                text(records.iter().map(|r| r.group.as_deref())),
                Arc::new(Float64Array::from_iter_values(records.iter().map(|r| r.total))),
            ],
        )?)
    }

    fn from_batch(batch: &RecordBatch) -> Result<Vec<Self>> {
        let c = Columns::new::<Self>(batch);
        let group = c.get::<StringArray>("group")?;
        let total = c.get::<Float64Array>("total")?;

        (0..batch.num_rows())
            .map(|i| {
                Ok(ProductTotal {
                    group: opt_text(group, i),
                    total: c.required("total", i, opt_f64(total, i))?,
                })
            })
            .collect()
    }
}

impl Columnar for MonthlyTotal {
    const KIND: &'static str = "monthly_total";

    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("year", DataType::Int32, false),
            Field::new("month", DataType::UInt32, false),
            Field::new("total", DataType::Float64, false),
        ]))
    }

    fn to_batch(records: &[Self]) -> Result<RecordBatch> {
        Ok(RecordBatch::try_new(
            Self::schema(),
            vec![
                Arc::new(Int32Array::from_iter_values(records.iter().map(|r| r.year))),
                Arc::new(UInt32Array::from_iter_values(records.iter().map(|r| r.month))),
                Arc::new(Float64Array::from_iter_values(records.iter().map(|r| r.total))),
            ],
        )?)
    }

    fn from_batch(batch: &RecordBatch) -> Result<Vec<Self>> {
        let c = Columns::new::<Self>(batch);
        let year = c.get::<Int32Array>("year")?;
        let month = c.get::<UInt32Array>("month")?;
        let total = c.get::<Float64Array>("total")?;

        Ok((0..batch.num_rows())
            .map(|i| MonthlyTotal {
                year: year.value(i),
                month: month.value(i),
                total: total.value(i),
            })
            .collect())
    }
}

impl Columnar for ActiveUserWindow {
    const KIND: &'static str = "active_users";

    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("window_start", timestamp_type(), false),
            Field::new("window_end", timestamp_type(), false),
            Field::new("active_users", DataType::UInt64, false),
        ]))
    }

    fn to_batch(records: &[Self]) -> Result<RecordBatch> {
        Ok(RecordBatch::try_new(
            Self::schema(),
            vec![
                timestamps(Self::KIND, records.iter().map(|r| Some(r.window_start)))?,
                timestamps(Self::KIND, records.iter().map(|r| Some(r.window_end)))?,
                Arc::new(UInt64Array::from_iter_values(records.iter().map(|r| r.active_users))),
            ],
        )?)
    }

    fn from_batch(batch: &RecordBatch) -> Result<Vec<Self>> {
        let c = Columns::new::<Self>(batch);
        let start = c.get::<TimestampNanosecondArray>("window_start")?;
        let end = c.get::<TimestampNanosecondArray>("window_end")?;
        let users = c.get::<UInt64Array>("active_users")?;

        (0..batch.num_rows())
            .map(|i| {
                Ok(ActiveUserWindow {
                    window_start: c.required("window_start", i, opt_ts(start, i))?,
                    window_end: c.required("window_end", i, opt_ts(end, i))?,
                    active_users: users.value(i),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts(h: u32, m: u32, s: u32, nano: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 17)
            .and_then(|d| d.and_hms_nano_opt(h, m, s, nano))
            .unwrap()
    }

    #[test]
    fn test_transaction_batch_keeps_nulls_and_nanos() {
        let records = vec![
            TransactionRecord {
                transaction_id: Some("T1".into()),
                user_id: Some("ab12".into()),
                product_id: None,
                quantity: Some(-3),
                amount: Some(0.1 + 0.2),
                transaction_date: Some(ts(23, 59, 59, 123_456_789)),
            },
            TransactionRecord {
                transaction_id: None,
                user_id: None,
                product_id: Some("P2".into()),
                quantity: None,
                amount: None,
                transaction_date: None,
            },
        ];
        let batch = TransactionRecord::to_batch(&records).unwrap();
        assert_eq!(batch.num_rows(), 2);
        assert_eq!(TransactionRecord::from_batch(&batch).unwrap(), records);
    }

    #[test]
    fn test_required_column_rejects_null() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("group", DataType::Utf8, true),
            Field::new("total", DataType::Float64, true),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                text([Some("a")].into_iter()),
                float64([None].into_iter()),
            ],
        )
        .unwrap();
        let err = ProductTotal::from_batch(&batch).unwrap_err();
        assert!(matches!(err, EtlError::SchemaMismatch { .. }));
    }

    #[test]
    fn test_wrong_column_type() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("year", DataType::Utf8, false),
            Field::new("month", DataType::UInt32, false),
            Field::new("total", DataType::Float64, false),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                text([Some("2024")].into_iter()),
                Arc::new(UInt32Array::from(vec![1u32])),
                Arc::new(Float64Array::from(vec![1.0])),
            ],
        )
        .unwrap();
        match MonthlyTotal::from_batch(&batch).unwrap_err() {
            EtlError::SchemaMismatch { record, message } => {
                assert_eq!(record, "monthly_total");
                assert!(message.contains("year"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_window_batch() {
        let windows = vec![ActiveUserWindow {
            window_start: ts(10, 0, 0, 0),
            window_end: ts(10, 1, 0, 0),
            active_users: 42,
        }];
        let batch = ActiveUserWindow::to_batch(&windows).unwrap();
        assert_eq!(ActiveUserWindow::from_batch(&batch).unwrap(), windows);
    }

    #[test]
    fn test_timestamp_outside_nanosecond_range() {
        let windows = vec![ActiveUserWindow {
            window_start: NaiveDate::from_ymd_opt(2500, 1, 1)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .unwrap(),
            window_end: ts(10, 1, 0, 0),
            active_users: 1,
        }];
        let err = ActiveUserWindow::to_batch(&windows).unwrap_err();
        assert!(matches!(err, EtlError::SchemaMismatch { .. }));
    }
}
