//! Declared schemas for loadable record types.
//!
//! A loader never infers types: each record type lists its fields and their
//! kinds, and builds itself from a [`Row`] of raw cells aligned to that list.

use crate::types::{InventoryRecord, TransactionRecord};
use chrono::{DateTime, NaiveDate, NaiveDateTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Integer,
    Decimal,
    Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
}

const fn field(name: &'static str, kind: FieldKind) -> FieldSpec {
    FieldSpec { name, kind }
}

/// Raw cells of one input row, in the order of the record's declared schema.
/// `None` is a null cell (empty CSV cell, JSON `null` or missing key).
#[derive(Debug, Clone)]
pub struct Row {
    cells: Vec<Option<String>>,
}

impl Row {
    pub fn new(cells: Vec<Option<String>>) -> Self {
        Self { cells }
    }

    pub fn text(&self, idx: usize) -> Option<String> {
        self.cells.get(idx).cloned().flatten()
    }

    pub fn integer(&self, idx: usize, name: &str) -> Result<Option<i64>, String> {
        match self.raw(idx) {
            None => Ok(None),
            Some(s) => s
                .parse::<i64>()
                .map(Some)
                .map_err(|_| format!("field '{}': '{}' is not an integer", name, s)),
        }
    }

    pub fn decimal(&self, idx: usize, name: &str) -> Result<Option<f64>, String> {
        match self.raw(idx) {
            None => Ok(None),
            Some(s) => match s.parse::<f64>() {
                Ok(v) if v.is_finite() => Ok(Some(v)),
                _ => Err(format!("field '{}': '{}' is not a decimal", name, s)),
            },
        }
    }

    pub fn timestamp(&self, idx: usize, name: &str) -> Result<Option<NaiveDateTime>, String> {
        match self.raw(idx) {
            None => Ok(None),
            Some(s) => parse_timestamp(s)
                .map(Some)
                .ok_or_else(|| format!("field '{}': '{}' is not a timestamp", name, s)),
        }
    }

    fn raw(&self, idx: usize) -> Option<&str> {
        self.cells.get(idx).and_then(|c| c.as_deref())
    }
}

const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

/// Parse the timestamp spellings found in exported sales data.
///
/// RFC 3339 values with an offset are converted to UTC; bare dates map to midnight.
pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    for fmt in TIMESTAMP_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// A record type with a declared schema that the loader can build from rows.
pub trait Tabular: Sized {
    /// Name used in logs, metrics and errors
    const NAME: &'static str;

    fn schema() -> &'static [FieldSpec];

    /// Build a record from a row aligned with [`Tabular::schema`]
    fn from_row(row: &Row) -> Result<Self, String>;

    /// Whether the named field holds a value; `None` if the field is not in the schema
    fn field_present(&self, name: &str) -> Option<bool>;

    fn field_index(name: &str) -> Option<usize> {
        Self::schema().iter().position(|f| f.name == name)
    }
}

const TRANSACTION_SCHEMA: &[FieldSpec] = &[
    field("transaction_id", FieldKind::Text),
    field("user_id", FieldKind::Text),
    field("product_id", FieldKind::Text),
    field("quantity", FieldKind::Integer),
    field("amount", FieldKind::Decimal),
    field("transaction_date", FieldKind::Timestamp),
];

impl Tabular for TransactionRecord {
    const NAME: &'static str = "transaction";

    fn schema() -> &'static [FieldSpec] {
        TRANSACTION_SCHEMA
    }

    fn from_row(row: &Row) -> Result<Self, String> {
        Ok(Self {
            transaction_id: row.text(0),
            user_id: row.text(1),
            product_id: row.text(2),
            quantity: row.integer(3, "quantity")?,
            amount: row.decimal(4, "amount")?,
            transaction_date: row.timestamp(5, "transaction_date")?,
        })
    }

    fn field_present(&self, name: &str) -> Option<bool> {
        let present = match name {
            "transaction_id" => self.transaction_id.is_some(),
            "user_id" => self.user_id.is_some(),
            "product_id" => self.product_id.is_some(),
            "quantity" => self.quantity.is_some(),
            "amount" => self.amount.is_some(),
            "transaction_date" => self.transaction_date.is_some(),
            _ => return None,
        };
        Some(present)
    }
}

const INVENTORY_SCHEMA: &[FieldSpec] = &[
    field("product_id", FieldKind::Text),
    field("product_name", FieldKind::Text),
    field("product_category", FieldKind::Text),
    field("stock_level", FieldKind::Integer),
    field("price", FieldKind::Decimal),
];

impl Tabular for InventoryRecord {
    const NAME: &'static str = "inventory";

    fn schema() -> &'static [FieldSpec] {
        INVENTORY_SCHEMA
    }

    fn from_row(row: &Row) -> Result<Self, String> {
        Ok(Self {
            product_id: row.text(0),
            product_name: row.text(1),
            product_category: row.text(2),
            stock_level: row.integer(3, "stock_level")?,
            price: row.decimal(4, "price")?,
        })
    }

    fn field_present(&self, name: &str) -> Option<bool> {
        let present = match name {
            "product_id" => self.product_id.is_some(),
            "product_name" => self.product_name.is_some(),
            "product_category" => self.product_category.is_some(),
            "stock_level" => self.stock_level.is_some(),
            "price" => self.price.is_some(),
            _ => return None,
        };
        Some(present)
    }
}
