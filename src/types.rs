use chrono::{Datelike, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// A sales transaction as loaded from the transactions file.
///
/// Every field is nullable on load; the quality gate enforces that
/// `transaction_id` and `user_id` are present and `amount > 0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub transaction_id: Option<String>,
    pub user_id: Option<String>,
    pub product_id: Option<String>,
    pub quantity: Option<i64>,
    pub amount: Option<f64>,
    pub transaction_date: Option<NaiveDateTime>,
}

/// A product row from the inventory file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryRecord {
    pub product_id: Option<String>,
    pub product_name: Option<String>,
    pub product_category: Option<String>,
    pub stock_level: Option<i64>,
    pub price: Option<f64>,
}

/// A transaction enriched with the inventory row sharing its `product_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinedRecord {
    pub product_id: String,
    pub transaction_id: Option<String>,
    pub user_id: Option<String>,
    pub quantity: Option<i64>,
    pub amount: Option<f64>,
    pub transaction_date: Option<NaiveDateTime>,
    pub product_name: Option<String>,
    pub product_category: Option<String>,
    pub stock_level: Option<i64>,
    pub price: Option<f64>,
}

impl JoinedRecord {
    pub fn from_pair(product_id: &str, t: &TransactionRecord, i: &InventoryRecord) -> Self {
        Self {
            product_id: product_id.to_string(),
            transaction_id: t.transaction_id.clone(),
            user_id: t.user_id.clone(),
            quantity: t.quantity,
            amount: t.amount,
            transaction_date: t.transaction_date,
            product_name: i.product_name.clone(),
            product_category: i.product_category.clone(),
            stock_level: i.stock_level,
            price: i.price,
        }
    }

    /// Calendar (year, month) of the transaction, if dated
    pub fn year_month(&self) -> Option<(i32, u32)> {
        self.transaction_date.map(|d| (d.year(), d.month()))
    }
}

/// One row of a top-N style report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductTotal {
    /// Group label; `None` groups the rows whose key was null
    pub group: Option<String>,
    pub total: f64,
}

/// One row of the monthly time series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyTotal {
    pub year: i32,
    pub month: u32,
    pub total: f64,
}

/// Distinct active users observed in one closed streaming window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveUserWindow {
    pub window_start: NaiveDateTime,
    pub window_end: NaiveDateTime,
    pub active_users: u64,
}

/// One element of the live activity feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub user_id: String,
    pub event_time: NaiveDateTime,
}
