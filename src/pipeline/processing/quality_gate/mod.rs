use crate::error::{EtlError, Result};
use crate::metrics::ProcessingMetrics;
use crate::pipeline::ingestion::Tabular;
use crate::types::{InventoryRecord, TransactionRecord};
use tracing::{debug, info};

/// Records that passed a rule, plus how many were dropped
#[derive(Debug, Clone, PartialEq)]
pub struct Filtered<T> {
    pub records: Vec<T>,
    pub rejected: usize,
}

impl<T> Filtered<T> {
    pub fn kept(&self) -> usize {
        self.records.len()
    }
}

/// Keep the records satisfying `predicate`, preserving order.
///
/// Rejections are not errors: they are only counted.
pub fn filter<T, P>(records: Vec<T>, predicate: P) -> Filtered<T>
where
    P: Fn(&T) -> bool,
{
    let total = records.len();
    let kept: Vec<T> = records.into_iter().filter(|r| predicate(r)).collect();
    Filtered {
        rejected: total - kept.len(),
        records: kept,
    }
}

/// Drop records missing any of `required_fields`.
///
/// Naming a field outside the record's schema is a schema mismatch.
pub fn drop_incomplete<T: Tabular>(records: Vec<T>, required_fields: &[&str]) -> Result<Filtered<T>> {
    if let Some(unknown) = required_fields
        .iter()
        .find(|f| T::field_index(f).is_none())
    {
        return Err(EtlError::schema(
            T::NAME,
            format!("required field '{}' is not declared", unknown),
        ));
    }

    Ok(filter(records, |r| {
        required_fields
            .iter()
            .all(|f| r.field_present(f).unwrap_or(false))
    }))
}

fn has_text(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|s| !s.trim().is_empty())
}

/// Transaction rule: identified, attributed to a user, positive amount
pub fn is_valid_transaction(t: &TransactionRecord) -> bool {
    has_text(&t.transaction_id) && has_text(&t.user_id) && t.amount.is_some_and(|a| a > 0.0)
}

/// A cleaning checkpoint between loading and anonymization
pub trait QualityGate {
    type Record;

    /// Drop or repair records; never fails on a bad record
    fn clean(&self, records: Vec<Self::Record>) -> Result<Filtered<Self::Record>>;
}

/// Drops transactions failing [`is_valid_transaction`]
#[derive(Debug, Default, Clone, Copy)]
pub struct TransactionQualityGate;

impl QualityGate for TransactionQualityGate {
    type Record = TransactionRecord;

    fn clean(&self, records: Vec<TransactionRecord>) -> Result<Filtered<TransactionRecord>> {
        let filtered = filter(records, |t| {
            let ok = is_valid_transaction(t);
            if !ok {
                debug!(
                    transaction_id = t.transaction_id.as_deref().unwrap_or("<null>"),
                    "Rejected transaction"
                );
            }
            ok
        });
        ProcessingMetrics::record_filtered(TransactionRecord::NAME, filtered.kept(), filtered.rejected);
        info!(
            "Quality gate kept {} transactions, rejected {}",
            filtered.kept(),
            filtered.rejected
        );
        Ok(filtered)
    }
}

/// Drops inventory rows without a stock level and normalizes product names
#[derive(Debug, Default, Clone, Copy)]
pub struct InventoryQualityGate;

impl InventoryQualityGate {
    pub const REQUIRED: &'static [&'static str] = &["stock_level"];

    pub fn normalize_name(name: &str) -> String {
        name.trim().to_lowercase()
    }
}

impl QualityGate for InventoryQualityGate {
    type Record = InventoryRecord;

    fn clean(&self, records: Vec<InventoryRecord>) -> Result<Filtered<InventoryRecord>> {
        let Filtered { records, rejected } = drop_incomplete(records, Self::REQUIRED)?;
        let records: Vec<InventoryRecord> = records
            .into_iter()
            .map(|mut r| {
                r.product_name = r.product_name.as_deref().map(Self::normalize_name);
                r
            })
            .collect();

        ProcessingMetrics::record_filtered(InventoryRecord::NAME, records.len(), rejected);
        info!(
            "Quality gate kept {} inventory rows, rejected {}",
            records.len(),
            rejected
        );
        Ok(Filtered { records, rejected })
    }
}
