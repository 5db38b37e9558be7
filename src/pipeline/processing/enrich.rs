use crate::metrics::ProcessingMetrics;
use crate::types::{InventoryRecord, JoinedRecord, TransactionRecord};
use std::collections::HashMap;
use tracing::{info, instrument};

/// Hash inner join of `left` and `right`.
///
/// A null key never matches. Repeated keys on the right fan out: every
/// matching pair produces one output, in left order then right insertion order.
pub fn inner_join<L, R, O, KL, KR, C>(
    left: &[L],
    right: &[R],
    left_key: KL,
    right_key: KR,
    combine: C,
) -> Vec<O>
where
    KL: Fn(&L) -> Option<&str>,
    KR: Fn(&R) -> Option<&str>,
    C: Fn(&str, &L, &R) -> O,
{
    inner_join_counted(left, right, left_key, right_key, combine).0
}

/// [`inner_join`], also returning how many left rows found no partner
/// (null keys included).
pub fn inner_join_counted<L, R, O, KL, KR, C>(
    left: &[L],
    right: &[R],
    left_key: KL,
    right_key: KR,
    combine: C,
) -> (Vec<O>, usize)
where
    KL: Fn(&L) -> Option<&str>,
    KR: Fn(&R) -> Option<&str>,
    C: Fn(&str, &L, &R) -> O,
{
    let mut index: HashMap<&str, Vec<&R>> = HashMap::with_capacity(right.len());
    for r in right {
        if let Some(key) = right_key(r) {
            index.entry(key).or_default().push(r);
        }
    }

    let mut joined = Vec::with_capacity(left.len());
    let mut unmatched = 0;
    for l in left {
        match left_key(l).and_then(|key| index.get(key).map(|m| (key, m))) {
            Some((key, matches)) => joined.extend(matches.iter().map(|r| combine(key, l, *r))),
            None => unmatched += 1,
        }
    }
    (joined, unmatched)
}

/// Enrich transactions with the inventory rows sharing their `product_id`.
#[instrument(skip_all, fields(transactions = transactions.len(), inventory = inventory.len()))]
pub fn join_inventory(
    transactions: &[TransactionRecord],
    inventory: &[InventoryRecord],
) -> Vec<JoinedRecord> {
    let (joined, unmatched) = inner_join_counted(
        transactions,
        inventory,
        |t| t.product_id.as_deref(),
        |i| i.product_id.as_deref(),
        JoinedRecord::from_pair,
    );

    ProcessingMetrics::record_join(joined.len(), unmatched);
    info!(
        "Joined {} rows ({} transactions without inventory match)",
        joined.len(),
        unmatched
    );
    joined
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(id: &str, product: Option<&str>) -> TransactionRecord {
        TransactionRecord {
            transaction_id: Some(id.into()),
            user_id: Some("u".into()),
            product_id: product.map(String::from),
            quantity: Some(1),
            amount: Some(1.0),
            transaction_date: None,
        }
    }

    fn inv(product: Option<&str>, name: &str) -> InventoryRecord {
        InventoryRecord {
            product_id: product.map(String::from),
            product_name: Some(name.into()),
            product_category: None,
            stock_level: Some(1),
            price: Some(2.0),
        }
    }

    #[test]
    fn test_unmatched_key_excluded() {
        let joined = join_inventory(
            &[tx("T1", Some("P1")), tx("T2", Some("X9"))],
            &[inv(Some("P1"), "hammer")],
        );
        assert_eq!(joined.len(), 1);
        assert_eq!(joined[0].transaction_id.as_deref(), Some("T1"));
        assert!(joined.iter().all(|j| j.product_id != "X9"));
    }

    #[test]
    fn test_every_joined_row_has_both_sides() {
        let left = vec![tx("T1", Some("P1")), tx("T2", Some("P2")), tx("T3", None)];
        let right = vec![inv(Some("P2"), "saw"), inv(None, "ghost"), inv(Some("P1"), "hammer")];
        let joined = join_inventory(&left, &right);
        for j in &joined {
            assert!(left.iter().any(|t| t.product_id.as_deref() == Some(j.product_id.as_str())
                && t.transaction_id == j.transaction_id));
            assert!(right.iter().any(|i| i.product_id.as_deref() == Some(j.product_id.as_str())
                && i.product_name == j.product_name));
        }
        assert_eq!(joined.len(), 2);
    }

    #[test]
    fn test_null_keys_never_match() {
        let joined = join_inventory(&[tx("T1", None)], &[inv(None, "ghost")]);
        assert!(joined.is_empty());
    }

    #[test]
    fn test_duplicate_inventory_keys_fan_out() {
        let joined = join_inventory(
            &[tx("T1", Some("P1"))],
            &[inv(Some("P1"), "first"), inv(Some("P1"), "second")],
        );
        assert_eq!(joined.len(), 2);
        assert_eq!(joined[0].product_name.as_deref(), Some("first"));
        assert_eq!(joined[1].product_name.as_deref(), Some("second"));
    }

    #[test]
    fn test_generic_join_preserves_left_order() {
        let left = vec![("b", 1), ("a", 2), ("b", 3)];
        let right = vec![("a", "A"), ("b", "B")];
        let out = inner_join(
            &left,
            &right,
            |l| Some(l.0),
            |r| Some(r.0),
            |_, l, r| (l.1, r.1),
        );
        assert_eq!(out, vec![(1, "B"), (2, "A"), (3, "B")]);
    }

    #[test]
    fn test_unmatched_counted_per_row() {
        let mut no_id = tx("ignored", Some("P1"));
        no_id.transaction_id = None;
        // Repeated id: one copy matches, the other does not
        let left = vec![tx("T1", Some("P1")), tx("T1", Some("X9")), no_id, tx("T3", None)];
        let (joined, unmatched) = inner_join_counted(
            &left,
            &[inv(Some("P1"), "hammer")],
            |t| t.product_id.as_deref(),
            |i| i.product_id.as_deref(),
            JoinedRecord::from_pair,
        );
        assert_eq!(joined.len(), 2);
        assert_eq!(unmatched, 2);
    }
}
