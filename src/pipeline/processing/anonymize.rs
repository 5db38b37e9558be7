use crate::metrics::ProcessingMetrics;
use crate::types::TransactionRecord;
use sha2::{Digest, Sha256};
use tracing::info;

/// Length of every pseudonymous identifier (hex SHA-256)
pub const DIGEST_LEN: usize = 64;

/// Replaces user identifiers with a salted one-way digest.
///
/// The same salt and identifier always give the same digest, so grouping or
/// joining on the anonymized id stays consistent across runs.
#[derive(Debug, Clone, Default)]
pub struct Anonymizer {
    salt: String,
}

impl Anonymizer {
    pub fn new(salt: impl Into<String>) -> Self {
        Self { salt: salt.into() }
    }

    pub fn digest(&self, id: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.salt.as_bytes());
        hasher.update(id.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn anonymize(&self, mut record: TransactionRecord) -> TransactionRecord {
        record.user_id = record.user_id.map(|id| self.digest(&id));
        record
    }

    pub fn anonymize_all(&self, records: Vec<TransactionRecord>) -> Vec<TransactionRecord> {
        let anonymized: Vec<TransactionRecord> =
            records.into_iter().map(|r| self.anonymize(r)).collect();
        let count = anonymized.iter().filter(|r| r.user_id.is_some()).count();
        ProcessingMetrics::record_anonymized(count);
        info!("Anonymized {} user identifiers", count);
        anonymized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(user: Option<&str>) -> TransactionRecord {
        TransactionRecord {
            transaction_id: Some("T1".into()),
            user_id: user.map(String::from),
            product_id: Some("P1".into()),
            quantity: Some(1),
            amount: Some(1.0),
            transaction_date: None,
        }
    }

    #[test]
    fn test_deterministic_fixed_length_hex() {
        let anon = Anonymizer::default();
        let a = anon.anonymize(tx(Some("user-42")));
        let b = anon.anonymize(tx(Some("user-42")));
        assert_eq!(a.user_id, b.user_id);

        let id = a.user_id.unwrap();
        assert_eq!(id.len(), DIGEST_LEN);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(id, "user-42");
    }

    #[test]
    fn test_known_digest() {
        // sha256("abc")
        assert_eq!(
            Anonymizer::default().digest("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_distinct_users_distinct_digests() {
        let anon = Anonymizer::default();
        assert_ne!(anon.digest("u1"), anon.digest("u2"));
    }

    #[test]
    fn test_salt_changes_digest() {
        assert_ne!(Anonymizer::new("pepper").digest("u1"), Anonymizer::default().digest("u1"));
    }

    #[test]
    fn test_null_user_stays_null() {
        let out = Anonymizer::default().anonymize(tx(None));
        assert_eq!(out.user_id, None);
        assert_eq!(out.transaction_id.as_deref(), Some("T1"));
    }
}
