// Pipeline processing: cleaning, anonymization, join and aggregation

pub mod aggregate;
pub mod anonymize;
pub mod enrich;
pub mod quality_gate;

pub use aggregate::{time_series, top_n, turnover_rate, GroupKey, Measure};
pub use anonymize::Anonymizer;
pub use enrich::{inner_join, inner_join_counted, join_inventory};
pub use quality_gate::{Filtered, InventoryQualityGate, QualityGate, TransactionQualityGate};
