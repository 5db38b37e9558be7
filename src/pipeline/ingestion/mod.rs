// Pipeline ingestion: declared schemas and file loading

pub mod loader;
pub mod schema;

pub use loader::{load, load_with_threshold, InputFormat, LoadReport, Loaded};
pub use schema::{FieldKind, FieldSpec, Row, Tabular};
