use crate::constants::{
    JOINED_DATASET, MONTHLY_SALES_DATASET, TOP_PRODUCTS_DATASET, TURNOVER_DATASET,
};
use crate::context::ExecutionContext;
use crate::error::Result;
use crate::pipeline::ingestion::{self, InputFormat, LoadReport};
use crate::pipeline::processing::aggregate::{self, GroupKey, Measure};
use crate::pipeline::processing::anonymize::Anonymizer;
use crate::pipeline::processing::enrich;
use crate::pipeline::processing::quality_gate::{
    InventoryQualityGate, QualityGate, TransactionQualityGate,
};
use crate::pipeline::storage::{self, WriteMode, WriteReport};
use crate::types::{InventoryRecord, JoinedRecord, MonthlyTotal, ProductTotal, TransactionRecord};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, instrument};
use uuid::Uuid;

/// Input files for one batch run
#[derive(Debug, Clone)]
pub struct BatchInputs {
    pub transactions: PathBuf,
    pub inventory: PathBuf,
    /// Forced input format; chosen from each file's extension when `None`
    pub format: Option<InputFormat>,
}

impl BatchInputs {
    pub fn new(transactions: impl Into<PathBuf>, inventory: impl Into<PathBuf>) -> Self {
        Self {
            transactions: transactions.into(),
            inventory: inventory.into(),
            format: None,
        }
    }

    pub fn with_format(mut self, format: InputFormat) -> Self {
        self.format = Some(format);
        self
    }

    fn format_for(&self, path: &Path, delimiter: u8) -> InputFormat {
        self.format
            .unwrap_or_else(|| InputFormat::from_path(path, delimiter))
    }
}

/// Result of a complete batch run
#[derive(Debug, Serialize)]
pub struct PipelineResult {
    pub run_id: Uuid,
    pub transactions: LoadReport,
    pub inventory: LoadReport,
    pub transactions_rejected: usize,
    pub inventory_rejected: usize,
    pub joined_rows: usize,
    pub top_products: Vec<ProductTotal>,
    pub monthly_sales: Vec<MonthlyTotal>,
    pub turnover: Vec<ProductTotal>,
    pub outputs: Vec<WriteReport>,
    pub duration_secs: f64,
}

/// In-memory stage outputs, before anything is written
#[derive(Debug)]
pub struct Reports {
    pub joined: Vec<JoinedRecord>,
    pub top_products: Vec<ProductTotal>,
    pub monthly_sales: Vec<MonthlyTotal>,
    pub turnover: Vec<ProductTotal>,
}

/// Compute the three reports over cleaned, anonymized and joined records.
pub fn build_reports(
    ctx: &ExecutionContext,
    transactions: Vec<TransactionRecord>,
    inventory: Vec<InventoryRecord>,
) -> Reports {
    let anonymizer = Anonymizer::new(ctx.config().anonymizer.salt.clone());
    let transactions = anonymizer.anonymize_all(transactions);
    let joined = enrich::join_inventory(&transactions, &inventory);

    let top_products = aggregate::top_n(
        ctx,
        &joined,
        GroupKey::ProductName,
        Measure::Revenue,
        ctx.config().aggregate.top_n,
        None,
    );
    let monthly_sales = aggregate::time_series(ctx, &joined, Measure::Amount);
    let turnover = aggregate::turnover_rate(ctx, &joined, ctx.config().aggregate.turnover_n);

    Reports {
        joined,
        top_products,
        monthly_sales,
        turnover,
    }
}

pub struct Pipeline;

impl Pipeline {
    /// Load, clean, anonymize, join, aggregate and persist one batch.
    #[instrument(skip(ctx), fields(run_id = %ctx.run_id()))]
    pub fn run(ctx: &ExecutionContext, inputs: &BatchInputs, mode: WriteMode) -> Result<PipelineResult> {
        let started = Instant::now();
        let delimiter = ctx.config().loader.delimiter_byte();

        let transactions = ingestion::load::<TransactionRecord>(
            ctx,
            &inputs.transactions,
            inputs.format_for(&inputs.transactions, delimiter),
        )?;
        let inventory = ingestion::load::<InventoryRecord>(
            ctx,
            &inputs.inventory,
            inputs.format_for(&inputs.inventory, delimiter),
        )?;

        let clean_tx = TransactionQualityGate.clean(transactions.records)?;
        let clean_inv = InventoryQualityGate.clean(inventory.records)?;

        let reports = build_reports(ctx, clean_tx.records, clean_inv.records);

        let out = &ctx.config().sink.output_dir;
        let outputs = vec![
            storage::write(ctx, &reports.joined, &out.join(JOINED_DATASET), mode)?,
            storage::write(ctx, &reports.top_products, &out.join(TOP_PRODUCTS_DATASET), mode)?,
            storage::write(ctx, &reports.monthly_sales, &out.join(MONTHLY_SALES_DATASET), mode)?,
            storage::write(ctx, &reports.turnover, &out.join(TURNOVER_DATASET), mode)?,
        ];

        let result = PipelineResult {
            run_id: ctx.run_id(),
            transactions: transactions.report,
            inventory: inventory.report,
            transactions_rejected: clean_tx.rejected,
            inventory_rejected: clean_inv.rejected,
            joined_rows: reports.joined.len(),
            top_products: reports.top_products,
            monthly_sales: reports.monthly_sales,
            turnover: reports.turnover,
            outputs,
            duration_secs: started.elapsed().as_secs_f64(),
        };
        info!(
            joined = result.joined_rows,
            datasets = result.outputs.len(),
            duration_secs = result.duration_secs,
            "Batch pipeline completed"
        );
        Ok(result)
    }
}
