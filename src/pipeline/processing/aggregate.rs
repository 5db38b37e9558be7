use crate::context::ExecutionContext;
use crate::metrics::ProcessingMetrics;
use crate::types::{JoinedRecord, MonthlyTotal, ProductTotal};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;
use tracing::{debug, info, instrument};

/// Optional row filter applied before grouping
pub type RowFilter<'a> = &'a (dyn Fn(&JoinedRecord) -> bool + Sync);

/// Column a report groups by
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupKey {
    #[default]
    ProductName,
    ProductCategory,
    ProductId,
}

impl GroupKey {
    fn extract(self, r: &JoinedRecord) -> Option<String> {
        match self {
            GroupKey::ProductName => r.product_name.clone(),
            GroupKey::ProductCategory => r.product_category.clone(),
            GroupKey::ProductId => Some(r.product_id.clone()),
        }
    }
}

/// Value summed per group
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Measure {
    /// Transaction amount as recorded
    #[default]
    Amount,
    /// amount × price
    Revenue,
    /// quantity × price
    Turnover,
}

impl Measure {
    /// The measure for one row, `None` when any input is null
    pub fn value(self, r: &JoinedRecord) -> Option<f64> {
        match self {
            Measure::Amount => r.amount,
            Measure::Revenue => Some(r.amount? * r.price?),
            Measure::Turnover => Some(r.quantity? as f64 * r.price?),
        }
    }
}

/// Per-partition sums, remembering the order groups were first seen
#[derive(Debug, Default)]
struct Partial {
    order: Vec<Option<String>>,
    totals: HashMap<Option<String>, f64>,
}

impl Partial {
    fn add(&mut self, group: Option<String>, value: f64) {
        match self.totals.get_mut(&group) {
            Some(total) => *total += value,
            None => {
                self.order.push(group.clone());
                self.totals.insert(group, value);
            }
        }
    }

    fn merge(mut self, other: Partial) -> Partial {
        let Partial { order, mut totals } = other;
        for group in order {
            if let Some(value) = totals.remove(&group) {
                self.add(group, value);
            }
        }
        self
    }

    fn into_totals(mut self) -> Vec<ProductTotal> {
        self.order
            .into_iter()
            .map(|group| ProductTotal {
                total: self.totals.remove(&group).unwrap_or_default(),
                group,
            })
            .collect()
    }
}

fn chunk_size(len: usize, partitions: usize) -> usize {
    len.div_ceil(partitions.max(1)).max(1)
}

fn grouped_totals(
    partitions: usize,
    records: &[JoinedRecord],
    key: GroupKey,
    measure: Measure,
    filter: Option<RowFilter<'_>>,
) -> Vec<ProductTotal> {
    let partials: Vec<Partial> = records
        .par_chunks(chunk_size(records.len(), partitions))
        .map(|chunk| {
            let mut partial = Partial::default();
            for r in chunk {
                if filter.is_some_and(|f| !f(r)) {
                    continue;
                }
                if let Some(value) = measure.value(r) {
                    partial.add(key.extract(r), value);
                }
            }
            partial
        })
        .collect();

    debug!(partitions = partials.len(), "Merging partial aggregates");
    partials
        .into_iter()
        .fold(Partial::default(), Partial::merge)
        .into_totals()
}

fn ranked(
    ctx: &ExecutionContext,
    report: &'static str,
    records: &[JoinedRecord],
    key: GroupKey,
    measure: Measure,
    n: usize,
    filter: Option<RowFilter<'_>>,
) -> Vec<ProductTotal> {
    let started = Instant::now();
    let mut totals = grouped_totals(ctx.partitions(), records, key, measure, filter);
    let groups = totals.len();

    // Stable: ties keep first-seen order
    totals.sort_by(|a, b| b.total.total_cmp(&a.total));
    totals.truncate(n);

    ProcessingMetrics::record_aggregate(report, groups, started.elapsed().as_secs_f64());
    info!(
        "{}: {} groups by {:?} over {:?}, kept top {}",
        report,
        groups,
        key,
        measure,
        totals.len()
    );
    totals
}

/// Group, sum `measure`, sort descending and keep the first `n` groups.
///
/// Rows whose measure is null are ignored. Rows whose key is null form a
/// single `None` group.
#[instrument(skip(ctx, records, filter), fields(rows = records.len()))]
pub fn top_n(
    ctx: &ExecutionContext,
    records: &[JoinedRecord],
    key: GroupKey,
    measure: Measure,
    n: usize,
    filter: Option<RowFilter<'_>>,
) -> Vec<ProductTotal> {
    ranked(ctx, "top_n", records, key, measure, n, filter)
}

/// Products ranked by quantity × price.
#[instrument(skip(ctx, records), fields(rows = records.len()))]
pub fn turnover_rate(ctx: &ExecutionContext, records: &[JoinedRecord], n: usize) -> Vec<ProductTotal> {
    ranked(
        ctx,
        "turnover",
        records,
        GroupKey::ProductName,
        Measure::Turnover,
        n,
        None,
    )
}

/// Sum `measure` per calendar month of `transaction_date`, oldest first.
///
/// Undated rows are ignored.
#[instrument(skip(ctx, records), fields(rows = records.len()))]
pub fn time_series(ctx: &ExecutionContext, records: &[JoinedRecord], measure: Measure) -> Vec<MonthlyTotal> {
    let started = Instant::now();
    let months = records
        .par_chunks(chunk_size(records.len(), ctx.partitions()))
        .map(|chunk| {
            let mut partial: BTreeMap<(i32, u32), f64> = BTreeMap::new();
            for r in chunk {
                if let (Some(month), Some(value)) = (r.year_month(), measure.value(r)) {
                    *partial.entry(month).or_default() += value;
                }
            }
            partial
        })
        .collect::<Vec<_>>()
        .into_iter()
        .fold(BTreeMap::new(), |mut merged, partial| {
            for (month, value) in partial {
                *merged.entry(month).or_default() += value;
            }
            merged
        });

    let series: Vec<MonthlyTotal> = months
        .into_iter()
        .map(|((year, month), total)| MonthlyTotal { year, month, total })
        .collect();

    ProcessingMetrics::record_aggregate("time_series", series.len(), started.elapsed().as_secs_f64());
    info!("time_series: {} months over {:?}", series.len(), measure);
    series
}
