//! Cohort retention: distinct active customers per acquisition month and
//! elapsed-month offset, plus the cohort-by-offset matrix behind the heatmap.

use std::collections::{BTreeSet, HashMap};

use chrono::NaiveDate;
use polars::prelude::*;

use crate::data::{Session, PURCHASED_AT};
use crate::error::{ReportError, Result};
use crate::report::{ReportTable, TableRow};

const QUERY: &str = "retention";

/// One row of the long-form retention table
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct CohortCell {
    pub cohort_month: NaiveDate,
    pub month_number: u32,
    pub active_customers: u64,
}

impl TableRow for CohortCell {
    const HEADERS: &'static [&'static str] = &["cohort_month", "month_number", "active_customers"];

    fn cells(&self) -> Vec<String> {
        vec![
            self.cohort_month.format("%Y-%m-%d").to_string(),
            self.month_number.to_string(),
            self.active_customers.to_string(),
        ]
    }
}

/// Cohort-by-offset matrix; absent combinations hold 0
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RetentionMatrix {
    /// Row labels, ascending
    pub cohorts: Vec<NaiveDate>,
    /// Number of offset columns (0..offsets)
    pub offsets: usize,
    /// `counts[row][offset]`
    pub counts: Vec<Vec<u64>>,
}

impl RetentionMatrix {
    /// Pivot long-form cells into a matrix spanning offsets 0..=max.
    pub fn from_cells(cells: &[CohortCell]) -> Self {
        let cohorts: Vec<NaiveDate> = cells
            .iter()
            .map(|c| c.cohort_month)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let offsets = cells
            .iter()
            .map(|c| c.month_number as usize + 1)
            .max()
            .unwrap_or(0);

        let row_of: HashMap<NaiveDate, usize> =
            cohorts.iter().enumerate().map(|(i, d)| (*d, i)).collect();
        let mut counts = vec![vec![0u64; offsets]; cohorts.len()];
        for cell in cells {
            counts[row_of[&cell.cohort_month]][cell.month_number as usize] = cell.active_customers;
        }

        Self {
            cohorts,
            offsets,
            counts,
        }
    }

    /// Un-pivot back to long form, dropping zero cells.
    pub fn to_cells(&self) -> Vec<CohortCell> {
        self.cohorts
            .iter()
            .zip(&self.counts)
            .flat_map(|(cohort, row)| {
                row.iter()
                    .enumerate()
                    .filter(|&(_, &n)| n > 0)
                    .map(move |(offset, &n)| CohortCell {
                        cohort_month: *cohort,
                        month_number: offset as u32,
                        active_customers: n,
                    })
            })
            .collect()
    }

    /// Leading `max_rows` cohorts by leading `max_offsets` offsets.
    pub fn window(&self, max_rows: usize, max_offsets: usize) -> Self {
        let offsets = self.offsets.min(max_offsets);
        let rows = self.cohorts.len().min(max_rows);
        Self {
            cohorts: self.cohorts[..rows].to_vec(),
            offsets,
            counts: self.counts[..rows]
                .iter()
                .map(|row| row[..offsets].to_vec())
                .collect(),
        }
    }

    /// Largest cell value, used to scale the heatmap colors.
    pub fn max_count(&self) -> u64 {
        self.counts.iter().flatten().copied().max().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.cohorts.is_empty()
    }
}

impl ReportTable for RetentionMatrix {
    fn headers(&self) -> Vec<String> {
        std::iter::once("cohort_month".to_string())
            .chain((0..self.offsets).map(|o| o.to_string()))
            .collect()
    }

    fn rows(&self) -> Vec<Vec<String>> {
        self.cohorts
            .iter()
            .zip(&self.counts)
            .map(|(cohort, row)| {
                std::iter::once(cohort.format("%Y-%m-%d").to_string())
                    .chain(row.iter().map(u64::to_string))
                    .collect()
            })
            .collect()
    }
}

/// Compute the long-form retention table sorted by (cohort_month, month_number).
pub fn compute_retention(session: &Session) -> Result<Vec<CohortCell>> {
    session.check_timestamps(QUERY)?;
    let cells = retention_frame(session.orders_lazy())
        .and_then(|df| extract_cells(&df))
        .map_err(|e| ReportError::query(QUERY, e))?;
    log::info!("{}: {} cohort cells", QUERY, cells.len());
    Ok(cells)
}

/// Months since year 0 of the purchase, so offsets are plain differences
fn month_index() -> Expr {
    col(PURCHASED_AT).dt().year().cast(DataType::Int32) * lit(12)
        + col(PURCHASED_AT).dt().month().cast(DataType::Int32)
        - lit(1)
}

/// Distinct customers per (cohort month, month offset), with months as indices.
fn retention_frame(orders: LazyFrame) -> PolarsResult<DataFrame> {
    let purchases = orders
        .filter(
            col("customer_id")
                .is_not_null()
                .and(col(PURCHASED_AT).is_not_null()),
        )
        .select([col("customer_id"), month_index().alias("purchase_month")]);

    let cohorts = purchases
        .clone()
        .group_by([col("customer_id")])
        .agg([col("purchase_month").min().alias("cohort_month")]);

    purchases
        .join(
            cohorts,
            [col("customer_id")],
            [col("customer_id")],
            JoinArgs::new(JoinType::Inner),
        )
        .with_column((col("purchase_month") - col("cohort_month")).alias("month_number"))
        .group_by([col("cohort_month"), col("month_number")])
        .agg([col("customer_id")
            .n_unique()
            .cast(DataType::UInt64)
            .alias("active_customers")])
        .collect()
}

fn extract_cells(df: &DataFrame) -> PolarsResult<Vec<CohortCell>> {
    let cohorts = df.column("cohort_month")?.i32()?;
    let offsets = df.column("month_number")?.i32()?;
    let active = df.column("active_customers")?.u64()?;

    let mut cells: Vec<CohortCell> = cohorts
        .into_iter()
        .zip(offsets.into_iter())
        .zip(active.into_iter())
        .filter_map(|((cohort, offset), active)| {
            Some(CohortCell {
                cohort_month: month_from_index(cohort?)?,
                month_number: u32::try_from(offset?).ok()?,
                active_customers: active.unwrap_or(0),
            })
        })
        .collect();
    cells.sort();
    Ok(cells)
}

/// First day of the month with the given index
fn month_from_index(index: i32) -> Option<NaiveDate> {
    let month = u32::try_from(index.rem_euclid(12)).ok()? + 1;
    NaiveDate::from_ymd_opt(index.div_euclid(12), month, 1)
}
