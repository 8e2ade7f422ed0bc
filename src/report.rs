//! Report orchestration: CSV persistence, chart rendering and the query runner.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;

use crate::config::ReportConfig;
use crate::data::Session;
use crate::error::{ReportError, Result};
use crate::funnel::compute_funnel;
use crate::retention::{compute_retention, RetentionMatrix};
use crate::revenue::compute_revenue_quintiles;
use crate::segments::compute_segments;
use crate::viz;

pub const FUNNEL_CSV: &str = "funnel_summary.csv";
pub const RETENTION_COUNTS_CSV: &str = "retention_cohort_counts.csv";
pub const RETENTION_PIVOT_CSV: &str = "retention_cohort_pivot.csv";
pub const RETENTION_HEATMAP_PNG: &str = "retention_heatmap.png";
pub const REVENUE_CSV: &str = "revenue_quintiles.csv";
pub const REVENUE_PNG: &str = "revenue_by_quintile.png";
pub const SEGMENTS_CSV: &str = "customer_segments.csv";
pub const SEGMENT_COUNTS_CSV: &str = "action_segment_counts.csv";
pub const SEGMENT_COUNTS_PNG: &str = "action_segment_counts.png";

/// Rows shown per query by the query runner
pub const PREVIEW_ROWS: usize = 10;

/// A record type with a fixed column layout
pub trait TableRow {
    const HEADERS: &'static [&'static str];

    fn cells(&self) -> Vec<String>;
}

/// Anything that can be written out as a header plus string rows
pub trait ReportTable {
    fn headers(&self) -> Vec<String>;

    fn rows(&self) -> Vec<Vec<String>>;
}

impl<T: TableRow> ReportTable for Vec<T> {
    fn headers(&self) -> Vec<String> {
        T::HEADERS.iter().map(|h| h.to_string()).collect()
    }

    fn rows(&self) -> Vec<Vec<String>> {
        self.iter().map(TableRow::cells).collect()
    }
}

/// Write a table as CSV with a header row and no index column.
pub fn write_csv<T: ReportTable + ?Sized>(path: &Path, table: &T) -> Result<()> {
    let csv_error = |source| ReportError::Csv {
        path: path.to_path_buf(),
        source,
    };

    let mut writer = csv::Writer::from_path(path).map_err(csv_error)?;
    writer.write_record(table.headers()).map_err(csv_error)?;
    for row in table.rows() {
        writer.write_record(&row).map_err(csv_error)?;
    }
    writer.flush().map_err(|source| ReportError::OutputWrite {
        path: path.to_path_buf(),
        source,
    })?;

    log::info!("CSV -> {}", path.display());
    Ok(())
}

fn ensure_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).map_err(|source| ReportError::OutputWrite {
        path: dir.to_path_buf(),
        source,
    })
}

/// What a report run produced
#[derive(Debug, Clone, Default)]
pub struct ReportSummary {
    /// Every file written, in write order
    pub written: Vec<PathBuf>,
    pub cohorts: usize,
    pub customers_with_revenue: u64,
    pub segmented_customers: usize,
}

/// Run all four reports and write their CSVs and charts to the output directory.
///
/// The first failure aborts the run.
pub fn generate_reports(
    session: &Session,
    config: &ReportConfig,
    as_of: NaiveDate,
) -> Result<ReportSummary> {
    let out = config.output_dir.as_path();
    ensure_dir(out)?;
    let mut summary = ReportSummary::default();
    let mut record = |name: &str| {
        let path = out.join(name);
        summary.written.push(path.clone());
        path
    };

    // Funnel
    let funnel = compute_funnel(session)?;
    write_csv(&record(FUNNEL_CSV), &funnel)?;

    // Retention
    let cells = compute_retention(session)?;
    write_csv(&record(RETENTION_COUNTS_CSV), &cells)?;
    let matrix = RetentionMatrix::from_cells(&cells);
    write_csv(&record(RETENTION_PIVOT_CSV), &matrix)?;
    let window = matrix.window(config.heatmap.max_cohorts, config.heatmap.max_offsets);
    viz::create_retention_heatmap(&window, &record(RETENTION_HEATMAP_PNG), config.charts.heatmap_size)?;

    // Revenue
    let quintiles = compute_revenue_quintiles(session)?;
    write_csv(&record(REVENUE_CSV), &quintiles)?;
    viz::create_quintile_chart(&quintiles, &record(REVENUE_PNG), config.charts.quintile_size)?;

    // Segmentation
    let segments = compute_segments(session, as_of, &config.segmentation)?;
    write_csv(&record(SEGMENTS_CSV), &segments.customers)?;
    write_csv(&record(SEGMENT_COUNTS_CSV), &segments.counts)?;
    viz::create_segment_chart(&segments.counts, &record(SEGMENT_COUNTS_PNG), config.charts.segment_size)?;

    summary.cohorts = matrix.cohorts.len();
    summary.customers_with_revenue = quintiles.iter().map(|q| q.customers).sum();
    summary.segmented_customers = segments.customers.len();
    Ok(summary)
}

/// The four report queries, in run order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Query {
    Funnel,
    Retention,
    Revenue,
    Segments,
}

impl Query {
    pub const ALL: [Query; 4] = [Query::Funnel, Query::Retention, Query::Revenue, Query::Segments];

    pub fn name(self) -> &'static str {
        match self {
            Query::Funnel => "funnel",
            Query::Retention => "retention",
            Query::Revenue => "revenue",
            Query::Segments => "segments",
        }
    }

    /// Run the query and return its result table.
    pub fn execute(
        self,
        session: &Session,
        config: &ReportConfig,
        as_of: NaiveDate,
    ) -> Result<Box<dyn ReportTable>> {
        let table: Box<dyn ReportTable> = match self {
            Query::Funnel => Box::new(compute_funnel(session)?),
            Query::Retention => Box::new(compute_retention(session)?),
            Query::Revenue => Box::new(compute_revenue_quintiles(session)?),
            Query::Segments => Box::new(compute_segments(session, as_of, &config.segmentation)?.customers),
        };
        Ok(table)
    }
}

/// Outcome of a query-runner pass
#[derive(Debug, Default)]
pub struct QueryRunSummary {
    pub succeeded: Vec<&'static str>,
    pub failed: Vec<(&'static str, ReportError)>,
}

/// Run every query, printing the row count and a preview of each result.
///
/// A failing query is reported and the runner moves on to the next one.
pub fn run_queries<W: Write>(
    session: &Session,
    config: &ReportConfig,
    as_of: NaiveDate,
    out: &mut W,
) -> std::io::Result<QueryRunSummary> {
    let mut summary = QueryRunSummary::default();

    for query in Query::ALL {
        writeln!(out, "\n{}", "=".repeat(40))?;
        writeln!(out, "Running {}", query.name())?;

        match query.execute(session, config, as_of) {
            Ok(table) => {
                let rows = table.rows();
                writeln!(out, "Rows returned: {}", rows.len())?;
                write_preview(out, &table.headers(), &rows[..rows.len().min(PREVIEW_ROWS)])?;
                summary.succeeded.push(query.name());
            }
            Err(err) => {
                log::error!("{}", err);
                writeln!(out, "Error running {}: {}", query.name(), err)?;
                summary.failed.push((query.name(), err));
            }
        }
    }

    writeln!(out, "\nDone")?;
    Ok(summary)
}

/// Print rows as left-aligned columns without an index
fn write_preview<W: Write>(out: &mut W, headers: &[String], rows: &[Vec<String>]) -> std::io::Result<()> {
    let mut widths: Vec<usize> = headers.iter().map(String::len).collect();
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.len());
        }
    }

    let line = |cells: &[String]| {
        cells
            .iter()
            .zip(&widths)
            .map(|(cell, &width)| format!("{:<width$}", cell, width = width))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    writeln!(out, "{}", line(headers))?;
    for row in rows {
        writeln!(out, "{}", line(row))?;
    }
    Ok(())
}
