//! Dataset loading into an analytical session using Polars

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Days, NaiveDate};
use polars::prelude::*;

use crate::config::InputFiles;
use crate::error::{ReportError, Result};

/// Columns each table must provide
const CUSTOMER_COLUMNS: &[&str] = &["customer_id"];
const ORDER_COLUMNS: &[&str] = &[
    "order_id",
    "customer_id",
    "order_status",
    PURCHASE_TIMESTAMP,
];
const PAYMENT_COLUMNS: &[&str] = &["order_id", "payment_value"];

/// Columns always read as text, whatever their values look like
const TEXT_COLUMNS: &[&str] = &["customer_id", "order_id", "order_status", PURCHASE_TIMESTAMP];

/// Raw purchase timestamp column as it appears in the orders file
pub const PURCHASE_TIMESTAMP: &str = "order_purchase_timestamp";

/// Parsed purchase timestamp added by [`Session::orders_lazy`]
pub const PURCHASED_AT: &str = "purchased_at";

/// Datetime layouts accepted for the purchase timestamp, tried in order
const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

/// In-memory session holding the four loaded tables for one report run
#[derive(Debug, Clone)]
pub struct Session {
    pub customers: DataFrame,
    pub orders: DataFrame,
    pub payments: DataFrame,
    /// Loaded for completeness; no report reads it yet
    pub order_items: DataFrame,
}

impl Session {
    /// Load all four CSV tables from `data_dir`.
    ///
    /// Every file is checked for existence before any is parsed, so a missing
    /// input is reported without partially loading the others.
    pub fn load(data_dir: &Path, inputs: &InputFiles) -> Result<Self> {
        let paths = [
            ("customers", data_dir.join(&inputs.customers)),
            ("orders", data_dir.join(&inputs.orders)),
            ("payments", data_dir.join(&inputs.payments)),
            ("order_items", data_dir.join(&inputs.order_items)),
        ];

        for (table, path) in &paths {
            if !path.exists() {
                return Err(ReportError::MissingInputFile {
                    table: *table,
                    path: path.clone(),
                });
            }
        }

        let [customers, orders, payments, order_items] =
            paths.map(|(table, path)| read_table(table, path));

        Self::from_frames(customers?, orders?, payments?, order_items?)
    }

    /// Build a session from already loaded frames, checking required columns.
    pub fn from_frames(
        customers: DataFrame,
        orders: DataFrame,
        payments: DataFrame,
        order_items: DataFrame,
    ) -> Result<Self> {
        require_columns("customers", &customers, CUSTOMER_COLUMNS)?;
        require_columns("orders", &orders, ORDER_COLUMNS)?;
        require_columns("payments", &payments, PAYMENT_COLUMNS)?;

        Ok(Self {
            customers,
            orders,
            payments,
            order_items,
        })
    }

    /// Orders with text keys and the purchase timestamp parsed into
    /// [`PURCHASED_AT`].
    ///
    /// Blank or unparseable timestamps come out as null; see
    /// [`Session::check_timestamps`].
    pub fn orders_lazy(&self) -> LazyFrame {
        self.orders.clone().lazy().select([
            col("order_id").cast(DataType::String),
            col("customer_id").cast(DataType::String),
            col("order_status").cast(DataType::String),
            col(PURCHASE_TIMESTAMP).cast(DataType::String),
            purchase_datetime().alias(PURCHASED_AT),
        ])
    }

    /// Payments with the join key as text and the amount as a float.
    pub fn payments_lazy(&self) -> LazyFrame {
        self.payments.clone().lazy().select([
            col("order_id").cast(DataType::String),
            col("payment_value").cast(DataType::Float64),
        ])
    }

    /// Customers with the key as text.
    pub fn customers_lazy(&self) -> LazyFrame {
        self.customers
            .clone()
            .lazy()
            .select([col("customer_id").cast(DataType::String)])
    }

    /// Fail `query` on the first timestamp that is present but unparseable.
    ///
    /// Blank timestamps are not an error: those orders are left out of any
    /// date logic and counted in a warning.
    pub fn check_timestamps(&self, query: &'static str) -> Result<()> {
        let unparsed = self
            .orders_lazy()
            .filter(col(PURCHASED_AT).is_null())
            .select([col("order_id"), col(PURCHASE_TIMESTAMP)])
            .collect()
            .map_err(|e| ReportError::query(query, e))?;

        let (blank, bad) = split_unparsed(&unparsed).map_err(|e| ReportError::query(query, e))?;
        if let Some((order_id, raw)) = bad {
            return Err(ReportError::Query {
                query,
                message: format!(
                    "unparseable {} '{}' for order {}",
                    PURCHASE_TIMESTAMP, raw, order_id
                ),
            });
        }
        if blank > 0 {
            log::warn!("{}: skipped {} orders without purchase timestamp", query, blank);
        }
        Ok(())
    }
}

/// Coalesce of one strict parse per accepted layout; a bare date reads as midnight
fn purchase_datetime() -> Expr {
    let datetime = DataType::Datetime(TimeUnit::Microseconds, None);
    let raw = || col(PURCHASE_TIMESTAMP).cast(DataType::String);

    let mut attempts: Vec<Expr> = TIMESTAMP_FORMATS
        .iter()
        .map(|format| {
            raw()
                .str()
                .strptime(datetime.clone(), strptime_options(format), lit("raise"))
        })
        .collect();
    attempts.push(
        raw()
            .str()
            .strptime(DataType::Date, strptime_options("%Y-%m-%d"), lit("raise"))
            .cast(datetime),
    );
    coalesce(&attempts)
}

fn strptime_options(format: &str) -> StrptimeOptions {
    StrptimeOptions {
        format: Some(format.into()),
        strict: false,
        exact: true,
        cache: true,
    }
}

/// Count blank timestamps and find the first non-blank one that failed to parse
fn split_unparsed(df: &DataFrame) -> PolarsResult<(usize, Option<(String, String)>)> {
    let ids = df.column("order_id")?.str()?;
    let raw = df.column(PURCHASE_TIMESTAMP)?.str()?;

    let mut blank = 0;
    for (order_id, ts) in ids.into_iter().zip(raw.into_iter()) {
        match ts {
            Some(ts) if !ts.trim().is_empty() => {
                return Ok((blank, Some((order_id.unwrap_or_default().to_string(), ts.to_string()))));
            }
            _ => blank += 1,
        }
    }
    Ok((blank, None))
}

/// Convert a Polars `Date` value (days since 1970-01-01) to a calendar date
pub fn date_from_epoch_days(days: i32) -> Option<NaiveDate> {
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1)?;
    if days >= 0 {
        epoch.checked_add_days(Days::new(days as u64))
    } else {
        epoch.checked_sub_days(Days::new(days.unsigned_abs() as u64))
    }
}

fn read_table(table: &'static str, path: PathBuf) -> Result<DataFrame> {
    let text_schema = text_columns_schema(&path)?;

    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(10_000))
        .with_schema_overwrite(Some(Arc::new(text_schema)))
        .try_into_reader_with_file_path(Some(path.clone()))
        .and_then(|reader| reader.finish())
        .map_err(|source| ReportError::Load { table, source })?;

    log::info!("Loaded {} from {} ({} rows)", table, path.display(), df.height());
    Ok(df)
}

/// Schema pinning the key and timestamp columns present in the file header to text
fn text_columns_schema(path: &Path) -> Result<Schema> {
    let mut reader = csv::Reader::from_path(path).map_err(|source| ReportError::Csv {
        path: path.to_path_buf(),
        source,
    })?;
    let headers = reader.headers().map_err(|source| ReportError::Csv {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(headers
        .iter()
        .filter(|name| TEXT_COLUMNS.contains(name))
        .map(|name| Field::new(name, DataType::String))
        .collect())
}

fn require_columns(table: &'static str, df: &DataFrame, columns: &[&'static str]) -> Result<()> {
    for &column in columns {
        if df.column(column).is_err() {
            return Err(ReportError::MissingColumn { table, column });
        }
    }
    Ok(())
}
