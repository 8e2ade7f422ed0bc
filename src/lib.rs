//! CohortLens: customer analytics reports from flat order data
//!
//! This library loads customers, orders, payments and order items from CSV
//! into a Polars-backed session and computes four reports: funnel conversion,
//! cohort retention, revenue quintiles and rule-based action segments. Results
//! are written as CSV tables and PNG charts.

pub mod cli;
pub mod config;
pub mod data;
pub mod error;
pub mod funnel;
pub mod report;
pub mod retention;
pub mod revenue;
pub mod segments;
pub mod viz;

// Re-export public items for easier access
pub use cli::Args;
pub use config::ReportConfig;
pub use data::Session;
pub use error::{ReportError, Result};
pub use report::{generate_reports, run_queries, ReportSummary};

/// Round to two decimal places, half away from zero.
///
/// The value is rounded as the shortest decimal that reads back as the same
/// `f64`, so `1.005` rounds to `1.01`. Values outside the `Decimal` range are
/// returned unchanged.
pub(crate) fn round2(value: f64) -> f64 {
    use std::str::FromStr;

    use rust_decimal::prelude::ToPrimitive;
    use rust_decimal::{Decimal, RoundingStrategy};

    Decimal::from_str(&value.to_string())
        .ok()
        .map(|d| d.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero))
        .and_then(|d| d.to_f64())
        .unwrap_or(value)
}
