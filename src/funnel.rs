//! Funnel conversion: registered → ordered → delivered → repeat

use polars::prelude::*;

use crate::data::Session;
use crate::error::{ReportError, Result};
use crate::report::TableRow;
use crate::round2;

const QUERY: &str = "funnel";

pub const STAGE_REGISTERED: &str = "Registered customers";
pub const STAGE_PLACED_ORDER: &str = "Placed any order";
pub const STAGE_DELIVERED: &str = "Delivered order";
pub const STAGE_REPEAT: &str = "Repeat purchasers (>1 order)";

/// Raw distinct-customer counts behind the funnel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FunnelCounts {
    pub registered: u64,
    pub with_orders: u64,
    pub delivered: u64,
    pub repeat: u64,
}

/// One row of `funnel_summary.csv`
#[derive(Debug, Clone, PartialEq)]
pub struct FunnelStage {
    pub stage: &'static str,
    pub customers: u64,
    pub pct_of_total: f64,
}

impl TableRow for FunnelStage {
    const HEADERS: &'static [&'static str] = &["stage", "customers", "pct_of_total"];

    fn cells(&self) -> Vec<String> {
        vec![
            self.stage.to_string(),
            self.customers.to_string(),
            format!("{:.2}", self.pct_of_total),
        ]
    }
}

/// Compute the funnel stages, sorted by stage label.
pub fn compute_funnel(session: &Session) -> Result<Vec<FunnelStage>> {
    let counts = funnel_counts(session).map_err(|e| ReportError::query(QUERY, e))?;
    log::debug!("{}: {:?}", QUERY, counts);
    Ok(funnel_stages(&counts))
}

/// Turn counts into stage rows expressed as a share of registered customers.
///
/// With no registered customers every percentage is reported as 0.
pub fn funnel_stages(counts: &FunnelCounts) -> Vec<FunnelStage> {
    if counts.registered == 0 {
        log::warn!("{}: no registered customers, reporting 0% for every stage", QUERY);
    }

    let pct = |n: u64| {
        if counts.registered == 0 {
            0.0
        } else {
            round2(100.0 * n as f64 / counts.registered as f64)
        }
    };

    let mut stages = vec![
        FunnelStage {
            stage: STAGE_REGISTERED,
            customers: counts.registered,
            pct_of_total: if counts.registered == 0 { 0.0 } else { 100.0 },
        },
        FunnelStage {
            stage: STAGE_PLACED_ORDER,
            customers: counts.with_orders,
            pct_of_total: pct(counts.with_orders),
        },
        FunnelStage {
            stage: STAGE_DELIVERED,
            customers: counts.delivered,
            pct_of_total: pct(counts.delivered),
        },
        FunnelStage {
            stage: STAGE_REPEAT,
            customers: counts.repeat,
            pct_of_total: pct(counts.repeat),
        },
    ];
    stages.sort_by(|a, b| a.stage.cmp(b.stage));
    stages
}

fn funnel_counts(session: &Session) -> PolarsResult<FunnelCounts> {
    let registered = distinct_count(session.customers_lazy(), "customer_id")?;
    let with_orders = distinct_count(session.orders_lazy(), "customer_id")?;
    let delivered = distinct_count(
        session
            .orders_lazy()
            .filter(col("order_status").eq(lit("delivered"))),
        "customer_id",
    )?;

    let repeat = session
        .orders_lazy()
        .filter(col("customer_id").is_not_null())
        .group_by([col("customer_id")])
        .agg([col("order_id").drop_nulls().n_unique().alias("order_count")])
        .filter(col("order_count").gt(lit(1)))
        .collect()?
        .height() as u64;

    Ok(FunnelCounts {
        registered,
        with_orders,
        delivered,
        repeat,
    })
}

/// COUNT(DISTINCT column), ignoring nulls
fn distinct_count(frame: LazyFrame, column: &str) -> PolarsResult<u64> {
    let out = frame
        .select([col(column)
            .drop_nulls()
            .n_unique()
            .cast(DataType::UInt64)
            .alias("n")])
        .collect()?;
    Ok(out.column("n")?.u64()?.get(0).unwrap_or(0))
}
