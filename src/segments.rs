//! Rule-based customer segmentation
//!
//! Every customer with paid orders is classified along three independent axes
//! (lifecycle, spend tier, engagement) and receives one action segment chosen
//! by the first matching rule:
//!
//! 1. `VIP - Retain & Grow`: 3+ orders, revenue at or above average, active
//! 2. `Core - Nurture`: 2+ orders, revenue at or above median, not inactive
//! 3. `New - Convert to Repeat`: a single order, active
//! 4. `Churned VIP - Win Back`: revenue at or above average, inactive
//! 5. `Standard - Engage`: everyone else

use std::collections::HashMap;
use std::fmt;

use chrono::{Months, NaiveDate};
use polars::prelude::*;

use crate::config::SegmentationConfig;
use crate::data::{date_from_epoch_days, Session};
use crate::error::{ReportError, Result};
use crate::report::TableRow;
use crate::revenue::revenue_frame;
use crate::round2;

const QUERY: &str = "segments";

/// Inputs to the segmentation rules for one customer
#[derive(Debug, Clone, PartialEq)]
pub struct CustomerMetrics {
    pub customer_id: String,
    pub total_orders: u64,
    pub total_revenue: f64,
    /// Date of the latest paid order; `None` when no paid order has a timestamp
    pub last_purchase_date: Option<NaiveDate>,
}

/// Reference values computed once over all customers
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Benchmarks {
    pub median_revenue: f64,
    pub avg_revenue: f64,
    /// Purchases on or after this date count as active
    pub active_threshold: NaiveDate,
    /// Purchases on or after this date (but before `active_threshold`) are at risk
    pub at_risk_threshold: NaiveDate,
}

impl Benchmarks {
    /// Compute benchmarks relative to `as_of`; `None` when there are no customers.
    pub fn compute(
        metrics: &[CustomerMetrics],
        as_of: NaiveDate,
        config: &SegmentationConfig,
    ) -> Option<Self> {
        if metrics.is_empty() {
            return None;
        }

        let mut revenues: Vec<f64> = metrics.iter().map(|m| m.total_revenue).collect();
        let avg_revenue = revenues.iter().sum::<f64>() / revenues.len() as f64;

        Some(Self {
            median_revenue: median(&mut revenues),
            avg_revenue,
            active_threshold: months_before(as_of, config.active_months),
            at_risk_threshold: months_before(as_of, config.at_risk_months),
        })
    }
}

/// Median with linear interpolation between the two middle values.
pub fn median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        values[mid]
    } else {
        (values[mid - 1] + values[mid]) / 2.0
    }
}

/// Calendar months before `date`, clamping the day to the target month's end
fn months_before(date: NaiveDate, months: u32) -> NaiveDate {
    date.checked_sub_months(Months::new(months))
        .unwrap_or(NaiveDate::MIN)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifecycle {
    NewCustomer,
    OccasionalRepeat,
    LoyalRepeat,
}

impl Lifecycle {
    pub fn label(self) -> &'static str {
        match self {
            Lifecycle::NewCustomer => "New Customer",
            Lifecycle::OccasionalRepeat => "Occasional Repeat",
            Lifecycle::LoyalRepeat => "Loyal Repeat",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpendTier {
    HighValue,
    MediumValue,
    LowValue,
}

impl SpendTier {
    pub fn label(self) -> &'static str {
        match self {
            SpendTier::HighValue => "High Value",
            SpendTier::MediumValue => "Medium Value",
            SpendTier::LowValue => "Low Value",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Engagement {
    Active,
    AtRisk,
    Inactive,
}

impl Engagement {
    pub fn label(self) -> &'static str {
        match self {
            Engagement::Active => "Active",
            Engagement::AtRisk => "At Risk",
            Engagement::Inactive => "Inactive",
        }
    }
}

/// Recommended marketing action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ActionSegment {
    VipRetainGrow,
    CoreNurture,
    NewConvertToRepeat,
    ChurnedVipWinBack,
    StandardEngage,
}

impl ActionSegment {
    /// All segments in rule order
    pub const ALL: [ActionSegment; 5] = [
        ActionSegment::VipRetainGrow,
        ActionSegment::CoreNurture,
        ActionSegment::NewConvertToRepeat,
        ActionSegment::ChurnedVipWinBack,
        ActionSegment::StandardEngage,
    ];

    pub fn label(self) -> &'static str {
        match self {
            ActionSegment::VipRetainGrow => "VIP - Retain & Grow",
            ActionSegment::CoreNurture => "Core - Nurture",
            ActionSegment::NewConvertToRepeat => "New - Convert to Repeat",
            ActionSegment::ChurnedVipWinBack => "Churned VIP - Win Back",
            ActionSegment::StandardEngage => "Standard - Engage",
        }
    }
}

impl fmt::Display for ActionSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Full classification of one customer
#[derive(Debug, Clone, PartialEq)]
pub struct CustomerSegment {
    pub metrics: CustomerMetrics,
    pub lifecycle: Lifecycle,
    pub spending_tier: SpendTier,
    pub engagement: Engagement,
    pub action: ActionSegment,
}

impl TableRow for CustomerSegment {
    const HEADERS: &'static [&'static str] = &[
        "customer_id",
        "total_orders",
        "total_revenue",
        "last_purchase_date",
        "customer_lifecycle",
        "spending_tier",
        "engagement_status",
        "action_segment",
    ];

    fn cells(&self) -> Vec<String> {
        vec![
            self.metrics.customer_id.clone(),
            self.metrics.total_orders.to_string(),
            format!("{:.2}", self.metrics.total_revenue),
            self.metrics
                .last_purchase_date
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_default(),
            self.lifecycle.label().to_string(),
            self.spending_tier.label().to_string(),
            self.engagement.label().to_string(),
            self.action.label().to_string(),
        ]
    }
}

/// One row of `action_segment_counts.csv`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentCount {
    pub action_segment: ActionSegment,
    pub count: u64,
}

impl TableRow for SegmentCount {
    const HEADERS: &'static [&'static str] = &["action_segment", "count"];

    fn cells(&self) -> Vec<String> {
        vec![self.action_segment.label().to_string(), self.count.to_string()]
    }
}

/// Per-customer segments plus the tally per action segment
#[derive(Debug, Clone, Default)]
pub struct SegmentationReport {
    /// Sorted by revenue descending, then customer id
    pub customers: Vec<CustomerSegment>,
    /// Sorted by count descending, then label
    pub counts: Vec<SegmentCount>,
    pub benchmarks: Option<Benchmarks>,
}

/// Classify one customer against the benchmarks.
pub fn classify(metrics: CustomerMetrics, benchmarks: &Benchmarks) -> CustomerSegment {
    let orders = metrics.total_orders;
    let revenue = metrics.total_revenue;
    let last = metrics.last_purchase_date;

    // A missing date satisfies neither side of a recency comparison
    let active = last.is_some_and(|d| d >= benchmarks.active_threshold);
    let recent = last.is_some_and(|d| d >= benchmarks.at_risk_threshold);
    let lapsed = last.is_some_and(|d| d < benchmarks.at_risk_threshold);

    let lifecycle = match orders {
        1 => Lifecycle::NewCustomer,
        n if n >= 3 => Lifecycle::LoyalRepeat,
        _ => Lifecycle::OccasionalRepeat,
    };

    let spending_tier = if revenue >= benchmarks.avg_revenue {
        SpendTier::HighValue
    } else if revenue >= benchmarks.median_revenue {
        SpendTier::MediumValue
    } else {
        SpendTier::LowValue
    };

    let engagement = if active {
        Engagement::Active
    } else if recent {
        Engagement::AtRisk
    } else {
        Engagement::Inactive
    };

    let action = if orders >= 3 && revenue >= benchmarks.avg_revenue && active {
        ActionSegment::VipRetainGrow
    } else if orders >= 2 && revenue >= benchmarks.median_revenue && recent {
        ActionSegment::CoreNurture
    } else if orders == 1 && active {
        ActionSegment::NewConvertToRepeat
    } else if revenue >= benchmarks.avg_revenue && lapsed {
        ActionSegment::ChurnedVipWinBack
    } else {
        ActionSegment::StandardEngage
    };

    CustomerSegment {
        metrics,
        lifecycle,
        spending_tier,
        engagement,
        action,
    }
}

/// Classify every customer and tally the action segments.
pub fn segment_customers(
    metrics: Vec<CustomerMetrics>,
    as_of: NaiveDate,
    config: &SegmentationConfig,
) -> SegmentationReport {
    let Some(benchmarks) = Benchmarks::compute(&metrics, as_of, config) else {
        log::warn!("{}: no customers with paid orders", QUERY);
        return SegmentationReport::default();
    };
    log::debug!("{}: benchmarks {:?}", QUERY, benchmarks);

    let mut customers: Vec<CustomerSegment> = metrics
        .into_iter()
        .map(|m| classify(m, &benchmarks))
        .collect();
    customers.sort_by(|a, b| {
        b.metrics
            .total_revenue
            .total_cmp(&a.metrics.total_revenue)
            .then_with(|| a.metrics.customer_id.cmp(&b.metrics.customer_id))
    });

    let counts = count_segments(&customers);

    SegmentationReport {
        customers,
        counts,
        benchmarks: Some(benchmarks),
    }
}

/// Count customers per action segment, largest first.
pub fn count_segments(customers: &[CustomerSegment]) -> Vec<SegmentCount> {
    let mut tally: HashMap<ActionSegment, u64> = HashMap::new();
    for customer in customers {
        *tally.entry(customer.action).or_insert(0) += 1;
    }

    let mut counts: Vec<SegmentCount> = tally
        .into_iter()
        .map(|(action_segment, count)| SegmentCount {
            action_segment,
            count,
        })
        .collect();
    counts.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then_with(|| a.action_segment.label().cmp(b.action_segment.label()))
    });
    counts
}

/// Per-customer order count, revenue and latest paid purchase date.
pub fn customer_metrics(session: &Session, query: &'static str) -> Result<Vec<CustomerMetrics>> {
    session.check_timestamps(query)?;
    revenue_frame(session)
        .and_then(|df| extract_metrics(&df))
        .map_err(|e| ReportError::query(query, e))
}

fn extract_metrics(df: &DataFrame) -> PolarsResult<Vec<CustomerMetrics>> {
    let ids = df.column("customer_id")?.str()?;
    let orders = df.column("total_orders")?.u64()?;
    let revenue = df.column("total_revenue")?.f64()?;
    let last = df.column("last_purchase_date")?.date()?;

    Ok(ids
        .into_iter()
        .zip(orders.into_iter())
        .zip(revenue.into_iter())
        .zip(last.into_iter())
        .filter_map(|(((id, orders), revenue), last)| {
            Some(CustomerMetrics {
                customer_id: id?.to_string(),
                total_orders: orders.unwrap_or(0),
                total_revenue: round2(revenue.unwrap_or(0.0)),
                last_purchase_date: last.and_then(date_from_epoch_days),
            })
        })
        .collect())
}

/// Compute the segmentation report relative to the reference date `as_of`.
pub fn compute_segments(
    session: &Session,
    as_of: NaiveDate,
    config: &SegmentationConfig,
) -> Result<SegmentationReport> {
    let metrics = customer_metrics(session, QUERY)?;
    let report = segment_customers(metrics, as_of, config);
    log::info!(
        "{}: {} customers in {} action segments (as of {})",
        QUERY,
        report.customers.len(),
        report.counts.len(),
        as_of
    );
    Ok(report)
}
