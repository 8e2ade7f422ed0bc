//! Per-customer revenue and revenue quintiles

use polars::prelude::*;

use crate::data::{Session, PURCHASED_AT};
use crate::error::{ReportError, Result};
use crate::report::TableRow;
use crate::round2;

const QUERY: &str = "revenue";

/// Number of revenue buckets
pub const QUINTILES: usize = 5;

/// Orders and payments aggregated for one customer
#[derive(Debug, Clone, PartialEq)]
pub struct CustomerRevenue {
    pub customer_id: String,
    /// Distinct orders with at least one payment
    pub total_orders: u64,
    /// Summed payment value, rounded to cents
    pub total_revenue: f64,
}

/// One row of `revenue_quintiles.csv`
#[derive(Debug, Clone, PartialEq)]
pub struct QuintileSummary {
    /// 1 = highest revenue
    pub revenue_quintile: u32,
    pub customers: u64,
    pub total_revenue: f64,
}

impl TableRow for QuintileSummary {
    const HEADERS: &'static [&'static str] = &["revenue_quintile", "customers", "total_revenue"];

    fn cells(&self) -> Vec<String> {
        vec![
            self.revenue_quintile.to_string(),
            self.customers.to_string(),
            format!("{:.2}", self.total_revenue),
        ]
    }
}

/// Aggregate revenue per customer by joining orders to their payments.
///
/// Only customers with at least one paid order appear. The `query` name is
/// attached to any failure so callers can report which report broke.
pub fn customer_revenue(session: &Session, query: &'static str) -> Result<Vec<CustomerRevenue>> {
    let df = revenue_frame(session).map_err(|e| ReportError::query(query, e))?;
    extract_revenue(&df).map_err(|e| ReportError::query(query, e))
}

/// Paid orders grouped per customer: `customer_id`, `total_orders`,
/// `total_revenue` and `last_purchase_date` (latest paid order, as a date).
pub(crate) fn revenue_frame(session: &Session) -> PolarsResult<DataFrame> {
    session
        .orders_lazy()
        .select([col("order_id"), col("customer_id"), col(PURCHASED_AT)])
        .join(
            session.payments_lazy(),
            [col("order_id")],
            [col("order_id")],
            JoinArgs::new(JoinType::Inner),
        )
        .filter(col("customer_id").is_not_null())
        .group_by([col("customer_id")])
        .agg([
            col("order_id")
                .n_unique()
                .cast(DataType::UInt64)
                .alias("total_orders"),
            col("payment_value").sum().alias("total_revenue"),
            col(PURCHASED_AT)
                .max()
                .cast(DataType::Date)
                .alias("last_purchase_date"),
        ])
        .collect()
}

fn extract_revenue(df: &DataFrame) -> PolarsResult<Vec<CustomerRevenue>> {
    let ids = df.column("customer_id")?.str()?;
    let orders = df.column("total_orders")?.u64()?;
    let revenue = df.column("total_revenue")?.f64()?;

    Ok(ids
        .into_iter()
        .zip(orders.into_iter())
        .zip(revenue.into_iter())
        .filter_map(|((id, orders), revenue)| {
            Some(CustomerRevenue {
                customer_id: id?.to_string(),
                total_orders: orders.unwrap_or(0),
                total_revenue: round2(revenue.unwrap_or(0.0)),
            })
        })
        .collect())
}

/// Order customers by revenue descending; equal revenue falls back to
/// customer id ascending so bucket boundaries are reproducible.
pub fn rank_by_revenue(customers: &mut [CustomerRevenue]) {
    customers.sort_by(|a, b| {
        b.total_revenue
            .total_cmp(&a.total_revenue)
            .then_with(|| a.customer_id.cmp(&b.customer_id))
    });
}

/// Bucket (1-based) of the row at `position` among `n` ranked rows split into
/// `buckets` groups, matching SQL `NTILE`: the first `n % buckets` groups hold
/// one extra row.
pub fn ntile(position: usize, n: usize, buckets: usize) -> u32 {
    let size = n / buckets;
    let extra = n % buckets;
    let large_span = extra * (size + 1);

    let bucket = if position < large_span {
        position / (size + 1)
    } else {
        extra + (position - large_span) / size.max(1)
    };
    bucket as u32 + 1
}

/// Assign each ranked customer its revenue quintile.
pub fn assign_quintiles(ranked: &[CustomerRevenue]) -> Vec<u32> {
    (0..ranked.len())
        .map(|i| ntile(i, ranked.len(), QUINTILES))
        .collect()
}

/// Aggregate customer counts and revenue per quintile.
pub fn summarize_quintiles(mut customers: Vec<CustomerRevenue>) -> Vec<QuintileSummary> {
    rank_by_revenue(&mut customers);
    let quintiles = assign_quintiles(&customers);

    let mut summary: Vec<QuintileSummary> = Vec::with_capacity(QUINTILES);
    for (customer, quintile) in customers.iter().zip(quintiles) {
        match summary.last_mut() {
            Some(last) if last.revenue_quintile == quintile => {
                last.customers += 1;
                last.total_revenue += customer.total_revenue;
            }
            _ => summary.push(QuintileSummary {
                revenue_quintile: quintile,
                customers: 1,
                total_revenue: customer.total_revenue,
            }),
        }
    }

    for row in &mut summary {
        row.total_revenue = round2(row.total_revenue);
    }
    summary
}

/// Compute the revenue quintile summary, ordered by quintile.
pub fn compute_revenue_quintiles(session: &Session) -> Result<Vec<QuintileSummary>> {
    let customers = customer_revenue(session, QUERY)?;
    log::info!("{}: {} customers with payments", QUERY, customers.len());
    Ok(summarize_quintiles(customers))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::test_support::session;

    fn customer(id: &str, revenue: f64) -> CustomerRevenue {
        CustomerRevenue {
            customer_id: id.to_string(),
            total_orders: 1,
            total_revenue: revenue,
        }
    }

    #[test]
    fn test_ntile_even_split() {
        let buckets: Vec<u32> = (0..10).map(|i| ntile(i, 10, 5)).collect();
        assert_eq!(buckets, vec![1, 1, 2, 2, 3, 3, 4, 4, 5, 5]);
    }

    #[test]
    fn test_ntile_remainder_goes_to_leading_buckets() {
        let buckets: Vec<u32> = (0..7).map(|i| ntile(i, 7, 5)).collect();
        assert_eq!(buckets, vec![1, 1, 2, 2, 3, 4, 5]);
    }

    #[test]
    fn test_ntile_fewer_rows_than_buckets() {
        let buckets: Vec<u32> = (0..3).map(|i| ntile(i, 3, 5)).collect();
        assert_eq!(buckets, vec![1, 2, 3]);
    }

    #[test]
    fn test_quintile_counts_partition_customers() {
        let customers: Vec<CustomerRevenue> = (0..23)
            .map(|i| customer(&format!("c{:02}", i), (i * 10) as f64))
            .collect();
        let summary = summarize_quintiles(customers);

        assert_eq!(summary.len(), 5);
        assert_eq!(summary.iter().map(|q| q.customers).sum::<u64>(), 23);
        let sizes: Vec<u64> = summary.iter().map(|q| q.customers).collect();
        assert_eq!(sizes, vec![5, 5, 5, 4, 4]);
        // Top quintile holds the five largest revenues: 220+210+200+190+180
        assert_eq!(summary[0].total_revenue, 1000.0);
    }

    #[test]
    fn test_ties_broken_by_customer_id() {
        let mut customers = vec![
            customer("b", 50.0),
            customer("a", 50.0),
            customer("c", 80.0),
            customer("e", 10.0),
            customer("d", 50.0),
            customer("f", 5.0),
        ];
        rank_by_revenue(&mut customers);
        let order: Vec<&str> = customers.iter().map(|c| c.customer_id.as_str()).collect();
        assert_eq!(order, vec!["c", "a", "b", "d", "e", "f"]);

        // Six customers: bucket 1 takes two rows, so "a" joins "c" and "b" opens bucket 2
        let quintiles = assign_quintiles(&customers);
        assert_eq!(quintiles, vec![1, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_customer_revenue_sums_payments() {
        let session = session(
            &["c1", "c2", "c3"],
            &[
                ("o1", "c1", "delivered", "2018-01-01 10:00:00"),
                ("o2", "c1", "delivered", "2018-02-01 10:00:00"),
                ("o3", "c2", "delivered", "2018-01-05 10:00:00"),
                ("o4", "c3", "canceled", "2018-01-06 10:00:00"),
            ],
            &[("o1", 10.25), ("o1", 5.0), ("o2", 20.0), ("o3", 7.5)],
        );

        let mut revenue = customer_revenue(&session, "revenue").unwrap();
        revenue.sort_by(|a, b| a.customer_id.cmp(&b.customer_id));

        assert_eq!(revenue.len(), 2);
        assert_eq!(revenue[0].customer_id, "c1");
        assert_eq!(revenue[0].total_orders, 2);
        assert_eq!(revenue[0].total_revenue, 35.25);
        assert_eq!(revenue[1].customer_id, "c2");
        assert_eq!(revenue[1].total_orders, 1);
        assert_eq!(revenue[1].total_revenue, 7.5);
    }

    #[test]
    fn test_compute_revenue_quintiles_from_session() {
        let session = session(
            &["c1", "c2"],
            &[
                ("o1", "c1", "delivered", "2018-01-01 10:00:00"),
                ("o2", "c2", "delivered", "2018-02-01 10:00:00"),
            ],
            &[("o1", 100.0), ("o2", 40.0)],
        );

        let summary = compute_revenue_quintiles(&session).unwrap();
        assert_eq!(
            summary,
            vec![
                QuintileSummary { revenue_quintile: 1, customers: 1, total_revenue: 100.0 },
                QuintileSummary { revenue_quintile: 2, customers: 1, total_revenue: 40.0 },
            ]
        );
    }

    #[test]
    fn test_half_cent_rounds_away_from_zero() {
        let session = session(
            &["c1"],
            &[("o1", "c1", "delivered", "2018-01-01 10:00:00")],
            &[("o1", 1.005)],
        );

        let summary = compute_revenue_quintiles(&session).unwrap();
        assert_eq!(summary[0].total_revenue, 1.01);
        assert_eq!(summary[0].cells(), vec!["1", "1", "1.01"]);
    }
}
