//! Integration tests for CohortLens

use std::fs;
use std::path::Path;

use chrono::NaiveDate;
use cohortlens::config::ReportConfig;
use cohortlens::report::{
    FUNNEL_CSV, RETENTION_COUNTS_CSV, RETENTION_HEATMAP_PNG, RETENTION_PIVOT_CSV, REVENUE_CSV,
    REVENUE_PNG, SEGMENTS_CSV, SEGMENT_COUNTS_CSV, SEGMENT_COUNTS_PNG,
};
use cohortlens::{generate_reports, run_queries, ReportError, Session};
use tempfile::{tempdir, TempDir};

/// Write the four input tables into a fresh directory
fn create_test_data() -> TempDir {
    let dir = tempdir().unwrap();

    fs::write(
        dir.path().join("customers.csv"),
        "customer_id,customer_zip_code_prefix,customer_city\n\
         c1,01151,sao paulo\n\
         c2,22775,rio de janeiro\n\
         c3,30140,belo horizonte\n\
         c4,80010,curitiba\n\
         c5,90010,porto alegre\n\
         c6,40010,salvador\n",
    )
    .unwrap();

    // c1: three orders across Jan/Feb/May, c2: Jan and Mar, c3: one in Feb,
    // c4: one old canceled order, c5 and c6: none
    fs::write(
        dir.path().join("orders.csv"),
        "order_id,customer_id,order_status,order_purchase_timestamp\n\
         o1,c1,delivered,2024-01-05 10:00:00\n\
         o2,c1,delivered,2024-02-10 10:00:00\n\
         o3,c1,delivered,2024-05-20 10:00:00\n\
         o4,c2,delivered,2024-01-15 09:00:00\n\
         o5,c2,shipped,2024-03-02 09:00:00\n\
         o6,c3,delivered,2024-02-28 18:30:00\n\
         o7,c4,canceled,2023-08-01 12:00:00\n",
    )
    .unwrap();

    // o1 is paid in two installments
    fs::write(
        dir.path().join("payments.csv"),
        "order_id,payment_type,payment_value\n\
         o1,credit_card,60.00\n\
         o1,voucher,40.00\n\
         o2,credit_card,150.00\n\
         o3,boleto,250.00\n\
         o4,credit_card,40.00\n\
         o5,credit_card,20.00\n\
         o6,debit_card,35.50\n\
         o7,credit_card,300.00\n",
    )
    .unwrap();

    fs::write(
        dir.path().join("order_items.csv"),
        "order_id,order_item_id,product_id,price\n\
         o1,1,p1,100.00\n\
         o2,1,p2,150.00\n",
    )
    .unwrap();

    dir
}

fn config_for(data: &Path, out: &Path) -> ReportConfig {
    ReportConfig {
        data_dir: data.to_path_buf(),
        output_dir: out.to_path_buf(),
        ..ReportConfig::default()
    }
}

fn as_of() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()
}

fn read(dir: &Path, name: &str) -> String {
    fs::read_to_string(dir.join(name)).unwrap()
}

#[test]
fn test_end_to_end_reports() {
    let data = create_test_data();
    let out = tempdir().unwrap();
    let out_dir = out.path().join("outputs");
    let config = config_for(data.path(), &out_dir);

    let session = Session::load(&config.data_dir, &config.inputs).unwrap();
    let summary = generate_reports(&session, &config, as_of()).unwrap();

    assert_eq!(summary.written.len(), 9);
    assert!(summary.written.iter().all(|p| p.exists()));
    assert_eq!(summary.cohorts, 3);
    assert_eq!(summary.customers_with_revenue, 4);
    assert_eq!(summary.segmented_customers, 4);

    assert_eq!(
        read(&out_dir, FUNNEL_CSV),
        "stage,customers,pct_of_total\n\
         Delivered order,3,50.00\n\
         Placed any order,4,66.67\n\
         Registered customers,6,100.00\n\
         Repeat purchasers (>1 order),2,33.33\n"
    );

    assert_eq!(
        read(&out_dir, RETENTION_COUNTS_CSV),
        "cohort_month,month_number,active_customers\n\
         2023-08-01,0,1\n\
         2024-01-01,0,2\n\
         2024-01-01,1,1\n\
         2024-01-01,2,1\n\
         2024-01-01,4,1\n\
         2024-02-01,0,1\n"
    );

    assert_eq!(
        read(&out_dir, RETENTION_PIVOT_CSV),
        "cohort_month,0,1,2,3,4\n\
         2023-08-01,1,0,0,0,0\n\
         2024-01-01,2,1,1,0,1\n\
         2024-02-01,1,0,0,0,0\n"
    );

    assert_eq!(
        read(&out_dir, REVENUE_CSV),
        "revenue_quintile,customers,total_revenue\n\
         1,1,500.00\n\
         2,1,300.00\n\
         3,1,60.00\n\
         4,1,35.50\n"
    );

    // avg revenue 223.875, median 180; active since 2024-03-15, at risk since 2023-12-15
    assert_eq!(
        read(&out_dir, SEGMENTS_CSV),
        "customer_id,total_orders,total_revenue,last_purchase_date,customer_lifecycle,spending_tier,engagement_status,action_segment\n\
         c1,3,500.00,2024-05-20,Loyal Repeat,High Value,Active,VIP - Retain & Grow\n\
         c4,1,300.00,2023-08-01,New Customer,High Value,Inactive,Churned VIP - Win Back\n\
         c2,2,60.00,2024-03-02,Occasional Repeat,Low Value,At Risk,Standard - Engage\n\
         c3,1,35.50,2024-02-28,New Customer,Low Value,At Risk,Standard - Engage\n"
    );

    assert_eq!(
        read(&out_dir, SEGMENT_COUNTS_CSV),
        "action_segment,count\n\
         Standard - Engage,2\n\
         Churned VIP - Win Back,1\n\
         VIP - Retain & Grow,1\n"
    );

    for chart in [RETENTION_HEATMAP_PNG, REVENUE_PNG, SEGMENT_COUNTS_PNG] {
        let metadata = fs::metadata(out_dir.join(chart)).unwrap();
        assert!(metadata.len() > 0, "{} is empty", chart);
    }
}

#[test]
fn test_reruns_are_reproducible() {
    let data = create_test_data();
    let first = tempdir().unwrap();
    let second = tempdir().unwrap();

    for out in [first.path(), second.path()] {
        let config = config_for(data.path(), out);
        let session = Session::load(&config.data_dir, &config.inputs).unwrap();
        generate_reports(&session, &config, as_of()).unwrap();
    }

    for name in [
        FUNNEL_CSV,
        RETENTION_COUNTS_CSV,
        RETENTION_PIVOT_CSV,
        REVENUE_CSV,
        SEGMENTS_CSV,
        SEGMENT_COUNTS_CSV,
    ] {
        assert_eq!(read(first.path(), name), read(second.path(), name), "{} differs", name);
    }
}

#[test]
fn test_missing_input_file() {
    let data = create_test_data();
    fs::remove_file(data.path().join("order_items.csv")).unwrap();
    let config = config_for(data.path(), data.path());

    let err = Session::load(&config.data_dir, &config.inputs).unwrap_err();
    assert!(err.is_missing_input());
    assert!(err.to_string().contains("order_items.csv"));
}

#[test]
fn test_missing_column_is_rejected() {
    let data = create_test_data();
    fs::write(data.path().join("payments.csv"), "order_id,amount\no1,10\n").unwrap();
    let config = config_for(data.path(), data.path());

    let err = Session::load(&config.data_dir, &config.inputs).unwrap_err();
    assert!(matches!(
        err,
        ReportError::MissingColumn {
            table: "payments",
            column: "payment_value"
        }
    ));
}

#[test]
fn test_header_only_inputs() {
    let data = tempdir().unwrap();
    for (file, header) in [
        ("customers.csv", "customer_id,customer_zip_code_prefix,customer_city\n"),
        ("orders.csv", "order_id,customer_id,order_status,order_purchase_timestamp\n"),
        ("payments.csv", "order_id,payment_type,payment_value\n"),
        ("order_items.csv", "order_id,order_item_id,product_id,price\n"),
    ] {
        fs::write(data.path().join(file), header).unwrap();
    }
    let out = tempdir().unwrap();
    let config = config_for(data.path(), out.path());

    let session = Session::load(&config.data_dir, &config.inputs).unwrap();
    let summary = generate_reports(&session, &config, as_of()).unwrap();
    assert_eq!(summary.written.len(), 9);
    assert_eq!(summary.cohorts, 0);
    assert_eq!(summary.segmented_customers, 0);

    assert_eq!(
        read(out.path(), FUNNEL_CSV),
        "stage,customers,pct_of_total\n\
         Delivered order,0,0.00\n\
         Placed any order,0,0.00\n\
         Registered customers,0,0.00\n\
         Repeat purchasers (>1 order),0,0.00\n"
    );
    assert_eq!(
        read(out.path(), RETENTION_COUNTS_CSV),
        "cohort_month,month_number,active_customers\n"
    );
    assert_eq!(read(out.path(), RETENTION_PIVOT_CSV), "cohort_month\n");
    assert_eq!(
        read(out.path(), REVENUE_CSV),
        "revenue_quintile,customers,total_revenue\n"
    );
    assert_eq!(read(out.path(), SEGMENT_COUNTS_CSV), "action_segment,count\n");
    for chart in [RETENTION_HEATMAP_PNG, REVENUE_PNG, SEGMENT_COUNTS_PNG] {
        assert!(out.path().join(chart).exists(), "{} missing", chart);
    }
}

#[test]
fn test_zero_padded_order_ids_still_join() {
    let data = create_test_data();
    fs::write(
        data.path().join("orders.csv"),
        "order_id,customer_id,order_status,order_purchase_timestamp\n\
         007,c1,delivered,2024-05-01 10:00:00\n\
         x9,c2,delivered,2024-05-02 10:00:00\n",
    )
    .unwrap();
    fs::write(
        data.path().join("payments.csv"),
        "order_id,payment_type,payment_value\n007,credit_card,50.0\n",
    )
    .unwrap();
    let out = tempdir().unwrap();
    let config = config_for(data.path(), out.path());

    let session = Session::load(&config.data_dir, &config.inputs).unwrap();
    generate_reports(&session, &config, as_of()).unwrap();

    assert_eq!(
        read(out.path(), REVENUE_CSV),
        "revenue_quintile,customers,total_revenue\n1,1,50.00\n"
    );
    assert!(read(out.path(), SEGMENTS_CSV).contains("c1,1,50.00,2024-05-01,"));
}

#[test]
fn test_query_runner_output() {
    let data = create_test_data();
    let config = config_for(data.path(), data.path());
    let session = Session::load(&config.data_dir, &config.inputs).unwrap();

    let mut out = Vec::new();
    let summary = run_queries(&session, &config, as_of(), &mut out).unwrap();
    assert_eq!(summary.succeeded.len(), 4);
    assert!(summary.failed.is_empty());

    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("Running retention\nRows returned: 6"));
    assert!(text.contains("Running revenue\nRows returned: 4"));
    assert!(text.contains("VIP - Retain & Grow"));
}
