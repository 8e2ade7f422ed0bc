//! CohortLens: customer analytics reports from flat CSV exports
//!
//! This is the main entrypoint that loads the input tables and either writes
//! every report or runs the query preview.

use std::time::Instant;

use anyhow::Result;
use clap::Parser;
use cohortlens::cli::Command;
use cohortlens::{generate_reports, run_queries, Args, ReportConfig, Session};

fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level())
        .format_timestamp_secs()
        .init();

    let config = args.resolve_config()?;
    let as_of = args.parse_as_of()?;

    match args.command() {
        Command::Report => run_report(&config, as_of),
        Command::Queries => run_query_preview(&config, as_of),
    }
}

/// Load the tables; a missing input file surfaces as an error and exit code 1
fn load_session(config: &ReportConfig) -> Result<Session> {
    let session = Session::load(&config.data_dir, &config.inputs)?;
    Ok(session)
}

/// Compute all reports and write them to the output directory
fn run_report(config: &ReportConfig, as_of: chrono::NaiveDate) -> Result<()> {
    println!("=== Customer Analytics Reports ===\n");
    let start_time = Instant::now();

    let session = load_session(config)?;
    println!(
        "✓ Data loaded: {} customers, {} orders, {} payments, {} order items",
        session.customers.height(),
        session.orders.height(),
        session.payments.height(),
        session.order_items.height()
    );
    log::info!("Segmentation reference date: {}", as_of);

    let summary = generate_reports(&session, config, as_of)?;

    println!("✓ Cohorts: {}", summary.cohorts);
    println!("✓ Customers with revenue: {}", summary.customers_with_revenue);
    println!("✓ Segmented customers: {}", summary.segmented_customers);
    println!("\nFiles written:");
    for path in &summary.written {
        println!("  {}", path.display());
    }

    println!("\n=== Reports Complete ===");
    println!("Total processing time: {:.2}s", start_time.elapsed().as_secs_f64());
    println!("Reports and charts saved to {}", config.output_dir.display());

    Ok(())
}

/// Print each query's row count and first rows, continuing past failures
fn run_query_preview(config: &ReportConfig, as_of: chrono::NaiveDate) -> Result<()> {
    let session = load_session(config)?;

    let stdout = std::io::stdout();
    let summary = run_queries(&session, config, as_of, &mut stdout.lock())?;

    if !summary.failed.is_empty() {
        log::warn!("{} of {} queries failed", summary.failed.len(), summary.failed.len() + summary.succeeded.len());
    }
    Ok(())
}
