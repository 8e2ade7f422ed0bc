//! Command-line interface definitions and argument parsing

use std::path::PathBuf;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{ArgAction, Parser, Subcommand};
use log::LevelFilter;

use crate::config::ReportConfig;

/// Customer analytics reports: funnel, cohort retention, revenue quintiles and action segments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to a YAML config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory containing customers.csv, orders.csv, payments.csv and order_items.csv
    #[arg(short, long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Directory for CSV reports and charts (created if absent)
    #[arg(short, long, global = true)]
    pub output_dir: Option<PathBuf>,

    /// Reference date for segmentation recency, YYYY-MM-DD (defaults to today)
    #[arg(long, global = true)]
    pub as_of: Option<String>,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Compute every report and write CSVs and charts (default)
    Report,
    /// Run each report query and print its first rows, continuing past failures
    Queries,
}

impl Args {
    /// Subcommand to run, defaulting to a full report
    pub fn command(&self) -> Command {
        self.command.unwrap_or(Command::Report)
    }

    /// Log level derived from the -v count
    pub fn log_level(&self) -> LevelFilter {
        match self.verbose {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            _ => LevelFilter::Debug,
        }
    }

    /// Parse the reference date, falling back to today's local date
    pub fn parse_as_of(&self) -> anyhow::Result<NaiveDate> {
        match self.as_of {
            Some(ref raw) => NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
                .map_err(|_| anyhow::anyhow!("Invalid --as-of date '{}', expected YYYY-MM-DD", raw)),
            None => Ok(chrono::Local::now().date_naive()),
        }
    }

    /// Load the config file if given, then apply directory overrides
    pub fn resolve_config(&self) -> anyhow::Result<ReportConfig> {
        let mut config = match self.config {
            Some(ref path) => ReportConfig::from_yaml(path)
                .with_context(|| format!("loading config from {}", path.display()))?,
            None => ReportConfig::default(),
        };

        if let Some(ref dir) = self.data_dir {
            config.data_dir = dir.clone();
        }
        if let Some(ref dir) = self.output_dir {
            config.output_dir = dir.clone();
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> Args {
        Args {
            config: None,
            data_dir: None,
            output_dir: None,
            as_of: None,
            verbose: 0,
            command: None,
        }
    }

    #[test]
    fn test_parse_as_of() {
        let mut args = args();
        args.as_of = Some("2018-10-17".to_string());
        assert_eq!(args.parse_as_of().unwrap(), NaiveDate::from_ymd_opt(2018, 10, 17).unwrap());

        args.as_of = Some("17/10/2018".to_string());
        assert!(args.parse_as_of().is_err());

        args.as_of = None;
        assert!(args.parse_as_of().is_ok());
    }

    #[test]
    fn test_default_command_is_report() {
        let mut args = args();
        assert_eq!(args.command(), Command::Report);
        args.command = Some(Command::Queries);
        assert_eq!(args.command(), Command::Queries);
    }

    #[test]
    fn test_parse_from_command_line() {
        let args = Args::parse_from([
            "cohortlens",
            "queries",
            "--data-dir",
            "fixtures",
            "--as-of",
            "2018-09-01",
            "-vv",
        ]);
        assert_eq!(args.command(), Command::Queries);
        assert_eq!(args.log_level(), LevelFilter::Debug);

        let config = args.resolve_config().unwrap();
        assert_eq!(config.data_dir, PathBuf::from("fixtures"));
        assert_eq!(config.output_dir, PathBuf::from("outputs"));
    }

    #[test]
    fn test_missing_config_file_is_reported() {
        let mut args = args();
        args.config = Some(PathBuf::from("/nonexistent/cohortlens.yaml"));
        assert!(args.resolve_config().is_err());
    }
}
