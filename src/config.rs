//! Configuration types for report generation.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ReportError, Result};

/// File names of the four input tables, relative to the data directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputFiles {
    #[serde(default = "default_customers_file")]
    pub customers: String,

    #[serde(default = "default_orders_file")]
    pub orders: String,

    #[serde(default = "default_payments_file")]
    pub payments: String,

    #[serde(default = "default_order_items_file")]
    pub order_items: String,
}

fn default_customers_file() -> String {
    "customers.csv".to_string()
}

fn default_orders_file() -> String {
    "orders.csv".to_string()
}

fn default_payments_file() -> String {
    "payments.csv".to_string()
}

fn default_order_items_file() -> String {
    "order_items.csv".to_string()
}

impl Default for InputFiles {
    fn default() -> Self {
        Self {
            customers: default_customers_file(),
            orders: default_orders_file(),
            payments: default_payments_file(),
            order_items: default_order_items_file(),
        }
    }
}

/// Window of the retention matrix shown in the heatmap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeatmapConfig {
    /// Number of leading cohort rows drawn
    #[serde(default = "default_max_cohorts")]
    pub max_cohorts: usize,

    /// Number of leading month offsets drawn
    #[serde(default = "default_max_offsets")]
    pub max_offsets: usize,
}

fn default_max_cohorts() -> usize {
    24
}

fn default_max_offsets() -> usize {
    12
}

impl Default for HeatmapConfig {
    fn default() -> Self {
        Self {
            max_cohorts: default_max_cohorts(),
            max_offsets: default_max_offsets(),
        }
    }
}

/// Recency windows used by the segmentation rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentationConfig {
    /// Months before the reference date that still count as active
    #[serde(default = "default_active_months")]
    pub active_months: u32,

    /// Months before the reference date that count as at risk
    #[serde(default = "default_at_risk_months")]
    pub at_risk_months: u32,
}

fn default_active_months() -> u32 {
    3
}

fn default_at_risk_months() -> u32 {
    6
}

impl SegmentationConfig {
    /// The at-risk window must reach at least as far back as the active one.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.at_risk_months < self.active_months {
            return Err(format!(
                "segmentation.at_risk_months ({}) must not be less than segmentation.active_months ({})",
                self.at_risk_months, self.active_months
            ));
        }
        Ok(())
    }
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            active_months: default_active_months(),
            at_risk_months: default_at_risk_months(),
        }
    }
}

/// Pixel sizes of the rendered charts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartConfig {
    #[serde(default = "default_heatmap_size")]
    pub heatmap_size: (u32, u32),

    #[serde(default = "default_quintile_size")]
    pub quintile_size: (u32, u32),

    #[serde(default = "default_segment_size")]
    pub segment_size: (u32, u32),
}

fn default_heatmap_size() -> (u32, u32) {
    (1200, 800)
}

fn default_quintile_size() -> (u32, u32) {
    (800, 500)
}

fn default_segment_size() -> (u32, u32) {
    (1000, 600)
}

impl Default for ChartConfig {
    fn default() -> Self {
        Self {
            heatmap_size: default_heatmap_size(),
            quintile_size: default_quintile_size(),
            segment_size: default_segment_size(),
        }
    }
}

/// Top-level report configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    #[serde(default)]
    pub inputs: InputFiles,

    #[serde(default)]
    pub heatmap: HeatmapConfig,

    #[serde(default)]
    pub segmentation: SegmentationConfig,

    #[serde(default)]
    pub charts: ChartConfig,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("outputs")
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            output_dir: default_output_dir(),
            inputs: InputFiles::default(),
            heatmap: HeatmapConfig::default(),
            segmentation: SegmentationConfig::default(),
            charts: ChartConfig::default(),
        }
    }
}

impl ReportConfig {
    /// Load configuration from a YAML file.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let config_error = |message: String| ReportError::Config {
            path: path.to_path_buf(),
            message,
        };
        let content = std::fs::read_to_string(path).map_err(|e| config_error(e.to_string()))?;
        let config: Self = serde_yaml::from_str(&content).map_err(|e| config_error(e.to_string()))?;
        config.segmentation.validate().map_err(config_error)?;
        Ok(config)
    }

    /// Save configuration to a YAML file.
    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self).map_err(|e| ReportError::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        std::fs::write(path, content).map_err(|e| ReportError::OutputWrite {
            path: path.to_path_buf(),
            source: e,
        })
    }
}
