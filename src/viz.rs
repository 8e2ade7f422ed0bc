//! Chart rendering using Plotters: retention heatmap, revenue by quintile and
//! action segment counts

use std::path::Path;

use plotters::prelude::*;

use crate::error::{ReportError, Result};
use crate::retention::RetentionMatrix;
use crate::revenue::QuintileSummary;
use crate::segments::SegmentCount;

/// Yellow-green-blue ramp from lightest to darkest
const HEATMAP_RAMP: [(u8, u8, u8); 9] = [
    (255, 255, 217),
    (237, 248, 177),
    (199, 233, 180),
    (127, 205, 187),
    (65, 182, 196),
    (29, 145, 192),
    (34, 94, 168),
    (37, 52, 148),
    (8, 29, 88),
];

/// Bar color for the quintile chart
const QUINTILE_COLOR: RGBColor = RGBColor(55, 126, 184);

/// Bar color for the segment chart
const SEGMENT_COLOR: RGBColor = RGBColor(77, 175, 74);

fn chart_error<E: std::fmt::Display>(path: &Path) -> impl Fn(E) -> ReportError + '_ {
    move |e| ReportError::Chart {
        path: path.to_path_buf(),
        message: e.to_string(),
    }
}

/// Color for a cell holding `value` on a scale topping out at `max`
pub fn heat_color(value: u64, max: u64) -> RGBColor {
    if max == 0 {
        let (r, g, b) = HEATMAP_RAMP[0];
        return RGBColor(r, g, b);
    }

    let t = (value.min(max) as f64 / max as f64) * (HEATMAP_RAMP.len() - 1) as f64;
    let lower = t.floor() as usize;
    let upper = (lower + 1).min(HEATMAP_RAMP.len() - 1);
    let frac = t - lower as f64;

    let lerp = |a: u8, b: u8| (a as f64 + (b as f64 - a as f64) * frac).round() as u8;
    let (r0, g0, b0) = HEATMAP_RAMP[lower];
    let (r1, g1, b1) = HEATMAP_RAMP[upper];
    RGBColor(lerp(r0, r1), lerp(g0, g1), lerp(b0, b1))
}

/// Draw the cohort-by-offset matrix as a heatmap, earliest cohort on top.
pub fn create_retention_heatmap(
    matrix: &RetentionMatrix,
    output_path: &Path,
    size: (u32, u32),
) -> Result<()> {
    let rows = matrix.cohorts.len();
    let cols = matrix.offsets;
    let max = matrix.max_count();

    let root = BitMapBackend::new(output_path, size).into_drawing_area();
    root.fill(&WHITE).map_err(chart_error(output_path))?;

    let mut chart = ChartBuilder::on(&root)
        .caption("Cohort retention heatmap (counts)", ("sans-serif", 28))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(100)
        .build_cartesian_2d(0f64..cols.max(1) as f64, 0f64..rows.max(1) as f64)
        .map_err(chart_error(output_path))?;

    // Labels sit at cell centers; row 0 is drawn at the top
    let cohort_label = |y: &f64| {
        let offset = y - y.floor();
        if (offset - 0.5).abs() > 1e-6 || *y < 0.0 {
            return String::new();
        }
        let from_bottom = y.floor() as usize;
        rows.checked_sub(from_bottom + 1)
            .and_then(|r| matrix.cohorts.get(r))
            .map(|d| d.format("%Y-%m").to_string())
            .unwrap_or_default()
    };
    let offset_label = |x: &f64| {
        if (x - x.floor() - 0.5).abs() > 1e-6 || *x < 0.0 {
            return String::new();
        }
        format!("{}", x.floor() as usize)
    };

    chart
        .configure_mesh()
        .disable_mesh()
        .x_labels(cols.max(1) * 2 + 1)
        .y_labels(rows.max(1) * 2 + 1)
        .x_label_formatter(&offset_label)
        .y_label_formatter(&cohort_label)
        .x_desc("Months since first purchase")
        .y_desc("Cohort month")
        .axis_desc_style(("sans-serif", 15))
        .draw()
        .map_err(chart_error(output_path))?;

    chart
        .draw_series(matrix.counts.iter().enumerate().flat_map(|(r, row)| {
            let y = (rows - 1 - r) as f64;
            row.iter().enumerate().map(move |(c, &count)| {
                let x = c as f64;
                Rectangle::new([(x, y), (x + 1.0, y + 1.0)], heat_color(count, max).filled())
            })
        }))
        .map_err(chart_error(output_path))?;

    root.present().map_err(chart_error(output_path))?;
    log::info!("Retention heatmap saved to: {}", output_path.display());

    Ok(())
}

/// Bar chart of total revenue per quintile
pub fn create_quintile_chart(
    quintiles: &[QuintileSummary],
    output_path: &Path,
    size: (u32, u32),
) -> Result<()> {
    let n = quintiles
        .iter()
        .map(|q| q.revenue_quintile)
        .max()
        .unwrap_or(1);
    let max_revenue = quintiles
        .iter()
        .map(|q| q.total_revenue)
        .fold(0.0, f64::max)
        .max(1.0);

    let root = BitMapBackend::new(output_path, size).into_drawing_area();
    root.fill(&WHITE).map_err(chart_error(output_path))?;

    let mut chart = ChartBuilder::on(&root)
        .caption("Revenue by customer quintile", ("sans-serif", 28))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(80)
        .build_cartesian_2d((1u32..n + 1).into_segmented(), 0f64..(max_revenue * 1.1))
        .map_err(chart_error(output_path))?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_label_formatter(&|v: &SegmentValue<u32>| match v {
            SegmentValue::CenterOf(q) | SegmentValue::Exact(q) => q.to_string(),
            SegmentValue::Last => String::new(),
        })
        .x_desc("Quintile (1 = top)")
        .y_desc("Total revenue")
        .axis_desc_style(("sans-serif", 15))
        .draw()
        .map_err(chart_error(output_path))?;

    chart
        .draw_series(
            Histogram::vertical(&chart)
                .style(QUINTILE_COLOR.filled())
                .margin(10)
                .data(quintiles.iter().map(|q| (q.revenue_quintile, q.total_revenue))),
        )
        .map_err(chart_error(output_path))?;

    root.present().map_err(chart_error(output_path))?;
    log::info!("Quintile chart saved to: {}", output_path.display());

    Ok(())
}

/// Horizontal bar chart of customers per action segment, largest on top
pub fn create_segment_chart(
    counts: &[SegmentCount],
    output_path: &Path,
    size: (u32, u32),
) -> Result<()> {
    let n = counts.len();
    let max_count = counts.iter().map(|c| c.count).max().unwrap_or(0).max(1);

    // Reverse so the first (largest) segment is drawn at the top
    let labels: Vec<&str> = counts.iter().rev().map(|c| c.action_segment.label()).collect();

    let root = BitMapBackend::new(output_path, size).into_drawing_area();
    root.fill(&WHITE).map_err(chart_error(output_path))?;

    let mut chart = ChartBuilder::on(&root)
        .caption("Customer counts by action segment", ("sans-serif", 28))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(200)
        .build_cartesian_2d(0u64..(max_count + max_count / 10 + 1), (0usize..n.max(1)).into_segmented())
        .map_err(chart_error(output_path))?;

    chart
        .configure_mesh()
        .disable_y_mesh()
        .y_labels(n.max(1))
        .y_label_formatter(&|v: &SegmentValue<usize>| match v {
            SegmentValue::CenterOf(i) | SegmentValue::Exact(i) => {
                labels.get(*i).map(|l| l.to_string()).unwrap_or_default()
            }
            SegmentValue::Last => String::new(),
        })
        .x_desc("Customers")
        .axis_desc_style(("sans-serif", 15))
        .draw()
        .map_err(chart_error(output_path))?;

    chart
        .draw_series(
            Histogram::horizontal(&chart)
                .style(SEGMENT_COLOR.filled())
                .margin(6)
                .data(counts.iter().rev().enumerate().map(|(i, c)| (i, c.count))),
        )
        .map_err(chart_error(output_path))?;

    root.present().map_err(chart_error(output_path))?;
    log::info!("Segment chart saved to: {}", output_path.display());

    Ok(())
}
