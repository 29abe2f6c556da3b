// Plot rendering
// Line charts per dimension and the correlation heat-map, written as SVG.

use plotters::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::aggregate::DimensionTable;
use crate::correlation::CorrelationMatrix;
use crate::error::{Result, StatsError};
use crate::observability::{log_operation, Operation, OperationContext};
use crate::types::{Dimension, DimensionAggregate};

pub const DELAY_PLOT: &str = "avg_request_scheduling_delay.svg";
pub const MFU_PLOT: &str = "avg_mfu.svg";
pub const CORRELATION_PLOT: &str = "correlation.svg";

const CHART_SIZE: (u32, u32) = (640, 480);
const HEATMAP_SIZE: (u32, u32) = (640, 600);
const FONT: &str = "sans-serif";

fn render_error(path: &Path, e: impl std::fmt::Display) -> StatsError {
    StatsError::Render {
        path: path.to_path_buf(),
        reason: e.to_string(),
    }
}

/// Groups ordered by the numeric value of their key
pub fn sorted_points(table: &DimensionTable) -> Result<Vec<(f64, DimensionAggregate)>> {
    let mut points = table
        .iter()
        .map(|(key, aggregate)| -> Result<(f64, DimensionAggregate)> {
            let x = key.parse::<f64>().map_err(|e| {
                StatsError::experiment_name(key, format!("dimension value is not a number: {e}"))
            })?;
            Ok((x, *aggregate))
        })
        .collect::<Result<Vec<_>>>()?;
    points.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
    Ok(points)
}

/// Draw delay and MFU line charts for one dimension under `<output_dir>/<dimension>/`
pub fn render_dimension(
    dimension: Dimension,
    table: &DimensionTable,
    output_dir: &Path,
) -> Result<Vec<PathBuf>> {
    let points = sorted_points(table)?;
    let dir = output_dir.join(dimension.as_str());
    fs::create_dir_all(&dir).map_err(|e| StatsError::io(&dir, e))?;

    let delay: Vec<(f64, f64)> = points
        .iter()
        .map(|(x, a)| (*x, a.avg_request_scheduling_delay))
        .collect();
    let mfu: Vec<(f64, f64)> = points.iter().map(|(x, a)| (*x, a.avg_mfu)).collect();

    let delay_path = dir.join(DELAY_PLOT);
    draw_line_chart(
        &delay_path,
        dimension.as_str(),
        "avg_request_scheduling_delay",
        &delay,
    )?;
    let mfu_path = dir.join(MFU_PLOT);
    draw_line_chart(&mfu_path, dimension.as_str(), "avg_mfu", &mfu)?;

    Ok(vec![delay_path, mfu_path])
}

/// Draw the correlation heat-map to `<output_dir>/correlation.svg`
pub fn render_correlation(matrix: &CorrelationMatrix, output_dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(output_dir).map_err(|e| StatsError::io(output_dir, e))?;
    let path = output_dir.join(CORRELATION_PLOT);
    draw_heatmap(&path, matrix)?;
    log_rendered(&path);
    Ok(path)
}

fn draw_line_chart(path: &Path, x_label: &str, y_label: &str, series: &[(f64, f64)]) -> Result<()> {
    let (x_range, y_range) = padded_ranges(series);

    let root = SVGBackend::new(path, CHART_SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(|e| render_error(path, e))?;

    let mut chart = ChartBuilder::on(&root)
        .caption(format!("{y_label} by {x_label}"), (FONT, 20))
        .margin(15)
        .x_label_area_size(40)
        .y_label_area_size(70)
        .build_cartesian_2d(x_range, y_range)
        .map_err(|e| render_error(path, e))?;

    chart
        .configure_mesh()
        .x_desc(x_label)
        .y_desc(y_label)
        .y_label_formatter(&|y| format!("{:.3}", y))
        .draw()
        .map_err(|e| render_error(path, e))?;

    chart
        .draw_series(LineSeries::new(series.iter().copied(), &BLUE))
        .map_err(|e| render_error(path, e))?;
    chart
        .draw_series(
            series
                .iter()
                .map(|&(x, y)| Circle::new((x, y), 4, BLUE.filled())),
        )
        .map_err(|e| render_error(path, e))?;

    root.present().map_err(|e| render_error(path, e))?;
    log_rendered(path);
    Ok(())
}

/// Axis ranges with a margin; degenerate ranges are widened so plotters can scale them
fn padded_ranges(series: &[(f64, f64)]) -> (std::ops::Range<f64>, std::ops::Range<f64>) {
    let (x_min, x_max) = bounds(series.iter().map(|p| p.0));
    let (y_min, y_max) = bounds(series.iter().map(|p| p.1));

    let pad = |lo: f64, hi: f64, floor_at_zero: bool| {
        if !lo.is_finite() || !hi.is_finite() {
            return 0.0..1.0;
        }
        let span = hi - lo;
        if span == 0.0 {
            let delta = if hi == 0.0 { 1.0 } else { hi.abs() * 0.1 };
            return (lo - delta)..(hi + delta);
        }
        let lo = if floor_at_zero && lo >= 0.0 {
            0.0
        } else {
            lo - span * 0.05
        };
        lo..(hi + span * 0.1)
    };

    (pad(x_min, x_max, false), pad(y_min, y_max, true))
}

fn bounds(values: impl Iterator<Item = f64>) -> (f64, f64) {
    values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    })
}

fn draw_heatmap(path: &Path, matrix: &CorrelationMatrix) -> Result<()> {
    let n = matrix.columns.len() as i32;
    let root = SVGBackend::new(path, HEATMAP_SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(|e| render_error(path, e))?;

    let mut chart = ChartBuilder::on(&root)
        .caption("correlation", (FONT, 24))
        .margin(15)
        .top_x_label_area_size(40)
        .y_label_area_size(70)
        .build_cartesian_2d(0i32..n, 0i32..n)
        .map_err(|e| render_error(path, e))?;

    // First matrix row at the top
    let x_label = |i: &i32| matrix.columns.get(*i as usize).cloned().unwrap_or_default();
    let y_label = |i: &i32| {
        matrix
            .columns
            .get((n - 1 - *i) as usize)
            .cloned()
            .unwrap_or_default()
    };
    chart
        .configure_mesh()
        .x_labels(n as usize)
        .y_labels(n as usize)
        .x_label_offset(50)
        .y_label_offset(45)
        .disable_x_mesh()
        .disable_y_mesh()
        .x_label_formatter(&x_label)
        .y_label_formatter(&y_label)
        .label_style((FONT, 16))
        .draw()
        .map_err(|e| render_error(path, e))?;

    let cells: Vec<(i32, i32, f64)> = matrix
        .values
        .iter()
        .zip(0..)
        .flat_map(|(row, i)| row.iter().zip(0..).map(move |(v, x)| (x, n - 1 - i, *v)))
        .collect();

    chart
        .draw_series(
            cells
                .iter()
                .map(|&(x, y, v)| Rectangle::new([(x, y), (x + 1, y + 1)], cell_color(v).filled())),
        )
        .map_err(|e| render_error(path, e))?;
    chart
        .draw_series(cells.iter().map(|&(x, y, v)| {
            let text = if v.is_nan() {
                "nan".to_string()
            } else {
                format!("{v:.2}")
            };
            EmptyElement::at((x, y + 1)) + Text::new(text, (40, 40), (FONT, 16).into_font())
        }))
        .map_err(|e| render_error(path, e))?;

    root.present().map_err(|e| render_error(path, e))?;
    Ok(())
}

/// Blue for -1 through white-ish to red for +1; grey for undefined coefficients
fn cell_color(v: f64) -> HSLColor {
    if v.is_nan() {
        return HSLColor(0.0, 0.0, 0.8);
    }
    let t = (v.clamp(-1.0, 1.0) + 1.0) / 2.0;
    let hue = if t < 0.5 { 240.0 / 360.0 } else { 0.0 };
    let lightness = 0.95 - 0.45 * (2.0 * t - 1.0).abs();
    HSLColor(hue, 0.75, lightness)
}

fn log_rendered(path: &Path) {
    let ctx = OperationContext::new("render");
    log_operation(
        &ctx,
        &Operation::PlotRender {
            path: path.display().to_string(),
        },
    );
    info!("Wrote {:?}", path);
}
