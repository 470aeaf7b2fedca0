//! SVG figures: shift box plots, bladder-volume scatter plots and QQ plots.

use crate::data::{Axis, Covariate, Location, ObservationTable, Reference};
use crate::diagnostics::QqPlot;
use crate::error::{Result, ShiftError};
use crate::model::NodeLine;
use crate::report::boxplot::subject_boxes;
use crate::report::Palette;
use plotters::prelude::*;
use std::error::Error;
use std::path::Path;

type DrawResult = std::result::Result<(), Box<dyn Error>>;

const BOX_HALF_WIDTH: f64 = 0.3;

fn padded(lo: f64, hi: f64) -> (f64, f64) {
    if !lo.is_finite() || !hi.is_finite() {
        return (-1.0, 1.0);
    }
    if (hi - lo).abs() < 1e-9 {
        return (lo - 1.0, hi + 1.0);
    }
    let pad = 0.08 * (hi - lo);
    (lo - pad, hi + pad)
}

fn plot_error(e: Box<dyn Error>) -> ShiftError {
    ShiftError::Plot(e.to_string())
}

/// Box plots of shift per subject: one panel per axis (rows) and location (columns).
pub fn plot_shift_boxes(
    table: &ObservationTable,
    reference: Reference,
    palette: &Palette,
    path: &Path,
    size: (u32, u32),
) -> Result<()> {
    draw_shift_boxes(table, reference, palette, path, size).map_err(plot_error)
}

fn draw_shift_boxes(
    table: &ObservationTable,
    reference: Reference,
    palette: &Palette,
    path: &Path,
    size: (u32, u32),
) -> DrawResult {
    let root = SVGBackend::new(path, size).into_drawing_area();
    root.fill(&WHITE)?;
    let panels = root.split_evenly((Axis::ALL.len(), Location::ALL.len()));
    let all_subjects = table.subjects();

    for (i, panel) in panels.iter().enumerate() {
        let axis = Axis::ALL[i / Location::ALL.len()];
        let location = Location::ALL[i % Location::ALL.len()];
        let boxes = subject_boxes(table, axis, reference, location);

        let (lo, hi) = boxes
            .iter()
            .map(|(_, b)| b.extent())
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), (a, b)| (lo.min(a), hi.max(b)));
        let (y_min, y_max) = padded(lo, hi);
        let n = boxes.len().max(1);

        let mut chart = ChartBuilder::on(panel)
            .caption(format!("{} {} ({})", reference, axis.name(), location), ("sans-serif", 14))
            .margin(6)
            .x_label_area_size(24)
            .y_label_area_size(40)
            .build_cartesian_2d(-0.5f64..(n as f64 - 0.5), y_min..y_max)?;

        let labels: Vec<&str> = boxes.iter().map(|(s, _)| s.as_str()).collect();
        let label_for = |x: &f64| {
            let idx = x.round();
            if (x - idx).abs() < 1e-6 && idx >= 0.0 {
                labels.get(idx as usize).map(|s| s.to_string()).unwrap_or_default()
            } else {
                String::new()
            }
        };
        chart
            .configure_mesh()
            .disable_x_mesh()
            .x_labels(n + 1)
            .x_label_formatter(&label_for)
            .y_desc("shift (mm)")
            .draw()?;

        chart.draw_series(std::iter::once(PathElement::new(
            vec![(-0.5, 0.0), (n as f64 - 0.5, 0.0)],
            BLACK.mix(0.3),
        )))?;

        for (j, (subject, stats)) in boxes.iter().enumerate() {
            let x = j as f64;
            let subject_idx = all_subjects.iter().position(|s| s == subject).unwrap_or(j);
            let color = palette.subject(subject_idx);

            chart.draw_series(std::iter::once(Rectangle::new(
                [(x - BOX_HALF_WIDTH, stats.q1), (x + BOX_HALF_WIDTH, stats.q3)],
                color.mix(0.35).filled(),
            )))?;
            chart.draw_series(std::iter::once(Rectangle::new(
                [(x - BOX_HALF_WIDTH, stats.q1), (x + BOX_HALF_WIDTH, stats.q3)],
                color.stroke_width(1),
            )))?;
            chart.draw_series(std::iter::once(PathElement::new(
                vec![(x - BOX_HALF_WIDTH, stats.median), (x + BOX_HALF_WIDTH, stats.median)],
                color.stroke_width(2),
            )))?;
            chart.draw_series(std::iter::once(PathElement::new(
                vec![(x, stats.whisker_low), (x, stats.q1)],
                color.stroke_width(1),
            )))?;
            chart.draw_series(std::iter::once(PathElement::new(
                vec![(x, stats.q3), (x, stats.whisker_high)],
                color.stroke_width(1),
            )))?;
            chart.draw_series(
                stats
                    .outliers
                    .iter()
                    .map(|v| Circle::new((x, *v), 2, color.filled())),
            )?;
        }
    }

    root.present()?;
    Ok(())
}

/// Scatter of a bladder covariate against shift with per-node regression lines.
#[allow(clippy::too_many_arguments)]
pub fn plot_bladder_scatter(
    table: &ObservationTable,
    axis: Axis,
    reference: Reference,
    covariate: Covariate,
    lines: &[NodeLine],
    palette: &Palette,
    path: &Path,
    size: (u32, u32),
) -> Result<()> {
    draw_bladder_scatter(table, axis, reference, covariate, lines, palette, path, size)
        .map_err(plot_error)
}

#[allow(clippy::too_many_arguments)]
fn draw_bladder_scatter(
    table: &ObservationTable,
    axis: Axis,
    reference: Reference,
    covariate: Covariate,
    lines: &[NodeLine],
    palette: &Palette,
    path: &Path,
    size: (u32, u32),
) -> DrawResult {
    let points: Vec<(f64, f64, Location)> = table
        .iter()
        .filter_map(|o| covariate.value(o).map(|x| (x, o.shift(axis, reference), o.location)))
        .collect();

    let (x_lo, x_hi) = points
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| (lo.min(p.0), hi.max(p.0)));
    let (y_lo, y_hi) = points
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| (lo.min(p.1), hi.max(p.1)));
    let (x_min, x_max) = padded(x_lo, x_hi);
    let (y_min, y_max) = padded(y_lo, y_hi);

    let root = SVGBackend::new(path, size).into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .caption(
            format!("{} {} shift vs {}", reference, axis.name(), covariate),
            ("sans-serif", 18),
        )
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(x_min..x_max, y_min..y_max)?;

    chart
        .configure_mesh()
        .x_desc(covariate.name())
        .y_desc("shift (mm)")
        .draw()?;

    for location in Location::ALL {
        let color = palette.location(location);
        chart
            .draw_series(
                points
                    .iter()
                    .filter(|p| p.2 == location)
                    .map(|p| Circle::new((p.0, p.1), 3, color.mix(0.7).filled())),
            )?
            .label(location.label())
            .legend(move |(x, y)| Circle::new((x, y), 3, color.filled()));
    }

    for line in lines {
        let color = palette.location(line.location);
        let (a, b) = line.x_range;
        chart.draw_series(std::iter::once(PathElement::new(
            vec![(a, line.predict(a)), (b, line.predict(b))],
            color.stroke_width(1),
        )))?;
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;

    root.present()?;
    Ok(())
}

/// Normal QQ plot of residuals with the quartile reference line.
pub fn plot_qq(qq: &QqPlot, title: &str, palette: &Palette, path: &Path, size: (u32, u32)) -> Result<()> {
    draw_qq(qq, title, palette, path, size).map_err(plot_error)
}

fn draw_qq(qq: &QqPlot, title: &str, palette: &Palette, path: &Path, size: (u32, u32)) -> DrawResult {
    let x_lo = qq.theoretical.first().copied().unwrap_or(-1.0);
    let x_hi = qq.theoretical.last().copied().unwrap_or(1.0);
    let y_lo = qq.sample.first().copied().unwrap_or(-1.0);
    let y_hi = qq.sample.last().copied().unwrap_or(1.0);
    let (x_min, x_max) = padded(x_lo, x_hi);
    let (y_min, y_max) = padded(y_lo, y_hi);

    let root = SVGBackend::new(path, size).into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .caption(format!("{} (PPCC {:.3})", title, qq.ppcc), ("sans-serif", 16))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(x_min..x_max, y_min..y_max)?;

    chart
        .configure_mesh()
        .x_desc("theoretical quantile")
        .y_desc("residual (mm)")
        .draw()?;

    let line = qq.line;
    chart.draw_series(std::iter::once(PathElement::new(
        vec![
            (x_min, line.intercept + line.slope * x_min),
            (x_max, line.intercept + line.slope * x_max),
        ],
        palette.reference_line().stroke_width(1),
    )))?;

    let color = palette.points();
    chart.draw_series(qq.points().map(|(x, y)| Circle::new((x, y), 2, color.filled())))?;

    root.present()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Observation, Phase};
    use crate::diagnostics::qq_points;
    use crate::model::fit_node_lines;
    use tempfile::TempDir;

    fn create_test_table() -> ObservationTable {
        let mut obs = Vec::new();
        for s in 0..2 {
            for (nd, location) in Location::ALL.iter().enumerate() {
                for k in 0..3 {
                    obs.push(Observation {
                        subject: format!("P{}", s),
                        node: format!("N{}", nd),
                        phase: Phase::During,
                        location: *location,
                        bony_shift: [k as f64, s as f64 - k as f64, 0.5 * nd as f64],
                        tumor_shift: [0.0; 3],
                        bladder_baseline: Some(0.5),
                        bladder_relative: Some(0.8 + 0.1 * k as f64),
                    });
                }
            }
        }
        ObservationTable::from_observations(obs).unwrap()
    }

    #[test]
    fn test_box_plot_written() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("boxes.svg");
        plot_shift_boxes(&create_test_table(), Reference::Bony, &Palette::default(), &path, (900, 600))
            .unwrap();
        let svg = std::fs::read_to_string(&path).unwrap();
        assert!(svg.contains("<svg"));
        assert!(svg.contains("P1"));
    }

    #[test]
    fn test_scatter_and_qq_written() {
        let dir = TempDir::new().unwrap();
        let table = create_test_table();
        let lines = fit_node_lines(&table, Axis::LeftRight, Reference::Bony, Covariate::RelativeBladder);
        assert_eq!(lines.len(), 6);

        let scatter = dir.path().join("scatter.svg");
        plot_bladder_scatter(
            &table,
            Axis::LeftRight,
            Reference::Bony,
            Covariate::RelativeBladder,
            &lines,
            &Palette::default(),
            &scatter,
            (800, 600),
        )
        .unwrap();
        assert!(scatter.exists());

        let qq = qq_points(&[0.3, -0.2, 0.1, -0.4, 0.25]).unwrap();
        let qq_path = dir.path().join("qq.svg");
        plot_qq(&qq, "bony_lr", &Palette::default(), &qq_path, (600, 600)).unwrap();
        assert!(std::fs::read_to_string(&qq_path).unwrap().contains("<circle"));
    }
}
