//! Tables and figures written from a batch of fits.

pub mod boxplot;
pub mod figures;
pub mod palette;
pub mod tables;

pub use boxplot::{subject_boxes, BoxStats};
pub use figures::{plot_bladder_scatter, plot_qq, plot_shift_boxes};
pub use palette::Palette;
pub use tables::{
    effects_table, notes_table, to_markdown, variance_table, write_tsv, write_tsv_file,
    BatchSummary, EffectRow, NoteRow, TableRow, VarianceRow,
};

use crate::data::{Axis, Covariate, ObservationTable, Reference};
use crate::diagnostics::qq_points;
use crate::error::Result;
use crate::model::fit_node_lines;
use crate::pipeline::{AnalysisConfig, BatchResult};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Write every table and figure for `batch` into `out_dir`.
///
/// Returns the paths written, tables first.
pub fn write_report(
    batch: &BatchResult,
    table: &ObservationTable,
    config: &AnalysisConfig,
    out_dir: &Path,
) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(out_dir)?;
    let precision = config.output.precision;
    let mut written = Vec::new();

    let variance = variance_table(batch);
    let effects = effects_table(batch);
    let notes = notes_table(batch);

    let path = out_dir.join("variance.tsv");
    write_tsv_file(&variance, &path, precision)?;
    written.push(path);

    let path = out_dir.join("effects.tsv");
    write_tsv_file(&effects, &path, precision)?;
    written.push(path);

    let path = out_dir.join("notes.tsv");
    write_tsv_file(&notes, &path, precision)?;
    written.push(path);

    let path = out_dir.join("results.json");
    batch.write_json(&path)?;
    written.push(path);

    let title = if config.name.is_empty() {
        "Node shift analysis"
    } else {
        config.name.as_str()
    };
    let markdown = format!(
        "# {}\n\n```\n{}```\n\n## Variance decomposition (mm)\n\n{}\n## Fixed effects\n\n{}\n## Notes\n\n{}",
        title,
        BatchSummary::from_batch(batch),
        to_markdown(&variance, precision),
        to_markdown(&effects, precision),
        to_markdown(&notes, precision),
    );
    let path = out_dir.join("report.md");
    fs::write(&path, markdown)?;
    written.push(path);

    if config.output.figures {
        written.extend(write_figures(batch, table, config, &out_dir.join("figures"))?);
    }

    info!(files = written.len(), dir = %out_dir.display(), "report written");
    Ok(written)
}

fn write_figures(
    batch: &BatchResult,
    table: &ObservationTable,
    config: &AnalysisConfig,
    dir: &Path,
) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)?;
    let size = config.output.figure_size;
    let mut written = Vec::new();

    let mut references: Vec<Reference> = config.plan.iter().map(|m| m.reference).collect();
    references.sort();
    references.dedup();

    for &reference in &references {
        let path = dir.join(format!("boxes_{}.svg", reference.label()));
        plot_shift_boxes(table, reference, &config.palette, &path, size)?;
        written.push(path);

        for axis in Axis::ALL {
            let covariate = Covariate::RelativeBladder;
            let lines = fit_node_lines(table, axis, reference, covariate);
            let path = dir.join(format!("scatter_{}_{}.svg", reference.label(), axis.label()));
            plot_bladder_scatter(table, axis, reference, covariate, &lines, &config.palette, &path, size)?;
            written.push(path);
        }
    }

    if config.output.qq_plots {
        let qq_dir = dir.join("qq");
        fs::create_dir_all(&qq_dir)?;
        for report in batch.reports() {
            let key = report.spec.key();
            match qq_points(&report.fit.residuals) {
                Ok(qq) => {
                    let path = qq_dir.join(format!("{}.svg", key.replace('+', "-")));
                    plot_qq(&qq, &report.formula, &config.palette, &path, (600, 600))?;
                    written.push(path);
                }
                Err(e) => warn!(model = %key, "no QQ plot: {}", e),
            }
        }
    }

    Ok(written)
}
