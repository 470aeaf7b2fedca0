//! Summary tables built from a batch: variance decomposition, fixed effects
//! and notes on skipped or failed models.

use crate::data::{Axis, Reference, Subset};
use crate::error::Result;
use crate::pipeline::{BatchResult, FitOutcome};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// A row type that can be rendered as TSV or Markdown.
pub trait TableRow {
    fn header() -> Vec<&'static str>;
    fn cells(&self, precision: usize) -> Vec<String>;
}

/// Variance decomposition of one intercept-only model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VarianceRow {
    pub reference: Reference,
    pub axis: Axis,
    pub subset: Subset,
    pub n_obs: usize,
    pub n_subjects: usize,
    pub n_nodes: usize,
    /// Intercept (mean shift), mm.
    pub mean: f64,
    pub subject_sd: f64,
    pub node_sd: f64,
    pub systematic_sd: f64,
    pub random_sd: f64,
    pub singular: bool,
}

impl TableRow for VarianceRow {
    fn header() -> Vec<&'static str> {
        vec![
            "reference", "axis", "subset", "n_obs", "n_subjects", "n_nodes", "mean", "sd_subject",
            "sd_node", "systematic_sd", "random_sd", "singular",
        ]
    }

    fn cells(&self, precision: usize) -> Vec<String> {
        vec![
            self.reference.to_string(),
            self.axis.to_string(),
            self.subset.to_string(),
            self.n_obs.to_string(),
            self.n_subjects.to_string(),
            self.n_nodes.to_string(),
            format!("{:.*}", precision, self.mean),
            format!("{:.*}", precision, self.subject_sd),
            format!("{:.*}", precision, self.node_sd),
            format!("{:.*}", precision, self.systematic_sd),
            format!("{:.*}", precision, self.random_sd),
            if self.singular { "yes" } else { "no" }.to_string(),
        ]
    }
}

/// One tested fixed effect of a covariate model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectRow {
    pub key: String,
    pub formula: String,
    pub axis: Axis,
    pub subset: Subset,
    pub coefficient: String,
    pub estimate: f64,
    pub std_error: f64,
    pub df: f64,
    pub statistic: f64,
    pub p_value: f64,
}

impl TableRow for EffectRow {
    fn header() -> Vec<&'static str> {
        vec![
            "model", "axis", "subset", "coefficient", "estimate", "std_error", "df", "t", "p_value",
        ]
    }

    fn cells(&self, precision: usize) -> Vec<String> {
        vec![
            self.formula.clone(),
            self.axis.to_string(),
            self.subset.to_string(),
            self.coefficient.clone(),
            format!("{:.*}", precision, self.estimate),
            format!("{:.*}", precision, self.std_error),
            format!("{:.1}", self.df),
            format!("{:.*}", precision, self.statistic),
            format!("{:.2e}", self.p_value),
        ]
    }
}

/// A model that was skipped, failed, or fitted with warnings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoteRow {
    pub key: String,
    pub status: String,
    pub message: String,
}

impl TableRow for NoteRow {
    fn header() -> Vec<&'static str> {
        vec!["model", "status", "message"]
    }

    fn cells(&self, _precision: usize) -> Vec<String> {
        vec![self.key.clone(), self.status.clone(), self.message.clone()]
    }
}

/// Variance rows for every fitted intercept-only model, in plan order.
pub fn variance_table(batch: &BatchResult) -> Vec<VarianceRow> {
    batch
        .reports()
        .filter(|r| r.spec.is_intercept_only())
        .map(|r| {
            let v = r.fit.variance;
            VarianceRow {
                reference: r.spec.reference,
                axis: r.spec.axis,
                subset: r.spec.subset,
                n_obs: r.fit.n_obs,
                n_subjects: r.fit.n_subjects,
                n_nodes: r.fit.n_nodes,
                mean: r.fit.coefficients[0],
                subject_sd: v.subject_sd,
                node_sd: v.node_sd,
                systematic_sd: v.systematic_sd,
                random_sd: v.random_sd,
                singular: r.fit.is_singular(),
            }
        })
        .collect()
}

/// Non-intercept effects of every fitted covariate model, in plan order.
pub fn effects_table(batch: &BatchResult) -> Vec<EffectRow> {
    batch
        .iter()
        .filter_map(|e| e.outcome.report().map(|r| (e, r)))
        .filter(|(_, r)| !r.spec.is_intercept_only())
        .flat_map(|(e, r)| {
            r.tests
                .iter()
                .filter(|t| t.coefficient != "(Intercept)")
                .map(move |t| EffectRow {
                    key: e.key.clone(),
                    formula: r.spec.fixed_label(),
                    axis: r.spec.axis,
                    subset: r.spec.subset,
                    coefficient: t.coefficient.clone(),
                    estimate: t.estimate,
                    std_error: t.std_error,
                    df: t.df,
                    statistic: t.statistic,
                    p_value: t.p_value,
                })
        })
        .collect()
}

/// Skipped and failed models, plus fit warnings.
pub fn notes_table(batch: &BatchResult) -> Vec<NoteRow> {
    let mut rows = Vec::new();
    for entry in batch.iter() {
        match &entry.outcome {
            FitOutcome::Fitted(report) => {
                for warning in report.warnings() {
                    rows.push(NoteRow {
                        key: entry.key.clone(),
                        status: "warning".to_string(),
                        message: warning.to_string(),
                    });
                }
            }
            FitOutcome::Skipped { reason } => rows.push(NoteRow {
                key: entry.key.clone(),
                status: "skipped".to_string(),
                message: reason.clone(),
            }),
            FitOutcome::Failed { error } => rows.push(NoteRow {
                key: entry.key.clone(),
                status: "failed".to_string(),
                message: error.clone(),
            }),
        }
    }
    rows
}

/// Write rows as tab-separated values with a header line.
pub fn write_tsv<R: TableRow, W: Write>(rows: &[R], writer: &mut W, precision: usize) -> Result<()> {
    writeln!(writer, "{}", R::header().join("\t"))?;
    for row in rows {
        writeln!(writer, "{}", row.cells(precision).join("\t"))?;
    }
    Ok(())
}

/// Write rows to a TSV file.
pub fn write_tsv_file<R: TableRow, P: AsRef<Path>>(rows: &[R], path: P, precision: usize) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    write_tsv(rows, &mut writer, precision)?;
    writer.flush()?;
    Ok(())
}

/// Render rows as a GitHub-flavoured Markdown table.
pub fn to_markdown<R: TableRow>(rows: &[R], precision: usize) -> String {
    let header = R::header();
    let mut out = String::new();
    out.push_str(&format!("| {} |\n", header.join(" | ")));
    out.push_str(&format!("|{}\n", "---|".repeat(header.len())));
    for row in rows {
        let cells: Vec<String> = row
            .cells(precision)
            .into_iter()
            .map(|c| c.replace('|', "\\|"))
            .collect();
        out.push_str(&format!("| {} |\n", cells.join(" | ")));
    }
    out
}

/// Counts shown at the top of a report.
#[derive(Debug, Clone, Copy)]
pub struct BatchSummary {
    pub total: usize,
    pub fitted: usize,
    pub skipped: usize,
    pub failed: usize,
    pub singular: usize,
}

impl BatchSummary {
    pub fn from_batch(batch: &BatchResult) -> Self {
        Self {
            total: batch.len(),
            fitted: batch.n_fitted(),
            skipped: batch.n_skipped(),
            failed: batch.n_failed(),
            singular: batch.reports().filter(|r| r.fit.is_singular()).count(),
        }
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Models in plan: {}", self.total)?;
        writeln!(f, "Fitted:         {} ({} singular)", self.fitted, self.singular)?;
        writeln!(f, "Skipped:        {}", self.skipped)?;
        writeln!(f, "Failed:         {}", self.failed)?;
        Ok(())
    }
}
