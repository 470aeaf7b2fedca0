//! Batch fitting of a model plan.

use crate::data::{ModelSpec, ObservationTable};
use crate::error::{Result, ShiftError};
use crate::model::{fit_spec, FitWarning, LmmConfig, NestedLmmFit};
use crate::pipeline::{AnalysisConfig, ModelPlan};
use crate::test::{test_wald_all, WaldResult};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;
use tracing::{info, warn};

/// A fitted model with its tests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelReport {
    pub spec: ModelSpec,
    /// R-style formula, e.g. `bony_cc ~ phase + (1 | subject/node) [all]`.
    pub formula: String,
    pub fit: NestedLmmFit,
    /// Wald tests for every fixed effect.
    pub tests: Vec<WaldResult>,
}

impl ModelReport {
    pub fn warnings(&self) -> &[FitWarning] {
        &self.fit.warnings
    }

    /// Test for one coefficient.
    pub fn test(&self, coefficient: &str) -> Option<&WaldResult> {
        self.tests.iter().find(|t| t.coefficient == coefficient)
    }
}

/// Outcome of one combination in a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FitOutcome {
    Fitted(Box<ModelReport>),
    /// No observations in the subset.
    Skipped { reason: String },
    /// The data could not support this model.
    Failed { error: String },
}

impl FitOutcome {
    pub fn report(&self) -> Option<&ModelReport> {
        match self {
            FitOutcome::Fitted(report) => Some(&**report),
            _ => None,
        }
    }

    pub fn is_fitted(&self) -> bool {
        matches!(self, FitOutcome::Fitted(_))
    }
}

/// One entry of a batch, keyed by `ModelSpec::key`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchEntry {
    pub key: String,
    pub spec: ModelSpec,
    pub outcome: FitOutcome,
}

/// Outcomes of a batch, in plan order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchResult {
    pub entries: Vec<BatchEntry>,
}

impl BatchResult {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BatchEntry> {
        self.entries.iter()
    }

    /// Outcome for a model key.
    pub fn get(&self, key: &str) -> Option<&FitOutcome> {
        self.entries.iter().find(|e| e.key == key).map(|e| &e.outcome)
    }

    /// Outcome for a specification.
    pub fn get_spec(&self, spec: &ModelSpec) -> Option<&FitOutcome> {
        self.get(&spec.key())
    }

    /// Fitted reports, in plan order.
    pub fn reports(&self) -> impl Iterator<Item = &ModelReport> {
        self.entries.iter().filter_map(|e| e.outcome.report())
    }

    pub fn n_fitted(&self) -> usize {
        self.reports().count()
    }

    pub fn n_skipped(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e.outcome, FitOutcome::Skipped { .. }))
            .count()
    }

    pub fn n_failed(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e.outcome, FitOutcome::Failed { .. }))
            .count()
    }

    /// Serialize the whole batch as pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(ShiftError::from)
    }

    /// Write the JSON form to a file.
    pub fn write_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut file = std::fs::File::create(path)?;
        writeln!(file, "{}", self.to_json()?)?;
        Ok(())
    }
}

/// Fit one specification and classify the result.
pub fn fit_one(table: &ObservationTable, spec: &ModelSpec, config: &LmmConfig) -> FitOutcome {
    match fit_spec(table, spec, config) {
        Ok(fit) => {
            for warning in &fit.warnings {
                warn!(model = %spec.key(), "{}", warning);
            }
            let tests = test_wald_all(&fit);
            FitOutcome::Fitted(Box::new(ModelReport {
                spec: spec.clone(),
                formula: spec.to_string(),
                fit,
                tests,
            }))
        }
        Err(ShiftError::EmptyData(reason)) => {
            warn!(model = %spec.key(), "skipped: {}", reason);
            FitOutcome::Skipped { reason }
        }
        Err(e) => {
            warn!(model = %spec.key(), "failed: {}", e);
            FitOutcome::Failed {
                error: e.to_string(),
            }
        }
    }
}

/// Fit every model of `plan` on `table`.
///
/// Models are fit in parallel; the result keeps plan order. A failure in one
/// model never affects the others.
pub fn fit_batch(table: &ObservationTable, plan: &ModelPlan, config: &LmmConfig) -> BatchResult {
    info!(
        models = plan.len(),
        observations = table.len(),
        subjects = table.n_subjects(),
        nodes = table.n_nodes(),
        "fitting model plan"
    );

    let entries: Vec<BatchEntry> = plan
        .models()
        .par_iter()
        .map(|spec| BatchEntry {
            key: spec.key(),
            spec: spec.clone(),
            outcome: fit_one(table, spec, config),
        })
        .collect();

    let batch = BatchResult { entries };
    info!(
        fitted = batch.n_fitted(),
        skipped = batch.n_skipped(),
        failed = batch.n_failed(),
        "model plan finished"
    );
    batch
}

/// Fit the configured plan with the configured estimator settings.
pub fn run_analysis(table: &ObservationTable, config: &AnalysisConfig) -> BatchResult {
    fit_batch(table, &config.plan, &config.lmm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Axis, Covariate, Location, Observation, Phase, Reference, Subset};

    /// 3 subjects × 2 mesorectal + 1 presacral node × 4 scans; no lateral nodes.
    fn create_test_table() -> ObservationTable {
        let mut obs = Vec::new();
        for s in 0..3 {
            for nd in 0..3 {
                let location = if nd < 2 { Location::Mesorectal } else { Location::Presacral };
                for k in 0..4 {
                    let v = s as f64 * 0.8 - (nd as f64) * 0.3 + [0.1, -0.2, 0.15, -0.05][(k + s + nd) % 4];
                    obs.push(Observation {
                        subject: format!("P{}", s),
                        node: format!("N{}", nd),
                        phase: if k % 2 == 0 { Phase::Before } else { Phase::During },
                        location,
                        bony_shift: [v, -v, 0.5 * v],
                        tumor_shift: [0.0; 3],
                        bladder_baseline: Some(0.4 + 0.1 * s as f64),
                        bladder_relative: Some(0.9 + 0.05 * k as f64),
                    });
                }
            }
        }
        ObservationTable::from_observations(obs).unwrap()
    }

    #[test]
    fn test_batch_preserves_plan_order() {
        let table = create_test_table();
        let plan = ModelPlan::variance_only(Reference::Bony);
        let batch = fit_batch(&table, &plan, &LmmConfig::default());
        assert_eq!(batch.len(), plan.len());
        for (entry, spec) in batch.iter().zip(plan.iter()) {
            assert_eq!(&entry.spec, spec);
            assert_eq!(entry.key, spec.key());
        }
    }

    #[test]
    fn test_empty_stratum_skipped_others_fitted() {
        let table = create_test_table();
        let plan = ModelPlan::variance_only(Reference::Bony);
        let batch = fit_batch(&table, &plan, &LmmConfig::default());

        let lateral = ModelSpec::intercept_only(Axis::LeftRight, Subset::Location(Location::LateralPelvic));
        assert!(matches!(batch.get_spec(&lateral), Some(FitOutcome::Skipped { .. })));

        let all = ModelSpec::intercept_only(Axis::LeftRight, Subset::All);
        assert!(batch.get_spec(&all).unwrap().is_fitted());
        assert_eq!(batch.n_skipped(), 3);
    }

    #[test]
    fn test_degenerate_combination_fails_alone() {
        let table = create_test_table();
        // Location has a single level inside its own stratum
        let bad = ModelSpec::intercept_only(Axis::LeftRight, Subset::Location(Location::Mesorectal))
            .with_main(Covariate::Location);
        let good = ModelSpec::intercept_only(Axis::LeftRight, Subset::All).with_main(Covariate::Phase);
        let plan = ModelPlan::new(vec![bad.clone(), good.clone()]);
        let batch = fit_batch(&table, &plan, &LmmConfig::default());
        assert!(matches!(batch.get_spec(&bad), Some(FitOutcome::Failed { .. })));
        let report = batch.get_spec(&good).unwrap().report().unwrap();
        assert!(report.test("phaseduring").is_some());
        assert_eq!(batch.n_failed(), 1);
    }

    #[test]
    fn test_batch_json() {
        let table = create_test_table();
        let plan = ModelPlan::new(vec![ModelSpec::intercept_only(Axis::CranioCaudal, Subset::All)]);
        let batch = fit_batch(&table, &plan, &LmmConfig::default());
        let json = batch.to_json().unwrap();
        assert!(json.contains("\"status\": \"fitted\""));
        assert!(json.contains("systematic_sd"));
    }
}
