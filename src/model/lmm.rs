//! Nested linear mixed models for node-shift variance decomposition.
//!
//! Fits `y = Xβ + Z₁u₁ + Z₂u₂ + ε` with `u₁ ~ N(0, σ₁²I)` (subject),
//! `u₂ ~ N(0, σ₂²I)` (node within subject) and `ε ~ N(0, σ²I)` by REML.
//!
//! The residual variance and `β` are profiled out. The relative standard
//! deviations `θ = (σ₁/σ, σ₂/σ)` are found by Nelder-Mead on the profiled
//! REML deviance
//!
//! `d(θ) = log|ΛZ'ZΛ + I| + log|X'H⁻¹X| + (n−p)(1 + log(2π r'H⁻¹r/(n−p)))`
//!
//! with `H = I + ZΛΛZ'`. All solves happen in the random-effect space via the
//! Woodbury identity, so the `n × n` matrix `H` is never formed.
//!
//! # Example
//! ```ignore
//! use nodeshift::model::lmm::{fit_spec, LmmConfig};
//!
//! let spec = ModelSpec::intercept_only(Axis::CranioCaudal, Subset::All);
//! let fit = fit_spec(&table, &spec, &LmmConfig::default())?;
//! println!("systematic SD {:.2} mm", fit.variance.systematic_sd);
//! ```

use crate::data::{DesignMatrix, ModelSpec, NestedGrouping, ObservationTable};
use crate::error::{Result, ShiftError};
use crate::model::optim::{nelder_mead_with_restart, NelderMeadConfig};
use crate::model::satterthwaite::satterthwaite_df;
use nalgebra::{Cholesky, DMatrix, DVector, Dyn};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;
use tracing::debug;

/// Degrees-of-freedom approximation for fixed-effect t-tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DfMethod {
    /// Satterthwaite approximation (as in lmerTest).
    #[default]
    Satterthwaite,
    /// Residual degrees of freedom `n - p`.
    Residual,
}

/// Configuration for LMM fitting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LmmConfig {
    /// Optimizer settings for the variance parameters.
    pub optimizer: NelderMeadConfig,
    /// Starting relative standard deviations (subject, node).
    pub start_theta: [f64; 2],
    /// Relative SD below which a component is reported as singular (zero).
    pub singular_tol: f64,
    /// Degrees of freedom for fixed-effect tests.
    pub df_method: DfMethod,
}

impl Default for LmmConfig {
    fn default() -> Self {
        Self {
            optimizer: NelderMeadConfig::default(),
            start_theta: [1.0, 1.0],
            singular_tol: 1e-4,
            df_method: DfMethod::Satterthwaite,
        }
    }
}

/// A random-effect level of the nested model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VarianceComponent {
    Subject,
    Node,
}

impl fmt::Display for VarianceComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VarianceComponent::Subject => write!(f, "subject"),
            VarianceComponent::Node => write!(f, "subject:node"),
        }
    }
}

/// Problems attached to a fit that do not invalidate it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitWarning {
    /// The optimizer ran out of evaluations before meeting its tolerances.
    NonConvergence { evaluations: usize },
    /// A group-level variance was estimated on the boundary (zero).
    Singular { component: VarianceComponent },
    /// Rows dropped because a covariate value was missing.
    DroppedRows { count: usize },
    /// Satterthwaite df could not be computed; residual df used instead.
    DfFallback { coefficient: String },
}

impl fmt::Display for FitWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FitWarning::NonConvergence { evaluations } => {
                write!(f, "optimizer did not converge after {} evaluations", evaluations)
            }
            FitWarning::Singular { component } => {
                write!(f, "singular fit: {} variance estimated as zero", component)
            }
            FitWarning::DroppedRows { count } => {
                write!(f, "{} row(s) dropped for missing covariate values", count)
            }
            FitWarning::DfFallback { coefficient } => {
                write!(f, "residual df used for '{}'", coefficient)
            }
        }
    }
}

/// Standard deviations of the nested variance decomposition.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VarianceComponents {
    /// Between-subject SD.
    pub subject_sd: f64,
    /// Between-node-within-subject SD.
    pub node_sd: f64,
    /// Residual SD.
    pub residual_sd: f64,
    /// `sqrt(subject_sd² + node_sd²)`.
    pub systematic_sd: f64,
    /// Equal to `residual_sd`.
    pub random_sd: f64,
}

impl VarianceComponents {
    pub fn new(subject_sd: f64, node_sd: f64, residual_sd: f64) -> Self {
        Self {
            subject_sd,
            node_sd,
            residual_sd,
            // Variances add; SDs do not.
            systematic_sd: (subject_sd.powi(2) + node_sd.powi(2)).sqrt(),
            random_sd: residual_sd,
        }
    }

    /// Total variance `σ₁² + σ₂² + σ²`.
    pub fn total_variance(&self) -> f64 {
        self.subject_sd.powi(2) + self.node_sd.powi(2) + self.residual_sd.powi(2)
    }

    /// Share of total variance between subjects.
    pub fn icc_subject(&self) -> f64 {
        self.subject_sd.powi(2) / self.total_variance()
    }

    /// Share of total variance at subject or node level (correlation of two
    /// observations of the same node).
    pub fn icc_node(&self) -> f64 {
        self.systematic_sd.powi(2) / self.total_variance()
    }
}

/// A fitted nested mixed model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NestedLmmFit {
    /// Fixed effect coefficient names.
    pub coefficient_names: Vec<String>,
    /// Fixed effect estimates.
    pub coefficients: Vec<f64>,
    /// Standard errors of fixed effects.
    pub std_errors: Vec<f64>,
    /// Degrees of freedom per coefficient for t-tests.
    pub df: Vec<f64>,
    pub df_method: DfMethod,
    pub variance: VarianceComponents,
    /// Relative SDs `(σ₁/σ, σ₂/σ)` at the optimum.
    pub theta: [f64; 2],
    /// REML log-likelihood.
    pub log_reml: f64,
    pub n_obs: usize,
    pub n_subjects: usize,
    pub n_nodes: usize,
    /// Objective evaluations used by the optimizer.
    pub evaluations: usize,
    pub converged: bool,
    pub warnings: Vec<FitWarning>,
    /// Conditional residuals `y − Xβ − Zu`.
    #[serde(skip)]
    pub residuals: Vec<f64>,
    /// Conditional fitted values.
    #[serde(skip)]
    pub fitted: Vec<f64>,
    /// BLUPs of subject intercepts.
    #[serde(skip)]
    pub subject_effects: Vec<(String, f64)>,
    /// BLUPs of node intercepts, labelled `subject:node`.
    #[serde(skip)]
    pub node_effects: Vec<(String, f64)>,
}

impl NestedLmmFit {
    /// Get coefficient index by name.
    pub fn coefficient_index(&self, name: &str) -> Option<usize> {
        self.coefficient_names.iter().position(|n| n == name)
    }

    /// Get coefficient by name.
    pub fn coefficient(&self, name: &str) -> Option<f64> {
        self.coefficient_index(name).map(|i| self.coefficients[i])
    }

    /// Calculate t-statistic for a coefficient.
    pub fn t_statistic(&self, index: usize) -> Option<f64> {
        let coef = self.coefficients.get(index)?;
        let se = self.std_errors.get(index)?;
        if *se > 0.0 {
            Some(coef / se)
        } else {
            None
        }
    }

    /// Number of fixed effect coefficients.
    pub fn n_coefficients(&self) -> usize {
        self.coefficients.len()
    }

    /// Whether any group-level variance sits on the boundary.
    pub fn is_singular(&self) -> bool {
        self.warnings
            .iter()
            .any(|w| matches!(w, FitWarning::Singular { .. }))
    }

    /// Parameters counted for information criteria: fixed effects, two
    /// relative SDs and the residual variance.
    pub fn n_parameters(&self) -> usize {
        self.coefficients.len() + 3
    }

    /// REML deviance `-2 log L`.
    pub fn deviance(&self) -> f64 {
        -2.0 * self.log_reml
    }

    /// AIC = -2 logL + 2k.
    pub fn aic(&self) -> f64 {
        self.deviance() + 2.0 * self.n_parameters() as f64
    }

    /// BIC = -2 logL + k ln(n).
    pub fn bic(&self) -> f64 {
        self.deviance() + self.n_parameters() as f64 * (self.n_obs as f64).ln()
    }
}

/// Quantities of one GLS solve at fixed `θ`.
pub(crate) struct Evaluation {
    /// `log|ΛZ'ZΛ + I|`.
    pub log_det_m: f64,
    /// `log|X'H⁻¹X|`.
    pub log_det_xhx: f64,
    /// Cholesky factor of `X'H⁻¹X`.
    pub xhx_chol: Cholesky<f64, Dyn>,
    /// GLS estimate of `β`.
    pub beta: DVector<f64>,
    /// `r'H⁻¹r` at the GLS estimate.
    pub rhr: f64,
    /// Spherical random effects `M⁻¹Λ Z'(y − Xβ)`.
    pub spherical: DVector<f64>,
}

/// Cross-products shared by every evaluation of one model.
pub(crate) struct RemlProblem {
    n: usize,
    p: usize,
    n_subjects: usize,
    ztz: DMatrix<f64>,
    ztx: DMatrix<f64>,
    zty: DVector<f64>,
    xtx: DMatrix<f64>,
    xty: DVector<f64>,
    yty: f64,
}

impl RemlProblem {
    pub fn new(y: &DVector<f64>, x: &DMatrix<f64>, grouping: &NestedGrouping) -> Result<Self> {
        let n = y.len();
        let p = x.ncols();
        if x.nrows() != n {
            return Err(ShiftError::DimensionMismatch {
                expected: n,
                actual: x.nrows(),
            });
        }
        if grouping.n_samples() != n {
            return Err(ShiftError::DimensionMismatch {
                expected: n,
                actual: grouping.n_samples(),
            });
        }
        if n <= p {
            return Err(ShiftError::Numerical(
                "Model is saturated (n_obs <= n_fixed_effects)".to_string(),
            ));
        }

        let xtx = x.transpose() * x;
        if xtx.clone().cholesky().is_none() {
            return Err(ShiftError::Numerical(
                "Fixed-effects design is rank deficient".to_string(),
            ));
        }

        let z = grouping.z_matrix();
        Ok(Self {
            n,
            p,
            n_subjects: grouping.n_subjects(),
            ztz: grouping.ztz(),
            ztx: z.transpose() * x,
            zty: z.transpose() * y,
            xty: x.transpose() * y,
            xtx,
            yty: y.dot(y),
        })
    }

    pub fn n(&self) -> usize {
        self.n
    }

    pub fn p(&self) -> usize {
        self.p
    }

    fn lambda(&self, theta: &[f64]) -> DVector<f64> {
        let q = self.ztz.nrows();
        DVector::from_fn(q, |i, _| {
            if i < self.n_subjects {
                theta[0].abs()
            } else {
                theta[1].abs()
            }
        })
    }

    /// GLS solve at relative SDs `theta`. `None` when a factorization fails.
    pub fn evaluate(&self, theta: &[f64]) -> Option<Evaluation> {
        let lam = self.lambda(theta);
        let q = lam.len();

        let mut m = DMatrix::from_fn(q, q, |i, j| lam[i] * self.ztz[(i, j)] * lam[j]);
        for i in 0..q {
            m[(i, i)] += 1.0;
        }
        let m_chol = m.cholesky()?;
        let log_det_m = 2.0 * m_chol.l().diagonal().iter().map(|d| d.ln()).sum::<f64>();

        // A = ΛZ'X, a = ΛZ'y
        let mut a_mat = self.ztx.clone();
        for (i, mut row) in a_mat.row_iter_mut().enumerate() {
            row *= lam[i];
        }
        let a_vec = self.zty.component_mul(&lam);

        let c_mat = m_chol.solve(&a_mat);
        let c_vec = m_chol.solve(&a_vec);

        let xhx = &self.xtx - a_mat.transpose() * &c_mat;
        let xhy = &self.xty - a_mat.transpose() * &c_vec;
        let yhy = self.yty - a_vec.dot(&c_vec);

        let xhx_chol = xhx.cholesky()?;
        let log_det_xhx = 2.0 * xhx_chol.l().diagonal().iter().map(|d| d.ln()).sum::<f64>();
        let beta = xhx_chol.solve(&xhy);
        let rhr = yhy - beta.dot(&xhy);
        if rhr.is_nan() || rhr <= 0.0 {
            return None;
        }
        let spherical = &c_vec - &c_mat * &beta;

        Some(Evaluation {
            log_det_m,
            log_det_xhx,
            xhx_chol,
            beta,
            rhr,
            spherical,
        })
    }

    /// Profiled REML deviance at `theta`.
    pub fn profiled_deviance(&self, theta: &[f64]) -> f64 {
        match self.evaluate(theta) {
            Some(ev) => {
                let dof = (self.n - self.p) as f64;
                ev.log_det_m + ev.log_det_xhx + dof * (1.0 + (2.0 * PI * ev.rhr / dof).ln())
            }
            None => f64::INFINITY,
        }
    }

    /// Relative SDs for variances `(σ₁², σ₂², σ²)`.
    fn theta_for(variances: &[f64; 3]) -> [f64; 2] {
        [
            (variances[0].max(0.0) / variances[2]).sqrt(),
            (variances[1].max(0.0) / variances[2]).sqrt(),
        ]
    }

    /// Unprofiled REML deviance (up to a constant) at variances `(σ₁², σ₂², σ²)`.
    pub fn deviance_at_variances(&self, variances: &[f64; 3]) -> f64 {
        if variances[2] <= 0.0 {
            return f64::INFINITY;
        }
        match self.evaluate(&Self::theta_for(variances)) {
            Some(ev) => {
                (self.n - self.p) as f64 * variances[2].ln()
                    + ev.log_det_m
                    + ev.log_det_xhx
                    + ev.rhr / variances[2]
            }
            None => f64::INFINITY,
        }
    }

    /// `Var(β̂)` at variances `(σ₁², σ₂², σ²)`.
    pub fn beta_covariance_at(&self, variances: &[f64; 3]) -> Option<DMatrix<f64>> {
        if variances[2] <= 0.0 {
            return None;
        }
        let ev = self.evaluate(&Self::theta_for(variances))?;
        Some(ev.xhx_chol.inverse() * variances[2])
    }
}

/// Fit the nested model to a response vector.
///
/// # Arguments
/// * `y` - Response, one value per observation
/// * `design` - Fixed effects design matrix (X)
/// * `grouping` - Subject and node memberships
/// * `config` - LMM configuration
pub fn fit_nested_lmm(
    y: &[f64],
    design: &DesignMatrix,
    grouping: &NestedGrouping,
    config: &LmmConfig,
) -> Result<NestedLmmFit> {
    let y_vec = DVector::from_column_slice(y);
    let x = design.matrix();
    let problem = RemlProblem::new(&y_vec, x, grouping)?;
    let n = problem.n();
    let p = problem.p();

    if y.iter().any(|v| !v.is_finite()) {
        return Err(ShiftError::Numerical("Response contains non-finite values".to_string()));
    }

    let minimum = nelder_mead_with_restart(
        |theta| problem.profiled_deviance(theta),
        &config.start_theta,
        &config.optimizer,
    );
    debug!(
        evaluations = minimum.evaluations,
        converged = minimum.converged,
        theta0 = minimum.x[0],
        theta1 = minimum.x[1],
        "REML optimization finished"
    );

    let mut warnings = Vec::new();
    if !minimum.converged {
        warnings.push(FitWarning::NonConvergence {
            evaluations: minimum.evaluations,
        });
    }

    let mut theta = [minimum.x[0].abs(), minimum.x[1].abs()];
    for (k, component) in [VarianceComponent::Subject, VarianceComponent::Node]
        .into_iter()
        .enumerate()
    {
        if theta[k] < config.singular_tol {
            theta[k] = 0.0;
            warnings.push(FitWarning::Singular { component });
        }
    }

    let ev = problem.evaluate(&theta).ok_or_else(|| {
        ShiftError::Numerical("GLS solve failed at the REML optimum".to_string())
    })?;
    let dof = (n - p) as f64;
    let sigma2 = ev.rhr / dof;
    let sigma = sigma2.sqrt();
    let deviance = ev.log_det_m + ev.log_det_xhx + dof * (1.0 + (2.0 * PI * ev.rhr / dof).ln());

    let cov_beta = ev.xhx_chol.inverse() * sigma2;
    let std_errors: Vec<f64> = (0..p).map(|j| cov_beta[(j, j)].max(0.0).sqrt()).collect();
    let coefficients: Vec<f64> = ev.beta.iter().copied().collect();

    // BLUPs: u = Λ b
    let n_s = grouping.n_subjects();
    let u: Vec<f64> = ev
        .spherical
        .iter()
        .enumerate()
        .map(|(i, b)| if i < n_s { theta[0] * b } else { theta[1] * b })
        .collect();
    let xb = x * &ev.beta;
    let fitted: Vec<f64> = (0..n)
        .map(|i| xb[i] + u[grouping.subject_indices[i]] + u[n_s + grouping.node_indices[i]])
        .collect();
    let residuals: Vec<f64> = y.iter().zip(fitted.iter()).map(|(y, f)| y - f).collect();

    let variances = [
        (theta[0] * sigma).powi(2),
        (theta[1] * sigma).powi(2),
        sigma2,
    ];
    let df = match config.df_method {
        DfMethod::Residual => vec![dof; p],
        DfMethod::Satterthwaite => resolve_df(
            satterthwaite_df(&problem, &variances),
            design.coefficient_names(),
            dof,
            &mut warnings,
        ),
    };

    Ok(NestedLmmFit {
        coefficient_names: design.coefficient_names().to_vec(),
        coefficients,
        std_errors,
        df,
        df_method: config.df_method,
        variance: VarianceComponents::new(theta[0] * sigma, theta[1] * sigma, sigma),
        theta,
        log_reml: -0.5 * deviance,
        n_obs: n,
        n_subjects: grouping.n_subjects(),
        n_nodes: grouping.n_nodes(),
        evaluations: minimum.evaluations,
        converged: minimum.converged,
        warnings,
        residuals,
        fitted,
        subject_effects: grouping
            .subject_ids
            .iter()
            .cloned()
            .zip(u[..n_s].iter().copied())
            .collect(),
        node_effects: grouping
            .node_ids
            .iter()
            .cloned()
            .zip(u[n_s..].iter().copied())
            .collect(),
    })
}

/// Approximate df per coefficient, residual df with a warning where missing.
fn resolve_df(
    approx: Vec<Option<f64>>,
    names: &[String],
    residual_df: f64,
    warnings: &mut Vec<FitWarning>,
) -> Vec<f64> {
    approx
        .into_iter()
        .zip(names)
        .map(|(df, name)| match df {
            Some(df) => df,
            None => {
                warnings.push(FitWarning::DfFallback {
                    coefficient: name.clone(),
                });
                residual_df
            }
        })
        .collect()
}

/// Rows of `table` usable by `spec`: the subset, minus rows missing a
/// continuous covariate the model uses. Returns the number of dropped rows.
pub fn model_rows(table: &ObservationTable, spec: &ModelSpec) -> (ObservationTable, usize) {
    let subset = table.subset(&spec.subset);
    let covariates: Vec<_> = spec
        .covariates()
        .into_iter()
        .filter(|c| !c.is_categorical())
        .collect();
    let complete = subset.filter(|o| covariates.iter().all(|c| c.value(o).is_some()));
    let dropped = subset.len() - complete.len();
    (complete, dropped)
}

/// High-level function to fit a model specification to an observation table.
///
/// Applies the subset, drops rows with missing covariates, builds the design
/// and grouping, and fits the nested model.
///
/// # Errors
/// `EmptyData` when no rows remain, `InsufficientLevels` when fewer than two
/// subjects or nodes remain, `InvalidParameter` for single-level covariates.
pub fn fit_spec(
    table: &ObservationTable,
    spec: &ModelSpec,
    config: &LmmConfig,
) -> Result<NestedLmmFit> {
    let (rows, dropped) = model_rows(table, spec);
    if rows.is_empty() {
        return Err(ShiftError::EmptyData(format!(
            "No observations for subset '{}'",
            spec.subset
        )));
    }

    let grouping = NestedGrouping::from_table(&rows)?;
    let design = DesignMatrix::from_terms(&rows, &spec.terms)?;
    let y = rows.response(spec.axis, spec.reference);

    let mut fit = fit_nested_lmm(&y, &design, &grouping, config)?;
    if dropped > 0 {
        fit.warnings.insert(0, FitWarning::DroppedRows { count: dropped });
    }
    Ok(fit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Axis, Covariate, Location, Observation, Phase, Subset};
    use approx::assert_relative_eq;

    /// 4 subjects × 3 nodes × 4 scans with deterministic offsets and noise.
    fn create_nested_table() -> ObservationTable {
        let subject_offsets = [2.0, -1.5, 0.5, -1.0];
        let node_offsets = [0.8, -0.4, -0.4];
        let noise = [0.3, -0.2, 0.1, -0.2];
        let mut obs = Vec::new();
        for (s, so) in subject_offsets.iter().enumerate() {
            for nd in 0..3 {
                // Rotate offsets so subjects do not share a node pattern
                let no = node_offsets[(nd + s) % 3] * (1.0 + 0.2 * s as f64);
                for k in 0..4 {
                    let e = noise[(k + nd) % 4] * (1.0 + 0.1 * nd as f64);
                    obs.push(Observation {
                        subject: format!("P{}", s + 1),
                        node: format!("N{}", nd + 1),
                        phase: if k < 2 { Phase::Before } else { Phase::During },
                        location: Location::ALL[nd],
                        bony_shift: [so + no + e, 0.0, 0.0],
                        tumor_shift: [0.0; 3],
                        bladder_baseline: Some(0.5),
                        bladder_relative: if k == 3 && s == 0 { None } else { Some(0.8 + 0.1 * k as f64) },
                    });
                }
            }
        }
        ObservationTable::from_observations(obs).unwrap()
    }

    #[test]
    fn test_lmm_config_default() {
        let config = LmmConfig::default();
        assert_eq!(config.start_theta, [1.0, 1.0]);
        assert_eq!(config.df_method, DfMethod::Satterthwaite);
    }

    #[test]
    fn test_variance_components_sum_of_variances() {
        let vc = VarianceComponents::new(3.0, 4.0, 2.0);
        assert_relative_eq!(vc.systematic_sd, 5.0, epsilon = 1e-12);
        assert_relative_eq!(vc.random_sd, 2.0, epsilon = 1e-12);
        assert_relative_eq!(vc.total_variance(), 29.0, epsilon = 1e-12);
        assert_relative_eq!(vc.icc_node(), 25.0 / 29.0, epsilon = 1e-12);
    }

    #[test]
    fn test_fit_intercept_only() {
        let table = create_nested_table();
        let spec = ModelSpec::intercept_only(Axis::LeftRight, Subset::All);
        let fit = fit_spec(&table, &spec, &LmmConfig::default()).unwrap();

        assert_eq!(fit.n_obs, 48);
        assert_eq!(fit.n_subjects, 4);
        assert_eq!(fit.n_nodes, 12);
        assert_eq!(fit.coefficient_names, vec!["(Intercept)"]);
        assert!(fit.converged);
        assert!(fit.variance.subject_sd > fit.variance.residual_sd);
        assert!(fit.variance.residual_sd > 0.0);
        let sys = fit.variance.systematic_sd.powi(2);
        assert_relative_eq!(
            sys,
            fit.variance.subject_sd.powi(2) + fit.variance.node_sd.powi(2),
            epsilon = 1e-10
        );
    }

    #[test]
    fn test_refit_is_identical() {
        let table = create_nested_table();
        let spec = ModelSpec::intercept_only(Axis::LeftRight, Subset::All);
        let a = fit_spec(&table, &spec, &LmmConfig::default()).unwrap();
        let b = fit_spec(&table, &spec, &LmmConfig::default()).unwrap();
        assert_eq!(a.variance, b.variance);
        assert_eq!(a.coefficients, b.coefficients);
    }

    #[test]
    fn test_residuals_and_blups() {
        let table = create_nested_table();
        let spec = ModelSpec::intercept_only(Axis::LeftRight, Subset::All);
        let fit = fit_spec(&table, &spec, &LmmConfig::default()).unwrap();
        assert_eq!(fit.residuals.len(), 48);
        assert_eq!(fit.subject_effects.len(), 4);
        assert_eq!(fit.node_effects.len(), 12);
        // BLUPs of the subject with the largest offset rank first
        let (best, _) = fit
            .subject_effects
            .iter()
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .unwrap();
        assert_eq!(best, "P1");
        let sum: f64 = fit.subject_effects.iter().map(|(_, u)| u).sum();
        assert!(sum.abs() < 1e-6);
    }

    #[test]
    fn test_singular_fit_reported() {
        // No subject or node structure at all: pure alternating noise
        let mut obs = Vec::new();
        for s in 0..4 {
            for nd in 0..2 {
                for k in 0..4 {
                    let v = if (s + nd + k) % 2 == 0 { 1.0 } else { -1.0 };
                    obs.push(Observation {
                        subject: format!("P{}", s),
                        node: format!("N{}", nd),
                        phase: Phase::Before,
                        location: Location::Mesorectal,
                        bony_shift: [v, 0.0, 0.0],
                        tumor_shift: [0.0; 3],
                        bladder_baseline: None,
                        bladder_relative: None,
                    });
                }
            }
        }
        let table = ObservationTable::from_observations(obs).unwrap();
        let spec = ModelSpec::intercept_only(Axis::LeftRight, Subset::All);
        let fit = fit_spec(&table, &spec, &LmmConfig::default()).unwrap();
        assert!(fit.is_singular());
        assert_eq!(fit.variance.subject_sd, 0.0);
        assert_eq!(fit.variance.node_sd, 0.0);
        assert_relative_eq!(fit.variance.residual_sd, (32.0f64 / 31.0).sqrt(), epsilon = 1e-8);
    }

    #[test]
    fn test_dropped_rows_warning() {
        let table = create_nested_table();
        let spec = ModelSpec::intercept_only(Axis::LeftRight, Subset::All)
            .with_main(Covariate::RelativeBladder);
        let fit = fit_spec(&table, &spec, &LmmConfig::default()).unwrap();
        assert_eq!(fit.n_obs, 45);
        assert_eq!(fit.warnings[0], FitWarning::DroppedRows { count: 3 });
    }

    #[test]
    fn test_empty_subset_error() {
        let table = create_nested_table().filter(|o| o.location != Location::Presacral);
        let spec = ModelSpec::intercept_only(Axis::LeftRight, Subset::Location(Location::Presacral));
        let err = fit_spec(&table, &spec, &LmmConfig::default()).unwrap_err();
        assert!(matches!(err, ShiftError::EmptyData(_)));
    }

    #[test]
    fn test_non_convergence_attached_to_fit() {
        let table = create_nested_table();
        let spec = ModelSpec::intercept_only(Axis::LeftRight, Subset::All);
        let mut config = LmmConfig::default();
        config.optimizer.max_evaluations = 6;
        let fit = fit_spec(&table, &spec, &config).unwrap();
        assert!(!fit.converged);
        assert!(fit
            .warnings
            .iter()
            .any(|w| matches!(w, FitWarning::NonConvergence { .. })));
    }

    #[test]
    fn test_df_fallback_uses_residual_df() {
        let names = vec!["(Intercept)".to_string(), "phaseduring".to_string()];
        let mut warnings = Vec::new();
        let df = resolve_df(vec![Some(4.5), None], &names, 46.0, &mut warnings);
        assert_eq!(df, vec![4.5, 46.0]);
        assert_eq!(
            warnings,
            vec![FitWarning::DfFallback {
                coefficient: "phaseduring".to_string()
            }]
        );
    }

    #[test]
    fn test_unreplicated_nodes_rejected() {
        // 4 subjects × 3 nodes, one scan each
        let table = create_nested_table().filter(|o| o.phase == Phase::Before);
        let first_scans: Vec<Observation> = table
            .iter()
            .enumerate()
            .filter(|(i, _)| i % 2 == 0)
            .map(|(_, o)| o.clone())
            .collect();
        let table = ObservationTable::from_observations(first_scans).unwrap();
        assert_eq!(table.len(), 12);
        assert_eq!(table.n_nodes(), 12);

        let spec = ModelSpec::intercept_only(Axis::LeftRight, Subset::All);
        let err = fit_spec(&table, &spec, &LmmConfig::default()).unwrap_err();
        assert!(matches!(err, ShiftError::Numerical(_)));
    }

    #[test]
    fn test_information_criteria() {
        let table = create_nested_table();
        let spec = ModelSpec::intercept_only(Axis::LeftRight, Subset::All);
        let fit = fit_spec(&table, &spec, &LmmConfig::default()).unwrap();
        assert_eq!(fit.n_parameters(), 4);
        assert_relative_eq!(fit.aic(), fit.deviance() + 8.0, epsilon = 1e-10);
        assert!(fit.bic() > fit.aic());
    }
}
