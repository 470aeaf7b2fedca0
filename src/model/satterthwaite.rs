//! Satterthwaite degrees of freedom for fixed effects of a nested LMM.
//!
//! For coefficient `j` with `v(φ) = Var(β̂_j)` at variance parameters
//! `φ = (σ₁², σ₂², σ²)`:
//!
//! `df_j = 2 v² / (∇v' A ∇v)` with `A = 2 H⁻¹`,
//!
//! where `H` is the Hessian of the REML deviance in `φ`. Both derivatives are
//! taken numerically. Components estimated at zero are held fixed.

use crate::model::lmm::RemlProblem;
use nalgebra::{DMatrix, DVector};
use tracing::debug;

/// Relative finite-difference step.
const REL_STEP: f64 = 1e-3;

/// Satterthwaite df per coefficient, `None` where the approximation fails.
pub(crate) fn satterthwaite_df(problem: &RemlProblem, variances: &[f64; 3]) -> Vec<Option<f64>> {
    let p = problem.p();
    let free: Vec<usize> = (0..3).filter(|&k| variances[k] > 0.0).collect();
    let steps: Vec<f64> = free.iter().map(|&k| REL_STEP * variances[k]).collect();

    let shifted = |deltas: &[(usize, f64)]| -> [f64; 3] {
        let mut phi = *variances;
        for &(slot, d) in deltas {
            phi[free[slot]] += d;
        }
        phi
    };

    // Hessian of the deviance over the free parameters
    let m = free.len();
    let d0 = problem.deviance_at_variances(variances);
    let mut hessian = DMatrix::zeros(m, m);
    for a in 0..m {
        let ha = steps[a];
        let plus = problem.deviance_at_variances(&shifted(&[(a, ha)]));
        let minus = problem.deviance_at_variances(&shifted(&[(a, -ha)]));
        hessian[(a, a)] = (plus - 2.0 * d0 + minus) / (ha * ha);
        for b in (a + 1)..m {
            let hb = steps[b];
            let pp = problem.deviance_at_variances(&shifted(&[(a, ha), (b, hb)]));
            let pm = problem.deviance_at_variances(&shifted(&[(a, ha), (b, -hb)]));
            let mp = problem.deviance_at_variances(&shifted(&[(a, -ha), (b, hb)]));
            let mm = problem.deviance_at_variances(&shifted(&[(a, -ha), (b, -hb)]));
            let h = (pp - pm - mp + mm) / (4.0 * ha * hb);
            hessian[(a, b)] = h;
            hessian[(b, a)] = h;
        }
    }

    let cov_phi = match hessian.cholesky() {
        Some(chol) => chol.inverse() * 2.0,
        None => {
            debug!("deviance Hessian not positive definite");
            return vec![None; p];
        }
    };

    let Some(cov_beta) = problem.beta_covariance_at(variances) else {
        return vec![None; p];
    };

    // Gradients of Var(β̂_j) for every j at once
    let mut gradients = DMatrix::zeros(p, m);
    for a in 0..m {
        let ha = steps[a];
        let plus = problem.beta_covariance_at(&shifted(&[(a, ha)]));
        let minus = problem.beta_covariance_at(&shifted(&[(a, -ha)]));
        let (Some(plus), Some(minus)) = (plus, minus) else {
            return vec![None; p];
        };
        for j in 0..p {
            gradients[(j, a)] = (plus[(j, j)] - minus[(j, j)]) / (2.0 * ha);
        }
    }

    (0..p)
        .map(|j| {
            let g: DVector<f64> = gradients.row(j).transpose();
            let denom = (g.transpose() * &cov_phi * &g)[(0, 0)];
            let v = cov_beta[(j, j)];
            let df = 2.0 * v * v / denom;
            if df.is_finite() && df > 0.0 {
                Some(df)
            } else {
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use crate::data::{Axis, Covariate, Location, ModelSpec, Observation, ObservationTable, Phase, Subset};
    use crate::model::lmm::{fit_spec, DfMethod, LmmConfig};

    /// Balanced design: 6 subjects × 2 nodes × 4 scans, phase alternates within node.
    fn balanced_table() -> ObservationTable {
        let subject = [1.5, -0.7, 0.3, -1.2, 0.9, -0.8];
        let node = [0.6, -0.6, 0.2, -0.2, 0.5, -0.5, -0.4, 0.4, 0.1, -0.1, 0.3, -0.3];
        let noise = [0.25, -0.15, -0.05, 0.1, -0.2, 0.3, 0.05, -0.15];
        let mut obs = Vec::new();
        for s in 0..6 {
            for nd in 0..2 {
                for k in 0..4 {
                    let e = noise[(k + 2 * nd + s) % 8];
                    let phase = if k % 2 == 0 { Phase::Before } else { Phase::During };
                    let effect = if phase == Phase::During { 0.4 } else { 0.0 };
                    obs.push(Observation {
                        subject: format!("P{}", s),
                        node: format!("N{}", nd),
                        phase,
                        location: Location::Mesorectal,
                        bony_shift: [0.0, 0.0, subject[s] + node[2 * s + nd] + effect + e],
                        tumor_shift: [0.0; 3],
                        bladder_baseline: None,
                        bladder_relative: None,
                    });
                }
            }
        }
        ObservationTable::from_observations(obs).unwrap()
    }

    #[test]
    fn test_intercept_df_near_subject_count() {
        let table = balanced_table();
        let spec = ModelSpec::intercept_only(Axis::CranioCaudal, Subset::All);
        let fit = fit_spec(&table, &spec, &LmmConfig::default()).unwrap();
        // Intercept information comes from subject means: df = n_subjects - 1
        assert!((fit.df[0] - 5.0).abs() < 0.1, "df = {}", fit.df[0]);
    }

    #[test]
    fn test_within_node_effect_df_large() {
        let table = balanced_table();
        let spec = ModelSpec::intercept_only(Axis::CranioCaudal, Subset::All).with_main(Covariate::Phase);
        let fit = fit_spec(&table, &spec, &LmmConfig::default()).unwrap();
        let j = fit.coefficient_index("phaseduring").unwrap();
        // Within-node contrast uses the residual stratum: 48 - 12 - 1 = 35
        assert!((fit.df[j] - 35.0).abs() < 0.5, "df = {}", fit.df[j]);
        assert!(fit.df[0] < fit.df[j]);
    }

    #[test]
    fn test_residual_df_method() {
        let table = balanced_table();
        let spec = ModelSpec::intercept_only(Axis::CranioCaudal, Subset::All).with_main(Covariate::Phase);
        let config = LmmConfig {
            df_method: DfMethod::Residual,
            ..Default::default()
        };
        let fit = fit_spec(&table, &spec, &config).unwrap();
        assert_eq!(fit.df, vec![46.0, 46.0]);
    }
}
