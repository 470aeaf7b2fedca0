//! Per-node simple linear regressions via OLS.
//!
//! Used for the regression lines overlaid on bladder-volume scatter plots.

use crate::data::{Axis, Covariate, Location, ObservationTable, Reference};
use crate::error::{Result, ShiftError};
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// OLS line `shift ~ covariate` for a single node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeLine {
    pub subject: String,
    pub node: String,
    pub location: Location,
    /// Estimated intercept.
    pub intercept: f64,
    /// Estimated slope.
    pub slope: f64,
    /// R-squared.
    pub r_squared: f64,
    /// Number of observations.
    pub n_obs: usize,
    /// Smallest and largest covariate value, for drawing the segment.
    pub x_range: (f64, f64),
}

impl NodeLine {
    /// Predicted shift at `x`.
    pub fn predict(&self, x: f64) -> f64 {
        self.intercept + self.slope * x
    }
}

/// Fit an OLS line `y = a + b x`.
///
/// Returns `(intercept, slope, r_squared)`.
pub fn fit_line(x: &[f64], y: &[f64]) -> Result<(f64, f64, f64)> {
    let n = x.len();
    if y.len() != n {
        return Err(ShiftError::DimensionMismatch {
            expected: n,
            actual: y.len(),
        });
    }
    if n < 2 {
        return Err(ShiftError::Numerical(
            "Need at least two points to fit a line".to_string(),
        ));
    }

    let design = DMatrix::from_fn(n, 2, |i, j| if j == 0 { 1.0 } else { x[i] });
    let y_vec = DVector::from_column_slice(y);
    let xtx = design.transpose() * &design;
    let xtx_inv = xtx.try_inverse().ok_or_else(|| {
        ShiftError::Numerical("Covariate is constant (X'X not invertible)".to_string())
    })?;
    let beta = xtx_inv * (design.transpose() * &y_vec);

    let residuals = &y_vec - &design * &beta;
    let rss: f64 = residuals.iter().map(|e| e * e).sum();
    let y_mean = y.iter().sum::<f64>() / n as f64;
    let tss: f64 = y.iter().map(|yi| (yi - y_mean).powi(2)).sum();
    let r_squared = if tss > 0.0 { 1.0 - rss / tss } else { 0.0 };

    Ok((beta[0], beta[1], r_squared))
}

/// Fit one line per node of `table`, regressing the shift on `covariate`.
///
/// Nodes with fewer than two distinct covariate values are skipped, as are
/// rows where the covariate is missing. Output is sorted by `(subject, node)`.
pub fn fit_node_lines(
    table: &ObservationTable,
    axis: Axis,
    reference: Reference,
    covariate: Covariate,
) -> Vec<NodeLine> {
    let mut groups: BTreeMap<(&str, &str), (Location, Vec<f64>, Vec<f64>)> = BTreeMap::new();
    for obs in table.iter() {
        if let Some(x) = covariate.value(obs) {
            let entry = groups
                .entry(obs.node_key())
                .or_insert_with(|| (obs.location, Vec::new(), Vec::new()));
            entry.1.push(x);
            entry.2.push(obs.shift(axis, reference));
        }
    }

    let groups: Vec<_> = groups.into_iter().collect();
    groups
        .par_iter()
        .filter_map(|((subject, node), (location, x, y))| {
            let min = x.iter().copied().fold(f64::INFINITY, f64::min);
            let max = x.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            if max <= min {
                return None;
            }
            let (intercept, slope, r_squared) = fit_line(x, y).ok()?;
            Some(NodeLine {
                subject: subject.to_string(),
                node: node.to_string(),
                location: *location,
                intercept,
                slope,
                r_squared,
                n_obs: x.len(),
                x_range: (min, max),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Observation, Phase};
    use approx::assert_relative_eq;

    fn obs(subject: &str, node: &str, rel: Option<f64>, z: f64) -> Observation {
        Observation {
            subject: subject.into(),
            node: node.into(),
            phase: Phase::During,
            location: Location::Presacral,
            bony_shift: [0.0, 0.0, z],
            tumor_shift: [0.0; 3],
            bladder_baseline: None,
            bladder_relative: rel,
        }
    }

    #[test]
    fn test_fit_line_exact() {
        let (a, b, r2) = fit_line(&[0.0, 1.0, 2.0], &[1.0, 3.0, 5.0]).unwrap();
        assert_relative_eq!(a, 1.0, epsilon = 1e-10);
        assert_relative_eq!(b, 2.0, epsilon = 1e-10);
        assert_relative_eq!(r2, 1.0, epsilon = 1e-10);
    }

    #[test]
    fn test_fit_line_constant_x() {
        assert!(fit_line(&[1.0, 1.0], &[0.0, 2.0]).is_err());
        assert!(fit_line(&[1.0], &[0.0]).is_err());
    }

    #[test]
    fn test_node_lines_skip_degenerate_nodes() {
        let table = ObservationTable::from_observations(vec![
            obs("P1", "N1", Some(0.5), 1.0),
            obs("P1", "N1", Some(1.0), 2.0),
            obs("P1", "N1", None, 9.0),
            obs("P1", "N2", Some(0.8), 1.0),
            obs("P1", "N2", Some(0.8), 3.0),
            obs("P2", "N1", Some(1.2), 0.0),
        ])
        .unwrap();
        let lines = fit_node_lines(&table, Axis::CranioCaudal, Reference::Bony, Covariate::RelativeBladder);
        assert_eq!(lines.len(), 1);
        let line = &lines[0];
        assert_eq!((line.subject.as_str(), line.node.as_str()), ("P1", "N1"));
        assert_eq!(line.n_obs, 2);
        assert_relative_eq!(line.slope, 2.0, epsilon = 1e-10);
        assert_relative_eq!(line.predict(0.75), 1.5, epsilon = 1e-10);
        assert_eq!(line.x_range, (0.5, 1.0));
    }
}
