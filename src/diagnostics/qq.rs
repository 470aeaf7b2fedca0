//! Normal QQ diagnostics for model residuals.

use crate::error::{Result, ShiftError};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};

/// Reference line through the first and third quartiles.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QqLine {
    pub intercept: f64,
    pub slope: f64,
}

/// Points and summary of a normal QQ plot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QqPlot {
    /// Theoretical normal quantiles, ascending.
    pub theoretical: Vec<f64>,
    /// Sorted sample values.
    pub sample: Vec<f64>,
    /// Probability-plot correlation coefficient.
    pub ppcc: f64,
    pub line: QqLine,
}

impl QqPlot {
    pub fn len(&self) -> usize {
        self.sample.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sample.is_empty()
    }

    /// `(theoretical, sample)` pairs.
    pub fn points(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.theoretical.iter().copied().zip(self.sample.iter().copied())
    }
}

/// Sample quantile with linear interpolation (R type 7) of sorted data.
pub fn quantile_sorted(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let h = (sorted.len() - 1) as f64 * p.clamp(0.0, 1.0);
    let lo = h.floor() as usize;
    let hi = h.ceil() as usize;
    sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
}

/// Normal QQ points using Blom plotting positions `(i − 3/8)/(n + 1/4)`.
///
/// Non-finite residuals are rejected.
pub fn qq_points(residuals: &[f64]) -> Result<QqPlot> {
    if residuals.len() < 2 {
        return Err(ShiftError::EmptyData(
            "QQ plot needs at least two residuals".to_string(),
        ));
    }
    if residuals.iter().any(|r| !r.is_finite()) {
        return Err(ShiftError::Numerical(
            "Residuals contain non-finite values".to_string(),
        ));
    }

    let mut sample = residuals.to_vec();
    sample.sort_by(|a, b| a.total_cmp(b));

    let normal = Normal::new(0.0, 1.0)
        .map_err(|e| ShiftError::Numerical(format!("Standard normal: {}", e)))?;
    let n = sample.len() as f64;
    let theoretical: Vec<f64> = (1..=sample.len())
        .map(|i| normal.inverse_cdf((i as f64 - 0.375) / (n + 0.25)))
        .collect();

    let ppcc = correlation(&theoretical, &sample);

    let (q1, q3) = (quantile_sorted(&sample, 0.25), quantile_sorted(&sample, 0.75));
    let (z1, z3) = (normal.inverse_cdf(0.25), normal.inverse_cdf(0.75));
    let slope = (q3 - q1) / (z3 - z1);
    let line = QqLine {
        intercept: q1 - slope * z1,
        slope,
    };

    Ok(QqPlot {
        theoretical,
        sample,
        ppcc,
        line,
    })
}

fn correlation(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len() as f64;
    let mx = x.iter().sum::<f64>() / n;
    let my = y.iter().sum::<f64>() / n;
    let sxy: f64 = x.iter().zip(y).map(|(a, b)| (a - mx) * (b - my)).sum();
    let sxx: f64 = x.iter().map(|a| (a - mx).powi(2)).sum();
    let syy: f64 = y.iter().map(|b| (b - my).powi(2)).sum();
    if sxx > 0.0 && syy > 0.0 {
        sxy / (sxx * syy).sqrt()
    } else {
        f64::NAN
    }
}
