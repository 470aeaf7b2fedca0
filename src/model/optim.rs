//! Derivative-free minimization with the Nelder-Mead simplex.
//!
//! Deterministic: the same objective and start always yield the same path.

use serde::{Deserialize, Serialize};

/// Settings for a Nelder-Mead run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NelderMeadConfig {
    /// Maximum number of objective evaluations.
    pub max_evaluations: usize,
    /// Stop when the spread of simplex values falls below this (absolute).
    pub f_tol: f64,
    /// Stop when the simplex diameter falls below this.
    pub x_tol: f64,
    /// Edge length of the initial simplex.
    pub initial_step: f64,
}

impl Default for NelderMeadConfig {
    fn default() -> Self {
        Self {
            max_evaluations: 2000,
            f_tol: 1e-10,
            x_tol: 1e-7,
            initial_step: 0.25,
        }
    }
}

/// Outcome of a minimization.
#[derive(Debug, Clone)]
pub struct Minimum {
    /// Best point found.
    pub x: Vec<f64>,
    /// Objective value at `x`.
    pub value: f64,
    /// Objective evaluations used.
    pub evaluations: usize,
    /// Whether both tolerances were met before the evaluation budget ran out.
    pub converged: bool,
}

const REFLECT: f64 = 1.0;
const EXPAND: f64 = 2.0;
const CONTRACT: f64 = 0.5;
const SHRINK: f64 = 0.5;

/// Minimize `f` starting from `start`.
///
/// Non-finite objective values are treated as `+inf`, so the simplex moves
/// away from them.
pub fn nelder_mead<F>(mut f: F, start: &[f64], config: &NelderMeadConfig) -> Minimum
where
    F: FnMut(&[f64]) -> f64,
{
    let dim = start.len();
    let mut evaluations = 0usize;
    let mut eval = |x: &[f64], evaluations: &mut usize| -> f64 {
        *evaluations += 1;
        let v = f(x);
        if v.is_finite() {
            v
        } else {
            f64::INFINITY
        }
    };

    if dim == 0 {
        let value = eval(start, &mut evaluations);
        return Minimum {
            x: Vec::new(),
            value,
            evaluations,
            converged: true,
        };
    }

    // Initial simplex: start plus one step along each coordinate
    let mut simplex: Vec<Vec<f64>> = Vec::with_capacity(dim + 1);
    simplex.push(start.to_vec());
    for k in 0..dim {
        let mut p = start.to_vec();
        let step = if p[k].abs() > 1e-8 {
            config.initial_step * p[k].abs().max(1.0)
        } else {
            config.initial_step
        };
        p[k] += step;
        simplex.push(p);
    }
    let mut values: Vec<f64> = simplex.iter().map(|p| eval(p, &mut evaluations)).collect();

    let mut converged = false;
    while evaluations < config.max_evaluations {
        // Order vertices best to worst; ties keep their index order
        let mut order: Vec<usize> = (0..=dim).collect();
        order.sort_by(|&a, &b| values[a].total_cmp(&values[b]).then(a.cmp(&b)));
        simplex = order.iter().map(|&i| simplex[i].clone()).collect();
        values = order.iter().map(|&i| values[i]).collect();

        let f_spread = (values[dim] - values[0]).abs();
        let x_spread = simplex[1..]
            .iter()
            .map(|p| {
                p.iter()
                    .zip(simplex[0].iter())
                    .map(|(a, b)| (a - b).abs())
                    .fold(0.0, f64::max)
            })
            .fold(0.0, f64::max);
        if f_spread <= config.f_tol && x_spread <= config.x_tol {
            converged = true;
            break;
        }

        // Centroid of all but the worst vertex
        let mut centroid = vec![0.0; dim];
        for p in &simplex[..dim] {
            for (c, v) in centroid.iter_mut().zip(p.iter()) {
                *c += v / dim as f64;
            }
        }
        let along = |t: f64| -> Vec<f64> {
            centroid
                .iter()
                .zip(simplex[dim].iter())
                .map(|(c, w)| c + t * (c - w))
                .collect()
        };

        let reflected = along(REFLECT);
        let f_reflected = eval(&reflected, &mut evaluations);

        if f_reflected < values[0] {
            let expanded = along(EXPAND);
            let f_expanded = eval(&expanded, &mut evaluations);
            if f_expanded < f_reflected {
                simplex[dim] = expanded;
                values[dim] = f_expanded;
            } else {
                simplex[dim] = reflected;
                values[dim] = f_reflected;
            }
            continue;
        }

        if f_reflected < values[dim - 1] {
            simplex[dim] = reflected;
            values[dim] = f_reflected;
            continue;
        }

        // Contraction: outside if the reflection improved on the worst point
        let (contracted, f_contracted) = if f_reflected < values[dim] {
            let p = along(CONTRACT * REFLECT);
            let v = eval(&p, &mut evaluations);
            (p, v)
        } else {
            let p = along(-CONTRACT);
            let v = eval(&p, &mut evaluations);
            (p, v)
        };

        if f_contracted < values[dim].min(f_reflected) {
            simplex[dim] = contracted;
            values[dim] = f_contracted;
            continue;
        }

        // Shrink towards the best vertex
        let best = simplex[0].clone();
        for i in 1..=dim {
            for (v, b) in simplex[i].iter_mut().zip(best.iter()) {
                *v = b + SHRINK * (*v - b);
            }
            values[i] = eval(&simplex[i], &mut evaluations);
        }
    }

    let best = (0..=dim)
        .min_by(|&a, &b| values[a].total_cmp(&values[b]))
        .unwrap_or(0);

    Minimum {
        x: simplex[best].clone(),
        value: values[best],
        evaluations,
        converged,
    }
}

/// Run Nelder-Mead, then restart once from the best point found.
///
/// The restart guards against the simplex collapsing prematurely.
pub fn nelder_mead_with_restart<F>(mut f: F, start: &[f64], config: &NelderMeadConfig) -> Minimum
where
    F: FnMut(&[f64]) -> f64,
{
    let first = nelder_mead(&mut f, start, config);
    let remaining = config.max_evaluations.saturating_sub(first.evaluations);
    if remaining == 0 {
        return first;
    }
    let restart_config = NelderMeadConfig {
        max_evaluations: remaining,
        initial_step: config.initial_step * 0.1,
        ..config.clone()
    };
    let second = nelder_mead(&mut f, &first.x, &restart_config);
    let evaluations = first.evaluations + second.evaluations;
    if second.value <= first.value {
        Minimum {
            evaluations,
            converged: second.converged,
            ..second
        }
    } else {
        Minimum {
            evaluations,
            ..first
        }
    }
}
