//! Fixed-effects design matrix construction with treatment contrasts.

use crate::data::{Covariate, ObservationTable, Term};
use crate::error::{Result, ShiftError};
use nalgebra::DMatrix;
use std::collections::BTreeMap;

/// A design matrix for the fixed part of a mixed model.
#[derive(Debug, Clone)]
pub struct DesignMatrix {
    /// The design matrix (observations × coefficients).
    matrix: DMatrix<f64>,
    /// Names of the coefficients (columns).
    coefficient_names: Vec<String>,
    /// Reference levels for categorical covariates.
    reference_levels: BTreeMap<Covariate, String>,
}

impl DesignMatrix {
    /// Create a design matrix directly from components.
    pub fn from_matrix(matrix: DMatrix<f64>, coefficient_names: Vec<String>) -> Self {
        Self {
            matrix,
            coefficient_names,
            reference_levels: BTreeMap::new(),
        }
    }

    /// Build the design for `terms` on every row of `table`.
    ///
    /// Always includes an intercept. Categorical covariates use the first
    /// level present in `table` as reference. Rows with a missing value for a
    /// continuous covariate must be removed beforehand.
    pub fn from_terms(table: &ObservationTable, terms: &[Term]) -> Result<Self> {
        let n = table.len();
        if n == 0 {
            return Err(ShiftError::EmptyData(
                "Cannot build a design matrix without observations".to_string(),
            ));
        }

        let mut reference_levels = BTreeMap::new();
        let mut coefficient_names = vec!["(Intercept)".to_string()];
        let mut columns: Vec<Vec<f64>> = vec![vec![1.0; n]];

        for term in terms {
            match term {
                Term::Main(cov) => {
                    for (name, col) in Self::covariate_columns(table, *cov, &mut reference_levels)? {
                        coefficient_names.push(name);
                        columns.push(col);
                    }
                }
                Term::Interaction(a, b) => {
                    let cols_a = Self::covariate_columns(table, *a, &mut reference_levels)?;
                    let cols_b = Self::covariate_columns(table, *b, &mut reference_levels)?;
                    for (name_a, col_a) in &cols_a {
                        for (name_b, col_b) in &cols_b {
                            coefficient_names.push(format!("{}:{}", name_a, name_b));
                            columns.push(
                                col_a.iter().zip(col_b.iter()).map(|(x, y)| x * y).collect(),
                            );
                        }
                    }
                }
            }
        }

        let matrix = DMatrix::from_fn(n, columns.len(), |i, j| columns[j][i]);

        Ok(Self {
            matrix,
            coefficient_names,
            reference_levels,
        })
    }

    /// Columns contributed by one covariate (helper for main effects and interactions).
    fn covariate_columns(
        table: &ObservationTable,
        covariate: Covariate,
        reference_levels: &mut BTreeMap<Covariate, String>,
    ) -> Result<Vec<(String, Vec<f64>)>> {
        if !covariate.is_categorical() {
            let col = table
                .iter()
                .enumerate()
                .map(|(row, obs)| {
                    covariate.value(obs).ok_or_else(|| {
                        ShiftError::InvalidParameter(format!(
                            "Missing value for '{}' in model row {}",
                            covariate, row
                        ))
                    })
                })
                .collect::<Result<Vec<f64>>>()?;
            return Ok(vec![(covariate.name().to_string(), col)]);
        }

        let present: Vec<&'static str> = covariate
            .levels()
            .into_iter()
            .filter(|lvl| table.iter().any(|o| covariate.level(o) == Some(*lvl)))
            .collect();
        if present.len() < 2 {
            return Err(ShiftError::InvalidParameter(format!(
                "Covariate '{}' has a single level in this subset",
                covariate
            )));
        }

        reference_levels.insert(covariate, present[0].to_string());

        Ok(present[1..]
            .iter()
            .map(|lvl| {
                let col = table
                    .iter()
                    .map(|o| if covariate.level(o) == Some(*lvl) { 1.0 } else { 0.0 })
                    .collect();
                (format!("{}{}", covariate.name(), lvl), col)
            })
            .collect())
    }

    /// Get the design matrix.
    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.matrix
    }

    /// Get coefficient names.
    pub fn coefficient_names(&self) -> &[String] {
        &self.coefficient_names
    }

    /// Number of observations (rows).
    pub fn n_samples(&self) -> usize {
        self.matrix.nrows()
    }

    /// Number of coefficients (columns).
    pub fn n_coefficients(&self) -> usize {
        self.matrix.ncols()
    }

    /// Get the reference level for a categorical covariate.
    pub fn reference_level(&self, covariate: Covariate) -> Option<&str> {
        self.reference_levels.get(&covariate).map(|s| s.as_str())
    }

    /// Get the index of a coefficient by name.
    pub fn coefficient_index(&self, name: &str) -> Option<usize> {
        self.coefficient_names.iter().position(|n| n == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Location, Observation, Phase};

    fn obs(subject: &str, location: Location, phase: Phase, rel: f64) -> Observation {
        Observation {
            subject: subject.into(),
            node: "N1".into(),
            phase,
            location,
            bony_shift: [0.0; 3],
            tumor_shift: [0.0; 3],
            bladder_baseline: Some(0.5),
            bladder_relative: Some(rel),
        }
    }

    fn create_test_table() -> ObservationTable {
        ObservationTable::from_observations(vec![
            obs("P1", Location::Mesorectal, Phase::Before, 1.0),
            obs("P1", Location::Mesorectal, Phase::During, 0.8),
            obs("P2", Location::Presacral, Phase::Before, 1.2),
            obs("P2", Location::Presacral, Phase::During, 0.9),
        ])
        .unwrap()
    }

    #[test]
    fn test_intercept_only() {
        let table = create_test_table();
        let dm = DesignMatrix::from_terms(&table, &[]).unwrap();
        assert_eq!(dm.n_samples(), 4);
        assert_eq!(dm.coefficient_names(), &["(Intercept)"]);
        assert!(dm.matrix().iter().all(|&v| v == 1.0));
    }

    #[test]
    fn test_categorical_treatment_contrast() {
        let table = create_test_table();
        let dm = DesignMatrix::from_terms(&table, &[Term::Main(Covariate::Phase)]).unwrap();
        assert_eq!(dm.coefficient_names(), &["(Intercept)", "phaseduring"]);
        assert_eq!(dm.reference_level(Covariate::Phase), Some("before"));
        let col: Vec<f64> = (0..4).map(|i| dm.matrix()[(i, 1)]).collect();
        assert_eq!(col, vec![0.0, 1.0, 0.0, 1.0]);
    }

    #[test]
    fn test_reference_is_first_present_level() {
        let table = create_test_table();
        let dm = DesignMatrix::from_terms(&table, &[Term::Main(Covariate::Location)]).unwrap();
        // Lateral is absent, so only presacral gets a column
        assert_eq!(dm.coefficient_names(), &["(Intercept)", "locationpresacral"]);
        assert_eq!(dm.reference_level(Covariate::Location), Some("mesorectal"));
    }

    #[test]
    fn test_interaction_columns() {
        let table = create_test_table();
        let terms = [
            Term::Main(Covariate::Phase),
            Term::Main(Covariate::RelativeBladder),
            Term::Interaction(Covariate::Phase, Covariate::RelativeBladder),
        ];
        let dm = DesignMatrix::from_terms(&table, &terms).unwrap();
        assert_eq!(
            dm.coefficient_names(),
            &[
                "(Intercept)",
                "phaseduring",
                "relative_bladder",
                "phaseduring:relative_bladder"
            ]
        );
        let col: Vec<f64> = (0..4).map(|i| dm.matrix()[(i, 3)]).collect();
        assert_eq!(col, vec![0.0, 0.8, 0.0, 0.9]);
    }

    #[test]
    fn test_single_level_rejected() {
        let table = create_test_table().filter(|o| o.location == Location::Mesorectal);
        let result = DesignMatrix::from_terms(&table, &[Term::Main(Covariate::Location)]);
        assert!(result.is_err());
    }
}
