//! Nested random-intercept structure: nodes within subjects.
//!
//! Corresponds to the lme4-style term `(1 | subject/node)`, i.e.
//! `(1 | subject) + (1 | subject:node)`.

use crate::data::ObservationTable;
use crate::error::{Result, ShiftError};
use nalgebra::DMatrix;
use std::collections::HashMap;

/// Group memberships for the two nested random intercepts.
#[derive(Debug, Clone)]
pub struct NestedGrouping {
    /// Subject identifiers, in order of first appearance.
    pub subject_ids: Vec<String>,
    /// Node labels as `subject:node`, in order of first appearance.
    pub node_ids: Vec<String>,
    /// Subject index of every observation.
    pub subject_indices: Vec<usize>,
    /// Node index of every observation.
    pub node_indices: Vec<usize>,
    /// Subject index of every node.
    pub node_subject: Vec<usize>,
}

impl NestedGrouping {
    /// Derive the grouping from a table.
    ///
    /// Fails fast when either level has fewer than two distinct groups, or
    /// when no node is observed more than once.
    pub fn from_table(table: &ObservationTable) -> Result<Self> {
        let mut subject_map: HashMap<&str, usize> = HashMap::new();
        let mut node_map: HashMap<(&str, &str), usize> = HashMap::new();
        let mut subject_ids = Vec::new();
        let mut node_ids = Vec::new();
        let mut node_subject = Vec::new();
        let mut subject_indices = Vec::with_capacity(table.len());
        let mut node_indices = Vec::with_capacity(table.len());

        for obs in table.iter() {
            let s_idx = *subject_map.entry(obs.subject.as_str()).or_insert_with(|| {
                subject_ids.push(obs.subject.clone());
                subject_ids.len() - 1
            });
            let n_idx = *node_map.entry(obs.node_key()).or_insert_with(|| {
                node_ids.push(format!("{}:{}", obs.subject, obs.node));
                node_subject.push(s_idx);
                node_ids.len() - 1
            });
            subject_indices.push(s_idx);
            node_indices.push(n_idx);
        }

        if subject_ids.len() < 2 {
            return Err(ShiftError::InsufficientLevels {
                grouping: "subject".to_string(),
                levels: subject_ids.len(),
            });
        }
        if node_ids.len() < 2 {
            return Err(ShiftError::InsufficientLevels {
                grouping: "subject:node".to_string(),
                levels: node_ids.len(),
            });
        }
        // Node and residual variance are confounded without replicates.
        if node_ids.len() >= subject_indices.len() {
            return Err(ShiftError::Numerical(format!(
                "grouping 'subject:node' has {} levels for {} observations; \
                 each node needs repeated observations",
                node_ids.len(),
                subject_indices.len()
            )));
        }

        Ok(Self {
            subject_ids,
            node_ids,
            subject_indices,
            node_indices,
            node_subject,
        })
    }

    /// Number of observations.
    pub fn n_samples(&self) -> usize {
        self.subject_indices.len()
    }

    pub fn n_subjects(&self) -> usize {
        self.subject_ids.len()
    }

    pub fn n_nodes(&self) -> usize {
        self.node_ids.len()
    }

    /// Total number of random effects (subjects + nodes).
    pub fn n_random_effects(&self) -> usize {
        self.n_subjects() + self.n_nodes()
    }

    /// Indicator matrix `Z = [Z_subject | Z_node]` (observations × random effects).
    pub fn z_matrix(&self) -> DMatrix<f64> {
        let n_s = self.n_subjects();
        let mut z = DMatrix::zeros(self.n_samples(), self.n_random_effects());
        for (i, (&s, &nd)) in self
            .subject_indices
            .iter()
            .zip(self.node_indices.iter())
            .enumerate()
        {
            z[(i, s)] = 1.0;
            z[(i, n_s + nd)] = 1.0;
        }
        z
    }

    /// `Z'Z`, built directly from group counts.
    pub fn ztz(&self) -> DMatrix<f64> {
        let n_s = self.n_subjects();
        let q = self.n_random_effects();
        let mut m = DMatrix::zeros(q, q);
        for (&s, &nd) in self.subject_indices.iter().zip(self.node_indices.iter()) {
            m[(s, s)] += 1.0;
            m[(n_s + nd, n_s + nd)] += 1.0;
            m[(s, n_s + nd)] += 1.0;
            m[(n_s + nd, s)] += 1.0;
        }
        m
    }

    /// Observations per node.
    pub fn observations_per_node(&self) -> Vec<usize> {
        let mut counts = vec![0usize; self.n_nodes()];
        for &idx in &self.node_indices {
            counts[idx] += 1;
        }
        counts
    }

    /// Nodes per subject.
    pub fn nodes_per_subject(&self) -> Vec<usize> {
        let mut counts = vec![0usize; self.n_subjects()];
        for &s in &self.node_subject {
            counts[s] += 1;
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Location, Observation, Phase};

    fn obs(subject: &str, node: &str) -> Observation {
        Observation {
            subject: subject.into(),
            node: node.into(),
            phase: Phase::Before,
            location: Location::Mesorectal,
            bony_shift: [0.0; 3],
            tumor_shift: [0.0; 3],
            bladder_baseline: None,
            bladder_relative: None,
        }
    }

    fn create_test_table() -> ObservationTable {
        ObservationTable::from_observations(vec![
            obs("A", "N1"),
            obs("A", "N1"),
            obs("A", "N2"),
            obs("B", "N1"),
            obs("B", "N1"),
            obs("B", "N3"),
        ])
        .unwrap()
    }

    #[test]
    fn test_reused_node_labels_are_distinct() {
        let g = NestedGrouping::from_table(&create_test_table()).unwrap();
        assert_eq!(g.n_subjects(), 2);
        assert_eq!(g.n_nodes(), 4);
        assert_eq!(g.node_ids, vec!["A:N1", "A:N2", "B:N1", "B:N3"]);
        assert_eq!(g.node_subject, vec![0, 0, 1, 1]);
    }

    #[test]
    fn test_z_matrix_structure() {
        let g = NestedGrouping::from_table(&create_test_table()).unwrap();
        let z = g.z_matrix();
        assert_eq!(z.nrows(), 6);
        assert_eq!(z.ncols(), 6);
        for i in 0..z.nrows() {
            let row_sum: f64 = z.row(i).iter().sum();
            assert_eq!(row_sum, 2.0);
        }
    }

    #[test]
    fn test_ztz_matches_product() {
        let g = NestedGrouping::from_table(&create_test_table()).unwrap();
        let z = g.z_matrix();
        assert_eq!(g.ztz(), z.transpose() * &z);
    }

    #[test]
    fn test_counts() {
        let g = NestedGrouping::from_table(&create_test_table()).unwrap();
        assert_eq!(g.observations_per_node(), vec![2, 1, 2, 1]);
        assert_eq!(g.nodes_per_subject(), vec![2, 2]);
    }

    #[test]
    fn test_single_subject_fails_fast() {
        let table = ObservationTable::from_observations(vec![obs("A", "N1"), obs("A", "N2")]).unwrap();
        let err = NestedGrouping::from_table(&table).unwrap_err();
        assert!(matches!(err, ShiftError::InsufficientLevels { levels: 1, .. }));
    }

    #[test]
    fn test_unreplicated_nodes_fail_fast() {
        let table = ObservationTable::from_observations(vec![
            obs("A", "N1"),
            obs("A", "N2"),
            obs("B", "N1"),
            obs("B", "N2"),
        ])
        .unwrap();
        let err = NestedGrouping::from_table(&table).unwrap_err();
        assert!(matches!(err, ShiftError::Numerical(_)));
    }
}
