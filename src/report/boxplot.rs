//! Five-number summaries of shifts per subject, for box plots.

use crate::data::{Axis, Location, ObservationTable, Reference};
use crate::diagnostics::qq::quantile_sorted;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Tukey box-plot statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoxStats {
    pub n: usize,
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
    /// Most extreme values within 1.5 IQR of the box.
    pub whisker_low: f64,
    pub whisker_high: f64,
    pub outliers: Vec<f64>,
}

impl BoxStats {
    /// Summarize `values`; `None` when empty.
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let q1 = quantile_sorted(&sorted, 0.25);
        let median = quantile_sorted(&sorted, 0.5);
        let q3 = quantile_sorted(&sorted, 0.75);
        let iqr = q3 - q1;
        let (lo_fence, hi_fence) = (q1 - 1.5 * iqr, q3 + 1.5 * iqr);

        let inside: Vec<f64> = sorted
            .iter()
            .copied()
            .filter(|v| *v >= lo_fence && *v <= hi_fence)
            .collect();
        let outliers = sorted
            .iter()
            .copied()
            .filter(|v| *v < lo_fence || *v > hi_fence)
            .collect();

        Some(Self {
            n: sorted.len(),
            q1,
            median,
            q3,
            whisker_low: inside.first().copied().unwrap_or(q1),
            whisker_high: inside.last().copied().unwrap_or(q3),
            outliers,
        })
    }

    /// Smallest and largest value drawn.
    pub fn extent(&self) -> (f64, f64) {
        let lo = self.outliers.iter().copied().fold(self.whisker_low, f64::min);
        let hi = self.outliers.iter().copied().fold(self.whisker_high, f64::max);
        (lo, hi)
    }
}

/// Box statistics per subject for one axis and location, sorted by subject.
pub fn subject_boxes(
    table: &ObservationTable,
    axis: Axis,
    reference: Reference,
    location: Location,
) -> Vec<(String, BoxStats)> {
    let mut groups: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for obs in table.iter().filter(|o| o.location == location) {
        groups
            .entry(obs.subject.as_str())
            .or_default()
            .push(obs.shift(axis, reference));
    }
    groups
        .into_iter()
        .filter_map(|(subject, values)| {
            BoxStats::from_values(&values).map(|stats| (subject.to_string(), stats))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Observation, Phase};
    use approx::assert_relative_eq;

    #[test]
    fn test_box_stats_with_outlier() {
        let stats = BoxStats::from_values(&[1.0, 2.0, 3.0, 4.0, 100.0]).unwrap();
        assert_eq!(stats.n, 5);
        assert_relative_eq!(stats.median, 3.0);
        assert_relative_eq!(stats.q1, 2.0);
        assert_relative_eq!(stats.q3, 4.0);
        assert_eq!(stats.outliers, vec![100.0]);
        assert_relative_eq!(stats.whisker_high, 4.0);
        assert_relative_eq!(stats.whisker_low, 1.0);
        assert_eq!(stats.extent(), (1.0, 100.0));
    }

    #[test]
    fn test_empty_values() {
        assert!(BoxStats::from_values(&[]).is_none());
    }

    #[test]
    fn test_subject_boxes_filter_location() {
        let make = |subject: &str, location, x| Observation {
            subject: subject.into(),
            node: format!("{}-{:?}", subject, location),
            phase: Phase::Before,
            location,
            bony_shift: [x, 0.0, 0.0],
            tumor_shift: [0.0; 3],
            bladder_baseline: None,
            bladder_relative: None,
        };
        let table = ObservationTable::from_observations(vec![
            make("B", Location::Mesorectal, 1.0),
            make("A", Location::Mesorectal, 2.0),
            make("A", Location::Mesorectal, 4.0),
            make("A", Location::Presacral, 50.0),
        ])
        .unwrap();
        let boxes = subject_boxes(&table, Axis::LeftRight, Reference::Bony, Location::Mesorectal);
        assert_eq!(boxes.len(), 2);
        assert_eq!(boxes[0].0, "A");
        assert_relative_eq!(boxes[0].1.median, 3.0);
        assert_eq!(boxes[1].1.n, 1);
    }
}
