//! Synthetic node-shift data generation for benchmarking and testing.
//!
//! Generates nested subject/node data with known variance components for
//! validating the mixed model fit.

use crate::data::{Axis, Location, Observation, ObservationTable, Phase};
use crate::error::{Result, ShiftError};
use rand::distributions::{Distribution, Uniform};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::Normal;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration for synthetic data generation. Shifts are in mm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticConfig {
    /// Name/identifier for this dataset.
    pub name: String,
    pub n_subjects: usize,
    /// Nodes per subject in each location, in `Location::ALL` order.
    pub nodes_per_location: [usize; 3],
    /// Scans per node in each phase, in `Phase::ALL` order.
    pub scans_per_phase: [usize; 2],
    /// Mean shift per axis.
    pub mean_shift: [f64; 3],
    pub sd_subject: f64,
    pub sd_node: f64,
    pub sd_residual: f64,
    /// Added to every shift during treatment.
    pub phase_effect: f64,
    /// Cranio-caudal shift per unit of relative bladder volume above 1.
    pub bladder_effect: f64,
    /// SD of the relative bladder volume around 1.
    pub bladder_sd: f64,
    /// SD of the tumor motion subtracted to give tumor-referenced shifts.
    pub sd_tumor: f64,
    /// Random seed for reproducibility.
    pub seed: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            name: "synthetic".to_string(),
            n_subjects: 12,
            nodes_per_location: [3, 1, 1],
            scans_per_phase: [2, 5],
            mean_shift: [0.0, 0.5, -1.0],
            sd_subject: 2.0,
            sd_node: 1.0,
            sd_residual: 1.5,
            phase_effect: 0.0,
            bladder_effect: 0.0,
            bladder_sd: 0.25,
            sd_tumor: 1.0,
            seed: 42,
        }
    }
}

impl SyntheticConfig {
    /// Create a new config with the given name.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// Set cohort dimensions.
    pub fn with_dimensions(mut self, n_subjects: usize, nodes_per_location: [usize; 3]) -> Self {
        self.n_subjects = n_subjects;
        self.nodes_per_location = nodes_per_location;
        self
    }

    pub fn with_scans(mut self, before: usize, during: usize) -> Self {
        self.scans_per_phase = [before, during];
        self
    }

    /// Set the three variance components as SDs.
    pub fn with_sds(mut self, subject: f64, node: f64, residual: f64) -> Self {
        self.sd_subject = subject;
        self.sd_node = node;
        self.sd_residual = residual;
        self
    }

    pub fn with_phase_effect(mut self, effect: f64) -> Self {
        self.phase_effect = effect;
        self
    }

    pub fn with_bladder_effect(mut self, effect: f64) -> Self {
        self.bladder_effect = effect;
        self
    }

    /// Set random seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Systematic SD implied by the configured components.
    pub fn systematic_sd(&self) -> f64 {
        (self.sd_subject.powi(2) + self.sd_node.powi(2)).sqrt()
    }

    fn validate(&self) -> Result<()> {
        let sds = [
            self.sd_subject,
            self.sd_node,
            self.sd_residual,
            self.bladder_sd,
            self.sd_tumor,
        ];
        if sds.iter().any(|s| !s.is_finite() || *s < 0.0) {
            return Err(ShiftError::InvalidParameter(
                "Standard deviations must be finite and non-negative".to_string(),
            ));
        }
        if self.n_subjects == 0
            || self.nodes_per_location.iter().sum::<usize>() == 0
            || self.scans_per_phase.iter().sum::<usize>() == 0
        {
            return Err(ShiftError::InvalidParameter(
                "Synthetic cohort must have subjects, nodes and scans".to_string(),
            ));
        }
        Ok(())
    }
}

/// Result of synthetic data generation.
#[derive(Debug, Clone)]
pub struct SyntheticData {
    pub table: ObservationTable,
    /// Configuration used.
    pub config: SyntheticConfig,
}

impl SyntheticData {
    /// Write the table in the raw input format: shifts in cm, bladder
    /// volumes in percent and a scan qualifier on every node label.
    pub fn write_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut wtr = csv::Writer::from_path(path)?;
        wtr.write_record([
            "patient",
            "node",
            "phase",
            "location",
            "bony_x",
            "bony_y",
            "bony_z",
            "tumor_x",
            "tumor_y",
            "tumor_z",
            "bladder_baseline",
            "bladder_relative",
        ])?;

        for (i, obs) in self.table.iter().enumerate() {
            let mut record = vec![
                obs.subject.clone(),
                format!("{}_scan{}", obs.node, i),
                obs.phase.label().to_string(),
                obs.location.label().to_string(),
            ];
            for axis in Axis::ALL {
                record.push(format!("{:.6}", obs.bony_shift[axis.index()] / 10.0));
            }
            for axis in Axis::ALL {
                record.push(format!("{:.6}", obs.tumor_shift[axis.index()] / 10.0));
            }
            for volume in [obs.bladder_baseline, obs.bladder_relative] {
                record.push(volume.map(|v| format!("{:.4}", v * 100.0)).unwrap_or_default());
            }
            wtr.write_record(&record)?;
        }
        wtr.flush()?;
        Ok(())
    }

    /// Write `data.csv` and the generating `config.yaml` to a directory.
    pub fn write_to_dir(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        self.write_csv(dir.join("data.csv"))?;
        std::fs::write(dir.join("config.yaml"), serde_yaml::to_string(&self.config)?)?;
        Ok(())
    }
}

fn normal(sd: f64) -> Result<Normal<f64>> {
    Normal::new(0.0, sd).map_err(|e| ShiftError::InvalidParameter(e.to_string()))
}

/// Generate a nested cohort with known variance components.
///
/// Every axis and both references get independent draws of the same
/// structure. Relative bladder volume only moves the cranio-caudal axis.
pub fn generate_synthetic(config: &SyntheticConfig) -> Result<SyntheticData> {
    config.validate()?;
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);

    let subject_dist = normal(config.sd_subject)?;
    let node_dist = normal(config.sd_node)?;
    let residual_dist = normal(config.sd_residual)?;
    let bladder_dist = normal(config.bladder_sd)?;
    let tumor_dist = normal(config.sd_tumor)?;
    let baseline_dist = Uniform::new(0.2, 0.8);

    let mut observations = Vec::new();
    for s in 0..config.n_subjects {
        let subject = format!("P{:02}", s + 1);
        let subject_offset: [f64; 3] = std::array::from_fn(|_| subject_dist.sample(&mut rng));
        let baseline = baseline_dist.sample(&mut rng);

        let mut node_number = 0;
        for (location, &n_nodes) in Location::ALL.iter().zip(&config.nodes_per_location) {
            for _ in 0..n_nodes {
                node_number += 1;
                let node = format!("LN{}", node_number);
                let node_offset: [f64; 3] = std::array::from_fn(|_| node_dist.sample(&mut rng));

                for (phase, &n_scans) in Phase::ALL.iter().zip(&config.scans_per_phase) {
                    for _ in 0..n_scans {
                        let relative = (1.0 + bladder_dist.sample(&mut rng)).max(0.05);
                        let mut bony_shift = [0.0; 3];
                        let mut tumor_shift = [0.0; 3];
                        for axis in Axis::ALL {
                            let k = axis.index();
                            let mut shift = config.mean_shift[k]
                                + subject_offset[k]
                                + node_offset[k]
                                + residual_dist.sample(&mut rng);
                            if *phase == Phase::During {
                                shift += config.phase_effect;
                            }
                            if axis == Axis::CranioCaudal {
                                shift += config.bladder_effect * (relative - 1.0);
                            }
                            bony_shift[k] = shift;
                            tumor_shift[k] = shift - tumor_dist.sample(&mut rng);
                        }

                        observations.push(Observation {
                            subject: subject.clone(),
                            node: node.clone(),
                            phase: *phase,
                            location: *location,
                            bony_shift,
                            tumor_shift,
                            bladder_baseline: Some(baseline),
                            bladder_relative: Some(relative),
                        });
                    }
                }
            }
        }
    }

    Ok(SyntheticData {
        table: ObservationTable::from_observations(observations)?,
        config: config.clone(),
    })
}
