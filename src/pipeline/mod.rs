//! Batch analysis: configuration, model plan and parallel fitting.

mod config;
mod plan;
mod runner;

pub use config::{AnalysisConfig, OutputOptions};
pub use plan::ModelPlan;
pub use runner::{
    fit_batch, fit_one, run_analysis, BatchEntry, BatchResult, FitOutcome, ModelReport,
};
