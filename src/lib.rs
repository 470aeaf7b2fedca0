//! Lymph-Node Shift Analysis Library
//!
//! This library decomposes the variability of lymph-node position shifts
//! between imaging sessions into systematic and random components with a
//! nested random-intercept mixed model (subject / node) fit by REML.
//!
//! # Overview
//!
//! The library is organized into modules:
//!
//! - **data**: Observation table, model specifications, design matrices, nesting
//! - **model**: Nested LMM (REML), Satterthwaite df, per-node regression lines
//! - **test**: Wald t-tests for fixed effects
//! - **diagnostics**: Normal QQ points of residuals
//! - **pipeline**: Analysis configuration, model plan and batch fitting
//! - **report**: TSV/Markdown tables and SVG figures
//! - **benchmark**: Synthetic cohorts with known variance components
//!
//! # Example
//!
//! ```no_run
//! use nodeshift::prelude::*;
//!
//! let config = AnalysisConfig::default();
//! let table = ObservationTable::from_path("shifts.csv", &config.input).unwrap();
//!
//! let batch = run_analysis(&table, &config);
//! for row in variance_table(&batch) {
//!     println!("{} {} {}: systematic {:.2} mm, random {:.2} mm",
//!         row.reference, row.axis, row.subset, row.systematic_sd, row.random_sd);
//! }
//! ```

pub mod benchmark;
pub mod data;
pub mod diagnostics;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod report;
pub mod test;

/// Convenient re-exports for common usage.
pub mod prelude {
    pub use crate::benchmark::{generate_synthetic, SyntheticConfig, SyntheticData};
    pub use crate::data::{
        Axis, ColumnMap, Covariate, DesignMatrix, LoadOptions, Location, ModelSpec,
        NestedGrouping, Observation, ObservationTable, Phase, Reference, Subset, Term,
    };
    pub use crate::diagnostics::{qq_points, QqPlot};
    pub use crate::error::{Result, ShiftError};
    pub use crate::model::{
        fit_nested_lmm, fit_node_lines, fit_spec, DfMethod, FitWarning, LmmConfig,
        NestedLmmFit, NodeLine, VarianceComponents,
    };
    pub use crate::pipeline::{
        fit_batch, run_analysis, AnalysisConfig, BatchResult, FitOutcome, ModelPlan,
        ModelReport,
    };
    pub use crate::report::{
        effects_table, notes_table, variance_table, write_report, Palette,
    };
    pub use crate::test::{test_wald, test_wald_all, WaldResult};
}
