//! Statistical models for node-shift analysis.

pub mod lm;
pub mod lmm;
pub mod optim;
pub mod satterthwaite;

pub use lm::{fit_line, fit_node_lines, NodeLine};
pub use lmm::{
    fit_nested_lmm, fit_spec, model_rows, DfMethod, FitWarning, LmmConfig, NestedLmmFit,
    VarianceComponent, VarianceComponents,
};
pub use optim::{nelder_mead, nelder_mead_with_restart, Minimum, NelderMeadConfig};
