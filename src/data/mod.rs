//! Data structures for node-shift analysis.

mod design_matrix;
mod formula;
mod observation;
mod random_effects;
mod table;

pub use design_matrix::DesignMatrix;
pub use formula::{Covariate, ModelSpec, Subset, Term};
pub use observation::{Axis, Location, Observation, Phase, Reference};
pub use random_effects::NestedGrouping;
pub use table::{ColumnMap, LoadOptions, ObservationTable, DEFAULT_QUALIFIER_PATTERN};
