//! Model diagnostics.

pub mod qq;

pub use qq::{qq_points, QqLine, QqPlot};
