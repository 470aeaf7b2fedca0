//! Benchmarking utilities for evaluating the nested variance decomposition.
//!
//! This module generates synthetic cohorts with known variance components.

mod generate;

pub use generate::{generate_synthetic, SyntheticConfig, SyntheticData};
