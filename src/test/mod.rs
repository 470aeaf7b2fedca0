//! Hypothesis tests for fixed effects.


pub use wald::{test_wald, test_wald_all, two_sided_p, WaldResult};
