//! Analysis configuration, serialized as YAML.

use crate::data::LoadOptions;
use crate::error::{Result, ShiftError};
use crate::model::LmmConfig;
use crate::pipeline::ModelPlan;
use crate::report::Palette;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// What the `run` command writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputOptions {
    /// Write SVG figures.
    pub figures: bool,
    /// Write one QQ plot per fitted model.
    pub qq_plots: bool,
    /// Figure size in pixels.
    pub figure_size: (u32, u32),
    /// Decimal places in TSV and Markdown tables.
    pub precision: usize,
}

impl Default for OutputOptions {
    fn default() -> Self {
        Self {
            figures: true,
            qq_plots: true,
            figure_size: (900, 600),
            precision: 3,
        }
    }
}

/// Everything a batch analysis needs besides the data.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Name shown in report headers.
    pub name: String,
    pub input: LoadOptions,
    pub lmm: LmmConfig,
    pub plan: ModelPlan,
    pub palette: Palette,
    pub output: OutputOptions,
}

impl AnalysisConfig {
    /// Load from YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a YAML file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml(&yaml)
    }

    /// Save to YAML string.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(ShiftError::from)
    }

    /// Check settings that serde cannot.
    pub fn validate(&self) -> Result<()> {
        Regex::new(&self.input.node_qualifier_pattern)?;
        self.palette.validate()?;
        if self.plan.is_empty() {
            return Err(ShiftError::InvalidParameter("Model plan is empty".to_string()));
        }
        if !(self.input.shift_scale.is_finite() && self.input.bladder_scale.is_finite()) {
            return Err(ShiftError::InvalidParameter(
                "Unit scales must be finite".to_string(),
            ));
        }
        if self.lmm.singular_tol.is_nan() || self.lmm.singular_tol < 0.0 {
            return Err(ShiftError::InvalidParameter(
                "singular_tol must be non-negative".to_string(),
            ));
        }
        if self.lmm.optimizer.max_evaluations == 0 {
            return Err(ShiftError::InvalidParameter(
                "max_evaluations must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Reference;
    use crate::model::DfMethod;

    #[test]
    fn test_yaml_roundtrip() {
        let config = AnalysisConfig {
            name: "cohort".to_string(),
            ..Default::default()
        };
        let yaml = config.to_yaml().unwrap();
        let back = AnalysisConfig::from_yaml(&yaml).unwrap();
        assert_eq!(back.name, "cohort");
        assert_eq!(back.plan, ModelPlan::standard(Reference::Bony));
        assert_eq!(back.palette, Palette::default());
        assert_eq!(back.input, LoadOptions::default());
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = "name: small\nlmm:\n  df_method: residual\ninput:\n  shift_scale: 1.0\n";
        let config = AnalysisConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.lmm.df_method, DfMethod::Residual);
        assert_eq!(config.input.shift_scale, 1.0);
        assert_eq!(config.input.bladder_scale, 0.01);
        assert_eq!(config.plan.len(), 63);
    }

    #[test]
    fn test_invalid_regex_rejected() {
        let yaml = "input:\n  node_qualifier_pattern: \"(unclosed\"\n";
        let err = AnalysisConfig::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, ShiftError::Pattern(_)));
    }

    #[test]
    fn test_partial_optimizer_block() {
        let yaml = "lmm:\n  optimizer:\n    max_evaluations: 50\n";
        let config = AnalysisConfig::from_yaml(yaml).unwrap();
        let defaults = crate::model::NelderMeadConfig::default();
        assert_eq!(config.lmm.optimizer.max_evaluations, 50);
        assert_eq!(config.lmm.optimizer.f_tol, defaults.f_tol);
        assert_eq!(config.lmm.optimizer.initial_step, defaults.initial_step);
    }

    #[test]
    fn test_empty_plan_rejected() {
        let yaml = "plan:\n  models: []\n";
        assert!(AnalysisConfig::from_yaml(yaml).is_err());
    }
}
