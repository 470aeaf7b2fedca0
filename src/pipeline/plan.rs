//! The list of model specifications a batch run fits.

use crate::data::{Axis, Covariate, ModelSpec, Reference, Subset};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Ordered, duplicate-free list of models.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "PlanEntries")]
pub struct ModelPlan {
    models: Vec<ModelSpec>,
}

/// Serialized form of a plan, de-duplicated on load.
#[derive(Deserialize)]
struct PlanEntries {
    models: Vec<ModelSpec>,
}

impl From<PlanEntries> for ModelPlan {
    fn from(entries: PlanEntries) -> Self {
        Self::new(entries.models)
    }
}

impl ModelPlan {
    /// Create a plan, dropping repeated specifications (first one wins).
    pub fn new(models: Vec<ModelSpec>) -> Self {
        let mut seen = HashSet::new();
        let models = models
            .into_iter()
            .filter(|m| seen.insert(m.key()))
            .collect();
        Self { models }
    }

    /// Intercept-only decompositions for every axis and subset.
    pub fn variance_only(reference: Reference) -> Self {
        let models = Axis::ALL
            .iter()
            .flat_map(|&axis| {
                Subset::standard()
                    .into_iter()
                    .map(move |subset| ModelSpec::intercept_only(axis, subset).with_reference(reference))
            })
            .collect();
        Self::new(models)
    }

    /// The full analysis:
    /// - intercept-only for every axis and subset,
    /// - `location` for every axis on the whole cohort,
    /// - each of `phase`, `baseline_bladder`, `relative_bladder` for every axis and subset,
    /// - `location + phase + relative_bladder + phase:relative_bladder` for every
    ///   axis and subset, without `location` inside a location stratum.
    pub fn standard(reference: Reference) -> Self {
        let mut models = Self::variance_only(reference).models;

        for &axis in &Axis::ALL {
            models.push(
                ModelSpec::intercept_only(axis, Subset::All)
                    .with_reference(reference)
                    .with_main(Covariate::Location),
            );
        }

        for covariate in [Covariate::Phase, Covariate::BaselineBladder, Covariate::RelativeBladder] {
            for &axis in &Axis::ALL {
                for subset in Subset::standard() {
                    models.push(
                        ModelSpec::intercept_only(axis, subset)
                            .with_reference(reference)
                            .with_main(covariate),
                    );
                }
            }
        }

        for &axis in &Axis::ALL {
            for subset in Subset::standard() {
                let mut spec = ModelSpec::intercept_only(axis, subset).with_reference(reference);
                if subset == Subset::All {
                    spec = spec.with_main(Covariate::Location);
                }
                models.push(
                    spec.with_main(Covariate::Phase)
                        .with_main(Covariate::RelativeBladder)
                        .with_interaction(Covariate::Phase, Covariate::RelativeBladder),
                );
            }
        }

        Self::new(models)
    }

    pub fn models(&self) -> &[ModelSpec] {
        &self.models
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModelSpec> {
        self.models.iter()
    }
}

impl Default for ModelPlan {
    fn default() -> Self {
        Self::standard(Reference::Bony)
    }
}
