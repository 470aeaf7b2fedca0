//! Typed model specification.
//!
//! A model is described by the response (axis and reference), a list of
//! fixed-effect terms and the subset of observations it is fit on. The random
//! part is always `(1 | subject/node)`.

use crate::data::{Axis, Location, Observation, Reference};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A covariate that can enter the fixed-effects design.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Covariate {
    /// Anatomical location (categorical).
    Location,
    /// Treatment phase (categorical).
    Phase,
    /// Baseline bladder volume (continuous).
    BaselineBladder,
    /// Relative bladder volume (continuous).
    RelativeBladder,
}

impl Covariate {
    /// Variable name used in formulas and coefficient names.
    pub fn name(&self) -> &'static str {
        match self {
            Covariate::Location => "location",
            Covariate::Phase => "phase",
            Covariate::BaselineBladder => "baseline_bladder",
            Covariate::RelativeBladder => "relative_bladder",
        }
    }

    pub fn is_categorical(&self) -> bool {
        matches!(self, Covariate::Location | Covariate::Phase)
    }

    /// Continuous value of this covariate, `None` when missing or categorical.
    pub fn value(&self, obs: &Observation) -> Option<f64> {
        match self {
            Covariate::BaselineBladder => obs.bladder_baseline,
            Covariate::RelativeBladder => obs.bladder_relative,
            Covariate::Location | Covariate::Phase => None,
        }
    }

    /// Categorical level of this covariate, `None` for continuous covariates.
    pub fn level(&self, obs: &Observation) -> Option<&'static str> {
        match self {
            Covariate::Location => Some(obs.location.label()),
            Covariate::Phase => Some(obs.phase.label()),
            _ => None,
        }
    }

    /// All levels in reference order, empty for continuous covariates.
    pub fn levels(&self) -> Vec<&'static str> {
        match self {
            Covariate::Location => Location::ALL.iter().map(|l| l.label()).collect(),
            Covariate::Phase => crate::data::Phase::ALL.iter().map(|p| p.label()).collect(),
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for Covariate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A fixed-effect term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Term {
    /// Main effect of a covariate.
    Main(Covariate),
    /// Interaction between two covariates.
    Interaction(Covariate, Covariate),
}

impl Term {
    /// Covariates involved in this term.
    pub fn covariates(&self) -> Vec<Covariate> {
        match self {
            Term::Main(c) => vec![*c],
            Term::Interaction(a, b) => vec![*a, *b],
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Main(c) => write!(f, "{}", c),
            Term::Interaction(a, b) => write!(f, "{}:{}", a, b),
        }
    }
}

/// Which observations a model is fit on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Subset {
    /// The whole cohort.
    #[default]
    All,
    /// A single location stratum.
    Location(Location),
}

impl Subset {
    /// The whole cohort followed by each location stratum.
    pub fn standard() -> Vec<Subset> {
        std::iter::once(Subset::All)
            .chain(Location::ALL.iter().map(|&l| Subset::Location(l)))
            .collect()
    }

    pub fn contains(&self, obs: &Observation) -> bool {
        match self {
            Subset::All => true,
            Subset::Location(l) => obs.location == *l,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Subset::All => "all",
            Subset::Location(l) => l.label(),
        }
    }
}

impl fmt::Display for Subset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Complete specification of one nested mixed model.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelSpec {
    pub axis: Axis,
    #[serde(default)]
    pub reference: Reference,
    /// Fixed-effect terms; empty means intercept only.
    #[serde(default)]
    pub terms: Vec<Term>,
    #[serde(default)]
    pub subset: Subset,
}

impl ModelSpec {
    /// Intercept-only model on the bony reference.
    pub fn intercept_only(axis: Axis, subset: Subset) -> Self {
        Self {
            axis,
            reference: Reference::Bony,
            terms: Vec::new(),
            subset,
        }
    }

    /// Add a main-effect term.
    pub fn with_main(mut self, covariate: Covariate) -> Self {
        self.terms.push(Term::Main(covariate));
        self
    }

    /// Add an interaction term.
    pub fn with_interaction(mut self, a: Covariate, b: Covariate) -> Self {
        self.terms.push(Term::Interaction(a, b));
        self
    }

    /// Use the tumor reference instead of bony anatomy.
    pub fn with_reference(mut self, reference: Reference) -> Self {
        self.reference = reference;
        self
    }

    pub fn is_intercept_only(&self) -> bool {
        self.terms.is_empty()
    }

    /// Distinct covariates used by any term.
    pub fn covariates(&self) -> Vec<Covariate> {
        let mut covs: Vec<Covariate> = self.terms.iter().flat_map(|t| t.covariates()).collect();
        covs.sort();
        covs.dedup();
        covs
    }

    pub fn uses(&self, covariate: Covariate) -> bool {
        self.terms.iter().any(|t| t.covariates().contains(&covariate))
    }

    /// R-style right-hand side, e.g. `phase + relative_bladder`.
    pub fn fixed_label(&self) -> String {
        if self.terms.is_empty() {
            "1".to_string()
        } else {
            self.terms
                .iter()
                .map(|t| t.to_string())
                .collect::<Vec<_>>()
                .join(" + ")
        }
    }

    /// Stable key for maps and file names, e.g. `bony_lr_all_phase`.
    pub fn key(&self) -> String {
        let fixed = if self.terms.is_empty() {
            "null".to_string()
        } else {
            self.terms
                .iter()
                .map(|t| t.to_string().replace(':', "_x_"))
                .collect::<Vec<_>>()
                .join("+")
        };
        format!(
            "{}_{}_{}_{}",
            self.reference.label(),
            self.axis.label(),
            self.subset.label(),
            fixed
        )
    }
}

impl fmt::Display for ModelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{} ~ {} + (1 | subject/node) [{}]",
            self.reference.label(),
            self.axis.label(),
            self.fixed_label(),
            self.subset
        )
    }
}
