//! Observation records and the closed categorical sets they are tagged with.

use crate::error::{Result, ShiftError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction of a positional shift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Axis {
    /// Left-right (x).
    LeftRight,
    /// Anterior-posterior (y).
    AnteriorPosterior,
    /// Cranio-caudal (z).
    CranioCaudal,
}

impl Axis {
    /// All axes in x, y, z order.
    pub const ALL: [Axis; 3] = [Axis::LeftRight, Axis::AnteriorPosterior, Axis::CranioCaudal];

    /// Short label used in formulas and table headers.
    pub fn label(&self) -> &'static str {
        match self {
            Axis::LeftRight => "lr",
            Axis::AnteriorPosterior => "ap",
            Axis::CranioCaudal => "cc",
        }
    }

    /// Long descriptive name.
    pub fn name(&self) -> &'static str {
        match self {
            Axis::LeftRight => "left-right",
            Axis::AnteriorPosterior => "anterior-posterior",
            Axis::CranioCaudal => "cranio-caudal",
        }
    }

    pub(crate) fn index(&self) -> usize {
        match self {
            Axis::LeftRight => 0,
            Axis::AnteriorPosterior => 1,
            Axis::CranioCaudal => 2,
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Reference structure the shift is measured against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Reference {
    /// Registration on bony anatomy.
    #[default]
    Bony,
    /// Registration on the tumor.
    Tumor,
}

impl Reference {
    pub fn label(&self) -> &'static str {
        match self {
            Reference::Bony => "bony",
            Reference::Tumor => "tumor",
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Anatomical location stratum of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Location {
    Mesorectal,
    Presacral,
    LateralPelvic,
}

impl Location {
    /// All locations; the first is the default reference level.
    pub const ALL: [Location; 3] = [
        Location::Mesorectal,
        Location::Presacral,
        Location::LateralPelvic,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Location::Mesorectal => "mesorectal",
            Location::Presacral => "presacral",
            Location::LateralPelvic => "lateral",
        }
    }

    /// Parse an input code (case-insensitive).
    pub fn parse_code(code: &str) -> Option<Self> {
        match code.trim().to_ascii_lowercase().as_str() {
            "m" | "meso" | "mesorectal" => Some(Location::Mesorectal),
            "p" | "pre" | "presacral" => Some(Location::Presacral),
            "l" | "lat" | "lateral" | "lateral_pelvic" => Some(Location::LateralPelvic),
            _ => None,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Treatment phase at the time of imaging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Before,
    During,
}

impl Phase {
    pub const ALL: [Phase; 2] = [Phase::Before, Phase::During];

    pub fn label(&self) -> &'static str {
        match self {
            Phase::Before => "before",
            Phase::During => "during",
        }
    }

    /// Parse an input code (case-insensitive).
    pub fn parse_code(code: &str) -> Option<Self> {
        match code.trim().to_ascii_lowercase().as_str() {
            "before" | "pre" | "planning" | "0" => Some(Phase::Before),
            "during" | "tx" | "treatment" | "1" => Some(Phase::During),
            _ => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// One imaged node position, already converted to analysis units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Patient identifier.
    pub subject: String,
    /// Node label with the scan qualifier removed. Only unique within `subject`.
    pub node: String,
    pub phase: Phase,
    pub location: Location,
    /// Shifts relative to bony anatomy in mm, x/y/z.
    pub bony_shift: [f64; 3],
    /// Shifts relative to the tumor in mm, x/y/z.
    pub tumor_shift: [f64; 3],
    /// Baseline bladder volume as a fraction.
    pub bladder_baseline: Option<f64>,
    /// Relative bladder volume as a fraction.
    pub bladder_relative: Option<f64>,
}

impl Observation {
    /// Shift along `axis` relative to `reference`.
    pub fn shift(&self, axis: Axis, reference: Reference) -> f64 {
        match reference {
            Reference::Bony => self.bony_shift[axis.index()],
            Reference::Tumor => self.tumor_shift[axis.index()],
        }
    }

    /// Key identifying the node across the whole cohort.
    pub fn node_key(&self) -> (&str, &str) {
        (&self.subject, &self.node)
    }
}

/// Parse a location code or fail with row context.
pub(crate) fn parse_location(code: &str, row: usize, column: &str) -> Result<Location> {
    Location::parse_code(code).ok_or_else(|| ShiftError::UnknownLevel {
        value: code.to_string(),
        row,
        column: column.to_string(),
    })
}

/// Parse a phase code or fail with row context.
pub(crate) fn parse_phase(code: &str, row: usize, column: &str) -> Result<Phase> {
    Phase::parse_code(code).ok_or_else(|| ShiftError::UnknownLevel {
        value: code.to_string(),
        row,
        column: column.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_codes() {
        assert_eq!(Location::parse_code("M"), Some(Location::Mesorectal));
        assert_eq!(Location::parse_code(" presacral "), Some(Location::Presacral));
        assert_eq!(Location::parse_code("lat"), Some(Location::LateralPelvic));
        assert_eq!(Location::parse_code("inguinal"), None);
    }

    #[test]
    fn test_phase_codes() {
        assert_eq!(Phase::parse_code("Pre"), Some(Phase::Before));
        assert_eq!(Phase::parse_code("1"), Some(Phase::During));
        assert_eq!(Phase::parse_code("after"), None);
    }

    #[test]
    fn test_unknown_level_error_names_row() {
        let err = parse_phase("after", 7, "phase").unwrap_err();
        assert!(err.to_string().contains("row 7"));
    }

    #[test]
    fn test_shift_selection() {
        let obs = Observation {
            subject: "P1".into(),
            node: "N1".into(),
            phase: Phase::Before,
            location: Location::Mesorectal,
            bony_shift: [1.0, 2.0, 3.0],
            tumor_shift: [4.0, 5.0, 6.0],
            bladder_baseline: None,
            bladder_relative: None,
        };
        assert_eq!(obs.shift(Axis::AnteriorPosterior, Reference::Bony), 2.0);
        assert_eq!(obs.shift(Axis::CranioCaudal, Reference::Tumor), 6.0);
    }
}
