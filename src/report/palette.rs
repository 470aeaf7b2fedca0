//! Colours used by the figures.

use crate::data::Location;
use crate::error::{Result, ShiftError};
use plotters::style::RGBColor;
use serde::{Deserialize, Serialize};

/// Figure colours as `#rrggbb` strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Palette {
    /// Cycled over subjects in box plots and scatter points.
    pub subjects: Vec<String>,
    /// One colour per location, in mesorectal, presacral, lateral order.
    pub locations: [String; 3],
    /// Reference lines (QQ line, zero line).
    pub reference_line: String,
    /// QQ points.
    pub points: String,
}

impl Default for Palette {
    fn default() -> Self {
        Self {
            subjects: [
                "#1b9e77", "#d95f02", "#7570b3", "#e7298a", "#66a61e", "#e6ab02", "#a6761d",
                "#666666",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            locations: ["#4477aa".into(), "#ee6677".into(), "#228833".into()],
            reference_line: "#bb0000".to_string(),
            points: "#333333".to_string(),
        }
    }
}

impl Palette {
    /// Check that every entry parses and at least one subject colour exists.
    pub fn validate(&self) -> Result<()> {
        if self.subjects.is_empty() {
            return Err(ShiftError::InvalidParameter(
                "Palette needs at least one subject colour".to_string(),
            ));
        }
        self.subjects
            .iter()
            .chain(self.locations.iter())
            .chain([&self.reference_line, &self.points])
            .try_for_each(|c| parse_hex(c).map(|_| ()))
    }

    /// Colour of the `index`-th subject, cycling. Black when no subject
    /// colours are set.
    pub fn subject(&self, index: usize) -> RGBColor {
        self.subjects
            .get(index % self.subjects.len().max(1))
            .and_then(|hex| parse_hex(hex).ok())
            .unwrap_or(RGBColor(0, 0, 0))
    }

    pub fn location(&self, location: Location) -> RGBColor {
        let idx = Location::ALL.iter().position(|l| *l == location).unwrap_or(0);
        parse_hex(&self.locations[idx]).unwrap_or(RGBColor(0, 0, 0))
    }

    pub fn reference_line(&self) -> RGBColor {
        parse_hex(&self.reference_line).unwrap_or(RGBColor(0, 0, 0))
    }

    pub fn points(&self) -> RGBColor {
        parse_hex(&self.points).unwrap_or(RGBColor(0, 0, 0))
    }
}

/// Parse `#rrggbb`.
pub fn parse_hex(hex: &str) -> Result<RGBColor> {
    let invalid = || ShiftError::InvalidParameter(format!("Invalid colour '{}', expected #rrggbb", hex));
    let digits = hex.strip_prefix('#').ok_or_else(invalid)?;
    if digits.len() != 6 || !digits.is_ascii() {
        return Err(invalid());
    }
    let channel = |i: usize| u8::from_str_radix(&digits[i..i + 2], 16).map_err(|_| invalid());
    Ok(RGBColor(channel(0)?, channel(2)?, channel(4)?))
}
