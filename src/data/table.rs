//! Loading and subsetting of the node-shift observation table.

use crate::data::observation::{parse_location, parse_phase};
use crate::data::{Axis, Location, Observation, Reference, Subset};
use crate::error::{Result, ShiftError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::Read;
use std::path::Path;
use tracing::debug;

/// Default pattern for the scan qualifier embedded in node labels,
/// e.g. `LN3_scan2`, `N1 CBCT4`, `N2-fx12`, `N2(3)`. The keyword forms need a
/// separator, so labels such as `Duct2` are kept whole.
pub const DEFAULT_QUALIFIER_PATTERN: &str =
    r"(?i)(\s*\(\s*\d+\s*\)|[\s_-]+(scan|fx|cbct|ct)\s*\d+)$";

/// Input column names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnMap {
    pub subject: String,
    pub node: String,
    pub phase: String,
    pub location: String,
    /// Bony-reference shift columns, x/y/z.
    pub bony: [String; 3],
    /// Tumor-reference shift columns, x/y/z.
    pub tumor: [String; 3],
    pub bladder_baseline: String,
    pub bladder_relative: String,
}

impl Default for ColumnMap {
    fn default() -> Self {
        Self {
            subject: "patient".to_string(),
            node: "node".to_string(),
            phase: "phase".to_string(),
            location: "location".to_string(),
            bony: ["bony_x".into(), "bony_y".into(), "bony_z".into()],
            tumor: ["tumor_x".into(), "tumor_y".into(), "tumor_z".into()],
            bladder_baseline: "bladder_baseline".to_string(),
            bladder_relative: "bladder_relative".to_string(),
        }
    }
}

/// Options controlling how the raw file is read and converted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadOptions {
    pub columns: ColumnMap,
    /// Field delimiter. Inferred from the file extension when unset.
    pub delimiter: Option<char>,
    /// Multiplier applied to all shifts (cm to mm).
    pub shift_scale: f64,
    /// Multiplier applied to bladder volumes (percent to fraction).
    pub bladder_scale: f64,
    /// Regex removed from node labels.
    pub node_qualifier_pattern: String,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            columns: ColumnMap::default(),
            delimiter: None,
            shift_scale: 10.0,
            bladder_scale: 0.01,
            node_qualifier_pattern: DEFAULT_QUALIFIER_PATTERN.to_string(),
        }
    }
}

/// Table of observations with the subject/node nesting validated.
#[derive(Debug, Clone, Default)]
pub struct ObservationTable {
    observations: Vec<Observation>,
}

impl ObservationTable {
    /// Build a table from already converted observations.
    ///
    /// Fails if a node is recorded under more than one location.
    pub fn from_observations(observations: Vec<Observation>) -> Result<Self> {
        let mut locations: HashMap<(&str, &str), Location> = HashMap::new();
        for obs in &observations {
            match locations.get(&obs.node_key()) {
                Some(loc) if *loc != obs.location => {
                    return Err(ShiftError::Nesting(format!(
                        "node '{}' of subject '{}' is recorded as both {} and {}",
                        obs.node, obs.subject, loc, obs.location
                    )));
                }
                Some(_) => {}
                None => {
                    locations.insert(obs.node_key(), obs.location);
                }
            }
        }
        Ok(Self { observations })
    }

    /// Load from a delimited file.
    pub fn from_path<P: AsRef<Path>>(path: P, options: &LoadOptions) -> Result<Self> {
        let path = path.as_ref();
        let delimiter = options.delimiter.unwrap_or_else(|| {
            match path.extension().and_then(|e| e.to_str()) {
                Some("tsv") | Some("txt") => '\t',
                Some("csv2") => ';',
                _ => ',',
            }
        });
        let file = std::fs::File::open(path)?;
        let table = Self::from_reader(file, delimiter, options)?;
        debug!(
            path = %path.display(),
            rows = table.len(),
            "loaded observation table"
        );
        Ok(table)
    }

    /// Load from any reader.
    ///
    /// Expected format: a header row followed by one row per imaged node.
    /// Shifts are scaled by `shift_scale`, bladder volumes by `bladder_scale`
    /// and node labels have the scan qualifier removed.
    pub fn from_reader<R: Read>(reader: R, delimiter: char, options: &LoadOptions) -> Result<Self> {
        if !delimiter.is_ascii() {
            return Err(ShiftError::InvalidParameter(format!(
                "Delimiter must be a single ASCII character, got '{}'",
                delimiter
            )));
        }
        let qualifier = Regex::new(&options.node_qualifier_pattern)?;
        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(delimiter as u8)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = rdr.headers()?.clone();
        let cols = &options.columns;
        let index = |name: &str| -> Result<usize> {
            headers
                .iter()
                .position(|h| h == name)
                .ok_or_else(|| ShiftError::MissingColumn(name.to_string()))
        };

        let subject_idx = index(&cols.subject)?;
        let node_idx = index(&cols.node)?;
        let phase_idx = index(&cols.phase)?;
        let location_idx = index(&cols.location)?;
        let bony_idx = [index(&cols.bony[0])?, index(&cols.bony[1])?, index(&cols.bony[2])?];
        let tumor_idx = [
            index(&cols.tumor[0])?,
            index(&cols.tumor[1])?,
            index(&cols.tumor[2])?,
        ];
        let baseline_idx = index(&cols.bladder_baseline)?;
        let relative_idx = index(&cols.bladder_relative)?;

        let mut observations = Vec::new();
        for (i, record) in rdr.records().enumerate() {
            let record = record?;
            // Row numbers are 1-based and count the header.
            let row = i + 2;
            let field = |idx: usize| record.get(idx).unwrap_or("");

            let subject = field(subject_idx).to_string();
            if subject.is_empty() {
                return Err(ShiftError::InvalidValue {
                    value: subject,
                    row,
                    column: cols.subject.clone(),
                });
            }
            let raw_node = field(node_idx);
            let node = qualifier.replace(raw_node, "").trim().to_string();
            if node.is_empty() {
                return Err(ShiftError::InvalidValue {
                    value: raw_node.to_string(),
                    row,
                    column: cols.node.clone(),
                });
            }

            let phase = parse_phase(field(phase_idx), row, &cols.phase)?;
            let location = parse_location(field(location_idx), row, &cols.location)?;

            let mut bony_shift = [0.0; 3];
            let mut tumor_shift = [0.0; 3];
            for k in 0..3 {
                bony_shift[k] =
                    parse_number(field(bony_idx[k]), row, &cols.bony[k])? * options.shift_scale;
                tumor_shift[k] =
                    parse_number(field(tumor_idx[k]), row, &cols.tumor[k])? * options.shift_scale;
            }

            let bladder_baseline =
                parse_optional(field(baseline_idx), row, &cols.bladder_baseline)?
                    .map(|v| v * options.bladder_scale);
            let bladder_relative =
                parse_optional(field(relative_idx), row, &cols.bladder_relative)?
                    .map(|v| v * options.bladder_scale);

            observations.push(Observation {
                subject,
                node,
                phase,
                location,
                bony_shift,
                tumor_shift,
                bladder_baseline,
                bladder_relative,
            });
        }

        if observations.is_empty() {
            return Err(ShiftError::EmptyData("No observations in input".to_string()));
        }

        Self::from_observations(observations)
    }

    /// Number of observations.
    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn iter(&self) -> impl Iterator<Item = &Observation> {
        self.observations.iter()
    }

    /// Keep only the observations matching a predicate.
    pub fn filter<F>(&self, predicate: F) -> Self
    where
        F: Fn(&Observation) -> bool,
    {
        Self {
            observations: self
                .observations
                .iter()
                .filter(|o| predicate(o))
                .cloned()
                .collect(),
        }
    }

    /// Restrict to a model subset.
    pub fn subset(&self, subset: &Subset) -> Self {
        self.filter(|o| subset.contains(o))
    }

    /// Split into one table per location. Every location is present, possibly empty.
    pub fn stratify_by_location(&self) -> BTreeMap<Location, ObservationTable> {
        Location::ALL
            .iter()
            .map(|&loc| (loc, self.filter(|o| o.location == loc)))
            .collect()
    }

    /// Sorted distinct subject identifiers.
    pub fn subjects(&self) -> Vec<String> {
        self.observations
            .iter()
            .map(|o| o.subject.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Number of distinct subjects.
    pub fn n_subjects(&self) -> usize {
        self.subjects().len()
    }

    /// Number of distinct nodes, counting identical labels under different subjects separately.
    pub fn n_nodes(&self) -> usize {
        self.observations
            .iter()
            .map(|o| o.node_key())
            .collect::<BTreeSet<_>>()
            .len()
    }

    /// Response vector for one axis and reference.
    pub fn response(&self, axis: Axis, reference: Reference) -> Vec<f64> {
        self.observations
            .iter()
            .map(|o| o.shift(axis, reference))
            .collect()
    }

    /// Locations present in the table, in reference order.
    pub fn locations(&self) -> Vec<Location> {
        Location::ALL
            .iter()
            .copied()
            .filter(|l| self.observations.iter().any(|o| o.location == *l))
            .collect()
    }
}

fn parse_number(raw: &str, row: usize, column: &str) -> Result<f64> {
    raw.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| ShiftError::InvalidValue {
            value: raw.to_string(),
            row,
            column: column.to_string(),
        })
}

fn parse_optional(raw: &str, row: usize, column: &str) -> Result<Option<f64>> {
    if raw.is_empty() || raw.eq_ignore_ascii_case("na") || raw.eq_ignore_ascii_case("nan") {
        return Ok(None);
    }
    parse_number(raw, row, column).map(Some)
}
