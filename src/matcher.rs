//! Reconciles raw table rows against the canonical catalog.

use std::collections::HashMap;

use tracing::debug;

use crate::{
    catalog::{CatalogIndex, MatchTier, NameIndex, Resolved},
    records::{CoordMap, CoordRecord},
    table::RawRow,
    text::{normalize_key, simplify_name, title_case},
};

/// A raw row whose coordinates parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub department: String,
    pub municipality: String,
    pub lat: f64,
    pub lon: f64,
}

impl RawRecord {
    pub fn parse(row: &RawRow) -> Option<Self> {
        Some(RawRecord {
            department: row.department.clone(),
            municipality: row.municipality.clone(),
            lat: parse_coordinate(&row.latitude)?,
            lon: parse_coordinate(&row.longitude)?,
        })
    }
}

/// Parses a coordinate cell, accepting a comma as decimal separator.
pub fn parse_coordinate(cell: &str) -> Option<f64> {
    cell.trim()
        .replace(',', ".")
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

/// How one name was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resolution {
    Catalog(MatchTier),
    Fallback,
}

/// Counts of how every input row was classified.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct MatchReport {
    pub rows: usize,
    pub bad_coordinates: usize,
    pub dropped_blank_names: usize,
    pub duplicates: usize,
    pub departments: HashMap<Resolution, usize>,
    pub municipalities: HashMap<Resolution, usize>,
}

impl MatchReport {
    pub fn kept(&self) -> usize {
        self.rows - self.bad_coordinates - self.dropped_blank_names - self.duplicates
    }

    pub fn fallbacks(&self) -> (usize, usize) {
        let count = |m: &HashMap<Resolution, usize>| *m.get(&Resolution::Fallback).unwrap_or(&0);

        (count(&self.departments), count(&self.municipalities))
    }
}

pub struct Matcher<'a> {
    index: &'a CatalogIndex,
    fuzzy_threshold: Option<f64>,
}

impl<'a> Matcher<'a> {
    pub fn new(index: &'a CatalogIndex) -> Self {
        Matcher {
            index,
            fuzzy_threshold: None,
        }
    }

    pub fn with_fuzzy_threshold(mut self, threshold: Option<f64>) -> Self {
        self.fuzzy_threshold = threshold;
        self
    }

    /// Resolves a department name, returning the display name, the key used
    /// for the municipality lookup, and how it was resolved.
    pub fn department(&self, raw: &str) -> (String, String, Resolution) {
        let simplified = simplify_name(raw);
        let hit = self.lookup(&self.index.departments, [raw, &simplified]);

        match hit {
            Some(hit) => (
                hit.display.to_string(),
                hit.key.to_string(),
                Resolution::Catalog(hit.tier),
            ),
            None => {
                let display = title_case(&simplified);
                let key = normalize_key(&display);
                (display, key, Resolution::Fallback)
            }
        }
    }

    /// Resolves a municipality name within the bucket of `dept_key`.
    pub fn municipality(&self, dept_key: &str, raw: &str) -> (String, Resolution) {
        let simplified = simplify_name(raw);

        let hit = self
            .index
            .municipalities_of(dept_key)
            .and_then(|bucket| self.lookup(bucket, [&simplified, raw]));

        match hit {
            Some(hit) => (hit.display.to_string(), Resolution::Catalog(hit.tier)),
            None => (title_case(&simplified), Resolution::Fallback),
        }
    }

    /// Exact then folded lookup of each candidate in order, then the fuzzy
    /// tier on the first candidate.
    fn lookup<'i>(&self, index: &'i NameIndex, candidates: [&str; 2]) -> Option<Resolved<'i>> {
        candidates
            .iter()
            .find_map(|c| index.resolve(c, None))
            .or_else(|| {
                self.fuzzy_threshold
                    .and_then(|t| index.resolve_fuzzy(candidates[0], t))
            })
    }

    /// Matches every row, keeping the first record seen for each key.
    pub fn run(&self, rows: &[RawRow]) -> (CoordMap, MatchReport) {
        let mut out = CoordMap::new();
        let mut report = MatchReport {
            rows: rows.len(),
            ..Default::default()
        };

        for row in rows {
            let Some(record) = RawRecord::parse(row) else {
                report.bad_coordinates += 1;
                continue;
            };

            if record.department.trim().is_empty() || record.municipality.trim().is_empty() {
                debug!(
                    department = %record.department,
                    municipality = %record.municipality,
                    "row dropped for blank name"
                );
                report.dropped_blank_names += 1;
                continue;
            }

            let (departamento, dept_key, dept_resolution) = self.department(&record.department);
            let (municipio, muni_resolution) = self.municipality(&dept_key, &record.municipality);

            *report.departments.entry(dept_resolution).or_default() += 1;
            *report.municipalities.entry(muni_resolution).or_default() += 1;

            if muni_resolution == Resolution::Fallback {
                debug!(
                    department = %departamento,
                    municipality = %record.municipality,
                    "municipality not in catalog"
                );
            }

            let coord = CoordRecord {
                departamento,
                municipio,
                lat: record.lat,
                lon: record.lon,
            };

            let key = coord.key();
            if out.contains_key(&key) {
                report.duplicates += 1;
                continue;
            }
            out.insert(key, coord);
        }

        (out, report)
    }
}

// -- Tests -------------------------------------------------------------------
