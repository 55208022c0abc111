//! Loads the raw administrative-division table.
//!
//! The file's encoding and delimiter are not known in advance, so each
//! candidate encoding is tried until one decodes cleanly and parses as CSV.
//! Only the four columns the matcher needs are kept.

use std::{fs, path::Path};

use anyhow::{Context, Result};
use csv::{ReaderBuilder, StringRecord, Trim};
use encoding_rs::{Encoding, ISO_8859_15, UTF_8, WINDOWS_1252};
use tracing::{debug, info};

use crate::error::TableError;

const DELIMITERS: [u8; 4] = [b',', b';', b'\t', b'|'];
const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

const DEPARTMENT_TOKENS: [&str; 3] = ["departamento", "depto", "department"];
const MUNICIPALITY_TOKENS: [&str; 2] = ["municipio", "municipality"];
const CODE_TOKENS: [&str; 4] = ["cod", "código", "codigo", "id"];
const NAME_TOKENS: [&str; 2] = ["nombre", "name"];

/// One row of the raw table, cells as text.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    pub department: String,
    pub municipality: String,
    pub latitude: String,
    pub longitude: String,
}

/// Positions of the columns the matcher needs.
#[derive(Debug, Clone, PartialEq)]
pub struct Columns {
    pub department: usize,
    pub municipality: usize,
    pub latitude: usize,
    pub longitude: usize,
}

impl Columns {
    pub fn detect(headers: &[String]) -> Result<Self, TableError> {
        let department = pick_name_column(headers, &DEPARTMENT_TOKENS);
        let municipality = pick_name_column(headers, &MUNICIPALITY_TOKENS);
        let latitude = headers
            .iter()
            .position(|h| h.contains("latitud") || h.contains("latitude") || h == "lat");
        let longitude = headers.iter().position(|h| {
            h.contains("longitud") || h.contains("longitude") || h == "lon" || h == "lng"
        });

        match (department, municipality, latitude, longitude) {
            (Some(department), Some(municipality), Some(latitude), Some(longitude)) => Ok(Columns {
                department,
                municipality,
                latitude,
                longitude,
            }),
            _ => {
                let mut missing = vec![];
                if department.is_none() {
                    missing.push("department name (not a code column)".to_string());
                }
                if municipality.is_none() {
                    missing.push("municipality name (not a code column)".to_string());
                }
                if latitude.is_none() {
                    missing.push("latitude".to_string());
                }
                if longitude.is_none() {
                    missing.push("longitude".to_string());
                }

                Err(TableError::MissingColumns {
                    missing,
                    found: headers.to_vec(),
                })
            }
        }
    }

    fn row(&self, record: &StringRecord) -> RawRow {
        let cell = |i: usize| record.get(i).unwrap_or("").to_string();

        RawRow {
            department: cell(self.department),
            municipality: cell(self.municipality),
            latitude: cell(self.latitude),
            longitude: cell(self.longitude),
        }
    }
}

/// Picks the leftmost highest scoring column that mentions one of `tokens`
/// and no code token. Columns that also say "name" score higher.
fn pick_name_column(headers: &[String], tokens: &[&str]) -> Option<usize> {
    let mut best: Option<(i32, usize)> = None;

    for (idx, header) in headers.iter().enumerate() {
        if !tokens.iter().any(|t| header.contains(t)) {
            continue;
        }
        if CODE_TOKENS.iter().any(|t| header.contains(t)) {
            continue;
        }

        let score = if NAME_TOKENS.iter().any(|t| header.contains(t)) {
            10
        } else {
            0
        };

        if best.map_or(true, |(best_score, _)| score > best_score) {
            best = Some((score, idx));
        }
    }

    best.map(|(_, idx)| idx)
}

/// Reads the table at `path`, trying each supported encoding in turn.
pub fn load_table(path: &Path) -> Result<Vec<RawRow>> {
    let bytes =
        fs::read(path).with_context(|| format!("Could not read table `{}`", path.display()))?;

    let rows = decode_table(&bytes)?;
    info!(path = %path.display(), rows = rows.len(), "raw table loaded");

    Ok(rows)
}

/// Decodes and parses raw table bytes.
///
/// Column detection failures are fatal straight away: a different encoding
/// would not produce different header names.
pub fn decode_table(bytes: &[u8]) -> Result<Vec<RawRow>, TableError> {
    let mut tried = vec![];
    let mut last_error = String::from("no encoding attempted");

    for encoding in [UTF_8, WINDOWS_1252, ISO_8859_15] {
        tried.push(encoding.name());

        let Some(text) = decode(bytes, encoding) else {
            last_error = format!("bytes are not valid {}", encoding.name());
            continue;
        };

        match parse_rows(&text) {
            Ok(rows) => {
                debug!(encoding = encoding.name(), "table decoded");
                return Ok(rows);
            }
            Err(ParseFailure::Table(e)) => return Err(e),
            Err(ParseFailure::Csv(e)) => last_error = e.to_string(),
        }
    }

    Err(TableError::Undecodable { tried, last_error })
}

fn decode(bytes: &[u8], encoding: &'static Encoding) -> Option<String> {
    let bytes = if encoding == UTF_8 {
        bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes)
    } else {
        bytes
    };

    encoding
        .decode_without_bom_handling_and_without_replacement(bytes)
        .map(|text| text.into_owned())
}

enum ParseFailure {
    Table(TableError),
    Csv(csv::Error),
}

fn parse_rows(text: &str) -> Result<Vec<RawRow>, ParseFailure> {
    let mut reader = ReaderBuilder::new()
        .delimiter(sniff_delimiter(text))
        .trim(Trim::All)
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(ParseFailure::Csv)?
        .iter()
        .map(|h| h.trim().to_lowercase())
        .collect();

    if headers.iter().all(|h| h.is_empty()) {
        return Err(ParseFailure::Table(TableError::Empty));
    }

    let columns = Columns::detect(&headers).map_err(ParseFailure::Table)?;

    let mut rows = vec![];
    for record in reader.records() {
        let record = record.map_err(ParseFailure::Csv)?;
        rows.push(columns.row(&record));
    }

    Ok(rows)
}

/// The candidate delimiter occurring most often in the header line.
fn sniff_delimiter(text: &str) -> u8 {
    let header = text.lines().next().unwrap_or("");

    DELIMITERS
        .iter()
        .map(|&d| (header.bytes().filter(|&b| b == d).count(), d))
        .filter(|&(count, _)| count > 0)
        .fold(None, |best: Option<(usize, u8)>, candidate| match best {
            Some(b) if b.0 >= candidate.0 => Some(b),
            _ => Some(candidate),
        })
        .map_or(b',', |(_, d)| d)
}

// -- Tests -------------------------------------------------------------------
