//! Municipality records as they are written to and read from disk.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Matcher output, keyed by `"Department|Municipality"`.
pub type CoordMap = IndexMap<String, CoordRecord>;

/// Enrichment state, keyed like [`CoordMap`].
pub type Dataset = IndexMap<String, EnrichedRecord>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordRecord {
    pub departamento: String,
    pub municipio: String,
    pub lat: f64,
    pub lon: f64,
}

impl CoordRecord {
    pub fn key(&self) -> String {
        format!("{}|{}", self.departamento, self.municipio)
    }
}

/// Where a record stands with respect to its peak sun hours value.
#[derive(Debug, Clone, PartialEq)]
pub enum HspState {
    Pending,
    Done(f64),
    Failed(String),
}

/// A coordinate record plus its irradiance state.
///
/// Coordinates are kept as raw JSON so a resumed snapshot is written back
/// exactly as it was read, even when a coordinate is not a number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "EntryRepr", into = "EntryRepr")]
pub struct EnrichedRecord {
    pub departamento: String,
    pub municipio: String,
    pub lat: Option<Value>,
    pub lon: Option<Value>,
    pub hsp: HspState,
    pub extra: Map<String, Value>,
}

impl EnrichedRecord {
    /// Both coordinates, when both are JSON numbers.
    pub fn coords(&self) -> Option<(f64, f64)> {
        let lat = self.lat.as_ref()?.as_f64()?;
        let lon = self.lon.as_ref()?.as_f64()?;

        Some((lat, lon))
    }

    pub fn is_done(&self) -> bool {
        matches!(self.hsp, HspState::Done(_))
    }
}

impl From<CoordRecord> for EnrichedRecord {
    fn from(record: CoordRecord) -> Self {
        EnrichedRecord {
            departamento: record.departamento,
            municipio: record.municipio,
            lat: Some(Value::from(record.lat)),
            lon: Some(Value::from(record.lon)),
            hsp: HspState::Pending,
            extra: Map::new(),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct EntryRepr {
    #[serde(default)]
    departamento: String,
    #[serde(default)]
    municipio: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    lat: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    lon: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    hsp: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error_hsp: Option<String>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl From<EntryRepr> for EnrichedRecord {
    fn from(repr: EntryRepr) -> Self {
        let hsp = match (repr.hsp.as_ref().and_then(Value::as_f64), repr.error_hsp) {
            (Some(value), _) => HspState::Done(value),
            (None, Some(reason)) => HspState::Failed(reason),
            (None, None) => HspState::Pending,
        };

        EnrichedRecord {
            departamento: repr.departamento,
            municipio: repr.municipio,
            lat: repr.lat,
            lon: repr.lon,
            hsp,
            extra: repr.extra,
        }
    }
}

impl From<EnrichedRecord> for EntryRepr {
    fn from(record: EnrichedRecord) -> Self {
        let (hsp, error_hsp) = match record.hsp {
            HspState::Pending => (None, None),
            HspState::Done(value) => (Some(Value::from(value)), None),
            HspState::Failed(reason) => (Some(Value::Null), Some(reason)),
        };

        EntryRepr {
            departamento: record.departamento,
            municipio: record.municipio,
            lat: record.lat,
            lon: record.lon,
            hsp,
            error_hsp,
            extra: record.extra,
        }
    }
}

// -- Tests -------------------------------------------------------------------
