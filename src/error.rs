//! Typed failures for the raw table loader and the irradiance fetch.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TableError {
    #[error(
        "could not detect required columns:\n- {}\n\nColumns found in the table:\n- {}",
        .missing.join("\n- "),
        .found.join("\n- ")
    )]
    MissingColumns {
        missing: Vec<String>,
        found: Vec<String>,
    },

    #[error("could not read table with any of the encodings {tried:?}: {last_error}")]
    Undecodable {
        tried: Vec<&'static str>,
        last_error: String,
    },

    #[error("table has no header row")]
    Empty,
}

/// Why a single record could not be given a peak sun hours value.
///
/// The `Display` form of this error is what ends up in `error_hsp`.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("response has no {0} values")]
    MissingParameter(&'static str),

    #[error("insufficient monthly data for annual mean ({found} valid of {required} required)")]
    InsufficientData { found: usize, required: usize },

    #[error("missing coordinates")]
    MissingCoordinates,

    #[error("unexpected failure: {0}")]
    Unexpected(String),
}
