//! Reading and writing the JSON files the two jobs hand to each other.

use std::{
    fs,
    io::{BufWriter, Write},
    path::Path,
};

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::{info, warn};

use crate::records::Dataset;

pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Could not read `{}`", path.display()))?;
    let value = serde_json::from_str(&text)
        .with_context(|| format!("`{}` is not valid JSON of the expected shape", path.display()))?;

    Ok(value)
}

/// Writes pretty-printed JSON through a temporary file in the same directory,
/// then renames it over `path`.
pub fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("Could not create a temporary file in `{}`", dir.display()))?;
    {
        let mut writer = BufWriter::new(tmp.as_file());
        serde_json::to_writer_pretty(&mut writer, value)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path)
        .with_context(|| format!("Could not write `{}`", path.display()))?;

    Ok(())
}

/// Where the enrichment loop's starting state came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Input,
    Snapshot,
}

/// Loads the resumable snapshot when it holds a non-empty object, otherwise
/// the matcher output at `input`.
///
/// A snapshot that exists but does not parse is an error, so it is never
/// overwritten without being looked at.
pub fn load_resumable(input: &Path, snapshot: &Path) -> Result<(Dataset, Origin)> {
    if !input.exists() {
        anyhow::bail!("Input file `{}` not found", input.display());
    }

    if snapshot.exists() {
        let text = fs::read_to_string(snapshot)
            .with_context(|| format!("Could not read snapshot `{}`", snapshot.display()))?;
        let value: Value = serde_json::from_str(&text).with_context(|| {
            format!("Snapshot `{}` is not valid JSON; move it aside to start over", snapshot.display())
        })?;

        match value {
            Value::Object(map) if !map.is_empty() => {
                // Parsed again from text so records keep their file order.
                let dataset = serde_json::from_str(&text).with_context(|| {
                    format!("Snapshot `{}` has malformed records", snapshot.display())
                })?;
                info!(path = %snapshot.display(), "resuming from snapshot");
                return Ok((dataset, Origin::Snapshot));
            }
            _ => warn!(path = %snapshot.display(), "snapshot is empty, starting from input"),
        }
    }

    // Read as enrichment records so a record without usable coordinates is
    // failed on its own instead of rejecting the whole file.
    let dataset: Dataset = load_json(input)?;

    Ok((dataset, Origin::Input))
}

/// Creates the directory an output file will be written to.
pub fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Could not create directory `{}`", parent.display()))?;
    }

    Ok(())
}

// -- Tests -------------------------------------------------------------------
