use std::path::Path;

use anyhow::Result;

use crate::{
    records::{Dataset, HspState},
    store::load_json,
};

#[derive(Debug, Default, PartialEq)]
pub struct Tally {
    pub total: usize,
    pub done: usize,
    pub failed: usize,
    pub pending: usize,
}

pub fn tally(dataset: &Dataset) -> Tally {
    dataset.values().fold(
        Tally {
            total: dataset.len(),
            ..Default::default()
        },
        |mut tally, record| {
            match record.hsp {
                HspState::Done(_) => tally.done += 1,
                HspState::Failed(_) => tally.failed += 1,
                HspState::Pending => tally.pending += 1,
            }
            tally
        },
    )
}

/// Summarizes a coordinates, progress or enriched file.
pub fn status(file: &Path, failures: bool) -> Result<String> {
    let dataset: Dataset = load_json(file)?;
    let Tally {
        total,
        done,
        failed,
        pending,
    } = tally(&dataset);

    let mut out = format!("Total: {total} | Done: {done} | Failed: {failed} | Pending: {pending}");

    if failures {
        for (key, record) in &dataset {
            if let HspState::Failed(reason) = &record.hsp {
                out.push_str(&format!("\n{key}: {reason}"));
            }
        }
    }

    Ok(out)
}
