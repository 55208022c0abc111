use std::path::Path;

use anyhow::Result;
use rand::{rngs::StdRng, SeedableRng};
use tracing::info;

use crate::{
    cli::create_progress_bar,
    config::Settings,
    enrich::{Enricher, ProgressFiles, Summary},
    power::{IrradianceSource, PowerClient},
    retry::{Sleeper, TokioSleeper},
    store::{ensure_parent_dir, load_resumable, Origin},
};

/// Adds peak sun hours to every record of `input`, resuming from `progress`.
pub async fn hsp(input: &Path, output: &Path, progress: &Path, settings: &Settings) -> Result<String> {
    let client = PowerClient::new(&settings.api)?;
    let summary = enrich_files(&client, &TokioSleeper, input, output, progress, settings).await?;

    Ok(format!("{summary}\nFile saved to `{}`", output.display()))
}

async fn enrich_files<S, Z>(
    source: &S,
    sleeper: &Z,
    input: &Path,
    output: &Path,
    progress: &Path,
    settings: &Settings,
) -> Result<Summary>
where
    S: IrradianceSource + ?Sized,
    Z: Sleeper + ?Sized,
{
    let (mut dataset, origin) = load_resumable(input, progress)?;
    if origin == Origin::Snapshot {
        let done = dataset.values().filter(|r| r.is_done()).count();
        info!(done, total = dataset.len(), "continuing previous run");
    }

    ensure_parent_dir(output)?;
    ensure_parent_dir(progress)?;

    let mut files = ProgressFiles {
        snapshot: progress.to_path_buf(),
        output: output.to_path_buf(),
    };
    let bar = create_progress_bar(dataset.len() as u64, "Fetching peak sun hours...".to_string());

    Enricher::new(source, sleeper, StdRng::from_entropy(), &settings.enrich)
        .with_progress(bar)
        .run(&mut dataset, &mut files)
        .await
}
