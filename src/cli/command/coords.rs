use std::{collections::HashMap, path::Path};

use anyhow::Result;
use tracing::info;

use crate::{
    catalog::{CanonicalCatalog, MatchTier},
    cli::create_spinner,
    config::validate_threshold,
    matcher::{MatchReport, Matcher, Resolution},
    store::{ensure_parent_dir, save_json},
    table::load_table,
};

/// Builds the coordinates file from the catalog and the raw table.
pub fn coords(catalog: &Path, table: &Path, output: &Path, fuzzy: Option<f64>) -> Result<String> {
    validate_threshold(fuzzy)?;

    let bar = create_spinner("Loading catalog...".to_string());
    let index = CanonicalCatalog::from_path(catalog)?.index();
    bar.set_message("Reading populated places table...");
    let rows = load_table(table)?;
    bar.finish_with_message(format!("{} rows read", rows.len()));

    let (records, report) = Matcher::new(&index).with_fuzzy_threshold(fuzzy).run(&rows);
    let (dept_fallbacks, muni_fallbacks) = report.fallbacks();
    info!(
        kept = records.len(),
        dept_fallbacks, muni_fallbacks, "matching finished"
    );

    ensure_parent_dir(output)?;
    save_json(output, &records)?;

    Ok(format!(
        "{}\nFile saved to `{}`",
        describe(&report),
        output.display()
    ))
}

fn describe(report: &MatchReport) -> String {
    format!(
        "Rows: {} | Kept: {} | Bad coordinates: {} | Dropped for blank department or municipality: {} | Duplicates: {}\n{}\n{}",
        report.rows,
        report.kept(),
        report.bad_coordinates,
        report.dropped_blank_names,
        report.duplicates,
        describe_tiers("Departments", &report.departments),
        describe_tiers("Municipalities", &report.municipalities),
    )
}

fn describe_tiers(label: &str, counts: &HashMap<Resolution, usize>) -> String {
    let count = |r: Resolution| counts.get(&r).copied().unwrap_or(0);

    format!(
        "{label}: exact {} | accent-insensitive {} | fuzzy {} | not in catalog {}",
        count(Resolution::Catalog(MatchTier::Exact)),
        count(Resolution::Catalog(MatchTier::Folded)),
        count(Resolution::Catalog(MatchTier::Fuzzy)),
        count(Resolution::Fallback),
    )
}
