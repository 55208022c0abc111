//! Command line interface.

pub mod command;

use std::{path::PathBuf, time::Duration};

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

#[derive(Parser)]
#[command(version, about, long_about = None)]
/// Builds the Colombian municipality coordinates and peak sun hours datasets
pub struct Cli {
    /// TOML file overriding the default settings
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Increase log detail (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Match the populated places table against the canonical catalog
    Coords {
        /// Canonical department/municipality catalog
        #[arg(long, default_value = "cities.json")]
        catalog: PathBuf,
        /// DIVIPOLA populated places table
        #[arg(long, default_value = "DIVIPOLA_CentrosPoblados.csv")]
        table: PathBuf,
        #[arg(long, default_value = "colombia_municipios_coords.json")]
        output: PathBuf,
        /// Enable fuzzy matching at this Jaro-Winkler similarity
        #[arg(long)]
        fuzzy: Option<f64>,
    },
    /// Add peak sun hours from NASA POWER, resuming from the progress file
    Hsp {
        #[arg(long, default_value = "colombia_municipios_coords.json")]
        input: PathBuf,
        #[arg(long, default_value = "colombia_municipios_coords_hsp.json")]
        output: PathBuf,
        #[arg(long, default_value = "colombia_municipios_coords_hsp_progress.json")]
        progress: PathBuf,
    },
    /// Summarize an enriched or progress file
    Status {
        file: PathBuf,
        /// List every failed record with its reason
        #[arg(long)]
        failures: bool,
    },
}

/// Creates a spinner.
pub fn create_spinner(message: String) -> ProgressBar {
    let bar = ProgressBar::new_spinner().with_message(message);
    bar.enable_steady_tick(Duration::from_millis(100));

    bar
}

/// Creates a progress bar.
pub fn create_progress_bar(size: u64, message: String) -> ProgressBar {
    let style = ProgressStyle::with_template("[{eta_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-");

    ProgressBar::new(size).with_message(message).with_style(style)
}
