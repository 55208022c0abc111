mod catalog;
mod cli;
mod config;
mod enrich;
mod error;
mod logging;
mod matcher;
mod power;
mod records;
mod retry;
mod store;
mod table;
mod text;

use std::process;

use anyhow::Result;
use clap::Parser;
use cli::{command, Cli, Commands};
use config::Settings;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose);

    match run(cli).await {
        Ok(message) => println!("{}", message),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> Result<String> {
    let settings = Settings::load(cli.config.as_deref())?;

    match &cli.command {
        Commands::Coords {
            catalog,
            table,
            output,
            fuzzy,
        } => command::coords(
            catalog,
            table,
            output,
            fuzzy.or(settings.matcher.fuzzy_threshold),
        ),
        Commands::Hsp {
            input,
            output,
            progress,
        } => command::hsp(input, output, progress, &settings).await,
        Commands::Status { file, failures } => command::status(file, *failures),
    }
}
