//! Arbor CLI Binary
//!
//! Command-line interface for the Arbor resource catalog.

use anyhow::Context;
use arbor::logging::init_logging;
use arbor::tooling::cli::{load_config, Cli, CliContext};
use clap::Parser;
use std::process;

fn run(cli: &Cli) -> anyhow::Result<String> {
    let config = load_config(&cli.workspace, cli.config.as_deref())
        .context("Error loading configuration")?;

    let mut logging = config.logging.clone();
    cli.apply_log_overrides(&mut logging);
    init_logging(Some(&logging)).context("Error initializing logging")?;

    let context = CliContext::from_config(cli.workspace.clone(), config)
        .context("Error initializing workspace")?;
    Ok(context.execute(&cli.command)?)
}

fn main() {
    let cli = Cli::parse();

    match run(&cli) {
        Ok(output) => {
            println!("{}", output);
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            process::exit(1);
        }
    }
}
