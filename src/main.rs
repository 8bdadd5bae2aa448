use anyhow::{Context, Result};
use clap::Parser;

use alicerce::cmd::LocalHost;
use alicerce::pipeline::{Cli, Command};
use alicerce::{DeployConfig, Pipeline};

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let config = DeployConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let command = cli.command.unwrap_or_default();

    let host = LocalHost;
    Pipeline::new(config, &host).run(&command)?;
    Ok(())
}

fn init_logging(verbose: u8, quiet: bool) {
    let mut builder = env_logger::Builder::new();

    if quiet {
        builder.filter_level(log::LevelFilter::Error);
    } else if verbose > 0 {
        builder.filter_level(match verbose {
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        });
    } else if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    } else {
        builder.filter_level(log::LevelFilter::Info);
    }

    builder.format_timestamp(None).init();
}
