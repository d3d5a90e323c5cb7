mod cli;
mod config;
mod error;
mod event;
mod output;
mod tracer;

use anyhow::{Context, Result};
use clap::Parser;

use cli::Cli;
use output::OutputManager;
use tracer::Tracer;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    cli.validate()?;

    let mut config =
        config::load_config(cli.config.as_deref()).context("failed to load config")?;
    config.merge_cli_args(&cli);
    anyhow::ensure!(config.max_path > 0, "max_path must be at least 1");

    let output_manager = OutputManager::new(cli.output.as_deref(), cli.no_color, cli.verbose)
        .context("failed to open output")?;

    let mut tracer =
        Tracer::new(config.trace_config(), output_manager).context("failed to start tracer")?;
    let root_exit = tracer.run(&cli.command).context("tracer failed")?;

    let code = match root_exit {
        Some(status) if config.propagate_exit_code => status.code(),
        _ => 0,
    };
    std::process::exit(code);
}
