//! articles2kindle CLI entry point

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod args;
mod commands;
mod config;

use args::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging: RUST_LOG, then --log-level, then the config file
    let log_level = match cli.log_level.clone() {
        Some(level) => level,
        None => config::AppConfig::load(cli.config.as_deref())
            .map(|c| c.general.log_level)
            .unwrap_or_else(|_| "info".to_string()),
    };
    init_logging(&log_level)?;

    // Execute command
    match cli.command {
        Commands::Fetch(args) => commands::fetch::execute(args, cli.config).await,
        Commands::List(args) => commands::list::execute(args, cli.config).await,
        Commands::Bundle(args) => commands::bundle::execute(args, cli.config).await,
        Commands::Send(args) => commands::send::execute(args, cli.config).await,
        Commands::Run(args) => commands::run::execute(args, cli.config).await,
        Commands::Collections(args) => commands::collections::execute(args, cli.config).await,
        Commands::Doctor(args) => commands::doctor::execute(args, cli.config).await,
        Commands::ResetBundled(args) => commands::reset::execute(args, cli.config).await,
        Commands::Config(args) => commands::config::execute(args, cli.config).await,
    }
}

fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(filter)
        .init();

    Ok(())
}
