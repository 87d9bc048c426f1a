mod args;
mod commands;
mod config;

use anyhow::Result;
use args::{Cli, Commands};
use clap::Parser;
use config::Config;
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.global.verbose);

    match cli.command {
        Commands::Stat(args) => commands::stat::run(args),
        Commands::Prefetch(args) => {
            let config = Config::from_args(&cli.global)?;
            commands::prefetch::run(&config, args).await
        }
        Commands::Cat(args) => {
            let config = Config::from_args(&cli.global)?;
            commands::cat::run(&config, args).await
        }
    }
}
