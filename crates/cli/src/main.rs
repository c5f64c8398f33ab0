mod cli;
mod commands;
mod config;
mod logging;

use anyhow::Context;
use clap::Parser;
use tracing::warn;

use cli::{Cli, Commands};
use commands::{migrate, new, status};
use config::CliConfig;
use stepwise_core::Mode;

async fn dispatch(command: Commands, config: &CliConfig) -> anyhow::Result<()> {
    match command {
        Commands::Up { num } => {
            migrate::run(config, migrate::up_mode(num)).await?;
        }
        Commands::Down { num, all } => {
            migrate::run(config, migrate::down_mode(num, all)).await?;
        }
        Commands::Redo => {
            migrate::run(config, Mode::Redo).await?;
        }
        Commands::Drop => {
            migrate::run(config, Mode::Drop).await?;
        }
        Commands::Status => {
            status::run(config).await?;
        }
        Commands::New { name } => {
            new::create(&config.dir, &name)?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = CliConfig::load(&cli.global).context("Invalid configuration")?;
    logging::init_logging(&config.logging())
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    // dropping the run future cancels the in-flight database call
    tokio::select! {
        result = dispatch(cli.command, &config) => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, migration run cancelled");
            anyhow::bail!("interrupted")
        }
    }
}
