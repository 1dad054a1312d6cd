//! packdrop command-line uploader.

mod cli;
mod config;
mod run;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!(version = env!("CARGO_PKG_VERSION"), "starting packdrop");

    let Cli {
        config: config_file,
        command,
        ..
    } = cli;

    let mut config = config::Config::load(config_file.as_deref())?;
    config.apply_env(|key| std::env::var(key).ok())?;
    tracing::debug!(?config, "configuration resolved");

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        match command {
            Command::Upload(args) => run::upload(config, args).await,
            Command::Auth(args) => run::auth(&config, config_file.as_deref(), args).await,
            Command::ApiKey(args) => run::api_key(&config, args).await,
        }
    })
}
