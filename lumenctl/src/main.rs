use std::{process::ExitCode, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use lumen_config::{Config, ConfigLoader, ConfigSource};
use lumenctl::{Cli, Command, commands};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli.command {
        Command::Address { ref url } => {
            commands::print_address(url)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Where { ref url } => {
            let config = load_config(&cli)?;
            commands::print_location(&config, url)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Clear => {
            let config = load_config(&cli)?;
            commands::clear(&config).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Fetch {
            ref urls,
            ref file,
            cancel_after,
        } => {
            let config = load_config(&cli)?;
            let ids = commands::gather_ids(&config, urls, file.as_deref())?;
            let outcomes = commands::fetch(
                &config,
                ids,
                cancel_after.map(Duration::from_millis),
            )
            .await?;
            Ok(if commands::all_loaded(&outcomes) {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut loader = ConfigLoader::new();
    if let Some(path) = &cli.config {
        loader = loader.with_config_path(path);
    }
    let load = loader.load().context("failed to load lumen configuration")?;

    for warning in &load.warnings {
        warn!("{warning}");
    }

    let mut config = load.config;
    if config.metadata.env_file_loaded {
        info!("loaded .env file");
    }
    if let ConfigSource::File(path) | ConfigSource::EnvPath(path) =
        &config.metadata.source
    {
        info!(path = %path.display(), "using config file");
    }
    if let Some(dir) = &cli.cache_dir {
        config.cache.root = dir.clone();
    }
    Ok(config)
}
