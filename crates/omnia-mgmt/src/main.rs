#![warn(missing_docs)]

//! `omnia` entry point.

use anyhow::Result;
use clap::Parser;
use omnia_mgmt::cli::Cli;
use omnia_mgmt::{LogFormat, MgmtConfig};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = MgmtConfig::load_or_default(&cli.config)?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match cli.log_format.unwrap_or(config.log_format) {
        LogFormat::Text => tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(filter)
            .init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(filter)
            .init(),
    }

    if !cli.config.exists() {
        tracing::warn!("Config file not found, using defaults: {}", cli.config.display());
    }

    let mut out = std::io::stdout();
    cli.execute(&config, &mut out).await
}
