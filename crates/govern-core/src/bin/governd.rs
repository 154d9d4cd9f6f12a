//! governd - governance configuration checker
//!
//! Loads a configuration file, validates it, and prints the effective
//! settings with every default filled in. Exits non-zero when the file cannot
//! be read, parsed or validated, so deploy pipelines can gate on it.
//!
//! # Usage
//!
//! ```bash
//! governd --config /etc/governd/governd.toml
//! GOVERND_CONFIG=governd.toml governd --quiet
//! ```

use anyhow::Context;
use clap::Parser;
use govern_core::GovernanceConfig;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "governd")]
#[command(version)]
#[command(about = "Validate request-governance configuration", long_about = None)]
struct Cli {
    /// Configuration file (TOML); defaults are checked when omitted
    #[arg(long, short, env = "GOVERND_CONFIG")]
    config: Option<PathBuf>,

    /// Validate only, do not print the effective configuration
    #[arg(long, short)]
    quiet: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!("governd v{}", env!("CARGO_PKG_VERSION"));

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => GovernanceConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => {
            tracing::warn!("No config file given, checking defaults");
            GovernanceConfig::default()
        }
    };

    tracing::info!(
        idempotency_timeout_secs = config.idempotency.timeout_secs,
        usage_cache_ttl_secs = config.quota.usage_cache_ttl_secs,
        isolation = ?config.transaction.isolation,
        retention_interval_secs = config.retention.interval_secs,
        "Configuration valid"
    );

    if !cli.quiet {
        print!("{}", config.to_toml_string().context("rendering configuration")?);
    }

    Ok(())
}
