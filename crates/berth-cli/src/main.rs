//! # Berth CLI entry point
//!
//! Starts a service host from a TOML configuration file:
//!
//! ```bash
//! # Start with the built-in demo services
//! berth -c berth.toml
//!
//! # Raise verbosity
//! berth -c berth.toml -v
//! ```
//!
//! The process registers every enabled service against the configured Nacos
//! registry, serves them over line-framed JSON-RPC on the configured port,
//! and deregisters them on ctrl-c. Watched config entries are written back
//! to their local files when the registry notifies a change.

mod demo;

use anyhow::{Context, Result};
use argh::FromArgs;
use tracing::{error, info};

use berth_common::HostConfig;
use berth_host::Host;

/// Berth - a Nacos-backed microservice host
#[derive(FromArgs)]
struct Cli {
    /// path to the TOML configuration file
    #[argh(option, short = 'c')]
    config: String,

    /// raise log verbosity to debug
    #[argh(switch, short = 'v')]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let config = HostConfig::load(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config))?;

    // Each watched entry gets a sink that mirrors new content into its
    // local file; the host core itself never assumes a file destination.
    let file_sinks: Vec<(String, String)> = config
        .enabled_configs()
        .map(|(name, spec)| (name.clone(), spec.file.clone()))
        .collect();

    let catalog = demo::builtin_catalog();
    let mut host = Host::new(config, &catalog).context("initializing host")?;
    for (name, file) in file_sinks {
        host.add_config_sink(
            &name,
            Box::new(move |content| {
                if let Err(e) = std::fs::write(&file, content) {
                    error!(file = %file, error = %e, "failed to write config file");
                } else {
                    info!(file = %file, "config file updated");
                }
            }),
        );
    }

    host.start().await.context("starting host")?;

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutdown signal received");
    host.shutdown().await;

    Ok(())
}
