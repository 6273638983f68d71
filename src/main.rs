//! Service resilience runner.
//!
//! Loads the service map, brings every dependency up through the
//! orchestrator, prints the startup report, and keeps probing until
//! SIGINT/SIGTERM.
//!
//! # Architecture Overview
//!
//! ```text
//!   config (TOML + <SERVICE>_URL env)
//!        │
//!        ▼
//!   ┌──────────────┐   descriptors   ┌──────────────────┐
//!   │ Orchestrator │ ──────────────▶ │ ServiceRegistry  │◀──────────┐
//!   └──────┬───────┘                 └──────────────────┘           │
//!          │ initialize                     ▲                       │
//!          ▼                                │ record outcome        │ probe
//!   ┌───────────────────────────────┐       │                ┌──────┴───────┐
//!   │ ConnectionManager (pooled)    │───────┤                │ HealthMonitor│
//!   │ EndpointService (ping only)   │  CircuitBreaker        └──────────────┘
//!   │ FallbackStorageRouter (blobs) │
//!   └───────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use service_resilience::adapters::build_clients;
use service_resilience::config::{load_config, ResilienceConfig};
use service_resilience::lifecycle::signals::wait_for_termination;
use service_resilience::lifecycle::{Orchestrator, OverallStatus};
use service_resilience::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "service-resilience")]
#[command(about = "Bring up external dependencies with breakers, pools and fallbacks", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "resilience.toml")]
    config: PathBuf,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,

    /// Expose Prometheus metrics on this address
    #[arg(long)]
    metrics_address: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config_found = cli.config.exists();
    let mut config = if config_found {
        load_config(&cli.config)?
    } else {
        ResilienceConfig::default()
    };
    if let Some(address) = cli.metrics_address {
        config.observability.metrics_enabled = true;
        config.observability.metrics_address = address;
    }

    logging::init_logging(&config.observability);
    if !config_found {
        tracing::warn!(path = %cli.config.display(), "Config file not found, using defaults");
    }

    tracing::info!(
        services = config.services.len(),
        health_interval_secs = config.health_check.interval_secs,
        max_failures = config.breaker.max_failures,
        cooldown_secs = config.breaker.cooldown_secs,
        "Configuration loaded"
    );

    if cli.check {
        println!("configuration OK: {} service(s) declared", config.services.len());
        return Ok(());
    }

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(e) = metrics::init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to start metrics endpoint");
                }
            }
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let mut orchestrator = Orchestrator::from_config(config.clone())?;
    for client in build_clients(orchestrator.registry(), &config)? {
        orchestrator.register(client)?;
    }

    let report = orchestrator.initialize().await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    if report.overall_status == OverallStatus::Error {
        tracing::error!("A required service is unavailable; dependent features will return fallbacks");
    }

    wait_for_termination().await;
    orchestrator.shutdown().await;
    Ok(())
}
