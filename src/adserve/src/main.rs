//! AdServe — targeted ad serving for retail banking channels.
//!
//! Main entry point: loads and validates configuration, wires the adapters,
//! and starts the HTTP and metrics servers.

use adserve_api::{ApiServer, AppState};
use adserve_catalog::MemoryCatalog;
use adserve_core::clock::SystemClock;
use adserve_core::config::AppConfig;
use adserve_kv::{KvStore, RedisKv};
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "adserve")]
#[command(about = "Targeted ad serving for retail banking channels")]
#[command(version)]
struct Cli {
    /// HTTP port (overrides config)
    #[arg(long, env = "ADSERVE__API__HTTP_PORT")]
    http_port: Option<u16>,

    /// Metrics port (overrides config)
    #[arg(long, env = "ADSERVE__METRICS__PORT")]
    metrics_port: Option<u16>,

    /// Seed a handful of demo ads into the in-memory catalog
    #[arg(long, default_value_t = false)]
    seed_demo: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "adserve=info,tower_http=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("AdServe starting up");

    let mut config = AppConfig::load().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    if let Some(port) = cli.http_port {
        config.api.http_port = port;
    }
    if let Some(port) = cli.metrics_port {
        config.metrics.port = port;
    }

    // Invalid scoring or segmentation configuration must never serve.
    config.validate()?;

    info!(
        http_port = config.api.http_port,
        metrics_port = config.metrics.port,
        "Configuration loaded"
    );

    // The KV adapter starts even when Redis is unreachable; caching,
    // profiles, and rate limiting all degrade per policy until it recovers.
    let kv: Arc<dyn KvStore> = Arc::new(RedisKv::connect(&config.redis).await?);

    let catalog = Arc::new(MemoryCatalog::new());
    if cli.seed_demo {
        catalog.seed_demo();
    }

    let state = AppState::new(&config, kv.clone(), catalog, Arc::new(SystemClock));
    let api_server = ApiServer::new(config.clone(), state);

    if let Err(e) = api_server.start_metrics() {
        error!(error = %e, "Failed to start metrics exporter");
    }

    // Keep the availability flag fresh even when no traffic is flowing.
    let kv_for_probe = kv.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(30));
        loop {
            interval.tick().await;
            kv_for_probe.probe().await;
        }
    });

    info!("AdServe is ready to serve traffic");

    api_server.start_http().await?;

    Ok(())
}
