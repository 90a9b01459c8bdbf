//! `pgo_logrepl` binary: loads a peers/pipelines configuration document,
//! wires up connectors and transformations, and runs the pipeline until
//! shutdown.

use anyhow::{Context, Result};
use clap::Parser;
use pgo_logrepl::config::{AppConfig, EnvDefaults};
use pgo_logrepl::connector::ConnectorRegistry;
use pgo_logrepl::manager::Manager;
use pgo_logrepl::transform::TransformationRegistry;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "pgo_logrepl",
    about = "PostgreSQL logical-replication CDC pipeline",
    version
)]
struct Args {
    /// Path to the peers/pipelines YAML configuration document.
    #[arg(short, long, value_name = "FILE")]
    config: PathBuf,

    /// Emit logs as newline-delimited JSON instead of human-readable text.
    #[arg(long)]
    log_json: bool,

    /// Bind address for the optional `/metrics` Prometheus scrape endpoint
    /// (e.g. `0.0.0.0:9090`). Left unset, no HTTP listener is started.
    #[arg(long, value_name = "ADDR")]
    metrics_addr: Option<SocketAddr>,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(filter).with_target(false);
    if json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    let config = AppConfig::from_file(&args.config)
        .with_context(|| format!("loading configuration from {}", args.config.display()))?;
    let env_defaults = EnvDefaults::from_env();

    info!(
        peers = config.peers.len(),
        pipelines = config.pipelines.len(),
        "configuration loaded"
    );

    let mut manager = Manager::new(ConnectorRegistry::with_builtins(), TransformationRegistry::with_builtins());

    if let Err(e) = manager.run_from_config(&config, &env_defaults).await {
        error!(error = %e, "failed to start pipelines");
        return Err(e.into());
    }

    // The `/metrics` HTTP endpoint is a thin optional step left here rather
    // than in `metrics.rs`: only started when an operator passes
    // `--metrics-addr`, since spec.md §1 treats the scrape endpoint as an
    // external collaborator, not part of the core pipeline.
    if let Some(addr) = args.metrics_addr {
        tokio::spawn(pgo_logrepl::metrics_server::run(addr, manager.metrics()));
    }

    info!("pipelines running, waiting for shutdown signal");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown signal received");

    manager.shutdown().await;
    Ok(())
}
