//! Observer Core server binary.
//!
//! A `clap::Parser` CLI, `tracing_subscriber` initialized from
//! verbosity/env, then handing off to the async runtime.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use observer_core::api::HttpApiConfig;
use observer_core::config::ObserverConfig;
use observer_core::Observer;

#[derive(Parser)]
#[command(name = "observer-core")]
#[command(about = "Standalone ingest, redaction, and control surface for an agent orchestration runtime")]
#[command(version)]
struct Cli {
    /// Path to a YAML configuration file. Defaults are used if omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory for event/CoT logs and the metrics snapshot. Overrides the
    /// config file's `dataDir` when set.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Address to bind the HTTP API to.
    #[arg(long, default_value = "127.0.0.1")]
    bind_address: String,

    /// Port to bind the HTTP API to.
    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// Bearer token required on every request. Overrides `OBSERVER_AUTH_TOKEN`
    /// and any `authToken` set in the config file.
    #[arg(long)]
    auth_token: Option<String>,

    /// Verbose (debug-level) logging.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .init();

    let mut config = match &cli.config {
        Some(path) => ObserverConfig::load_from_file(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => ObserverConfig::default(),
    };

    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }
    if let Some(token) = cli.auth_token {
        config.auth_token = Some(token);
    }
    config.validate().context("invalid configuration")?;

    let http_config = HttpApiConfig {
        bind_address: cli.bind_address,
        port: cli.port,
        ..HttpApiConfig::default()
    };

    info!(
        data_dir = %config.data_dir.display(),
        bind = %http_config.bind_address,
        port = http_config.port,
        "starting observer core"
    );

    let observer = Observer::new(config, http_config, None).context("failed to initialize observer core")?;

    observer.run_until(shutdown_signal()).await.context("HTTP server error")?;

    info!("shutdown signal received, draining persistence");
    observer.shutdown().await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
