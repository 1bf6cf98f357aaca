// Beacon bootstrap: registry, liveness monitor and job router daemon.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use beacon_bootstrap::{config, serve, AppState};

#[derive(Parser)]
#[command(name = "beacon-bootstrap", version, about = "Beacon bootstrap node")]
struct Cli {
    /// Config file (default: ~/.config/beacon/bootstrap.toml, /etc/beacon/bootstrap.toml)
    #[arg(long, env = "BEACON_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address, overrides the config file
    #[arg(long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let mut cfg = config::load(cli.config.as_deref())?;
    if let Some(listen) = cli.listen {
        cfg.listen_addr = listen;
    }
    tracing::info!(
        network_id = %cfg.network_id,
        listen = %cfg.listen_addr,
        heartbeat_interval_secs = cfg.heartbeat_interval_secs,
        sweep_interval_secs = cfg.sweep_interval_secs,
        "starting beacon bootstrap"
    );

    let state = AppState::new(&cfg);
    let listener = tokio::net::TcpListener::bind(&cfg.listen_addr)
        .await
        .with_context(|| format!("binding {}", cfg.listen_addr))?;

    serve(listener, state, shutdown_signal()).await?;
    tracing::info!("bootstrap shut down");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => tracing::info!("received SIGINT"),
                    _ = sigterm.recv() => tracing::info!("received SIGTERM"),
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable; waiting for Ctrl+C");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
