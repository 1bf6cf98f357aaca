// Beacon agent: run a participant (register, heartbeat, refresh) or talk to a bootstrap once.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use beacon_agent::{config, ClientError, ClientState, DiscoveryClient, HttpTransport};
use beacon_core::{JobRequirement, NodeId};

/// How often `run` logs a stats line.
const STATS_LOG_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Parser)]
#[command(name = "beacon-agent", version, about = "Beacon network participant")]
struct Cli {
    /// Config file (default: ~/.config/beacon/agent.toml, /etc/beacon/agent.toml)
    #[arg(long, env = "BEACON_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Bootstrap endpoint; repeat for several. Replaces the configured list.
    #[arg(long = "bootstrap", global = true)]
    bootstrap: Vec<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Register and keep this node discoverable until Ctrl+C.
    Run,
    /// Ask a bootstrap which worker should take a job.
    Route {
        #[arg(long)]
        model: String,
        /// Require a GPU worker.
        #[arg(long)]
        gpu: bool,
        /// Node ids to skip (workers that already rejected the job).
        #[arg(long)]
        exclude: Vec<String>,
    },
    /// Print the active peers one bootstrap knows about.
    Peers,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let mut cfg = config::load(cli.config.as_deref())?;
    if !cli.bootstrap.is_empty() {
        cfg.bootstrap_endpoints = cli.bootstrap;
    }
    if cfg.bootstrap_endpoints.is_empty() {
        bail!("no bootstrap endpoints: set bootstrap_endpoints, BEACON_BOOTSTRAP_ENDPOINTS or --bootstrap");
    }
    let transport = Arc::new(
        HttpTransport::new(cfg.request_timeout()).context("building HTTP client")?,
    );

    match cli.command {
        Command::Run => run(cfg, transport).await,
        Command::Route {
            model,
            gpu,
            exclude,
        } => {
            let client = DiscoveryClient::new(cfg.discovery(), cfg.profile(), transport);
            let mut requirement = JobRequirement::model(model);
            if gpu {
                requirement = requirement.require_gpu();
            }
            let exclude = exclude.into_iter().map(NodeId::new).collect();
            match client.route_job(requirement, exclude).await {
                Ok(resp) => {
                    println!("{}\t{}", resp.node_id, resp.endpoint);
                    Ok(())
                }
                Err(ClientError::NoCapableWorker) => bail!("no capable worker for this job"),
                Err(e) => Err(e).context("routing job"),
            }
        }
        Command::Peers => {
            use beacon_agent::BootstrapTransport;
            let endpoint = &cfg.bootstrap_endpoints[0];
            let peers = transport
                .list_peers(endpoint, &Default::default())
                .await
                .with_context(|| format!("listing peers on {endpoint}"))?;
            for p in peers {
                println!(
                    "{}\t{}\t{}\t{}s",
                    p.node_id,
                    p.node_type,
                    p.endpoint,
                    p.last_seen_age_secs
                );
            }
            Ok(())
        }
    }
}

async fn run(mut cfg: config::Config, transport: Arc<HttpTransport>) -> Result<()> {
    // Learn the rest of the bootstrap set from whichever configured one answers.
    let joiner = DiscoveryClient::new(cfg.discovery(), cfg.profile(), transport.clone());
    match joiner.network_config().await {
        Ok(net) => {
            info!(
                network_id = %net.network_id,
                chain_id = %net.chain_id,
                advertised = net.bootstrap_endpoints.len(),
                "joined network"
            );
            for ep in net.bootstrap_endpoints {
                if !cfg.bootstrap_endpoints.contains(&ep) {
                    cfg.bootstrap_endpoints.push(ep);
                }
            }
        }
        Err(e) => warn!(error = %e, "network config unavailable; using configured endpoints"),
    }

    let profile = cfg.profile();
    info!(
        node_id = %profile.node_id,
        node_type = %profile.node_type,
        models = profile.capabilities.models.len(),
        gpu = profile.capabilities.gpu,
        "starting beacon agent"
    );
    let client = DiscoveryClient::new(cfg.discovery(), profile, transport);
    client.start().await.context("starting discovery client")?;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    let mut ticker = tokio::time::interval(STATS_LOG_INTERVAL);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = client.wait_for_state(ClientState::Stopped) => {
                bail!("discovery client gave up on registration");
            }
            _ = ticker.tick() => {
                let stats = client.get_network_stats();
                let counters = client.counters();
                info!(
                    state = %client.state(),
                    peers = stats.total_peers,
                    health = stats.health.as_str(),
                    heartbeats = counters.heartbeats_sent,
                    heartbeat_failures = counters.heartbeat_failures,
                    "network stats"
                );
            }
        }
    }

    let report = client.stop().await;
    if !report.is_clean() {
        warn!(
            unresponsive = ?report.unresponsive,
            failed = ?report.failed,
            "agent stopped uncleanly"
        );
    }
    info!("agent shut down");
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
                    _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
                    _ = sigterm.recv() => info!("received SIGTERM"),
                }
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable; waiting for Ctrl+C");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
