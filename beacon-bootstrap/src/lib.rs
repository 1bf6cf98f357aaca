//! Beacon bootstrap daemon: peer registry, liveness monitor and job router over HTTP.

pub mod config;
pub mod monitor;
pub mod routes;
pub mod state;

use std::future::Future;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{info, warn};

pub use state::AppState;

/// Serve the API on `listener` and run the liveness monitor until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: Arc<AppState>, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let (cancel_tx, cancel_rx) = tokio::sync::watch::channel(false);
    let monitor = tokio::spawn(monitor::run_liveness_monitor(state.clone(), cancel_rx));

    let app = routes::create_router(state);
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "bootstrap listening");
    }
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await;

    let _ = cancel_tx.send(true);
    if let Err(e) = monitor.await {
        warn!(error = %e, "liveness monitor task failed");
    }
    served?;
    Ok(())
}
