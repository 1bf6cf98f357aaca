//! Liveness monitor: periodic sweep that ages out silent peers.

use std::sync::Arc;
use std::time::Instant;

use beacon_core::{apply_sweep, plan_sweep, SweepReport};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::state::AppState;

/// Sweep every `policy.sweep_interval` until `cancel` flips or its sender is dropped.
pub async fn run_liveness_monitor(state: Arc<AppState>, mut cancel: watch::Receiver<bool>) {
    let interval = state.policy.sweep_interval;
    info!(interval_secs = interval.as_secs(), "liveness monitor started");
    loop {
        if *cancel.borrow() {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                sweep_once(&state, Instant::now()).await;
            }
            changed = cancel.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
    debug!("liveness monitor stopped");
}

/// One sweep: plan under the read lock, remove under a short write lock.
pub async fn sweep_once(state: &AppState, now: Instant) -> SweepReport {
    let plan = {
        let registry = state.registry.read().await;
        plan_sweep(&registry, now)
    };
    if plan.expired.is_empty() {
        if !plan.stale.is_empty() {
            debug!(stale = plan.stale.len(), "sweep: stale peers pending expiry");
        }
        return SweepReport {
            stale: plan.stale.len(),
            ..SweepReport::default()
        };
    }
    let report = {
        let mut registry = state.registry.write().await;
        apply_sweep(&mut registry, &plan)
    };
    info!(
        stale = report.stale,
        removed = report.removed.len(),
        skipped = report.skipped,
        "sweep finished"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use beacon_core::{Capabilities, NodeId, NodeType};
    use std::time::Duration;

    #[tokio::test]
    async fn sweep_once_removes_expired() {
        let state = AppState::new(&Config::default());
        let t0 = Instant::now();
        state
            .registry
            .write()
            .await
            .register(
                NodeId::from("w1"),
                NodeType::Compute,
                "e".into(),
                Capabilities::default(),
                t0,
            )
            .unwrap();

        let report = sweep_once(&state, t0 + Duration::from_secs(1)).await;
        assert!(report.removed.is_empty());

        let report = sweep_once(&state, t0 + state.policy.expiry_window()).await;
        assert_eq!(report.removed, vec![NodeId::from("w1")]);
        assert!(state.registry.read().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn monitor_stops_on_cancel() {
        let state = AppState::new(&Config::default());
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(run_liveness_monitor(state, rx));
        tokio::time::sleep(Duration::from_secs(65)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("monitor did not stop")
            .unwrap();
    }
}
