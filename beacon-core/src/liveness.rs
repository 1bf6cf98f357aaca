//! Liveness sweep: age out peers that stop heartbeating.
//!
//! Split in two so the host never holds a write lock while scanning:
//! [`plan_sweep`] reads, [`apply_sweep`] removes. A heartbeat that lands
//! between the two moves `last_seen`, and the removal for that peer is
//! skipped until the next sweep.

use std::time::Instant;

use tracing::{debug, info};

use crate::identity::NodeId;
use crate::registry::{PeerStatus, Registry};

/// What a sweep observed at `at`.
#[derive(Debug, Clone, Default)]
pub struct SweepPlan {
    /// Peers past the active window but not yet expired.
    pub stale: Vec<NodeId>,
    /// Peers to remove, with the `last_seen` the sweep read.
    pub expired: Vec<(NodeId, Instant)>,
}

/// What a sweep actually did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub stale: usize,
    pub removed: Vec<NodeId>,
    /// Expiry candidates that heartbeated between plan and apply.
    pub skipped: usize,
}

/// Read phase. Call under a read lock.
pub fn plan_sweep(registry: &Registry, now: Instant) -> SweepPlan {
    let policy = registry.policy();
    let mut plan = SweepPlan::default();
    for record in registry.records() {
        match record.status(now, policy) {
            PeerStatus::Active => {}
            PeerStatus::Stale => plan.stale.push(record.node_id.clone()),
            PeerStatus::Expired => plan
                .expired
                .push((record.node_id.clone(), record.last_seen)),
        }
    }
    plan.stale.sort();
    plan.expired.sort_by(|a, b| a.0.cmp(&b.0));
    plan
}

/// Write phase. Call under a write lock; removes only unchanged records.
pub fn apply_sweep(registry: &mut Registry, plan: &SweepPlan) -> SweepReport {
    let mut report = SweepReport {
        stale: plan.stale.len(),
        ..SweepReport::default()
    };
    for (node_id, observed) in &plan.expired {
        if registry.remove_if_unchanged(node_id, *observed) {
            info!(node_id = %node_id, "peer expired");
            report.removed.push(node_id.clone());
        } else {
            debug!(node_id = %node_id, "expiry skipped; peer heartbeated during sweep");
            report.skipped += 1;
        }
    }
    report
}

/// Both phases back to back, for hosts that already hold exclusive access.
pub fn sweep(registry: &mut Registry, now: Instant) -> SweepReport {
    let plan = plan_sweep(registry, now);
    apply_sweep(registry, &plan)
}
