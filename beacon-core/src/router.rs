//! Job router: pick one live, capable peer for a job.
//!
//! Policy is round-robin per requirement key over the matching peers sorted
//! by node ID. Given the same snapshot and the same cursor state, the choice
//! is always the same.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::capability::JobRequirement;
use crate::identity::NodeId;
use crate::registry::PeerRecord;

/// Default number of routing decisions kept for observability.
pub const DEFAULT_DECISION_LOG_CAPACITY: usize = 256;

/// Upper bound on tracked round-robin cursors. Past it the cursors restart.
const MAX_ROUTE_KEYS: usize = 4096;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RouteError {
    /// Expected outcome when nothing live can serve the job; callers may retry or queue.
    #[error("no capable worker for model {model}")]
    NoCapableWorker { model: String },
}

/// Record of one routing call. Informational only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub at: DateTime<Utc>,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu: Option<bool>,
    pub candidates: usize,
    pub chosen: Option<NodeId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RouteKey {
    model: String,
    gpu: bool,
}

impl RouteKey {
    fn of(req: &JobRequirement) -> Self {
        Self {
            model: req.model.clone(),
            gpu: req.gpu == Some(true),
        }
    }
}

/// Round-robin router with a bounded decision log.
#[derive(Debug)]
pub struct Router {
    cursors: HashMap<RouteKey, usize>,
    decisions: VecDeque<RoutingDecision>,
    log_capacity: usize,
}

impl Router {
    pub fn new(log_capacity: usize) -> Self {
        Self {
            cursors: HashMap::new(),
            decisions: VecDeque::with_capacity(log_capacity.min(1024)),
            log_capacity,
        }
    }

    /// Choose one peer from `snapshot`. `snapshot` must already be restricted
    /// to ACTIVE peers (registry `list` does that); it is never re-queried.
    pub fn route<'a>(
        &mut self,
        snapshot: &'a [PeerRecord],
        requirement: &JobRequirement,
        exclude: &[NodeId],
    ) -> Result<&'a PeerRecord, RouteError> {
        let mut candidates: Vec<&PeerRecord> = snapshot
            .iter()
            .filter(|p| p.node_type.serves_jobs())
            .filter(|p| requirement.is_satisfied_by(&p.capabilities))
            .filter(|p| !exclude.contains(&p.node_id))
            .collect();
        candidates.sort_by(|a, b| a.node_id.cmp(&b.node_id));

        let key = RouteKey::of(requirement);
        if candidates.is_empty() {
            self.cursors.remove(&key);
            debug!(model = %requirement.model, "no capable worker");
            self.record(requirement, 0, None);
            return Err(RouteError::NoCapableWorker {
                model: requirement.model.clone(),
            });
        }

        if self.cursors.len() >= MAX_ROUTE_KEYS && !self.cursors.contains_key(&key) {
            debug!(keys = self.cursors.len(), "resetting route cursors");
            self.cursors.clear();
        }
        let cursor = self.cursors.entry(key).or_insert(0);
        let chosen = candidates[*cursor % candidates.len()];
        *cursor = cursor.wrapping_add(1);

        info!(
            model = %requirement.model,
            node_id = %chosen.node_id,
            candidates = candidates.len(),
            "job routed"
        );
        self.record(requirement, candidates.len(), Some(chosen.node_id.clone()));
        Ok(chosen)
    }

    /// Most recent decisions, oldest first.
    pub fn recent_decisions(&self) -> Vec<RoutingDecision> {
        self.decisions.iter().cloned().collect()
    }

    fn record(&mut self, requirement: &JobRequirement, candidates: usize, chosen: Option<NodeId>) {
        if self.log_capacity == 0 {
            return;
        }
        while self.decisions.len() >= self.log_capacity {
            self.decisions.pop_front();
        }
        self.decisions.push_back(RoutingDecision {
            at: Utc::now(),
            model: requirement.model.clone(),
            gpu: requirement.gpu,
            candidates,
            chosen,
        });
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new(DEFAULT_DECISION_LOG_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::Capabilities;
    use crate::identity::NodeType;
    use std::time::Instant;

    fn peer(id: &str, node_type: NodeType, models: &[&str], gpu: bool) -> PeerRecord {
        let now = Instant::now();
        PeerRecord {
            node_id: NodeId::from(id),
            node_type,
            endpoint: format!("{}:9000", id),
            capabilities: Capabilities::with_models(models.iter().copied()).gpu(gpu),
            last_seen: now,
            registered_at: now,
        }
    }

    #[test]
    fn route_empty_snapshot() {
        let mut router = Router::default();
        let err = router
            .route(&[], &JobRequirement::model("m"), &[])
            .unwrap_err();
        assert_eq!(
            err,
            RouteError::NoCapableWorker {
                model: "m".into()
            }
        );
    }

    #[test]
    fn round_robin_in_node_id_order() {
        let mut router = Router::default();
        // Deliberately unsorted.
        let snapshot = vec![
            peer("c", NodeType::Compute, &["m"], false),
            peer("a", NodeType::Compute, &["m"], false),
            peer("b", NodeType::Mobile, &["m"], false),
        ];
        let req = JobRequirement::model("m");
        let picks: Vec<String> = (0..6)
            .map(|_| router.route(&snapshot, &req, &[]).unwrap().node_id.to_string())
            .collect();
        assert_eq!(picks, vec!["a", "b", "c", "a", "b", "c"]);
    }

    #[test]
    fn same_state_same_choice() {
        let snapshot = vec![
            peer("a", NodeType::Compute, &["m"], false),
            peer("b", NodeType::Compute, &["m"], false),
        ];
        let req = JobRequirement::model("m");
        let run = || {
            let mut router = Router::default();
            (0..10)
                .map(|_| router.route(&snapshot, &req, &[]).unwrap().node_id.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn non_serving_types_never_chosen() {
        let mut router = Router::default();
        let snapshot = vec![
            peer("boot", NodeType::Bootstrap, &["m"], true),
            peer("ui", NodeType::Client, &["m"], true),
        ];
        assert!(router
            .route(&snapshot, &JobRequirement::model("m"), &[])
            .is_err());
    }

    #[test]
    fn gpu_requirement_filters() {
        let mut router = Router::default();
        let snapshot = vec![
            peer("cpu", NodeType::Compute, &["m"], false),
            peer("gpu", NodeType::Compute, &["m"], true),
        ];
        let req = JobRequirement::model("m").require_gpu();
        for _ in 0..3 {
            assert_eq!(router.route(&snapshot, &req, &[]).unwrap().node_id.as_str(), "gpu");
        }
    }

    #[test]
    fn exclusion_list_respected() {
        let mut router = Router::default();
        let snapshot = vec![
            peer("a", NodeType::Compute, &["m"], false),
            peer("b", NodeType::Compute, &["m"], false),
        ];
        let req = JobRequirement::model("m");
        let exclude = vec![NodeId::from("a")];
        for _ in 0..3 {
            assert_eq!(router.route(&snapshot, &req, &exclude).unwrap().node_id.as_str(), "b");
        }
        let all = vec![NodeId::from("a"), NodeId::from("b")];
        assert!(router.route(&snapshot, &req, &all).is_err());
    }

    #[test]
    fn cursors_are_per_requirement() {
        let mut router = Router::default();
        let snapshot = vec![
            peer("a", NodeType::Compute, &["m", "n"], false),
            peer("b", NodeType::Compute, &["m", "n"], false),
        ];
        let m = JobRequirement::model("m");
        let n = JobRequirement::model("n");
        assert_eq!(router.route(&snapshot, &m, &[]).unwrap().node_id.as_str(), "a");
        assert_eq!(router.route(&snapshot, &n, &[]).unwrap().node_id.as_str(), "a");
        assert_eq!(router.route(&snapshot, &m, &[]).unwrap().node_id.as_str(), "b");
    }

    #[test]
    fn cursors_for_unservable_models_are_dropped() {
        let mut router = Router::default();
        let snapshot = vec![peer("a", NodeType::Compute, &["m"], false)];
        router.route(&snapshot, &JobRequirement::model("m"), &[]).unwrap();
        assert_eq!(router.cursors.len(), 1);

        // The only worker for "m" left the network.
        assert!(router.route(&[], &JobRequirement::model("m"), &[]).is_err());
        for i in 0..100 {
            let _ = router.route(&snapshot, &JobRequirement::model(format!("gone-{i}")), &[]);
        }
        assert!(router.cursors.is_empty());
    }

    #[test]
    fn cursor_map_is_capped() {
        let mut router = Router::new(0);
        let models: Vec<String> = (0..MAX_ROUTE_KEYS + 10).map(|i| format!("m{i}")).collect();
        let mut worker = peer("a", NodeType::Compute, &[], false);
        worker.capabilities.models = models.iter().cloned().collect();
        let snapshot = vec![worker];
        for m in &models {
            router.route(&snapshot, &JobRequirement::model(m.clone()), &[]).unwrap();
        }
        assert!(router.cursors.len() <= MAX_ROUTE_KEYS);
    }

    #[test]
    fn decision_log_is_bounded() {
        let mut router = Router::new(3);
        let snapshot = vec![peer("a", NodeType::Compute, &["m"], false)];
        for _ in 0..5 {
            router.route(&snapshot, &JobRequirement::model("m"), &[]).unwrap();
        }
        let _ = router.route(&snapshot, &JobRequirement::model("zzz"), &[]);
        let log = router.recent_decisions();
        assert_eq!(log.len(), 3);
        let last = log.last().unwrap();
        assert_eq!(last.model, "zzz");
        assert_eq!(last.chosen, None);
        assert_eq!(last.candidates, 0);
    }
}
