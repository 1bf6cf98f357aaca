//! Node registration registry: authoritative in-memory peer records.
//!
//! Host-driven like the rest of the core: every call takes `now`, and the
//! host decides how to share the registry (the bootstrap wraps it in an
//! `RwLock`).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::capability::Capabilities;
use crate::identity::{NodeId, NodeType};
use crate::protocol::PeerView;

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_MISSED_THRESHOLD: u32 = 2;
pub const DEFAULT_EXPIRY_MISSED: u32 = 6;
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Heartbeat timing shared by registry, liveness sweep and (via the register ack) clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessPolicy {
    pub heartbeat_interval: Duration,
    /// Missed heartbeats before a peer is STALE.
    pub missed_threshold: u32,
    /// Missed heartbeats before a peer is EXPIRED and removed.
    pub expiry_missed: u32,
    pub sweep_interval: Duration,
}

impl Default for LivenessPolicy {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            missed_threshold: DEFAULT_MISSED_THRESHOLD,
            expiry_missed: DEFAULT_EXPIRY_MISSED,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

impl LivenessPolicy {
    /// A peer is ACTIVE while `now - last_seen` is below this.
    /// Saturates at `Duration::MAX`; `validate` rejects policies that would.
    pub fn active_window(&self) -> Duration {
        self.heartbeat_interval
            .checked_mul(self.missed_threshold)
            .unwrap_or(Duration::MAX)
    }

    /// A peer is removed once `now - last_seen` reaches this.
    pub fn expiry_window(&self) -> Duration {
        self.heartbeat_interval
            .checked_mul(self.expiry_missed)
            .unwrap_or(Duration::MAX)
    }

    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.heartbeat_interval.is_zero() {
            return Err(PolicyError::ZeroInterval("heartbeat_interval"));
        }
        if self.sweep_interval.is_zero() {
            return Err(PolicyError::ZeroInterval("sweep_interval"));
        }
        if self.missed_threshold == 0 {
            return Err(PolicyError::ZeroThreshold);
        }
        if self.expiry_missed <= self.missed_threshold {
            return Err(PolicyError::ExpiryBeforeStale {
                missed_threshold: self.missed_threshold,
                expiry_missed: self.expiry_missed,
            });
        }
        if self.heartbeat_interval.checked_mul(self.expiry_missed).is_none() {
            return Err(PolicyError::WindowOverflow {
                heartbeat_interval_secs: self.heartbeat_interval.as_secs(),
                expiry_missed: self.expiry_missed,
            });
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("{0} must be non-zero")]
    ZeroInterval(&'static str),
    #[error("missed_threshold must be at least 1")]
    ZeroThreshold,
    #[error("expiry_missed ({expiry_missed}) must exceed missed_threshold ({missed_threshold})")]
    ExpiryBeforeStale {
        missed_threshold: u32,
        expiry_missed: u32,
    },
    #[error("heartbeat_interval ({heartbeat_interval_secs}s) x expiry_missed ({expiry_missed}) overflows")]
    WindowOverflow {
        heartbeat_interval_secs: u64,
        expiry_missed: u32,
    },
}

/// Derived liveness status. Never stored; computed from `last_seen`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerStatus {
    Active,
    Stale,
    Expired,
}

/// One tracked participant.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerRecord {
    pub node_id: NodeId,
    pub node_type: NodeType,
    pub endpoint: String,
    pub capabilities: Capabilities,
    pub last_seen: Instant,
    pub registered_at: Instant,
}

impl PeerRecord {
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_seen)
    }

    pub fn status(&self, now: Instant, policy: &LivenessPolicy) -> PeerStatus {
        let age = self.age(now);
        if age < policy.active_window() {
            PeerStatus::Active
        } else if age < policy.expiry_window() {
            PeerStatus::Stale
        } else {
            PeerStatus::Expired
        }
    }

    /// Wire form with the age relative to `now`.
    pub fn view(&self, now: Instant) -> PeerView {
        PeerView {
            node_id: self.node_id.clone(),
            node_type: self.node_type,
            endpoint: self.endpoint.clone(),
            capabilities: self.capabilities.clone(),
            last_seen_age_secs: self.age(now).as_secs(),
        }
    }
}

/// Outcome of a successful `register`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Created,
    Refreshed,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("unknown peer {0}; re-register")]
    UnknownPeer(NodeId),
    #[error("peer {node_id} already registered as {existing}, refusing {requested}")]
    DuplicateRegistration {
        node_id: NodeId,
        existing: NodeType,
        requested: NodeType,
    },
    #[error("node id must not be empty")]
    InvalidNodeId,
}

/// Registry of peers keyed by node ID.
#[derive(Debug)]
pub struct Registry {
    peers: HashMap<NodeId, PeerRecord>,
    policy: LivenessPolicy,
}

impl Registry {
    pub fn new(policy: LivenessPolicy) -> Self {
        Self {
            peers: HashMap::new(),
            policy,
        }
    }

    pub fn policy(&self) -> &LivenessPolicy {
        &self.policy
    }

    /// Upsert a peer. Identical re-registration is a refresh; a node type change is refused.
    pub fn register(
        &mut self,
        node_id: NodeId,
        node_type: NodeType,
        endpoint: String,
        capabilities: Capabilities,
        now: Instant,
    ) -> Result<Registration, RegistryError> {
        if node_id.is_empty() {
            return Err(RegistryError::InvalidNodeId);
        }
        if let Some(existing) = self.peers.get_mut(&node_id) {
            if existing.node_type != node_type {
                return Err(RegistryError::DuplicateRegistration {
                    node_id,
                    existing: existing.node_type,
                    requested: node_type,
                });
            }
            existing.endpoint = endpoint;
            existing.capabilities = capabilities;
            existing.last_seen = existing.last_seen.max(now);
            debug!(node_id = %node_id, "peer re-registered");
            return Ok(Registration::Refreshed);
        }
        info!(node_id = %node_id, node_type = %node_type, endpoint = %endpoint, "peer registered");
        self.peers.insert(
            node_id.clone(),
            PeerRecord {
                node_id,
                node_type,
                endpoint,
                capabilities,
                last_seen: now,
                registered_at: now,
            },
        );
        Ok(Registration::Created)
    }

    /// Refresh `last_seen` (and capabilities when supplied).
    pub fn heartbeat(
        &mut self,
        node_id: &NodeId,
        capabilities: Option<Capabilities>,
        now: Instant,
    ) -> Result<(), RegistryError> {
        let record = self
            .peers
            .get_mut(node_id)
            .ok_or_else(|| RegistryError::UnknownPeer(node_id.clone()))?;
        record.last_seen = record.last_seen.max(now);
        if let Some(caps) = capabilities {
            record.capabilities = caps;
        }
        Ok(())
    }

    /// Remove a peer. Returns whether it was present; absent is not an error.
    pub fn deregister(&mut self, node_id: &NodeId) -> bool {
        let removed = self.peers.remove(node_id).is_some();
        if removed {
            info!(node_id = %node_id, "peer deregistered");
        }
        removed
    }

    /// ACTIVE peers matching the filters, sorted by node ID. Cloned, so the
    /// caller holds a consistent snapshot after the lock is released.
    pub fn list<F>(&self, node_type: Option<NodeType>, predicate: F, now: Instant) -> Vec<PeerRecord>
    where
        F: Fn(&Capabilities) -> bool,
    {
        let mut out: Vec<PeerRecord> = self
            .peers
            .values()
            .filter(|r| r.status(now, &self.policy) == PeerStatus::Active)
            .filter(|r| node_type.map_or(true, |t| r.node_type == t))
            .filter(|r| predicate(&r.capabilities))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        out
    }

    pub fn get(&self, node_id: &NodeId) -> Option<&PeerRecord> {
        self.peers.get(node_id)
    }

    /// Number of tracked records, including stale ones not yet swept.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub(crate) fn records(&self) -> impl Iterator<Item = &PeerRecord> {
        self.peers.values()
    }

    /// Remove `node_id` only if its `last_seen` still equals `observed`.
    /// A heartbeat that landed after the observation wins.
    pub(crate) fn remove_if_unchanged(&mut self, node_id: &NodeId, observed: Instant) -> bool {
        match self.peers.get(node_id) {
            Some(r) if r.last_seen == observed => {
                self.peers.remove(node_id);
                true
            }
            _ => false,
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(LivenessPolicy::default())
    }
}
