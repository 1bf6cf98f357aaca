//! Network stats: pure aggregation over a peer snapshot.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::identity::{NodeId, NodeType};
use crate::protocol::PeerView;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Health {
    /// At least one other peer is known.
    Healthy,
    Disconnected,
}

impl Health {
    pub fn as_str(self) -> &'static str {
        match self {
            Health::Healthy => "healthy",
            Health::Disconnected => "disconnected",
        }
    }
}

/// The node computing the stats.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalNode {
    pub node_id: NodeId,
    pub node_type: NodeType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkStats {
    pub local_node_id: NodeId,
    pub local_node_type: NodeType,
    pub uptime_secs: u64,
    pub total_peers: usize,
    pub by_type: BTreeMap<NodeType, usize>,
    pub health: Health,
}

/// Counts peers in `snapshot`, never counting the local node itself.
pub fn aggregate(snapshot: &[PeerView], local: &LocalNode, uptime: Duration) -> NetworkStats {
    let mut by_type: BTreeMap<NodeType, usize> = NodeType::ALL.iter().map(|t| (*t, 0)).collect();
    let mut total_peers = 0;
    for peer in snapshot.iter().filter(|p| p.node_id != local.node_id) {
        *by_type.entry(peer.node_type).or_insert(0) += 1;
        total_peers += 1;
    }
    let health = if total_peers > 0 {
        Health::Healthy
    } else {
        Health::Disconnected
    };
    NetworkStats {
        local_node_id: local.node_id.clone(),
        local_node_type: local.node_type,
        uptime_secs: uptime.as_secs(),
        total_peers,
        by_type,
        health,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::Capabilities;

    fn view(id: &str, node_type: NodeType) -> PeerView {
        PeerView {
            node_id: NodeId::from(id),
            node_type,
            endpoint: String::new(),
            capabilities: Capabilities::default(),
            last_seen_age_secs: 0,
        }
    }

    fn local() -> LocalNode {
        LocalNode {
            node_id: NodeId::from("me"),
            node_type: NodeType::Client,
        }
    }

    #[test]
    fn empty_snapshot_is_disconnected() {
        let stats = aggregate(&[], &local(), Duration::from_secs(42));
        assert_eq!(stats.total_peers, 0);
        assert_eq!(stats.health, Health::Disconnected);
        assert_eq!(stats.uptime_secs, 42);
        assert_eq!(stats.by_type.len(), NodeType::ALL.len());
        assert!(stats.by_type.values().all(|n| *n == 0));
    }

    #[test]
    fn counts_per_type_excluding_self() {
        let snapshot = vec![
            view("me", NodeType::Client),
            view("b1", NodeType::Bootstrap),
            view("w1", NodeType::Compute),
            view("w2", NodeType::Compute),
            view("m1", NodeType::Mobile),
        ];
        let stats = aggregate(&snapshot, &local(), Duration::ZERO);
        assert_eq!(stats.total_peers, 4);
        assert_eq!(stats.by_type[&NodeType::Compute], 2);
        assert_eq!(stats.by_type[&NodeType::Bootstrap], 1);
        assert_eq!(stats.by_type[&NodeType::Mobile], 1);
        assert_eq!(stats.by_type[&NodeType::Client], 0);
        assert_eq!(stats.health, Health::Healthy);
    }

    #[test]
    fn only_self_is_disconnected() {
        let stats = aggregate(&[view("me", NodeType::Client)], &local(), Duration::ZERO);
        assert_eq!(stats.health, Health::Disconnected);
    }
}
