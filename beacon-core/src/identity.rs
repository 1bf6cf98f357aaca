//! Node identity: opaque node IDs and the closed set of node types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Opaque, globally unique node identifier. Assigned by the node itself.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        NodeId(id.into())
    }

    /// Fresh random ID (UUIDv4). Changes on every process start.
    pub fn generate() -> Self {
        NodeId(uuid::Uuid::new_v4().to_string())
    }

    /// Stable ID derived from a seed: first 16 bytes of SHA-256, hex encoded.
    /// Same seed, same ID, so a restarted node keeps its identity.
    pub fn derive(seed: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"beacon-node-id-v1");
        hasher.update(seed.as_bytes());
        let digest = hasher.finalize();
        let hex: String = digest[..16].iter().map(|b| format!("{:02x}", b)).collect();
        NodeId(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        NodeId(s.to_string())
    }
}

/// Kind of participant. Closed set; every consumer matches exhaustively.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    /// Stable rendezvous node hosting a registry.
    Bootstrap,
    /// Worker offering inference capacity.
    Compute,
    /// Mobile worker; serves jobs like Compute but tends to churn.
    Mobile,
    /// UI front-end or other consumer; never serves jobs.
    Client,
}

impl NodeType {
    pub const ALL: [NodeType; 4] = [
        NodeType::Bootstrap,
        NodeType::Compute,
        NodeType::Mobile,
        NodeType::Client,
    ];

    /// Whether the router may hand jobs to this kind of node.
    pub fn serves_jobs(self) -> bool {
        match self {
            NodeType::Compute | NodeType::Mobile => true,
            NodeType::Bootstrap | NodeType::Client => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NodeType::Bootstrap => "bootstrap",
            NodeType::Compute => "compute",
            NodeType::Mobile => "mobile",
            NodeType::Client => "client",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown node type: {0}")]
pub struct ParseNodeTypeError(pub String);

impl FromStr for NodeType {
    type Err = ParseNodeTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bootstrap" => Ok(NodeType::Bootstrap),
            "compute" | "worker" => Ok(NodeType::Compute),
            "mobile" => Ok(NodeType::Mobile),
            "client" | "ui" => Ok(NodeType::Client),
            other => Err(ParseNodeTypeError(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_id_is_stable() {
        let a = NodeId::derive("host-a:8080");
        let b = NodeId::derive("host-a:8080");
        let c = NodeId::derive("host-b:8080");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str().len(), 32);
    }

    #[test]
    fn generated_ids_differ() {
        assert_ne!(NodeId::generate(), NodeId::generate());
    }

    #[test]
    fn node_type_parse_and_display() {
        for t in NodeType::ALL {
            assert_eq!(t.as_str().parse::<NodeType>().unwrap(), t);
        }
        assert_eq!("Worker".parse::<NodeType>().unwrap(), NodeType::Compute);
        assert!("toaster".parse::<NodeType>().is_err());
    }

    #[test]
    fn only_workers_serve_jobs() {
        let serving: Vec<NodeType> = NodeType::ALL
            .into_iter()
            .filter(|t| t.serves_jobs())
            .collect();
        assert_eq!(serving, vec![NodeType::Compute, NodeType::Mobile]);
    }

    #[test]
    fn node_type_serializes_snake_case() {
        let json = serde_json::to_string(&NodeType::Compute).unwrap();
        assert_eq!(json, "\"compute\"");
    }
}
