//! Beacon wire protocol: JSON request/response bodies exchanged with a bootstrap.

use serde::{Deserialize, Serialize};

use crate::capability::{Capabilities, JobRequirement};
use crate::identity::{NodeId, NodeType};

/// Current protocol version. Sent on registration; bootstraps refuse other versions.
pub const PROTOCOL_VERSION: u8 = 1;

/// Reason strings carried in error bodies.
pub mod reason {
    pub const UNKNOWN_PEER: &str = "unknown_peer";
    pub const DUPLICATE_REGISTRATION: &str = "duplicate_registration";
    pub const INVALID_NODE_ID: &str = "invalid_node_id";
    pub const NO_CAPABLE_WORKER: &str = "no_capable_worker";
    pub const UNSUPPORTED_VERSION: &str = "unsupported_protocol_version";
    pub const BAD_REQUEST: &str = "bad_request";
}

fn default_protocol_version() -> u8 {
    PROTOCOL_VERSION
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterRequest {
    #[serde(default = "default_protocol_version")]
    pub protocol_version: u8,
    pub node_id: NodeId,
    pub node_type: NodeType,
    /// Address the router hands out for this node.
    pub endpoint: String,
    #[serde(default)]
    pub capabilities: Capabilities,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterAck {
    pub accepted: bool,
    /// Heartbeat at least this often to stay ACTIVE.
    pub active_window_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub node_id: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Capabilities>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatAck {
    pub ok: bool,
}

/// Query string of the list endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_type: Option<NodeType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

/// One entry of a peer listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerView {
    pub node_id: NodeId,
    pub node_type: NodeType,
    pub endpoint: String,
    pub capabilities: Capabilities,
    pub last_seen_age_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRequest {
    #[serde(flatten)]
    pub requirement: JobRequirement,
    /// Peers the caller already tried and that rejected the job.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<NodeId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteResponse {
    pub node_id: NodeId,
    pub endpoint: String,
}

/// Error body for every non-2xx answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub reason: String,
}

impl ErrorBody {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Network parameters a participant needs before joining.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub network_id: String,
    /// Passed through from the ledger collaborator; not interpreted.
    pub chain_id: String,
    pub bootstrap_endpoints: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
    pub peer_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_request_defaults_version() {
        let req: RegisterRequest = serde_json::from_str(
            r#"{"node_id":"w1","node_type":"compute","endpoint":"10.0.0.2:8000"}"#,
        )
        .unwrap();
        assert_eq!(req.protocol_version, PROTOCOL_VERSION);
        assert!(req.capabilities.models.is_empty());
    }

    #[test]
    fn route_request_is_flat() {
        let req: RouteRequest =
            serde_json::from_str(r#"{"model":"gpt-x","gpu":true,"payload_refs":["cid:1"]}"#)
                .unwrap();
        assert_eq!(req.requirement.model, "gpt-x");
        assert_eq!(req.requirement.gpu, Some(true));
        assert!(req.exclude.is_empty());
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["model"], "gpt-x");
        assert!(json.get("exclude").is_none());
    }

    #[test]
    fn heartbeat_without_capabilities() {
        let hb = HeartbeatRequest {
            node_id: NodeId::from("w1"),
            capabilities: None,
        };
        let json = serde_json::to_string(&hb).unwrap();
        assert_eq!(json, r#"{"node_id":"w1"}"#);
    }
}
