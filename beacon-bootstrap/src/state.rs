use std::sync::Arc;
use std::time::{Duration, Instant};

use beacon_core::protocol::NetworkConfig;
use beacon_core::{LivenessPolicy, LocalNode, NodeId, NodeType, Registry, Router};
use tokio::sync::{Mutex, RwLock};

use crate::config::Config;

/// Shared daemon state. Locks are never held across network I/O.
pub struct AppState {
    pub registry: RwLock<Registry>,
    pub router: Mutex<Router>,
    pub policy: LivenessPolicy,
    pub network: NetworkConfig,
    pub local: LocalNode,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: &Config) -> Arc<Self> {
        let policy = config.policy();
        Arc::new(Self {
            registry: RwLock::new(Registry::new(policy)),
            router: Mutex::new(Router::new(config.decision_log_capacity)),
            policy,
            network: config.network(),
            local: LocalNode {
                node_id: NodeId::derive(&format!("{}/{}", config.network_id, config.listen_addr)),
                node_type: NodeType::Bootstrap,
            },
            started_at: Instant::now(),
        })
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}
