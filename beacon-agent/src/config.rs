//! Load agent config from file and environment.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use beacon_core::protocol::ListQuery;
use beacon_core::{Capabilities, NodeId, NodeType};
use serde::Deserialize;
use tracing::warn;

use crate::discovery::{DiscoveryConfig, NodeProfile};

/// Agent configuration. File: ~/.config/beacon/agent.toml or /etc/beacon/agent.toml.
/// Env overrides: BEACON_BOOTSTRAP_ENDPOINTS (comma separated), BEACON_NODE_TYPE,
/// BEACON_ADVERTISE_ENDPOINT, BEACON_NODE_SEED, BEACON_MODELS (comma separated), BEACON_GPU.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub bootstrap_endpoints: Vec<String>,
    /// Kind of participant (default compute).
    #[serde(default = "default_node_type")]
    pub node_type: NodeType,
    /// Address other nodes use to reach this one (e.g. the local inference endpoint).
    #[serde(default)]
    pub advertise_endpoint: String,
    /// Stable identity seed. Without it the node gets a fresh ID on every start.
    #[serde(default)]
    pub node_seed: Option<String>,
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default)]
    pub gpu: bool,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub interface: Option<String>,
    #[serde(default)]
    pub extensions: BTreeMap<String, String>,
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_stop_grace_secs")]
    pub stop_grace_secs: u64,
}

fn default_node_type() -> NodeType {
    NodeType::Compute
}
fn default_heartbeat_interval_secs() -> u64 {
    10
}
fn default_refresh_interval_secs() -> u64 {
    30
}
fn default_max_backoff_secs() -> u64 {
    60
}
fn default_failure_threshold() -> u32 {
    3
}
fn default_request_timeout_secs() -> u64 {
    5
}
fn default_stop_grace_secs() -> u64 {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bootstrap_endpoints: Vec::new(),
            node_type: default_node_type(),
            advertise_endpoint: String::new(),
            node_seed: None,
            models: Vec::new(),
            gpu: false,
            provider: None,
            interface: None,
            extensions: BTreeMap::new(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            refresh_interval_secs: default_refresh_interval_secs(),
            max_backoff_secs: default_max_backoff_secs(),
            failure_threshold: default_failure_threshold(),
            request_timeout_secs: default_request_timeout_secs(),
            stop_grace_secs: default_stop_grace_secs(),
        }
    }
}

impl Config {
    pub fn discovery(&self) -> DiscoveryConfig {
        DiscoveryConfig {
            bootstrap_endpoints: self.bootstrap_endpoints.clone(),
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs.max(1)),
            refresh_interval: Duration::from_secs(self.refresh_interval_secs.max(1)),
            max_backoff: Duration::from_secs(self.max_backoff_secs.max(1)),
            failure_threshold: self.failure_threshold.max(1),
            stop_grace: Duration::from_secs(self.stop_grace_secs),
            refresh_query: ListQuery::default(),
        }
    }

    pub fn profile(&self) -> NodeProfile {
        let node_id = match &self.node_seed {
            Some(seed) if !seed.is_empty() => NodeId::derive(seed),
            _ => NodeId::generate(),
        };
        NodeProfile {
            node_id,
            node_type: self.node_type,
            endpoint: self.advertise_endpoint.clone(),
            capabilities: Capabilities {
                models: self.models.iter().cloned().collect(),
                gpu: self.gpu,
                provider: self.provider.clone(),
                interface: self.interface.clone(),
                extensions: self.extensions.clone(),
            },
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

/// Load config: default, then config file (explicit path, else first existing default path), then env vars.
pub fn load(explicit: Option<&Path>) -> anyhow::Result<Config> {
    let mut c = match explicit {
        Some(p) => read_file(p)?,
        None => load_default_file().unwrap_or_default(),
    };
    apply_env(&mut c, |k| std::env::var(k).ok());
    Ok(c)
}

fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .map(String::from)
        .collect()
}

/// Overlay BEACON_* variables. `lookup` is `std::env::var` outside tests.
pub fn apply_env<F>(c: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(s) = lookup("BEACON_BOOTSTRAP_ENDPOINTS") {
        c.bootstrap_endpoints = split_list(&s);
    }
    if let Some(s) = lookup("BEACON_NODE_TYPE") {
        match s.parse::<NodeType>() {
            Ok(t) => c.node_type = t,
            Err(e) => warn!(error = %e, "ignoring BEACON_NODE_TYPE"),
        }
    }
    if let Some(s) = lookup("BEACON_ADVERTISE_ENDPOINT") {
        c.advertise_endpoint = s;
    }
    if let Some(s) = lookup("BEACON_NODE_SEED") {
        c.node_seed = Some(s);
    }
    if let Some(s) = lookup("BEACON_MODELS") {
        c.models = split_list(&s);
    }
    if let Some(s) = lookup("BEACON_GPU") {
        if let Ok(v) = s.parse::<bool>() {
            c.gpu = v;
        }
    }
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/beacon/agent.toml"));
    }
    out.push(PathBuf::from("/etc/beacon/agent.toml"));
    out
}

fn read_file(path: &Path) -> anyhow::Result<Config> {
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    toml::from_str::<Config>(&s).with_context(|| format!("parsing {}", path.display()))
}

fn load_default_file() -> Option<Config> {
    let path = config_paths().into_iter().find(|p| p.exists())?;
    match read_file(&path) {
        Ok(c) => Some(c),
        Err(e) => {
            warn!(error = %format!("{e:#}"), "ignoring config file");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn toml_worker_profile() {
        let c: Config = toml::from_str(
            r#"
            bootstrap_endpoints = ["http://boot-a:7434", "http://boot-b:7434"]
            node_type = "compute"
            advertise_endpoint = "http://10.0.0.5:11434"
            node_seed = "rig-5"
            models = ["llama3-8b", "mistral-7b"]
            gpu = true
            provider = "ollama"

            [extensions]
            vram_gb = "24"
            "#,
        )
        .unwrap();
        let p = c.profile();
        assert_eq!(p.node_id, NodeId::derive("rig-5"));
        assert!(p.capabilities.gpu);
        assert!(p.capabilities.supports_model("mistral-7b"));
        assert_eq!(p.capabilities.extensions["vram_gb"], "24");
        let d = c.discovery();
        assert_eq!(d.bootstrap_endpoints.len(), 2);
        assert_eq!(d.heartbeat_interval, Duration::from_secs(10));
    }

    #[test]
    fn without_seed_ids_are_fresh() {
        let c = Config::default();
        assert_ne!(c.profile().node_id, c.profile().node_id);
    }

    #[test]
    fn env_overrides() {
        let env: HashMap<&str, &str> = [
            ("BEACON_BOOTSTRAP_ENDPOINTS", "http://a:1,http://b:2"),
            ("BEACON_NODE_TYPE", "mobile"),
            ("BEACON_MODELS", "m1, m2"),
            ("BEACON_GPU", "true"),
        ]
        .into_iter()
        .collect();
        let mut c = Config::default();
        apply_env(&mut c, |k| env.get(k).map(|v| v.to_string()));
        assert_eq!(c.bootstrap_endpoints, vec!["http://a:1", "http://b:2"]);
        assert_eq!(c.node_type, NodeType::Mobile);
        assert_eq!(c.models, vec!["m1", "m2"]);
        assert!(c.gpu);
    }

    #[test]
    fn bad_node_type_env_ignored() {
        let mut c = Config::default();
        apply_env(&mut c, |k| (k == "BEACON_NODE_TYPE").then(|| "toaster".to_string()));
        assert_eq!(c.node_type, NodeType::Compute);
    }
}
