//! Load bootstrap config from file and environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use beacon_core::protocol::NetworkConfig;
use beacon_core::LivenessPolicy;
use serde::Deserialize;
use tracing::warn;

/// Daemon configuration. File: ~/.config/beacon/bootstrap.toml or /etc/beacon/bootstrap.toml.
/// Env overrides: BEACON_LISTEN_ADDR, BEACON_NETWORK_ID, BEACON_CHAIN_ID,
/// BEACON_BOOTSTRAP_ENDPOINTS (comma separated), BEACON_HEARTBEAT_INTERVAL_SECS,
/// BEACON_SWEEP_INTERVAL_SECS.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// HTTP listen address (default 0.0.0.0:7434).
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_network_id")]
    pub network_id: String,
    /// Opaque ledger chain ID, handed to clients as-is.
    #[serde(default)]
    pub chain_id: String,
    /// Bootstrap endpoints advertised to clients, this node included.
    #[serde(default)]
    pub bootstrap_endpoints: Vec<String>,
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_missed_threshold")]
    pub missed_threshold: u32,
    #[serde(default = "default_expiry_missed")]
    pub expiry_missed: u32,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_decision_log_capacity")]
    pub decision_log_capacity: usize,
}

fn default_listen_addr() -> String {
    "0.0.0.0:7434".to_string()
}
fn default_network_id() -> String {
    "beacon-local".to_string()
}
fn default_heartbeat_interval_secs() -> u64 {
    10
}
fn default_missed_threshold() -> u32 {
    2
}
fn default_expiry_missed() -> u32 {
    6
}
fn default_sweep_interval_secs() -> u64 {
    30
}
fn default_decision_log_capacity() -> usize {
    beacon_core::router::DEFAULT_DECISION_LOG_CAPACITY
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            network_id: default_network_id(),
            chain_id: String::new(),
            bootstrap_endpoints: Vec::new(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            missed_threshold: default_missed_threshold(),
            expiry_missed: default_expiry_missed(),
            sweep_interval_secs: default_sweep_interval_secs(),
            decision_log_capacity: default_decision_log_capacity(),
        }
    }
}

impl Config {
    pub fn policy(&self) -> LivenessPolicy {
        LivenessPolicy {
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs),
            missed_threshold: self.missed_threshold,
            expiry_missed: self.expiry_missed,
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
        }
    }

    pub fn network(&self) -> NetworkConfig {
        NetworkConfig {
            network_id: self.network_id.clone(),
            chain_id: self.chain_id.clone(),
            bootstrap_endpoints: self.bootstrap_endpoints.clone(),
        }
    }
}

/// Load config: default, then config file (explicit path, else first existing default path), then env vars.
pub fn load(explicit: Option<&Path>) -> anyhow::Result<Config> {
    let mut c = match explicit {
        Some(p) => read_file(p)?,
        None => load_default_file().unwrap_or_default(),
    };
    apply_env(&mut c, |k| std::env::var(k).ok());
    c.policy()
        .validate()
        .context("invalid liveness settings")?;
    Ok(c)
}

/// Overlay BEACON_* variables. `lookup` is `std::env::var` outside tests.
pub fn apply_env<F>(c: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(s) = lookup("BEACON_LISTEN_ADDR") {
        c.listen_addr = s;
    }
    if let Some(s) = lookup("BEACON_NETWORK_ID") {
        c.network_id = s;
    }
    if let Some(s) = lookup("BEACON_CHAIN_ID") {
        c.chain_id = s;
    }
    if let Some(s) = lookup("BEACON_BOOTSTRAP_ENDPOINTS") {
        c.bootstrap_endpoints = s
            .split(',')
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(String::from)
            .collect();
    }
    if let Some(s) = lookup("BEACON_HEARTBEAT_INTERVAL_SECS") {
        if let Ok(v) = s.parse::<u64>() {
            c.heartbeat_interval_secs = v;
        }
    }
    if let Some(s) = lookup("BEACON_SWEEP_INTERVAL_SECS") {
        if let Ok(v) = s.parse::<u64>() {
            c.sweep_interval_secs = v;
        }
    }
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/beacon/bootstrap.toml"));
    }
    out.push(PathBuf::from("/etc/beacon/bootstrap.toml"));
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
    fn defaults_are_valid() {
        let c = Config::default();
        assert!(c.policy().validate().is_ok());
        assert_eq!(c.policy().active_window(), Duration::from_secs(20));
        assert_eq!(c.policy().expiry_window(), Duration::from_secs(60));
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let c: Config = toml::from_str(
            r#"
            network_id = "testnet"
            chain_id = "0x2a"
            bootstrap_endpoints = ["http://a:7434", "http://b:7434"]
            "#,
        )
        .unwrap();
        assert_eq!(c.network_id, "testnet");
        assert_eq!(c.listen_addr, "0.0.0.0:7434");
        assert_eq!(c.network().bootstrap_endpoints.len(), 2);
        assert_eq!(c.sweep_interval_secs, 30);
    }

    #[test]
    fn overflowing_heartbeat_interval_fails_validation() {
        let c: Config = toml::from_str("heartbeat_interval_secs = 9223372036854775807").unwrap();
        assert!(matches!(
            c.policy().validate(),
            Err(beacon_core::PolicyError::WindowOverflow { .. })
        ));
    }

    #[test]
    fn unknown_fields_rejected() {
        assert!(toml::from_str::<Config>("proxy_port = 3128").is_err());
    }

    #[test]
    fn env_overrides() {
        let env: HashMap<&str, &str> = [
            ("BEACON_CHAIN_ID", "77"),
            ("BEACON_BOOTSTRAP_ENDPOINTS", "http://a:1, ,http://b:2"),
            ("BEACON_HEARTBEAT_INTERVAL_SECS", "5"),
            ("BEACON_SWEEP_INTERVAL_SECS", "not-a-number"),
        ]
        .into_iter()
        .collect();
        let mut c = Config::default();
        apply_env(&mut c, |k| env.get(k).map(|v| v.to_string()));
        assert_eq!(c.chain_id, "77");
        assert_eq!(c.bootstrap_endpoints, vec!["http://a:1", "http://b:2"]);
        assert_eq!(c.heartbeat_interval_secs, 5);
        assert_eq!(c.sweep_interval_secs, 30);
    }
}
