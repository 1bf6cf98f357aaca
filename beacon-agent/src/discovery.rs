//! Discovery client: register with a bootstrap, keep heartbeating, and keep a
//! local snapshot of the network fresh.
//!
//! State machine: `Init -> Registering -> Discovering -> Stopping -> Stopped`.
//! While discovering, the heartbeat task and the refresh task run
//! independently. Repeated heartbeat failures (or an `UnknownPeer` answer)
//! send the client back to `Registering`. Cancellation is cooperative: tasks
//! only observe it between network calls, never in the middle of one.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use beacon_core::protocol::{
    HeartbeatRequest, ListQuery, NetworkConfig, RegisterRequest, RouteRequest, RouteResponse,
};
use beacon_core::{
    aggregate, Capabilities, JobRequirement, LocalNode, NetworkStats, NodeId, NodeType, PeerView,
    PROTOCOL_VERSION,
};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::ClientError;
use crate::transport::BootstrapTransport;

const HEARTBEAT_TASK: &str = "heartbeat";
const REFRESH_TASK: &str = "refresh";
/// Used when `stop_grace` is too large to form a deadline.
const MAX_STOP_GRACE: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Init,
    Registering,
    Discovering,
    Stopping,
    Stopped,
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ClientState::Init => "init",
            ClientState::Registering => "registering",
            ClientState::Discovering => "discovering",
            ClientState::Stopping => "stopping",
            ClientState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Timing and endpoints for the client loops.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Tried in order; the client sticks to the last one that answered.
    pub bootstrap_endpoints: Vec<String>,
    pub heartbeat_interval: Duration,
    pub refresh_interval: Duration,
    /// Cap for the doubling retry delay.
    pub max_backoff: Duration,
    /// Consecutive failed heartbeat cycles before re-registering.
    pub failure_threshold: u32,
    /// How long `stop()` waits for the tasks to finish.
    pub stop_grace: Duration,
    /// Filter applied to every refresh.
    pub refresh_query: ListQuery,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            bootstrap_endpoints: Vec::new(),
            heartbeat_interval: Duration::from_secs(10),
            refresh_interval: Duration::from_secs(30),
            max_backoff: Duration::from_secs(60),
            failure_threshold: 3,
            stop_grace: Duration::from_secs(10),
            refresh_query: ListQuery::default(),
        }
    }
}

/// What this node registers as.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeProfile {
    pub node_id: NodeId,
    pub node_type: NodeType,
    pub endpoint: String,
    pub capabilities: Capabilities,
}

/// Last refreshed view of the network. Replaced wholesale, never mutated.
#[derive(Debug, Clone, Default)]
pub struct PeerSnapshot {
    pub peers: Vec<PeerView>,
    pub refreshed_at: Option<Instant>,
    /// Bootstrap that served this snapshot.
    pub source: Option<String>,
}

#[derive(Debug, Default)]
struct Counters {
    registrations: AtomicU64,
    heartbeats_sent: AtomicU64,
    heartbeat_failures: AtomicU64,
    timeouts: AtomicU64,
    refreshes: AtomicU64,
    refresh_failures: AtomicU64,
}

/// Point-in-time copy of the client counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub registrations: u64,
    pub heartbeats_sent: u64,
    pub heartbeat_failures: u64,
    pub timeouts: u64,
    pub refreshes: u64,
    pub refresh_failures: u64,
}

/// Outcome of `stop()`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopReport {
    /// Tasks still running when the grace period ran out. They were not aborted.
    pub unresponsive: Vec<&'static str>,
    /// Tasks that ended by panicking.
    pub failed: Vec<&'static str>,
}

impl StopReport {
    pub fn is_clean(&self) -> bool {
        self.unresponsive.is_empty() && self.failed.is_empty()
    }
}

struct Inner {
    config: DiscoveryConfig,
    profile: NodeProfile,
    transport: Arc<dyn BootstrapTransport>,
    state: watch::Sender<ClientState>,
    snapshot: watch::Sender<Arc<PeerSnapshot>>,
    cancel: watch::Sender<bool>,
    /// Index into `config.bootstrap_endpoints` of the preferred endpoint.
    current: AtomicUsize,
    /// Bootstrap that acknowledged the latest registration.
    registered_with: watch::Sender<Option<String>>,
    counters: Counters,
    started_at: Instant,
}

pub struct DiscoveryClient {
    inner: Arc<Inner>,
    tasks: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
}

impl DiscoveryClient {
    pub fn new(
        config: DiscoveryConfig,
        profile: NodeProfile,
        transport: Arc<dyn BootstrapTransport>,
    ) -> Self {
        let (state, _) = watch::channel(ClientState::Init);
        let (snapshot, _) = watch::channel(Arc::new(PeerSnapshot::default()));
        let (cancel, _) = watch::channel(false);
        let (registered_with, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                config,
                profile,
                transport,
                state,
                snapshot,
                cancel,
                current: AtomicUsize::new(0),
                registered_with,
                counters: Counters::default(),
                started_at: Instant::now(),
            }),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.inner.profile.node_id
    }

    pub fn state(&self) -> ClientState {
        *self.inner.state.borrow()
    }

    /// Resolve once the client reaches `target`.
    pub async fn wait_for_state(&self, target: ClientState) {
        let mut rx = self.inner.state.subscribe();
        let _ = rx.wait_for(|s| *s == target).await;
    }

    /// `Init -> Registering`, then spawn the heartbeat and refresh tasks.
    pub async fn start(&self) -> Result<(), ClientError> {
        if self.inner.config.bootstrap_endpoints.is_empty() {
            return Err(ClientError::NoEndpoints);
        }
        let mut tasks = self.tasks.lock().await;
        let moved = self.inner.state.send_if_modified(|s| {
            if *s == ClientState::Init {
                *s = ClientState::Registering;
                true
            } else {
                false
            }
        });
        if !moved {
            return Err(ClientError::AlreadyStarted);
        }
        info!(
            node_id = %self.inner.profile.node_id,
            endpoints = self.inner.config.bootstrap_endpoints.len(),
            "discovery client starting"
        );
        tasks.push((HEARTBEAT_TASK, tokio::spawn(heartbeat_task(self.inner.clone()))));
        tasks.push((REFRESH_TASK, tokio::spawn(refresh_task(self.inner.clone()))));
        Ok(())
    }

    /// Signal both tasks, wait up to `stop_grace` for them to finish, then
    /// deregister best-effort. Tasks past the grace period are reported, not killed.
    pub async fn stop(&self) -> StopReport {
        let mut tasks = self.tasks.lock().await;
        if self.state() == ClientState::Stopped {
            return StopReport::default();
        }
        self.inner.set_state(ClientState::Stopping);
        self.inner.cancel.send_replace(true);

        let now = tokio::time::Instant::now();
        let deadline = now
            .checked_add(self.inner.config.stop_grace)
            .unwrap_or(now + MAX_STOP_GRACE);
        let mut report = StopReport::default();
        for (name, mut handle) in tasks.drain(..) {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => debug!(task = name, "task stopped"),
                Ok(Err(e)) => {
                    warn!(task = name, error = %e, "task ended abnormally");
                    report.failed.push(name);
                }
                Err(_) => {
                    warn!(
                        task = name,
                        grace_secs = self.inner.config.stop_grace.as_secs(),
                        "task did not stop within grace period"
                    );
                    report.unresponsive.push(name);
                }
            }
        }

        if let Some(endpoint) = self.inner.registered_with.send_replace(None) {
            let node_id = &self.inner.profile.node_id;
            match self.inner.transport.deregister(&endpoint, node_id).await {
                Ok(()) => info!(%endpoint, "deregistered"),
                Err(e) => warn!(%endpoint, error = %e, "deregister failed"),
            }
        }

        self.inner.set_state(ClientState::Stopped);
        report
    }

    /// Last refreshed snapshot; never touches the network.
    pub fn get_discovered_peers(&self) -> Arc<PeerSnapshot> {
        self.inner.snapshot.borrow().clone()
    }

    /// Aggregate counts over the current snapshot plus local identity and uptime.
    pub fn get_network_stats(&self) -> NetworkStats {
        let snapshot = self.get_discovered_peers();
        let local = LocalNode {
            node_id: self.inner.profile.node_id.clone(),
            node_type: self.inner.profile.node_type,
        };
        aggregate(&snapshot.peers, &local, self.inner.started_at.elapsed())
    }

    /// Bootstrap that acknowledged the latest registration, if any.
    pub fn registered_with(&self) -> Option<String> {
        self.inner.registered_with.borrow().clone()
    }

    pub fn counters(&self) -> CounterSnapshot {
        let c = &self.inner.counters;
        CounterSnapshot {
            registrations: c.registrations.load(Ordering::Relaxed),
            heartbeats_sent: c.heartbeats_sent.load(Ordering::Relaxed),
            heartbeat_failures: c.heartbeat_failures.load(Ordering::Relaxed),
            timeouts: c.timeouts.load(Ordering::Relaxed),
            refreshes: c.refreshes.load(Ordering::Relaxed),
            refresh_failures: c.refresh_failures.load(Ordering::Relaxed),
        }
    }

    /// Ask a bootstrap to place a job. `NoCapableWorker` is an expected outcome.
    /// On rejection by the chosen worker, call again with it in `exclude`.
    pub async fn route_job(
        &self,
        requirement: JobRequirement,
        exclude: Vec<NodeId>,
    ) -> Result<RouteResponse, ClientError> {
        let req = RouteRequest {
            requirement,
            exclude,
        };
        let transport = &self.inner.transport;
        let req = &req;
        self.inner
            .with_rotation("route", move |endpoint| async move {
                transport.route(&endpoint, req).await
            })
            .await
    }

    /// Network parameters from the first bootstrap that answers.
    pub async fn network_config(&self) -> Result<NetworkConfig, ClientError> {
        let transport = &self.inner.transport;
        self.inner
            .with_rotation("network_config", move |endpoint| async move {
                transport.network_config(&endpoint).await
            })
            .await
    }
}

impl Inner {
    fn set_state(&self, next: ClientState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            info!(from = %prev, to = %next, "discovery state");
        }
    }

    /// Move `from -> to` only if no one else moved the state meanwhile (e.g. `stop()`).
    fn transition(&self, from: ClientState, to: ClientState) -> bool {
        let moved = self.state.send_if_modified(|s| {
            if *s == from {
                *s = to;
                true
            } else {
                false
            }
        });
        if moved {
            info!(from = %from, to = %to, "discovery state");
        }
        moved
    }

    /// Run `op` against the preferred endpoint, rotating through the others on
    /// failures another bootstrap might not have. The first success becomes preferred.
    async fn with_rotation<T, F, Fut>(&self, op: &'static str, mut call: F) -> Result<T, ClientError>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        let endpoints = &self.config.bootstrap_endpoints;
        if endpoints.is_empty() {
            return Err(ClientError::NoEndpoints);
        }
        let start = self.current.load(Ordering::Relaxed) % endpoints.len();
        let mut last_err = ClientError::NoEndpoints;
        for offset in 0..endpoints.len() {
            let idx = (start + offset) % endpoints.len();
            let endpoint = endpoints[idx].clone();
            match call(endpoint.clone()).await {
                Ok(v) => {
                    if idx != start {
                        info!(op, %endpoint, "switched bootstrap endpoint");
                        self.current.store(idx, Ordering::Relaxed);
                    }
                    return Ok(v);
                }
                Err(e) => {
                    if e.is_timeout() {
                        self.counters.timeouts.fetch_add(1, Ordering::Relaxed);
                    }
                    if !e.should_rotate() {
                        return Err(e);
                    }
                    warn!(op, %endpoint, error = %e, "bootstrap call failed");
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }

    fn register_request(&self) -> RegisterRequest {
        RegisterRequest {
            protocol_version: PROTOCOL_VERSION,
            node_id: self.profile.node_id.clone(),
            node_type: self.profile.node_type,
            endpoint: self.profile.endpoint.clone(),
            capabilities: self.profile.capabilities.clone(),
        }
    }

    /// Register until some endpoint acknowledges. Returns false if cancelled
    /// first, or if a bootstrap refused the registration outright.
    async fn register_until_acked(&self, cancel: &mut watch::Receiver<bool>) -> bool {
        let req = self.register_request();
        let mut delay = self.config.heartbeat_interval.min(self.config.max_backoff);
        loop {
            if *cancel.borrow() {
                return false;
            }
            let transport = &self.transport;
            let req_ref = &req;
            let result = self
                .with_rotation("register", move |endpoint| async move {
                    transport
                        .register(&endpoint, req_ref)
                        .await
                        .map(|ack| (endpoint, ack))
                })
                .await;
            match result {
                Ok((endpoint, ack)) => {
                    self.counters.registrations.fetch_add(1, Ordering::Relaxed);
                    info!(
                        node_id = %self.profile.node_id,
                        %endpoint,
                        active_window_secs = ack.active_window_secs,
                        "registered"
                    );
                    if ack.active_window_secs > 0
                        && self.config.heartbeat_interval.as_secs() >= ack.active_window_secs
                    {
                        warn!(
                            heartbeat_interval_secs = self.config.heartbeat_interval.as_secs(),
                            active_window_secs = ack.active_window_secs,
                            "heartbeat interval is not shorter than the bootstrap's active window"
                        );
                    }
                    self.registered_with.send_replace(Some(endpoint));
                    return self.transition(ClientState::Registering, ClientState::Discovering);
                }
                Err(e) if !e.is_recoverable() => {
                    error!(
                        node_id = %self.profile.node_id,
                        error = %e,
                        "registration refused; discovery client giving up"
                    );
                    if self.transition(ClientState::Registering, ClientState::Stopped) {
                        self.cancel.send_replace(true);
                    }
                    return false;
                }
                Err(e) => {
                    warn!(error = %e, retry_in_ms = delay.as_millis() as u64, "registration failed");
                }
            }
            if !sleep_or_cancel(delay, cancel).await {
                return false;
            }
            delay = next_backoff(delay, self.config.max_backoff);
        }
    }

    async fn heartbeat_once(&self) -> Result<(), ClientError> {
        let req = HeartbeatRequest {
            node_id: self.profile.node_id.clone(),
            capabilities: None,
        };
        let transport = &self.transport;
        let req = &req;
        self.with_rotation("heartbeat", move |endpoint| async move {
            transport.heartbeat(&endpoint, req).await
        })
        .await
    }

    async fn refresh_once(&self) {
        let transport = &self.transport;
        let query = &self.config.refresh_query;
        let result = self
            .with_rotation("refresh", move |endpoint| async move {
                transport
                    .list_peers(&endpoint, query)
                    .await
                    .map(|peers| (endpoint, peers))
            })
            .await;
        match result {
            Ok((source, peers)) => {
                let peers: Vec<PeerView> = peers
                    .into_iter()
                    .filter(|p| p.node_id != self.profile.node_id)
                    .collect();
                debug!(peers = peers.len(), %source, "peer snapshot refreshed");
                self.snapshot.send_replace(Arc::new(PeerSnapshot {
                    peers,
                    refreshed_at: Some(Instant::now()),
                    source: Some(source),
                }));
                self.counters.refreshes.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                warn!(error = %e, "peer refresh failed; keeping previous snapshot");
                self.counters.refresh_failures.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Owns registration and the heartbeat loop.
async fn heartbeat_task(inner: Arc<Inner>) {
    let mut cancel = inner.cancel.subscribe();
    'register: loop {
        if !inner.register_until_acked(&mut cancel).await {
            break;
        }
        let mut delay = inner.config.heartbeat_interval;
        let mut failures = 0u32;
        loop {
            if !sleep_or_cancel(delay, &mut cancel).await {
                break 'register;
            }
            match inner.heartbeat_once().await {
                Ok(()) => {
                    inner.counters.heartbeats_sent.fetch_add(1, Ordering::Relaxed);
                    if failures > 0 {
                        info!(after_failures = failures, "heartbeat recovered");
                    }
                    failures = 0;
                    delay = inner.config.heartbeat_interval;
                }
                Err(ClientError::UnknownPeer) => {
                    warn!("bootstrap forgot this node; re-registering");
                    inner.counters.heartbeat_failures.fetch_add(1, Ordering::Relaxed);
                    if !inner.transition(ClientState::Discovering, ClientState::Registering) {
                        break 'register;
                    }
                    continue 'register;
                }
                Err(e) => {
                    inner.counters.heartbeat_failures.fetch_add(1, Ordering::Relaxed);
                    failures += 1;
                    delay = next_backoff(delay, inner.config.max_backoff);
                    warn!(
                        error = %e,
                        consecutive = failures,
                        retry_in_ms = delay.as_millis() as u64,
                        "heartbeat failed"
                    );
                    if failures >= inner.config.failure_threshold {
                        if !inner.transition(ClientState::Discovering, ClientState::Registering) {
                            break 'register;
                        }
                        continue 'register;
                    }
                }
            }
        }
    }
    debug!("heartbeat task exiting");
}

/// Waits for the first registration, then refreshes every `refresh_interval`.
async fn refresh_task(inner: Arc<Inner>) {
    let mut cancel = inner.cancel.subscribe();
    let mut state = inner.state.subscribe();
    let reached = tokio::select! {
        ok = discovering(&mut state) => ok,
        _ = cancelled(&mut cancel) => false,
    };
    if reached {
        loop {
            inner.refresh_once().await;
            if !sleep_or_cancel(inner.config.refresh_interval, &mut cancel).await {
                break;
            }
        }
    }
    debug!("refresh task exiting");
}

async fn discovering(state: &mut watch::Receiver<ClientState>) -> bool {
    state
        .wait_for(|s| *s == ClientState::Discovering)
        .await
        .is_ok()
}

async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    let _ = cancel.wait_for(|stop| *stop).await;
}

/// Sleep for `d` unless cancelled first. Returns false on cancellation.
async fn sleep_or_cancel(d: Duration, cancel: &mut watch::Receiver<bool>) -> bool {
    if *cancel.borrow() {
        return false;
    }
    tokio::select! {
        _ = tokio::time::sleep(d) => true,
        _ = cancelled(cancel) => false,
    }
}

fn next_backoff(current: Duration, max: Duration) -> Duration {
    current.saturating_mul(2).min(max).max(Duration::from_millis(1))
}
