//! Agents talking HTTP to a real bootstrap on an ephemeral port.

use std::sync::Arc;
use std::time::Duration;

use beacon_agent::{ClientState, DiscoveryClient, DiscoveryConfig, HttpTransport, NodeProfile};
use beacon_bootstrap::config::Config;
use beacon_bootstrap::{serve, AppState};
use beacon_core::{Capabilities, JobRequirement, NodeId, NodeType};
use tokio::sync::oneshot;

async fn start_bootstrap() -> (String, Arc<AppState>, oneshot::Sender<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let config = Config {
        chain_id: "devnet".into(),
        bootstrap_endpoints: vec![base.clone()],
        ..Config::default()
    };
    let state = AppState::new(&config);
    let (tx, rx) = oneshot::channel::<()>();
    tokio::spawn(serve(listener, state.clone(), async move {
        let _ = rx.await;
    }));
    (base, state, tx)
}

fn client(endpoints: Vec<String>, id: &str, node_type: NodeType, models: &[&str]) -> DiscoveryClient {
    let config = DiscoveryConfig {
        bootstrap_endpoints: endpoints,
        heartbeat_interval: Duration::from_millis(200),
        refresh_interval: Duration::from_millis(200),
        max_backoff: Duration::from_secs(1),
        stop_grace: Duration::from_secs(2),
        ..DiscoveryConfig::default()
    };
    let profile = NodeProfile {
        node_id: NodeId::new(id),
        node_type,
        endpoint: format!("http://{id}.local:11434"),
        capabilities: Capabilities::with_models(models.iter().copied()),
    };
    let transport = Arc::new(HttpTransport::new(Duration::from_secs(2)).unwrap());
    DiscoveryClient::new(config, profile, transport)
}

async fn reach(c: &DiscoveryClient, state: ClientState) {
    tokio::time::timeout(Duration::from_secs(10), c.wait_for_state(state))
        .await
        .unwrap_or_else(|_| panic!("client never reached {state}"));
}

#[tokio::test]
async fn worker_and_front_end_find_each_other() {
    let (base, state, shutdown) = start_bootstrap().await;
    // A dead endpoint first: both clients must rotate past it.
    let endpoints = vec!["http://127.0.0.1:9".to_string(), base.clone()];

    let worker = client(endpoints.clone(), "worker-1", NodeType::Compute, &["llama3-8b"]);
    let ui = client(endpoints, "ui-1", NodeType::Client, &[]);
    worker.start().await.unwrap();
    ui.start().await.unwrap();
    reach(&worker, ClientState::Discovering).await;
    reach(&ui, ClientState::Discovering).await;

    let net = ui.network_config().await.unwrap();
    assert_eq!(net.chain_id, "devnet");
    assert_eq!(net.bootstrap_endpoints, vec![base.clone()]);

    tokio::time::timeout(Duration::from_secs(10), async {
        while ui.get_discovered_peers().peers.is_empty() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("ui never saw the worker");
    let snapshot = ui.get_discovered_peers();
    assert_eq!(snapshot.peers[0].node_id, NodeId::new("worker-1"));
    assert_eq!(snapshot.source.as_deref(), Some(base.as_str()));

    let placed = ui
        .route_job(JobRequirement::model("llama3-8b"), vec![])
        .await
        .unwrap();
    assert_eq!(placed.node_id, NodeId::new("worker-1"));
    assert_eq!(placed.endpoint, "http://worker-1.local:11434");

    assert!(worker.stop().await.is_clean());
    assert!(ui.stop().await.is_clean());
    assert!(state.registry.read().await.is_empty(), "both deregistered on stop");
    let _ = shutdown.send(());
}

#[tokio::test]
async fn ids_with_path_characters_deregister_cleanly() {
    let (base, state, shutdown) = start_bootstrap().await;
    let worker = client(vec![base], "rack-2/gpu-0?slot=1", NodeType::Compute, &["llama3-8b"]);
    worker.start().await.unwrap();
    reach(&worker, ClientState::Discovering).await;
    assert_eq!(state.registry.read().await.len(), 1);

    assert!(worker.stop().await.is_clean());
    assert!(state.registry.read().await.is_empty());
    let _ = shutdown.send(());
}
