use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        FromRequest, FromRequestParts, Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use beacon_core::protocol::{
    reason, ErrorBody, HealthReport, HeartbeatAck, HeartbeatRequest, ListQuery, NetworkConfig,
    RegisterAck, RegisterRequest, RouteRequest, RouteResponse,
};
use beacon_core::{
    aggregate, CapabilityFilter, NetworkStats, NodeId, PeerView, RegistryError, RouteError,
    RoutingDecision, PROTOCOL_VERSION,
};
use tracing::{debug, warn};

use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/peers/register", post(register))
        .route("/api/peers/heartbeat", post(heartbeat))
        .route("/api/peers/{node_id}", delete(deregister))
        .route("/api/peers", get(list_peers))
        .route("/api/route", post(route_job))
        .route("/api/route/decisions", get(recent_decisions))
        .route("/api/network", get(network_config))
        .route("/api/health", get(health))
        .route("/api/stats", get(stats))
        .with_state(state)
}

/// Typed failure answered as `{reason}` with a matching status code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    reason: &'static str,
}

impl ApiError {
    fn new(status: StatusCode, reason: &'static str) -> Self {
        Self { status, reason }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody::new(self.reason))).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        debug!(error = %e.body_text(), "rejected request body");
        ApiError::new(StatusCode::BAD_REQUEST, reason::BAD_REQUEST)
    }
}

impl From<QueryRejection> for ApiError {
    fn from(e: QueryRejection) -> Self {
        debug!(error = %e.body_text(), "rejected query string");
        ApiError::new(StatusCode::BAD_REQUEST, reason::BAD_REQUEST)
    }
}

/// `Json` extractor whose rejections answer with an `ErrorBody`.
#[derive(FromRequest)]
#[from_request(via(Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

/// `Query` extractor whose rejections answer with an `ErrorBody`.
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ApiError))]
pub struct ApiQuery<T>(pub T);

impl From<RegistryError> for ApiError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::UnknownPeer(_) => ApiError::new(StatusCode::NOT_FOUND, reason::UNKNOWN_PEER),
            RegistryError::DuplicateRegistration { .. } => {
                ApiError::new(StatusCode::CONFLICT, reason::DUPLICATE_REGISTRATION)
            }
            RegistryError::InvalidNodeId => {
                ApiError::new(StatusCode::BAD_REQUEST, reason::INVALID_NODE_ID)
            }
        }
    }
}

impl From<RouteError> for ApiError {
    fn from(e: RouteError) -> Self {
        match e {
            RouteError::NoCapableWorker { .. } => {
                ApiError::new(StatusCode::SERVICE_UNAVAILABLE, reason::NO_CAPABLE_WORKER)
            }
        }
    }
}

async fn register(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<RegisterRequest>,
) -> Result<Json<RegisterAck>, ApiError> {
    if req.protocol_version != PROTOCOL_VERSION {
        warn!(node_id = %req.node_id, version = req.protocol_version, "unsupported protocol version");
        return Err(ApiError::new(StatusCode::BAD_REQUEST, reason::UNSUPPORTED_VERSION));
    }
    let now = Instant::now();
    let result = state.registry.write().await.register(
        req.node_id.clone(),
        req.node_type,
        req.endpoint,
        req.capabilities,
        now,
    );
    if let Err(e) = &result {
        warn!(node_id = %req.node_id, error = %e, "registration refused");
    }
    result?;
    Ok(Json(RegisterAck {
        accepted: true,
        active_window_secs: state.policy.active_window().as_secs(),
    }))
}

async fn heartbeat(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<HeartbeatRequest>,
) -> Result<Json<HeartbeatAck>, ApiError> {
    let now = Instant::now();
    state
        .registry
        .write()
        .await
        .heartbeat(&req.node_id, req.capabilities, now)?;
    Ok(Json(HeartbeatAck { ok: true }))
}

async fn deregister(
    State(state): State<Arc<AppState>>,
    Path(node_id): Path<String>,
) -> StatusCode {
    state.registry.write().await.deregister(&NodeId::new(node_id));
    StatusCode::NO_CONTENT
}

async fn list_peers(
    State(state): State<Arc<AppState>>,
    ApiQuery(q): ApiQuery<ListQuery>,
) -> Json<Vec<PeerView>> {
    let filter = CapabilityFilter {
        model: q.model,
        gpu: q.gpu,
        provider: q.provider,
    };
    let now = Instant::now();
    let records = state
        .registry
        .read()
        .await
        .list(q.node_type, |c| filter.matches(c), now);
    Json(records.iter().map(|r| r.view(now)).collect())
}

async fn route_job(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<RouteRequest>,
) -> Result<Json<RouteResponse>, ApiError> {
    let now = Instant::now();
    let snapshot = state.registry.read().await.list(None, |_| true, now);
    let mut router = state.router.lock().await;
    let chosen = router.route(&snapshot, &req.requirement, &req.exclude)?;
    debug!(node_id = %chosen.node_id, refs = req.requirement.payload_refs.len(), "route answered");
    Ok(Json(RouteResponse {
        node_id: chosen.node_id.clone(),
        endpoint: chosen.endpoint.clone(),
    }))
}

async fn recent_decisions(State(state): State<Arc<AppState>>) -> Json<Vec<RoutingDecision>> {
    Json(state.router.lock().await.recent_decisions())
}

async fn network_config(State(state): State<Arc<AppState>>) -> Json<NetworkConfig> {
    Json(state.network.clone())
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthReport> {
    let stats = current_stats(&state).await;
    Json(HealthReport {
        status: stats.health.as_str().to_string(),
        peer_count: stats.total_peers,
    })
}

async fn stats(State(state): State<Arc<AppState>>) -> Json<NetworkStats> {
    Json(current_stats(&state).await)
}

async fn current_stats(state: &AppState) -> NetworkStats {
    let now = Instant::now();
    let views: Vec<PeerView> = state
        .registry
        .read()
        .await
        .list(None, |_| true, now)
        .iter()
        .map(|r| r.view(now))
        .collect();
    aggregate(&views, &state.local, state.uptime())
}
