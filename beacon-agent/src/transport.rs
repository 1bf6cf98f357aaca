//! Transport to bootstrap nodes: the seam the discovery client talks through,
//! and its HTTP implementation.

use std::time::Duration;

use async_trait::async_trait;
use beacon_core::protocol::{
    reason, ErrorBody, HeartbeatRequest, ListQuery, NetworkConfig, RegisterAck, RegisterRequest,
    RouteRequest, RouteResponse,
};
use beacon_core::{NodeId, PeerView};
use serde::de::DeserializeOwned;

use crate::error::ClientError;

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// One call per bootstrap operation. Every call must be bounded in time;
/// a timeout is reported as [`ClientError::Timeout`].
#[async_trait]
pub trait BootstrapTransport: Send + Sync + 'static {
    async fn register(&self, endpoint: &str, req: &RegisterRequest)
        -> Result<RegisterAck, ClientError>;

    async fn heartbeat(&self, endpoint: &str, req: &HeartbeatRequest) -> Result<(), ClientError>;

    async fn list_peers(&self, endpoint: &str, query: &ListQuery)
        -> Result<Vec<PeerView>, ClientError>;

    async fn deregister(&self, endpoint: &str, node_id: &NodeId) -> Result<(), ClientError>;

    async fn route(&self, endpoint: &str, req: &RouteRequest) -> Result<RouteResponse, ClientError>;

    async fn network_config(&self, endpoint: &str) -> Result<NetworkConfig, ClientError>;
}

/// JSON over HTTP to the bootstrap API.
pub struct HttpTransport {
    http: reqwest::Client,
}

impl HttpTransport {
    pub fn new(request_timeout: Duration) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .connect_timeout(request_timeout)
            .build()
            .map_err(|e| ClientError::Transport {
                endpoint: String::new(),
                message: e.to_string(),
            })?;
        Ok(Self { http })
    }

    fn url(endpoint: &str, path: &str) -> String {
        format!("{}{}", endpoint.trim_end_matches('/'), path)
    }

    /// `/api/peers/{node_id}` with the id percent-encoded as one path segment.
    fn peer_url(endpoint: &str, node_id: &NodeId) -> Result<reqwest::Url, ClientError> {
        let invalid = |message: String| ClientError::Transport {
            endpoint: endpoint.to_string(),
            message,
        };
        let mut url = reqwest::Url::parse(&Self::url(endpoint, "/api/peers"))
            .map_err(|e| invalid(format!("invalid endpoint url: {e}")))?;
        url.path_segments_mut()
            .map_err(|()| invalid("endpoint url cannot carry a path".into()))?
            .push(node_id.as_str());
        Ok(url)
    }

    async fn send(
        &self,
        endpoint: &str,
        req: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, ClientError> {
        let resp = req.send().await.map_err(|e| send_error(endpoint, e))?;
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status().as_u16();
        let reason = match resp.json::<ErrorBody>().await {
            Ok(body) => body.reason,
            Err(_) => String::new(),
        };
        Err(status_error(endpoint, status, reason))
    }

    async fn decode<T: DeserializeOwned>(
        endpoint: &str,
        resp: reqwest::Response,
    ) -> Result<T, ClientError> {
        resp.json::<T>().await.map_err(|e| {
            if e.is_timeout() {
                ClientError::Timeout {
                    endpoint: endpoint.to_string(),
                }
            } else {
                ClientError::Decode {
                    endpoint: endpoint.to_string(),
                    message: e.to_string(),
                }
            }
        })
    }
}

fn send_error(endpoint: &str, e: reqwest::Error) -> ClientError {
    if e.is_timeout() {
        ClientError::Timeout {
            endpoint: endpoint.to_string(),
        }
    } else {
        ClientError::Transport {
            endpoint: endpoint.to_string(),
            message: e.to_string(),
        }
    }
}

/// Map a non-2xx answer to a typed error using the `{reason}` body.
fn status_error(endpoint: &str, status: u16, reason: String) -> ClientError {
    match (status, reason.as_str()) {
        (404, reason::UNKNOWN_PEER) => ClientError::UnknownPeer,
        (409, reason::DUPLICATE_REGISTRATION) => ClientError::DuplicateRegistration,
        (503, reason::NO_CAPABLE_WORKER) => ClientError::NoCapableWorker,
        _ => ClientError::Rejected {
            endpoint: endpoint.to_string(),
            status,
            reason,
        },
    }
}

#[async_trait]
impl BootstrapTransport for HttpTransport {
    async fn register(
        &self,
        endpoint: &str,
        req: &RegisterRequest,
    ) -> Result<RegisterAck, ClientError> {
        let url = Self::url(endpoint, "/api/peers/register");
        let resp = self.send(endpoint, self.http.post(&url).json(req)).await?;
        Self::decode(endpoint, resp).await
    }

    async fn heartbeat(&self, endpoint: &str, req: &HeartbeatRequest) -> Result<(), ClientError> {
        let url = Self::url(endpoint, "/api/peers/heartbeat");
        self.send(endpoint, self.http.post(&url).json(req)).await?;
        Ok(())
    }

    async fn list_peers(
        &self,
        endpoint: &str,
        query: &ListQuery,
    ) -> Result<Vec<PeerView>, ClientError> {
        let url = Self::url(endpoint, "/api/peers");
        let resp = self.send(endpoint, self.http.get(&url).query(query)).await?;
        Self::decode(endpoint, resp).await
    }

    async fn deregister(&self, endpoint: &str, node_id: &NodeId) -> Result<(), ClientError> {
        let url = Self::peer_url(endpoint, node_id)?;
        self.send(endpoint, self.http.delete(url)).await?;
        Ok(())
    }

    async fn route(&self, endpoint: &str, req: &RouteRequest) -> Result<RouteResponse, ClientError> {
        let url = Self::url(endpoint, "/api/route");
        let resp = self.send(endpoint, self.http.post(&url).json(req)).await?;
        Self::decode(endpoint, resp).await
    }

    async fn network_config(&self, endpoint: &str) -> Result<NetworkConfig, ClientError> {
        let url = Self::url(endpoint, "/api/network");
        let resp = self.send(endpoint, self.http.get(&url)).await?;
        Self::decode(endpoint, resp).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_joins_without_double_slash() {
        assert_eq!(
            HttpTransport::url("http://boot:7434/", "/api/peers"),
            "http://boot:7434/api/peers"
        );
    }

    #[test]
    fn peer_url_keeps_the_id_in_one_segment() {
        let url = HttpTransport::peer_url("http://boot:7434/", &NodeId::new("pod/7?x#y")).unwrap();
        assert_eq!(url.as_str(), "http://boot:7434/api/peers/pod%2F7%3Fx%23y");
        assert!(HttpTransport::peer_url("not a url", &NodeId::new("a")).is_err());
    }

    #[test]
    fn typed_status_errors() {
        assert_eq!(
            status_error("e", 404, "unknown_peer".into()),
            ClientError::UnknownPeer
        );
        assert_eq!(
            status_error("e", 503, "no_capable_worker".into()),
            ClientError::NoCapableWorker
        );
        assert_eq!(
            status_error("e", 409, "duplicate_registration".into()),
            ClientError::DuplicateRegistration
        );
        // A 404 without our reason is a misrouted request, not a missing peer.
        assert!(matches!(
            status_error("e", 404, String::new()),
            ClientError::Rejected { status: 404, .. }
        ));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_recoverable() {
        let t = HttpTransport::new(Duration::from_millis(300)).unwrap();
        let err = t
            .network_config("http://127.0.0.1:9")
            .await
            .unwrap_err();
        assert!(err.is_recoverable());
        assert!(err.should_rotate());
    }
}
