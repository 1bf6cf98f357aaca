//! Beacon agent: the discovery client every participant runs, and its HTTP transport.

pub mod config;
pub mod discovery;
pub mod error;
pub mod transport;

pub use discovery::{
    ClientState, CounterSnapshot, DiscoveryClient, DiscoveryConfig, NodeProfile, PeerSnapshot,
    StopReport,
};
pub use error::ClientError;
pub use transport::{BootstrapTransport, HttpTransport};
