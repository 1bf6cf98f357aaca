//! Beacon peer discovery and capability routing core.
//! Host-driven: no I/O; the host passes `now` and owns locking and scheduling.

pub mod capability;
pub mod identity;
pub mod liveness;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod stats;

pub use capability::{Capabilities, CapabilityFilter, JobRequirement};
pub use identity::{NodeId, NodeType};
pub use liveness::{apply_sweep, plan_sweep, sweep, SweepPlan, SweepReport};
pub use protocol::{PeerView, PROTOCOL_VERSION};
pub use registry::{
    LivenessPolicy, PeerRecord, PeerStatus, PolicyError, Registration, Registry, RegistryError,
};
pub use router::{RouteError, Router, RoutingDecision};
pub use stats::{aggregate, Health, LocalNode, NetworkStats};
