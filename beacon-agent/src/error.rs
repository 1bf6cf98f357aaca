//! Errors surfaced by the discovery client and its transport.

/// Failure of one bootstrap call, or of a client operation built on top of them.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    #[error("request to {endpoint} timed out")]
    Timeout { endpoint: String },
    #[error("bootstrap does not know this node; re-register")]
    UnknownPeer,
    #[error("node id already registered with a different node type")]
    DuplicateRegistration,
    #[error("no capable worker for the job")]
    NoCapableWorker,
    #[error("{endpoint} answered HTTP {status}: {reason}")]
    Rejected {
        endpoint: String,
        status: u16,
        reason: String,
    },
    #[error("transport error talking to {endpoint}: {message}")]
    Transport { endpoint: String, message: String },
    #[error("invalid response from {endpoint}: {message}")]
    Decode { endpoint: String, message: String },
    #[error("no bootstrap endpoints configured")]
    NoEndpoints,
    #[error("discovery client already started")]
    AlreadyStarted,
}

impl ClientError {
    /// The client handles these by retrying, rotating or re-registering.
    pub fn is_recoverable(&self) -> bool {
        match self {
            ClientError::Timeout { .. }
            | ClientError::UnknownPeer
            | ClientError::Transport { .. }
            | ClientError::Rejected { .. }
            | ClientError::Decode { .. }
            | ClientError::NoCapableWorker => true,
            ClientError::DuplicateRegistration
            | ClientError::NoEndpoints
            | ClientError::AlreadyStarted => false,
        }
    }

    /// Whether trying the next bootstrap could give a different answer.
    /// Definite answers about our own registration or job, and 4xx
    /// rejections of the request itself, are not retried elsewhere.
    pub fn should_rotate(&self) -> bool {
        match self {
            ClientError::Rejected { status, .. } => *status >= 500,
            ClientError::Timeout { .. }
            | ClientError::Transport { .. }
            | ClientError::Decode { .. } => true,
            ClientError::UnknownPeer
            | ClientError::DuplicateRegistration
            | ClientError::NoCapableWorker
            | ClientError::NoEndpoints
            | ClientError::AlreadyStarted => false,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ClientError::Timeout { .. })
    }
}
