//! Common error types for Statefull components.

use thiserror::Error;

/// Result alias used across Statefull crates
pub type Result<T> = std::result::Result<T, StatefullError>;

/// Common errors across Statefull components
#[derive(Debug, Error)]
pub enum StatefullError {
    /// Configuration error (bad header name, unknown digest, missing secret)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Node store connection/operation error
    #[error("Store error: {0}")]
    Store(String),

    /// Missing or malformed request input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Node proof did not match
    #[error("Auth error: {0}")]
    Auth(String),

    /// No node matches the given id or url
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    /// Node missed its heartbeat and was evicted
    #[error("Node expired: {0}")]
    NodeExpired(String),

    /// Allocation policy found no node
    #[error("No capacity available")]
    NoCapacity,

    /// Allocation policy failed at runtime
    #[error("Allocation failed: {0}")]
    AllocationFailed(String),

    /// A collaborator returned a value outside its contract
    #[error("Contract violation: {0}")]
    ContractViolation(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl StatefullError {
    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Config(_) => 500,
            Self::Store(_) => 503,
            Self::InvalidInput(_) => 400,
            Self::Auth(_) => 401,
            Self::NodeNotFound(_) => 406,
            Self::NodeExpired(_) => 406,
            Self::NoCapacity => 503,
            Self::AllocationFailed(_) => 400,
            Self::ContractViolation(_) => 500,
            Self::Internal(_) => 500,
        }
    }

    /// Returns true if the caller may retry later
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(_) | Self::NoCapacity)
    }
}

impl From<serde_json::Error> for StatefullError {
    fn from(err: serde_json::Error) -> Self {
        Self::Store(format!("malformed node record: {err}"))
    }
}
