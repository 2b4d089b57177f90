//! Error taxonomy for the gateway core.

use thiserror::Error;

/// Errors surfaced across component boundaries.
///
/// Authorization denials are never errors; `check` returns `false` and the
/// denial is logged. These variants cover caller bugs, missing entities,
/// signature and transport failures, and persistence faults.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid agent id: {0}")]
    InvalidId(String),
    #[error("agent already exists: {0}")]
    AlreadyExists(String),
    #[error("cannot delete the built-in agent")]
    CannotDeleteBuiltIn,
    #[error("agent not found: {0}")]
    AgentNotFound(String),
    #[error("missing field: {0}")]
    MissingField(String),
    #[error("invalid peer url: {0}")]
    InvalidPeerUrl(String),
    #[error("node identity not initialized")]
    NoIdentity,
    #[error("no peer available for delegation")]
    NoPeerAvailable,
    #[error("peer rejected task: {0}")]
    PeerRejected(String),
    #[error("invalid signature: {0}")]
    InvalidSignature(String),
    #[error("unknown delegated task: {0}")]
    UnknownTask(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Convenience result type for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Serialization(err.to_string())
    }
}
