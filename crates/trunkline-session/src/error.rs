use thiserror::Error;
use trunkline_types::SessionState;

/// Errors produced by the session engine.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Registry lookup miss. Returned to the caller, not retried.
    #[error("session not found: {0}")]
    NotFound(String),

    /// An illegal lifecycle jump was attempted and rejected.
    #[error("invalid session transition: {from} -> {to}")]
    InvalidTransition {
        from: SessionState,
        to: SessionState,
    },

    /// Every failover candidate was exhausted (or none was configured).
    /// Fatal for the session, surfaced to the caller immediately.
    #[error("no provider available")]
    ProviderUnavailable,

    /// A provider operation failed.
    #[error(transparent)]
    Provider(#[from] trunkline_provider::ProviderError),
}
