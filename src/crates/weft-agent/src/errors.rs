//! Error types for the agent runtime.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, AgentError>;

#[derive(Error, Debug)]
pub enum AgentError {
    /// The control-plane connection failed
    #[error("transport error: {0}")]
    Transport(String),

    /// The control-plane connection was closed by the peer
    #[error("connection closed")]
    ConnectionClosed,

    /// A message could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An assignment referenced an implementation this agent does not host
    #[error("no implementation registered for {0}")]
    UnknownImplementation(String),

    /// A control message referenced an assignment with no live actor
    #[error("no live actor for assignment {0}")]
    UnknownAssignment(String),

    /// A write to a read-only state injection
    #[error("state '{0}' is injected read-only")]
    ReadOnlyState(String),

    /// An operation exceeded its deadline. `recoverable` decides whether
    /// the actor surfaces ERROR (retryable) or CRITICAL.
    #[error("timed out after {seconds}s (recoverable: {recoverable})")]
    Timeout { seconds: u64, recoverable: bool },

    /// An extension failed to bring an implementation up or down
    #[error("extension error: {0}")]
    Extension(String),

    #[error(transparent)]
    Schema(#[from] weft_schema::SchemaError),

    #[error(transparent)]
    State(#[from] weft_state::StateError),
}
