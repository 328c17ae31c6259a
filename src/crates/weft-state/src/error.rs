//! Error types for state observation and replication.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StateError>;

#[derive(Error, Debug)]
pub enum StateError {
    /// A state was mutated without the locks its registration requires
    #[error("cannot modify state '{state}' at '{path}' without locks: {missing:?}")]
    LockViolation {
        state: String,
        path: String,
        missing: Vec<String>,
    },

    /// The per-state patch queue overflowed
    #[error("patch buffer for state '{0}' is full")]
    PatchBufferFull(String),

    /// A patch path did not resolve inside the document
    #[error("path '{path}' does not exist in state '{state}'")]
    UnknownPath { state: String, path: String },

    /// A patch path resolved to an incompatible node
    #[error("path '{path}' in state '{state}' is not a {expected}")]
    WrongNode {
        state: String,
        path: String,
        expected: &'static str,
    },

    /// Applying an envelope to a snapshot failed
    #[error("could not apply patches: {0}")]
    PatchApply(String),

    /// No state registered under this name
    #[error("no state registered under '{0}'")]
    UnknownState(String),

    /// Shrinking a patch value through the schema failed
    #[error(transparent)]
    Schema(#[from] weft_schema::SchemaError),
}
