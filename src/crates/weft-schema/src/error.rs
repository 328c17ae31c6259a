//! Error types for schema construction, registry lookups and serialization.
//!
//! Shrink and expand errors carry the JSON-Pointer-like path and the
//! recursion depth at which they occurred, so a failure deep inside a
//! nested port tree points at the offending element.

use thiserror::Error;

/// Result type for schema operations
pub type Result<T> = std::result::Result<T, SchemaError>;

/// Boxed error returned by user-supplied shrinkers, expanders and model
/// codecs. Wrapped with port context before it crosses the serializer
/// boundary.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur while building or consuming schemas
#[derive(Error, Debug)]
pub enum SchemaError {
    /// A definition could not be built (bad port tree, validator
    /// dependency mismatch, unknown structure with auto-register off)
    #[error("Definition error: {0}")]
    Definition(String),

    /// A registry lookup missed and auto-registration was not allowed
    #[error("Structure registry error: {0}")]
    Registry(String),

    /// Attempted to overwrite an existing registration
    #[error("Structure {identifier} is already registered (overwrites disabled)")]
    Overwrite { identifier: String },

    /// A value could not be shrunk to its wire form
    #[error("Error shrinking value at {path} (depth {depth}): {message}")]
    Shrinking {
        path: String,
        depth: usize,
        message: String,
    },

    /// A wire value could not be expanded to its in-memory form
    #[error("Error expanding value at {path} (depth {depth}): {message}")]
    Expanding {
        path: String,
        depth: usize,
        message: String,
    },

    /// A shelve key did not resolve to a drawer entry
    #[error("No shelved value under key {0}")]
    ShelveMiss(String),

    /// JSON encoding failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SchemaError {
    /// Build a shrinking error from a path stack.
    pub fn shrinking(path: &[String], depth: usize, message: impl Into<String>) -> Self {
        SchemaError::Shrinking {
            path: format_path(path),
            depth,
            message: message.into(),
        }
    }

    /// Build an expanding error from a path stack.
    pub fn expanding(path: &[String], depth: usize, message: impl Into<String>) -> Self {
        SchemaError::Expanding {
            path: format_path(path),
            depth,
            message: message.into(),
        }
    }
}

fn format_path(path: &[String]) -> String {
    if path.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", path.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expanding_error_formats_path() {
        let err = SchemaError::expanding(
            &["args".to_string(), "rep".to_string(), "0".to_string()],
            3,
            "not a string",
        );
        let msg = err.to_string();
        assert!(msg.contains("/args/rep/0"));
        assert!(msg.contains("depth 3"));
        assert!(msg.contains("not a string"));
    }

    #[test]
    fn root_path_renders_as_slash() {
        let err = SchemaError::shrinking(&[], 0, "boom");
        assert!(err.to_string().contains("at /"));
    }
}
