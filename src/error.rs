//! Custom error types for knu.

use thiserror::Error;

/// Errors that can occur while upgrading a node.
#[derive(Error, Debug)]
pub enum KnuError {
    #[error("[{0}] I/O error: {1}")]
    Io(String, String),

    #[error("Not found: {0}")]
    Lookup(String),

    #[error("Cluster query failed: {0}")]
    Query(String),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Step {step} failed: {message}")]
    Mutation { step: String, message: String },

    #[error("Invalid version format: {0}")]
    InvalidVersion(String),
}

impl KnuError {
    /// Create a Kubernetes API query error from any error type.
    pub fn query<E: std::fmt::Display>(what: &str, err: E) -> Self {
        Self::Query(format!("{what}: {err}"))
    }

    /// Create an I/O error tagged with the component that raised it.
    pub fn io<E: std::fmt::Display>(component: &str, err: E) -> Self {
        Self::Io(component.to_string(), err.to_string())
    }

    /// Create a mutation error for the named step.
    pub fn mutation(step: &str, message: impl Into<String>) -> Self {
        Self::Mutation {
            step: step.to_string(),
            message: message.into(),
        }
    }
}
