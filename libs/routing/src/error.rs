//! Policy construction errors.

use thiserror::Error;

/// Errors raised while building a dispatch policy. These are configuration
/// errors: they surface at startup and are never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    /// A policy was built from an empty node list
    #[error("dispatch policy requires at least one node")]
    EmptyNodeList,

    /// An unrecognized policy name in configuration
    #[error("unknown dispatch policy '{name}'")]
    UnknownPolicy { name: String },
}

impl PolicyError {
    /// Create an unknown-policy error
    pub fn unknown(name: impl Into<String>) -> Self {
        Self::UnknownPolicy { name: name.into() }
    }
}

/// Result type alias for policy operations
pub type Result<T> = std::result::Result<T, PolicyError>;
