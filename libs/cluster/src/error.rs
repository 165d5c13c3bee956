//! Cluster Error Types
//!
//! One taxonomy for everything the cluster layer can surface to a caller.
//! Configuration errors are fatal at startup; the rest resolve individual
//! pending futures and never tear down the runtime.

use thiserror::Error;

/// Main cluster error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClusterError {
    /// Bad or missing cluster configuration; fatal at startup
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// No route for a key or method (uninitialized policy, unknown method)
    #[error("routing error: {message}")]
    Routing { message: String },

    /// Remote call expired before the outbound publish was confirmed
    #[error("remote call timed out after {timeout_ms}ms: publish to node {node} not yet confirmed")]
    TimeoutPending { node: String, timeout_ms: u64 },

    /// Remote call was published but no response arrived in time
    #[error("remote call timed out after {timeout_ms}ms: no response received from node {node}")]
    TimeoutNoResponse { node: String, timeout_ms: u64 },

    /// Publish failure or connection loss reported by the transport
    #[error("transport error: {message}")]
    Transport { message: String },

    /// Malformed payload on encode or decode
    #[error("codec error: {message}")]
    Codec { message: String },

    /// A local handler completed a call with a fault
    #[error("handler fault: {message}")]
    Handler { message: String },

    /// A fault carried back in a response envelope from another node
    #[error("remote fault: {message}")]
    Remote { message: String },
}

/// Result type alias for cluster operations
pub type Result<T> = std::result::Result<T, ClusterError>;

impl ClusterError {
    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a routing error
    pub fn routing(message: impl Into<String>) -> Self {
        Self::Routing {
            message: message.into(),
        }
    }

    /// Create a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a codec error
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Create a handler fault
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler {
            message: message.into(),
        }
    }

    /// Create a remote fault
    pub fn remote(message: impl Into<String>) -> Self {
        Self::Remote {
            message: message.into(),
        }
    }

    /// True for either timeout flavor
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            ClusterError::TimeoutPending { .. } | ClusterError::TimeoutNoResponse { .. }
        )
    }

    /// Error category for logging and metrics
    pub fn category(&self) -> &'static str {
        match self {
            ClusterError::Configuration { .. } => "configuration",
            ClusterError::Routing { .. } => "routing",
            ClusterError::TimeoutPending { .. } | ClusterError::TimeoutNoResponse { .. } => {
                "timeout"
            }
            ClusterError::Transport { .. } => "transport",
            ClusterError::Codec { .. } => "codec",
            ClusterError::Handler { .. } => "handler",
            ClusterError::Remote { .. } => "remote",
        }
    }
}

impl From<actors::CallError> for ClusterError {
    fn from(error: actors::CallError) -> Self {
        match error {
            actors::CallError::Fault { message } => ClusterError::Handler { message },
            other => ClusterError::handler(other.to_string()),
        }
    }
}

impl From<routing::PolicyError> for ClusterError {
    fn from(error: routing::PolicyError) -> Self {
        ClusterError::configuration(error.to_string())
    }
}

impl From<config::ConfigError> for ClusterError {
    fn from(error: config::ConfigError) -> Self {
        ClusterError::configuration(error.to_string())
    }
}
