//! Cluster Configuration
//!
//! Loads the per-process cluster configuration from a TOML file, once at
//! startup. Validation failures are fatal configuration errors: a process
//! must not come up with a broken node list or an unknown dispatch policy.
//!
//! ```toml
//! cluster_name = "orders"
//! current_node = "node-0"
//! dispatch_policy = "consistentHash_ketama"
//! remote_timeout_ms = 3000
//! nodes = ["node-0", "node-1", "node-2"]
//!
//! [broker]
//! host = "mq.internal"
//! port = 5672
//! username = "cluster"
//! password = "secret"
//! vhost = "/"
//! exchange = "cluster.direct"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use routing::PolicyKind;

/// Configuration loading errors. All fatal at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {message}")]
    Invalid { message: String },
}

impl ConfigError {
    fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }
}

/// Result type alias for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Per-process cluster configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Logical cluster name, used as a logging scope
    pub cluster_name: String,
    /// Name of the node this process runs as; must be a member of `nodes`
    pub current_node: String,
    /// Key-to-node dispatch strategy
    pub dispatch_policy: PolicyKind,
    /// End-to-end budget for remote calls, milliseconds
    #[serde(default = "default_remote_timeout_ms")]
    pub remote_timeout_ms: u64,
    /// Static node membership, fixed for the process lifetime
    pub nodes: Vec<String>,
    /// Broker connection settings, passed through to the transport
    pub broker: BrokerSettings,
}

fn default_remote_timeout_ms() -> u64 {
    3000
}

/// Message-broker connection settings. The core never interprets these; a
/// transport implementation does.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerSettings {
    pub host: String,
    #[serde(default = "default_broker_port")]
    pub port: u16,
    pub username: String,
    pub password: String,
    #[serde(default = "default_vhost")]
    pub vhost: String,
    pub exchange: String,
}

fn default_broker_port() -> u16 {
    5672
}

fn default_vhost() -> String {
    "/".to_string()
}

impl ClusterConfig {
    /// Load and validate configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_str(&raw)?;
        debug!(
            path = %path.display(),
            cluster = %config.cluster_name,
            current_node = %config.current_node,
            nodes = config.nodes.len(),
            policy = %config.dispatch_policy,
            "loaded cluster configuration"
        );
        Ok(config)
    }

    /// Parse and validate configuration from TOML text.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(raw: &str) -> Result<Self> {
        let config: ClusterConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate invariants that TOML parsing cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.cluster_name.is_empty() {
            return Err(ConfigError::invalid("cluster_name must not be empty"));
        }
        if self.nodes.is_empty() {
            return Err(ConfigError::invalid("node list must not be empty"));
        }
        if !self.nodes.contains(&self.current_node) {
            return Err(ConfigError::invalid(format!(
                "current_node '{}' is not in the node list",
                self.current_node
            )));
        }
        if self.remote_timeout_ms == 0 {
            return Err(ConfigError::invalid("remote_timeout_ms must be positive"));
        }
        Ok(())
    }

    /// Remote-call budget as a [`Duration`].
    pub fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const GOOD: &str = r#"
        cluster_name = "orders"
        current_node = "node-0"
        dispatch_policy = "consistentHash_fnv1"
        remote_timeout_ms = 2500
        nodes = ["node-0", "node-1"]

        [broker]
        host = "localhost"
        username = "guest"
        password = "guest"
        exchange = "cluster"
    "#;

    #[test]
    fn parses_valid_config_with_defaults() {
        let config = ClusterConfig::from_str(GOOD).unwrap();
        assert_eq!(config.cluster_name, "orders");
        assert_eq!(config.dispatch_policy, PolicyKind::ConsistentHashFnv1);
        assert_eq!(config.remote_timeout(), Duration::from_millis(2500));
        assert_eq!(config.broker.port, 5672);
        assert_eq!(config.broker.vhost, "/");
    }

    #[test]
    fn unknown_policy_is_a_parse_error() {
        let raw = GOOD.replace("consistentHash_fnv1", "roundRobin");
        assert!(matches!(
            ClusterConfig::from_str(&raw),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn consistent_hash_alias_is_accepted() {
        let raw = GOOD.replace("consistentHash_fnv1", "consistentHash");
        let config = ClusterConfig::from_str(&raw).unwrap();
        assert_eq!(config.dispatch_policy, PolicyKind::ConsistentHashFnv1);
    }

    #[test]
    fn current_node_must_be_a_member() {
        let raw = GOOD.replace("current_node = \"node-0\"", "current_node = \"node-9\"");
        assert!(matches!(
            ClusterConfig::from_str(&raw),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn empty_node_list_is_rejected() {
        let raw = GOOD.replace("nodes = [\"node-0\", \"node-1\"]", "nodes = []");
        assert!(ClusterConfig::from_str(&raw).is_err());
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let raw = GOOD.replace("remote_timeout_ms = 2500", "remote_timeout_ms = 0");
        assert!(ClusterConfig::from_str(&raw).is_err());
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(GOOD.as_bytes()).unwrap();
        let config = ClusterConfig::from_file(file.path()).unwrap();
        assert_eq!(config.current_node, "node-0");
    }
}
