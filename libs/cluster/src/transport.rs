//! Transport Port
//!
//! The cluster core publishes envelopes and receives deliveries through this
//! trait; it never speaks a broker protocol itself. Production deployments
//! plug in an AMQP-backed implementation, tests use [`InMemoryHub`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::envelope::{Action, Envelope};
use crate::error::{ClusterError, Result};

/// Callback invoked for every envelope delivered to this node. Must not
/// block; long-running work is handed off to actor mailboxes.
pub type DeliveryHandler = Arc<dyn Fn(Envelope) + Send + Sync>;

/// Broker abstraction for one node.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Publish an envelope to the node named in `envelope.to`. Resolves once
    /// the broker confirms the publish, or fails within `budget`.
    async fn publish(&self, envelope: Envelope, budget: Duration) -> Result<()>;

    /// Install the delivery callback for envelopes addressed to this node.
    /// May be set once; a second call is a configuration error.
    fn set_delivery_handler(&self, handler: DeliveryHandler) -> Result<()>;
}

#[derive(Default)]
struct HubState {
    endpoints: HashMap<String, DeliveryHandler>,
    unreachable: HashSet<String>,
    dropping_responses: HashSet<String>,
}

/// In-process broker connecting several nodes for tests and examples.
/// Delivery is synchronous and in publish order per sender.
#[derive(Clone, Default)]
pub struct InMemoryHub {
    state: Arc<Mutex<HubState>>,
}

impl InMemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport handle for one named node. Each node of a test cluster gets
    /// its own endpoint.
    pub fn endpoint(&self, node: impl Into<String>) -> InMemoryTransport {
        InMemoryTransport {
            node: node.into(),
            state: Arc::clone(&self.state),
        }
    }

    /// Make publishes to `node` fail, simulating a lost broker route.
    pub fn disconnect(&self, node: &str) {
        self.state.lock().unreachable.insert(node.to_string());
    }

    /// Undo [`disconnect`](Self::disconnect).
    pub fn reconnect(&self, node: &str) {
        self.state.lock().unreachable.remove(node);
    }

    /// Silently discard response envelopes addressed to `node`, simulating a
    /// reply lost in transit after the request was served.
    pub fn drop_responses_to(&self, node: &str) {
        self.state.lock().dropping_responses.insert(node.to_string());
    }
}

/// One node's connection to an [`InMemoryHub`].
pub struct InMemoryTransport {
    node: String,
    state: Arc<Mutex<HubState>>,
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn publish(&self, envelope: Envelope, _budget: Duration) -> Result<()> {
        // Clone the handler out of the lock so deliveries can publish again
        // without re-entering it.
        let handler = {
            let state = self.state.lock();
            if state.unreachable.contains(&envelope.to) {
                return Err(ClusterError::transport(format!(
                    "node {} is unreachable",
                    envelope.to
                )));
            }
            if envelope.action == Action::Response && state.dropping_responses.contains(&envelope.to)
            {
                debug!(to = %envelope.to, method = %envelope.method, "dropping response envelope");
                return Ok(());
            }
            match state.endpoints.get(&envelope.to) {
                Some(handler) => Arc::clone(handler),
                None => {
                    warn!(to = %envelope.to, from = %self.node, "publish to unknown node");
                    return Err(ClusterError::transport(format!(
                        "no endpoint registered for node {}",
                        envelope.to
                    )));
                }
            }
        };
        handler(envelope);
        Ok(())
    }

    fn set_delivery_handler(&self, handler: DeliveryHandler) -> Result<()> {
        let mut state = self.state.lock();
        if state.endpoints.contains_key(&self.node) {
            return Err(ClusterError::configuration(format!(
                "delivery handler already installed for node {}",
                self.node
            )));
        }
        state.endpoints.insert(self.node.clone(), handler);
        Ok(())
    }
}
