//! Location-Transparent Cluster Calls
//!
//! Connects per-process actor runtimes into one cluster. A [`Node`] routes
//! every call through a dispatch policy: calls landing on the current node
//! run through typed in-process routes with no serialization, everything
//! else becomes an [`Envelope`] published over a [`Transport`]. Responses
//! correlate back through a swept reply table, so a caller always gets an
//! answer, a fault or a timeout.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use actors::{Actor, MailboxConfig};
//! use cluster::{InMemoryHub, JsonCodec, Node};
//! use config::ClusterConfig;
//!
//! # #[derive(Clone)] struct Counter;
//! # #[async_trait::async_trait]
//! # impl actors::Server for Counter {
//! #     type Request = i64;
//! #     type Reply = i64;
//! #     async fn handle_call(&mut self, n: i64) -> Result<i64, actors::CallError> { Ok(n) }
//! # }
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ClusterConfig::from_file("cluster.toml")?;
//! let hub = InMemoryHub::new();
//! let node = Node::start(&config, Arc::new(hub.endpoint(config.current_node.as_str())), JsonCodec)?;
//!
//! let counter = Actor::spawn("counter", Counter, MailboxConfig::default());
//! node.register("counter.add", &counter)?;
//!
//! let total: i64 = node.call("account-42", "counter.add", 5i64).await?;
//! # let _ = total;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod envelope;
pub mod error;
pub mod node;
pub mod processor;
pub mod reply;
pub mod transport;

pub use codec::{BincodeCodec, Codec, JsonCodec};
pub use envelope::{Action, Envelope, RemoteFault};
pub use error::{ClusterError, Result};
pub use node::Node;
pub use processor::MessageProcessor;
pub use reply::{ReplyBody, ReplyTable};
pub use transport::{DeliveryHandler, InMemoryHub, InMemoryTransport, Transport};
