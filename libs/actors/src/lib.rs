//! Mailbox-Based Actor Runtime
//!
//! Each actor owns a named, ordered mailbox bound to a handler object (a
//! [`Server`] implementation). Messages are started strictly in enqueue
//! order; with a single worker they also complete in that order, which is
//! the common configuration for actors holding mutable state. A worker
//! pool ([`Actor::spawn_pool`]) trades completion ordering for bounded
//! concurrency.
//!
//! State isolation is by construction: a single-worker actor's server is
//! owned exclusively by its worker task and mutated only inside
//! `handle_call`, so no locking is involved.
//!
//! # Example
//!
//! ```
//! use actors::{Actor, CallError, MailboxConfig, Server};
//! use async_trait::async_trait;
//!
//! struct Adder {
//!     total: i64,
//! }
//!
//! #[async_trait]
//! impl Server for Adder {
//!     type Request = i64;
//!     type Reply = i64;
//!
//!     async fn handle_call(&mut self, request: i64) -> Result<i64, CallError> {
//!         self.total += request;
//!         Ok(self.total)
//!     }
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let actor = Actor::spawn("adder", Adder { total: 0 }, MailboxConfig::default());
//! assert_eq!(actor.call(2).await.unwrap(), 2);
//! assert_eq!(actor.call(3).await.unwrap(), 5);
//! actor.stop();
//! actor.completion().await;
//! # }
//! ```

mod error;
mod mailbox;

pub use error::CallError;
pub use mailbox::{Actor, MailboxConfig, Server};
