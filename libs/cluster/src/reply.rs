//! Pending Reply Table
//!
//! Tracks every in-flight two-way remote call by correlation id. Each entry
//! resolves exactly once: by an arriving response, by the periodic sweep
//! after its deadline, or by removal when the publish fails. The `sent` flag
//! records whether the broker confirmed the outbound publish, so a timeout
//! can say whether the request ever left this node.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::envelope::Envelope;
use crate::error::{ClusterError, Result};

/// Decoded-later response body, single or batched.
#[derive(Debug)]
pub enum ReplyBody {
    Single(Vec<u8>),
    Batch(Vec<Vec<u8>>),
}

/// Future half of a registered call.
pub type ReplyReceiver = oneshot::Receiver<Result<ReplyBody>>;

struct Pending {
    to_node: String,
    deadline: Instant,
    timeout_ms: u64,
    sent: bool,
    resolver: oneshot::Sender<Result<ReplyBody>>,
}

#[derive(Default)]
struct Entries {
    pending: HashMap<i64, Pending>,
}

/// Table of pending two-way calls, swept once a second.
pub struct ReplyTable {
    entries: Arc<Mutex<Entries>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl ReplyTable {
    /// Start the table and its background sweeper.
    pub fn start(sweep_interval: Duration) -> Arc<Self> {
        let entries = Arc::new(Mutex::new(Entries::default()));
        let weak: Weak<Mutex<Entries>> = Arc::downgrade(&entries);
        let sweeper = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(entries) = weak.upgrade() else {
                    break;
                };
                sweep(&entries);
            }
        });
        Arc::new(Self {
            entries,
            sweeper: Mutex::new(Some(sweeper)),
        })
    }

    /// Register a call before publishing it. The returned receiver resolves
    /// with the response body or the error that ended the call.
    pub fn register(&self, to_node: &str, correlation_id: i64, timeout: Duration) -> Result<ReplyReceiver> {
        let (resolver, receiver) = oneshot::channel();
        let mut entries = self.entries.lock();
        if entries.pending.contains_key(&correlation_id) {
            error!(correlation_id, "correlation id already pending");
            return Err(ClusterError::configuration(format!(
                "correlation id {correlation_id} already pending"
            )));
        }
        entries.pending.insert(
            correlation_id,
            Pending {
                to_node: to_node.to_string(),
                deadline: Instant::now() + timeout,
                timeout_ms: timeout.as_millis() as u64,
                sent: false,
                resolver,
            },
        );
        Ok(receiver)
    }

    /// Record that the broker confirmed the outbound publish.
    pub fn mark_sent(&self, correlation_id: i64) {
        if let Some(entry) = self.entries.lock().pending.get_mut(&correlation_id) {
            entry.sent = true;
        }
    }

    /// Drop a registration, typically after a failed publish. Returns false
    /// if the entry was already resolved.
    pub fn remove(&self, correlation_id: i64) -> bool {
        self.entries.lock().pending.remove(&correlation_id).is_some()
    }

    /// Resolve the pending call a response envelope correlates with.
    /// Late or unknown correlation ids are logged and dropped.
    pub fn on_response(&self, envelope: Envelope) {
        let Some(correlation_id) = envelope.correlation_id else {
            warn!(method = %envelope.method, "response envelope without correlation id");
            return;
        };
        let Some(entry) = self.entries.lock().pending.remove(&correlation_id) else {
            debug!(correlation_id, method = %envelope.method, "response for unknown or expired call");
            return;
        };
        let outcome = if let Some(fault) = envelope.fault {
            Err(ClusterError::remote(fault.message))
        } else if let Some(payloads) = envelope.payloads {
            Ok(ReplyBody::Batch(payloads))
        } else if let Some(payload) = envelope.payload {
            Ok(ReplyBody::Single(payload))
        } else {
            Err(ClusterError::remote("response carried no payload"))
        };
        // Receiver may have been dropped by a caller that gave up early.
        let _ = entry.resolver.send(outcome);
    }

    /// Number of calls still awaiting a response.
    pub fn pending(&self) -> usize {
        self.entries.lock().pending.len()
    }

    /// Stop the sweeper and fail every pending call. Idempotent.
    pub fn shutdown(&self) {
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
        let drained: Vec<Pending> = {
            let mut entries = self.entries.lock();
            entries.pending.drain().map(|(_, entry)| entry).collect()
        };
        for entry in drained {
            let _ = entry
                .resolver
                .send(Err(ClusterError::transport("node shut down")));
        }
    }
}

fn sweep(entries: &Mutex<Entries>) {
    let now = Instant::now();
    let expired: Vec<(i64, Pending)> = {
        let mut entries = entries.lock();
        let ids: Vec<i64> = entries
            .pending
            .iter()
            .filter(|(_, entry)| entry.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        ids.into_iter()
            .filter_map(|id| entries.pending.remove(&id).map(|entry| (id, entry)))
            .collect()
    };
    for (correlation_id, entry) in expired {
        warn!(
            correlation_id,
            node = %entry.to_node,
            sent = entry.sent,
            timeout_ms = entry.timeout_ms,
            "remote call timed out"
        );
        let error = if entry.sent {
            ClusterError::TimeoutNoResponse {
                node: entry.to_node,
                timeout_ms: entry.timeout_ms,
            }
        } else {
            ClusterError::TimeoutPending {
                node: entry.to_node,
                timeout_ms: entry.timeout_ms,
            }
        };
        let _ = entry.resolver.send(Err(error));
    }
}
