//! Mailbox and worker loop.

use async_trait::async_trait;
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, warn};

use crate::error::CallError;

/// Handler object bound to a mailbox. One `handle_call` invocation runs per
/// dequeued message; with a single worker, invocations never overlap and the
/// server may freely mutate its own state.
#[async_trait]
pub trait Server: Send + 'static {
    type Request: Send + 'static;
    type Reply: Send + 'static;

    /// Handle one message. A returned error completes the pending call (if
    /// any) with that fault; it never tears down the worker loop.
    async fn handle_call(&mut self, request: Self::Request) -> Result<Self::Reply, CallError>;
}

/// Mailbox tuning.
#[derive(Debug, Clone, Copy, Default)]
pub struct MailboxConfig {
    /// Queue capacity; `None` is unbounded. A full bounded mailbox rejects
    /// fire-and-forget posts and applies backpressure to `call`.
    pub capacity: Option<usize>,
}

impl MailboxConfig {
    /// Bounded mailbox with the given capacity.
    pub fn bounded(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
        }
    }
}

struct Queued<S: Server> {
    request: S::Request,
    resolver: Option<oneshot::Sender<Result<S::Reply, CallError>>>,
}

/// Handle to a running actor. Cloneable; all clones post into the same
/// mailbox. Lifecycle: Running → (stop) → Draining → Completed. While
/// draining, already-enqueued messages are still processed; new posts fail.
pub struct Actor<S: Server> {
    name: String,
    tx: async_channel::Sender<Queued<S>>,
    completed: watch::Receiver<bool>,
}

impl<S: Server> Clone for Actor<S> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            tx: self.tx.clone(),
            completed: self.completed.clone(),
        }
    }
}

impl<S: Server> Actor<S> {
    /// Spawn an actor with a single worker: strict FIFO processing, state
    /// owned exclusively by the worker task.
    pub fn spawn(name: impl Into<String>, server: S, config: MailboxConfig) -> Self {
        Self::spawn_with(name, vec![server], config)
    }

    fn spawn_with(name: impl Into<String>, servers: Vec<S>, config: MailboxConfig) -> Self {
        let name = name.into();
        let (tx, rx) = match config.capacity {
            Some(capacity) => async_channel::bounded(capacity),
            None => async_channel::unbounded(),
        };
        let (done_tx, done_rx) = watch::channel(false);
        let guard = std::sync::Arc::new(CompletionGuard { tx: done_tx });

        let workers = servers.len();
        debug!(actor = %name, workers, capacity = ?config.capacity, "starting actor");

        for (slot, server) in servers.into_iter().enumerate() {
            let rx = rx.clone();
            let worker_name = name.clone();
            let guard = std::sync::Arc::clone(&guard);
            tokio::spawn(async move {
                run_worker(worker_name, slot, server, rx).await;
                drop(guard);
            });
        }

        Self {
            name,
            tx,
            completed: done_rx,
        }
    }

    /// Fire-and-forget post. Returns `false` when the mailbox has been
    /// stopped or a bounded mailbox is full.
    pub fn cast(&self, request: S::Request) -> bool {
        self.tx
            .try_send(Queued {
                request,
                resolver: None,
            })
            .is_ok()
    }

    /// Request/response call. The returned future resolves exactly once,
    /// after the message has been processed, with the handler's reply or
    /// fault. Fails with [`CallError::MailboxClosed`] if the mailbox no
    /// longer accepts messages.
    pub async fn call(&self, request: S::Request) -> Result<S::Reply, CallError> {
        let (resolver, rx) = oneshot::channel();
        self.tx
            .send(Queued {
                request,
                resolver: Some(resolver),
            })
            .await
            .map_err(|_| CallError::MailboxClosed)?;
        rx.await.map_err(|_| CallError::Canceled)?
    }

    /// Signal shutdown: no new messages are accepted, already-enqueued
    /// messages drain. Idempotent. Await [`Actor::completion`] for the
    /// drain to finish.
    pub fn stop(&self) {
        if self.tx.close() {
            debug!(actor = %self.name, "actor stopping, mailbox draining");
        }
    }

    /// Resolves once every worker has exited (mailbox fully drained after
    /// [`Actor::stop`]).
    pub async fn completion(&self) {
        let mut rx = self.completed.clone();
        // Ok: guard sent `true` before dropping; Err: value already observed.
        let _ = rx.wait_for(|done| *done).await;
    }

    /// Number of messages waiting in the mailbox.
    pub fn len(&self) -> usize {
        self.tx.len()
    }

    /// True when no messages are waiting.
    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    /// Actor name, used in logs.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<S: Server + Clone> Actor<S> {
    /// Spawn an actor with `workers` concurrent workers over one shared
    /// mailbox. Messages are started in enqueue order; completion order is
    /// unspecified. Each worker owns its own clone of the server, so state
    /// meant to be shared across workers goes in an `Arc` inside it.
    pub fn spawn_pool(
        name: impl Into<String>,
        server: S,
        workers: usize,
        config: MailboxConfig,
    ) -> Self {
        let workers = workers.max(1);
        let servers = std::iter::repeat_with(|| server.clone())
            .take(workers)
            .collect();
        Self::spawn_with(name, servers, config)
    }
}

/// Sends the completion signal when the last worker drops its reference.
struct CompletionGuard {
    tx: watch::Sender<bool>,
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        let _ = self.tx.send(true);
    }
}

async fn run_worker<S: Server>(
    name: String,
    slot: usize,
    mut server: S,
    rx: async_channel::Receiver<Queued<S>>,
) {
    while let Ok(queued) = rx.recv().await {
        let result = server.handle_call(queued.request).await;
        match queued.resolver {
            Some(resolver) => {
                if let Err(unobserved) = resolver.send(result) {
                    // Caller went away; surface faults rather than lose them.
                    if let Err(fault) = unobserved {
                        warn!(actor = %name, slot, %fault, "unobserved handler fault");
                    }
                }
            }
            None => {
                if let Err(fault) = result {
                    error!(actor = %name, slot, category = fault.category(), %fault,
                        "fire-and-forget handler fault");
                }
            }
        }
    }
    debug!(actor = %name, slot, "worker drained, exiting");
}
