//! Inbound Method Dispatch
//!
//! Maps method names to registered actors. Registration is one-shot per
//! method and happens at startup; a duplicate registration is a fatal
//! configuration error. Each entry keeps two faces of the same actor: a
//! byte-level inbound path for envelopes arriving off the wire, and typed
//! routes the node uses to serve local calls without a codec round trip.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use actors::{Actor, Server};
use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::codec::Codec;
use crate::envelope::{Envelope, RemoteFault};
use crate::error::{ClusterError, Result};
use crate::transport::Transport;

type InboundFn = Arc<dyn Fn(Envelope) + Send + Sync>;

/// Typed fire-and-forget route to a local actor.
pub(crate) struct CastRoute<Req> {
    run: Arc<dyn Fn(Req) -> bool + Send + Sync>,
}

impl<Req> std::fmt::Debug for CastRoute<Req> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CastRoute").finish_non_exhaustive()
    }
}

impl<Req> Clone for CastRoute<Req> {
    fn clone(&self) -> Self {
        Self {
            run: Arc::clone(&self.run),
        }
    }
}

impl<Req: Send + 'static> CastRoute<Req> {
    pub fn cast(&self, request: Req) -> bool {
        (self.run)(request)
    }
}

/// Typed request-reply route to a local actor.
pub(crate) struct CallRoute<Req, Reply> {
    run: Arc<
        dyn Fn(Req) -> BoxFuture<'static, std::result::Result<Reply, actors::CallError>>
            + Send
            + Sync,
    >,
}

impl<Req, Reply> std::fmt::Debug for CallRoute<Req, Reply> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallRoute").finish_non_exhaustive()
    }
}

impl<Req, Reply> Clone for CallRoute<Req, Reply> {
    fn clone(&self) -> Self {
        Self {
            run: Arc::clone(&self.run),
        }
    }
}

impl<Req: Send + 'static, Reply: Send + 'static> CallRoute<Req, Reply> {
    pub async fn call(&self, request: Req) -> Result<Reply> {
        Ok((self.run)(request).await?)
    }
}

struct MethodEntry {
    inbound: InboundFn,
    cast_route: Box<dyn Any + Send + Sync>,
    call_route: Box<dyn Any + Send + Sync>,
}

/// Per-node registry of inbound methods.
pub struct MessageProcessor<C: Codec> {
    codec: C,
    transport: Arc<dyn Transport>,
    methods: RwLock<HashMap<String, MethodEntry>>,
}

impl<C: Codec> MessageProcessor<C> {
    pub fn new(codec: C, transport: Arc<dyn Transport>) -> Self {
        Self {
            codec,
            transport,
            methods: RwLock::new(HashMap::new()),
        }
    }

    /// Register a fire-and-forget method. Inbound envelopes are decoded and
    /// cast into the actor's mailbox; no response is ever produced.
    pub fn register_oneway<S>(&self, method: &str, actor: &Actor<S>) -> Result<()>
    where
        S: Server,
        S::Request: DeserializeOwned,
    {
        let inbound = one_way_inbound(method, actor.clone(), self.codec.clone());
        self.insert(method, inbound, actor)
    }

    /// Register a request-reply method. Inbound envelopes are served through
    /// the actor and the reply published back to the requesting node.
    pub fn register_two_way<S>(&self, method: &str, actor: &Actor<S>) -> Result<()>
    where
        S: Server,
        S::Request: DeserializeOwned,
        S::Reply: Serialize + Sync,
    {
        let inbound = two_way_inbound(actor.clone(), self.codec.clone(), Arc::clone(&self.transport));
        self.insert(method, inbound, actor)
    }

    fn insert<S: Server>(&self, method: &str, inbound: InboundFn, actor: &Actor<S>) -> Result<()> {
        let cast_route = CastRoute {
            run: {
                let actor = actor.clone();
                Arc::new(move |request| actor.cast(request))
            },
        };
        let call_route = CallRoute {
            run: {
                let actor = actor.clone();
                Arc::new(move |request| {
                    let actor = actor.clone();
                    Box::pin(async move { actor.call(request).await })
                        as BoxFuture<'static, std::result::Result<S::Reply, actors::CallError>>
                })
            },
        };
        let mut methods = self.methods.write();
        if methods.contains_key(method) {
            return Err(ClusterError::configuration(format!(
                "method '{method}' is already registered"
            )));
        }
        methods.insert(
            method.to_string(),
            MethodEntry {
                inbound,
                cast_route: Box::new(cast_route),
                call_route: Box::new(call_route),
            },
        );
        debug!(method, actor = %actor.name(), "registered inbound method");
        Ok(())
    }

    /// Dispatch an inbound request envelope.
    pub fn on_request(&self, envelope: Envelope) {
        let inbound = self
            .methods
            .read()
            .get(&envelope.method)
            .map(|entry| Arc::clone(&entry.inbound));
        match inbound {
            Some(inbound) => inbound(envelope),
            None => self.reject_unknown(envelope),
        }
    }

    fn reject_unknown(&self, envelope: Envelope) {
        warn!(method = %envelope.method, "request for unregistered method");
        if !envelope.expects_reply() {
            return;
        }
        let Some(reply_to) = envelope.reply_to.clone() else {
            return;
        };
        let Some(budget) = envelope.remaining_budget() else {
            return;
        };
        let response = Envelope::response_to(&envelope, reply_to).with_fault(RemoteFault::new(
            format!("unknown method '{}'", envelope.method),
        ));
        let transport = Arc::clone(&self.transport);
        tokio::spawn(async move {
            if let Err(error) = transport.publish(response, budget).await {
                warn!(error = %error, "failed to publish unknown-method fault");
            }
        });
    }

    /// Typed local route for fire-and-forget delivery.
    pub(crate) fn cast_route<Req: 'static>(&self, method: &str) -> Result<CastRoute<Req>> {
        let methods = self.methods.read();
        let entry = methods
            .get(method)
            .ok_or_else(|| ClusterError::routing(format!("unknown method '{method}'")))?;
        entry
            .cast_route
            .downcast_ref::<CastRoute<Req>>()
            .cloned()
            .ok_or_else(|| {
                ClusterError::routing(format!(
                    "method '{method}' is registered with a different request type"
                ))
            })
    }

    /// Typed local route for request-reply calls.
    pub(crate) fn call_route<Req: 'static, Reply: 'static>(
        &self,
        method: &str,
    ) -> Result<CallRoute<Req, Reply>> {
        let methods = self.methods.read();
        let entry = methods
            .get(method)
            .ok_or_else(|| ClusterError::routing(format!("unknown method '{method}'")))?;
        entry
            .call_route
            .downcast_ref::<CallRoute<Req, Reply>>()
            .cloned()
            .ok_or_else(|| {
                ClusterError::routing(format!(
                    "method '{method}' is registered with different request/reply types"
                ))
            })
    }
}

fn envelope_items(envelope: &mut Envelope) -> Option<Vec<Vec<u8>>> {
    if let Some(payloads) = envelope.payloads.take() {
        Some(payloads)
    } else {
        envelope.payload.take().map(|payload| vec![payload])
    }
}

fn one_way_inbound<S, C>(method: &str, actor: Actor<S>, codec: C) -> InboundFn
where
    S: Server,
    S::Request: DeserializeOwned,
    C: Codec,
{
    let method = method.to_string();
    Arc::new(move |mut envelope: Envelope| {
        let Some(items) = envelope_items(&mut envelope) else {
            warn!(method = %method, "one-way request without payload");
            return;
        };
        for bytes in items {
            match codec.decode::<S::Request>(&bytes) {
                Ok(request) => {
                    if !actor.cast(request) {
                        warn!(method = %method, actor = %actor.name(), "mailbox rejected one-way request");
                    }
                }
                Err(error) => {
                    warn!(method = %method, error = %error, "dropping malformed one-way request");
                    return;
                }
            }
        }
    })
}

fn two_way_inbound<S, C>(actor: Actor<S>, codec: C, transport: Arc<dyn Transport>) -> InboundFn
where
    S: Server,
    S::Request: DeserializeOwned,
    S::Reply: Serialize + Sync,
    C: Codec,
{
    Arc::new(move |envelope: Envelope| {
        let actor = actor.clone();
        let codec = codec.clone();
        let transport = Arc::clone(&transport);
        tokio::spawn(serve_request(actor, codec, transport, envelope));
    })
}

/// Serve one inbound request end to end: decode, run through the actor in
/// order, reply. A batched envelope fails as a whole on the first faulting
/// element. Replies whose caller has already timed out are dropped.
async fn serve_request<S, C>(
    actor: Actor<S>,
    codec: C,
    transport: Arc<dyn Transport>,
    mut envelope: Envelope,
) where
    S: Server,
    S::Request: DeserializeOwned,
    S::Reply: Serialize + Sync,
    C: Codec,
{
    let batched = envelope.payloads.is_some();
    let Some(items) = envelope_items(&mut envelope) else {
        warn!(method = %envelope.method, "request without payload");
        respond_fault(&transport, &envelope, "request carried no payload").await;
        return;
    };

    let mut requests = Vec::with_capacity(items.len());
    for bytes in &items {
        match codec.decode::<S::Request>(bytes) {
            Ok(request) => requests.push(request),
            Err(error) => {
                warn!(method = %envelope.method, error = %error, "malformed request payload");
                respond_fault(&transport, &envelope, format!("malformed payload: {error}")).await;
                return;
            }
        }
    }

    let mut replies = Vec::with_capacity(requests.len());
    for request in requests {
        match actor.call(request).await {
            Ok(reply) => replies.push(reply),
            Err(error) => {
                respond_fault(&transport, &envelope, error.to_string()).await;
                return;
            }
        }
    }

    let Some(reply_to) = envelope.reply_to.clone() else {
        return;
    };
    let Some(budget) = envelope.remaining_budget() else {
        debug!(
            method = %envelope.method,
            elapsed_ms = envelope.elapsed_ms(),
            timeout_ms = envelope.timeout_ms,
            "caller budget exhausted, dropping reply"
        );
        return;
    };

    let mut encoded = Vec::with_capacity(replies.len());
    for reply in &replies {
        match codec.encode(reply) {
            Ok(bytes) => encoded.push(bytes),
            Err(error) => {
                warn!(method = %envelope.method, error = %error, "failed to encode reply");
                respond_fault(&transport, &envelope, format!("reply encoding failed: {error}"))
                    .await;
                return;
            }
        }
    }

    let response = Envelope::response_to(&envelope, reply_to);
    let response = if batched {
        response.with_payloads(encoded)
    } else {
        match encoded.pop() {
            Some(bytes) => response.with_payload(bytes),
            None => response.with_fault(RemoteFault::new("request carried no payload")),
        }
    };
    if let Err(error) = transport.publish(response, budget).await {
        warn!(method = %envelope.method, error = %error, "failed to publish reply");
    }
}

async fn respond_fault(
    transport: &Arc<dyn Transport>,
    envelope: &Envelope,
    message: impl Into<String>,
) {
    let Some(reply_to) = envelope.reply_to.clone() else {
        return;
    };
    let Some(budget) = envelope.remaining_budget() else {
        return;
    };
    let response =
        Envelope::response_to(envelope, reply_to).with_fault(RemoteFault::new(message.into()));
    if let Err(error) = transport.publish(response, budget).await {
        warn!(method = %envelope.method, error = %error, "failed to publish fault reply");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JsonCodec;
    use crate::transport::InMemoryHub;
    use actors::MailboxConfig;
    use async_trait::async_trait;

    struct Echo;

    #[async_trait]
    impl Server for Echo {
        type Request = String;
        type Reply = String;

        async fn handle_call(
            &mut self,
            request: String,
        ) -> std::result::Result<String, actors::CallError> {
            Ok(request)
        }
    }

    fn processor(hub: &InMemoryHub, node: &str) -> MessageProcessor<JsonCodec> {
        MessageProcessor::new(JsonCodec, Arc::new(hub.endpoint(node)))
    }

    #[tokio::test]
    async fn duplicate_method_registration_is_fatal() {
        let hub = InMemoryHub::new();
        let processor = processor(&hub, "node-a");
        let actor = Actor::spawn("echo", Echo, MailboxConfig::default());
        processor.register_two_way("echo", &actor).unwrap();
        let err = processor.register_oneway("echo", &actor).unwrap_err();
        assert_eq!(err.category(), "configuration");
    }

    #[tokio::test]
    async fn local_route_requires_matching_types() {
        let hub = InMemoryHub::new();
        let processor = processor(&hub, "node-a");
        let actor = Actor::spawn("echo", Echo, MailboxConfig::default());
        processor.register_two_way("echo", &actor).unwrap();

        assert!(processor.call_route::<String, String>("echo").is_ok());
        let err = processor.call_route::<u64, u64>("echo").unwrap_err();
        assert_eq!(err.category(), "routing");
        let err = processor.cast_route::<u64>("missing").unwrap_err();
        assert_eq!(err.category(), "routing");
    }

    #[tokio::test]
    async fn unknown_method_faults_back_to_caller() {
        let hub = InMemoryHub::new();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        hub.endpoint("caller")
            .set_delivery_handler(Arc::new(move |envelope| {
                let _ = tx.send(envelope);
            }))
            .unwrap();
        let processor = processor(&hub, "server");

        let request = Envelope::request("server", "nope", 5000).with_reply("caller", 1);
        processor.on_request(request);

        let response = rx.recv().await.unwrap();
        assert_eq!(response.correlation_id, Some(1));
        assert!(response.fault.unwrap().message.contains("unknown method 'nope'"));
    }
}
