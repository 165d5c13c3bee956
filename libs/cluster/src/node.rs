//! Cluster Node
//!
//! One [`Node`] per process. It routes every call through the dispatch
//! policy, serves calls aimed at the current node through typed in-process
//! routes, and turns everything else into envelopes published over the
//! transport. Callers never know where a method runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use actors::{Actor, Server};
use config::ClusterConfig;
use routing::DispatchPolicy;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use crate::codec::Codec;
use crate::envelope::{Action, Envelope};
use crate::error::{ClusterError, Result};
use crate::processor::MessageProcessor;
use crate::reply::{ReplyBody, ReplyTable};
use crate::transport::Transport;

const REPLY_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

struct NodeInner<C: Codec> {
    cluster_name: String,
    current_node: String,
    remote_timeout: Duration,
    policy: Box<dyn DispatchPolicy>,
    processor: Arc<MessageProcessor<C>>,
    replies: Arc<ReplyTable>,
    transport: Arc<dyn Transport>,
    codec: C,
    correlation: AtomicI64,
}

/// Handle to the local cluster node. Cheap to clone and share.
pub struct Node<C: Codec> {
    inner: Arc<NodeInner<C>>,
}

impl<C: Codec> Clone for Node<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Codec> Node<C> {
    /// Bring the node up: build the dispatch policy, start the reply table
    /// and install the inbound delivery handler on the transport.
    pub fn start(config: &ClusterConfig, transport: Arc<dyn Transport>, codec: C) -> Result<Self> {
        config.validate()?;
        let policy = config.dispatch_policy.build(&config.nodes)?;
        let replies = ReplyTable::start(REPLY_SWEEP_INTERVAL);
        let processor = Arc::new(MessageProcessor::new(codec.clone(), Arc::clone(&transport)));

        {
            let processor = Arc::clone(&processor);
            let replies = Arc::clone(&replies);
            transport.set_delivery_handler(Arc::new(move |envelope| match envelope.action {
                Action::Request => processor.on_request(envelope),
                Action::Response => replies.on_response(envelope),
            }))?;
        }

        info!(
            cluster = %config.cluster_name,
            current_node = %config.current_node,
            nodes = config.nodes.len(),
            policy = %config.dispatch_policy,
            remote_timeout_ms = config.remote_timeout_ms,
            "cluster node started"
        );

        Ok(Self {
            inner: Arc::new(NodeInner {
                cluster_name: config.cluster_name.clone(),
                current_node: config.current_node.clone(),
                remote_timeout: config.remote_timeout(),
                policy,
                processor,
                replies,
                transport,
                codec,
                correlation: AtomicI64::new(0),
            }),
        })
    }

    pub fn cluster_name(&self) -> &str {
        &self.inner.cluster_name
    }

    pub fn current_node(&self) -> &str {
        &self.inner.current_node
    }

    /// All nodes the dispatch policy routes over.
    pub fn all_nodes(&self) -> &[String] {
        self.inner.policy.nodes()
    }

    /// Node responsible for `key` under the configured policy.
    pub fn calc_node(&self, key: &str) -> &str {
        self.inner.policy.node_for(key)
    }

    /// Responsible node per key, for callers that pre-partition work.
    pub fn calc_nodes<'a>(&self, keys: impl IntoIterator<Item = &'a str>) -> HashMap<String, String> {
        keys.into_iter()
            .map(|key| (key.to_string(), self.calc_node(key).to_string()))
            .collect()
    }

    /// Number of remote calls still awaiting a response.
    pub fn pending_calls(&self) -> usize {
        self.inner.replies.pending()
    }

    /// Expose `actor` as a fire-and-forget method.
    pub fn register_oneway<S>(&self, method: &str, actor: &Actor<S>) -> Result<()>
    where
        S: Server,
        S::Request: DeserializeOwned,
    {
        self.inner.processor.register_oneway(method, actor)
    }

    /// Expose `actor` as a request-reply method.
    pub fn register<S>(&self, method: &str, actor: &Actor<S>) -> Result<()>
    where
        S: Server,
        S::Request: DeserializeOwned,
        S::Reply: Serialize + Sync,
    {
        self.inner.processor.register_two_way(method, actor)
    }

    /// Fire-and-forget to the node responsible for `key`.
    pub async fn cast<Req>(&self, key: &str, method: &str, request: Req) -> Result<()>
    where
        Req: Serialize + Send + 'static,
    {
        let node = self.calc_node(key).to_string();
        self.cast_to(&node, method, request).await
    }

    /// Fire-and-forget to a named node.
    pub async fn cast_to<Req>(&self, node: &str, method: &str, request: Req) -> Result<()>
    where
        Req: Serialize + Send + 'static,
    {
        if node == self.inner.current_node {
            let route = self.inner.processor.cast_route::<Req>(method)?;
            if route.cast(request) {
                Ok(())
            } else {
                Err(ClusterError::handler(format!(
                    "mailbox for method '{method}' rejected the request"
                )))
            }
        } else {
            let timeout = self.inner.remote_timeout;
            let payload = self.inner.codec.encode(&request)?;
            let envelope = Envelope::request(node, method, timeout.as_millis() as u64)
                .with_payload(payload);
            self.inner.transport.publish(envelope, timeout).await
        }
    }

    /// Fire-and-forget to every node. Fails on the first node that rejects.
    pub async fn cast_all<Req>(&self, method: &str, request: Req) -> Result<()>
    where
        Req: Serialize + Clone + Send + 'static,
    {
        let nodes: Vec<String> = self.all_nodes().to_vec();
        for node in &nodes {
            self.cast_to(node, method, request.clone()).await?;
        }
        Ok(())
    }

    /// Call the node responsible for `key` and await its reply.
    pub async fn call<Req, Reply>(&self, key: &str, method: &str, request: Req) -> Result<Reply>
    where
        Req: Serialize + Send + 'static,
        Reply: DeserializeOwned + Send + 'static,
    {
        let node = self.calc_node(key).to_string();
        self.call_to_with_timeout(&node, method, request, self.inner.remote_timeout)
            .await
    }

    /// Call a named node with the default budget.
    pub async fn call_to<Req, Reply>(&self, node: &str, method: &str, request: Req) -> Result<Reply>
    where
        Req: Serialize + Send + 'static,
        Reply: DeserializeOwned + Send + 'static,
    {
        self.call_to_with_timeout(node, method, request, self.inner.remote_timeout)
            .await
    }

    /// Call a named node with an explicit end-to-end budget.
    pub async fn call_to_with_timeout<Req, Reply>(
        &self,
        node: &str,
        method: &str,
        request: Req,
        timeout: Duration,
    ) -> Result<Reply>
    where
        Req: Serialize + Send + 'static,
        Reply: DeserializeOwned + Send + 'static,
    {
        if node == self.inner.current_node {
            let route = self.inner.processor.call_route::<Req, Reply>(method)?;
            return route.call(request).await;
        }

        let payload = self.inner.codec.encode(&request)?;
        match self.remote_call(node, method, vec![payload], false, timeout).await? {
            ReplyBody::Single(bytes) => self.inner.codec.decode(&bytes),
            ReplyBody::Batch(_) => Err(ClusterError::remote(
                "batched response to a single call",
            )),
        }
    }

    /// Call every node with the same request; replies come back in node-list
    /// order. Any failing node fails the whole operation.
    pub async fn call_all<Req, Reply>(&self, method: &str, request: Req) -> Result<Vec<Reply>>
    where
        Req: Serialize + Clone + Send + 'static,
        Reply: DeserializeOwned + Send + 'static,
    {
        let nodes: Vec<String> = self.all_nodes().to_vec();
        let calls = nodes
            .iter()
            .map(|node| self.call_to(node, method, request.clone()));
        futures::future::try_join_all(calls).await
    }

    /// Batched call. Requests are partitioned by the node responsible for
    /// `key(request)`, each partition travels in a single envelope, and the
    /// replies are re-merged into the original request order. Any failing
    /// partition fails the whole batch.
    pub async fn call_batch<Req, Reply, K>(
        &self,
        method: &str,
        requests: Vec<Req>,
        key: K,
    ) -> Result<Vec<Reply>>
    where
        Req: Serialize + Send + 'static,
        Reply: DeserializeOwned + Send + 'static,
        K: Fn(&Req) -> String,
    {
        if requests.is_empty() {
            return Ok(Vec::new());
        }
        let total = requests.len();

        let mut partitions: HashMap<String, Vec<(usize, Req)>> = HashMap::new();
        for (index, request) in requests.into_iter().enumerate() {
            let node = self.calc_node(&key(&request)).to_string();
            partitions.entry(node).or_default().push((index, request));
        }
        debug!(method, total, partitions = partitions.len(), "dispatching batched call");

        let calls = partitions
            .into_iter()
            .map(|(node, part)| self.call_partition::<Req, Reply>(node, method, part));
        let merged = futures::future::try_join_all(calls).await?;

        let mut slots: Vec<Option<Reply>> = (0..total).map(|_| None).collect();
        for (index, reply) in merged.into_iter().flatten() {
            slots[index] = Some(reply);
        }
        slots
            .into_iter()
            .map(|slot| {
                slot.ok_or_else(|| ClusterError::remote("missing reply in batched response"))
            })
            .collect()
    }

    async fn call_partition<Req, Reply>(
        &self,
        node: String,
        method: &str,
        partition: Vec<(usize, Req)>,
    ) -> Result<Vec<(usize, Reply)>>
    where
        Req: Serialize + Send + 'static,
        Reply: DeserializeOwned + Send + 'static,
    {
        let (indices, requests): (Vec<usize>, Vec<Req>) = partition.into_iter().unzip();

        if node == self.inner.current_node {
            let route = self.inner.processor.call_route::<Req, Reply>(method)?;
            let mut replies = Vec::with_capacity(requests.len());
            for request in requests {
                replies.push(route.call(request).await?);
            }
            return Ok(indices.into_iter().zip(replies).collect());
        }

        let mut payloads = Vec::with_capacity(requests.len());
        for request in &requests {
            payloads.push(self.inner.codec.encode(request)?);
        }
        let expected = payloads.len();
        let timeout = self.inner.remote_timeout;
        match self.remote_call(&node, method, payloads, true, timeout).await? {
            ReplyBody::Batch(items) if items.len() == expected => {
                let mut replies = Vec::with_capacity(items.len());
                for bytes in &items {
                    replies.push(self.inner.codec.decode(bytes)?);
                }
                Ok(indices.into_iter().zip(replies).collect())
            }
            ReplyBody::Batch(items) => Err(ClusterError::remote(format!(
                "batched response has {} replies, expected {expected}",
                items.len()
            ))),
            ReplyBody::Single(_) => Err(ClusterError::remote(
                "single response to a batched call",
            )),
        }
    }

    /// Publish a two-way request and await the raw response body. The
    /// registration is removed again when the publish fails, so a broken
    /// publish surfaces as a transport error, not a later timeout.
    async fn remote_call(
        &self,
        node: &str,
        method: &str,
        mut payloads: Vec<Vec<u8>>,
        batched: bool,
        timeout: Duration,
    ) -> Result<ReplyBody> {
        let correlation_id = self.inner.correlation.fetch_add(1, Ordering::Relaxed);
        let receiver = self.inner.replies.register(node, correlation_id, timeout)?;

        let envelope = Envelope::request(node, method, timeout.as_millis() as u64)
            .with_reply(self.inner.current_node.clone(), correlation_id);
        let envelope = if batched {
            envelope.with_payloads(payloads)
        } else {
            match payloads.pop() {
                Some(payload) => envelope.with_payload(payload),
                None => envelope,
            }
        };

        if let Err(error) = self.inner.transport.publish(envelope, timeout).await {
            self.inner.replies.remove(correlation_id);
            return Err(error);
        }
        self.inner.replies.mark_sent(correlation_id);

        receiver
            .await
            .map_err(|_| ClusterError::transport("reply channel closed"))?
    }

    /// Stop the reply sweeper and fail all in-flight calls. Idempotent;
    /// registered actors keep serving local and inbound traffic until their
    /// own mailboxes are stopped.
    pub fn shutdown(&self) {
        self.inner.replies.shutdown();
        info!(cluster = %self.inner.cluster_name, node = %self.inner.current_node, "cluster node shut down");
    }
}
