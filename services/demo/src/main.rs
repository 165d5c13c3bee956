//! Demo: a three-node cluster in one process, wired over the in-memory hub.
//!
//! Each node runs a counter actor. Keyed calls land on whichever node the
//! Ketama ring assigns, batches are partitioned and re-merged, and the
//! output shows which node served what.

use std::sync::Arc;

use actors::{Actor, MailboxConfig, Server};
use anyhow::Result;
use async_trait::async_trait;
use cluster::{InMemoryHub, JsonCodec, Node};
use config::{BrokerSettings, ClusterConfig};
use routing::PolicyKind;
use tracing::info;

struct Counter {
    node: String,
    total: i64,
}

#[async_trait]
impl Server for Counter {
    type Request = i64;
    type Reply = String;

    async fn handle_call(&mut self, amount: i64) -> Result<String, actors::CallError> {
        self.total += amount;
        Ok(format!("{} total={}", self.node, self.total))
    }
}

fn node_config(current: &str, nodes: &[String]) -> ClusterConfig {
    ClusterConfig {
        cluster_name: "demo".to_string(),
        current_node: current.to_string(),
        dispatch_policy: PolicyKind::ConsistentHashKetama,
        remote_timeout_ms: 3000,
        nodes: nodes.to_vec(),
        broker: BrokerSettings {
            host: "localhost".to_string(),
            port: 5672,
            username: "guest".to_string(),
            password: "guest".to_string(),
            vhost: "/".to_string(),
            exchange: "demo".to_string(),
        },
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let names: Vec<String> = (0..3).map(|i| format!("node-{i}")).collect();
    let hub = InMemoryHub::new();

    let mut nodes = Vec::new();
    for name in &names {
        let node = Node::start(
            &node_config(name, &names),
            Arc::new(hub.endpoint(name.as_str())),
            JsonCodec,
        )?;
        let counter = Actor::spawn(
            format!("counter@{name}"),
            Counter {
                node: name.clone(),
                total: 0,
            },
            MailboxConfig::default(),
        );
        node.register("counter.add", &counter)?;
        nodes.push(node);
    }

    let front = &nodes[0];
    for key in ["order-1", "order-2", "order-3", "order-4", "order-5"] {
        let reply: String = front.call(key, "counter.add", 1i64).await?;
        info!(key, owner = front.calc_node(key), reply = %reply, "keyed call");
    }

    let batch: Vec<i64> = (1..=10).collect();
    let replies: Vec<String> = front
        .call_batch("counter.add", batch, |amount| format!("order-{amount}"))
        .await?;
    for reply in &replies {
        info!(reply = %reply, "batched call");
    }

    let broadcast: Vec<String> = front.call_all("counter.add", 100i64).await?;
    for reply in &broadcast {
        info!(reply = %reply, "broadcast call");
    }

    for node in &nodes {
        node.shutdown();
    }
    Ok(())
}
