//! End-to-end cluster flows over the in-memory hub: several nodes, each with
//! its own runtime state, exchanging casts, calls and batches.

use std::sync::Arc;
use std::time::Duration;

use actors::{Actor, MailboxConfig, Server};
use async_trait::async_trait;
use cluster::{ClusterError, InMemoryHub, JsonCodec, Node};
use config::{BrokerSettings, ClusterConfig};
use routing::PolicyKind;

/// Replies with "<node>:<request>"; faults on the request "boom".
struct Echo {
    node: String,
}

#[async_trait]
impl Server for Echo {
    type Request = String;
    type Reply = String;

    async fn handle_call(&mut self, request: String) -> Result<String, actors::CallError> {
        if request == "boom" {
            return Err(actors::CallError::fault("echo exploded"));
        }
        Ok(format!("{}:{}", self.node, request))
    }
}

/// Accumulates additions; a call returns the running total.
struct Counter {
    total: i64,
}

#[async_trait]
impl Server for Counter {
    type Request = i64;
    type Reply = i64;

    async fn handle_call(&mut self, request: i64) -> Result<i64, actors::CallError> {
        self.total += request;
        Ok(self.total)
    }
}

fn config(current: &str, names: &[&str], policy: PolicyKind, timeout_ms: u64) -> ClusterConfig {
    ClusterConfig {
        cluster_name: "itest".to_string(),
        current_node: current.to_string(),
        dispatch_policy: policy,
        remote_timeout_ms: timeout_ms,
        nodes: names.iter().map(|n| n.to_string()).collect(),
        broker: BrokerSettings {
            host: "localhost".to_string(),
            port: 5672,
            username: "guest".to_string(),
            password: "guest".to_string(),
            vhost: "/".to_string(),
            exchange: "itest".to_string(),
        },
    }
}

/// Start one node per name on a shared hub, each serving "echo".
fn start_cluster(
    hub: &InMemoryHub,
    names: &[&str],
    policy: PolicyKind,
    timeout_ms: u64,
) -> Vec<Node<JsonCodec>> {
    names
        .iter()
        .map(|name| {
            let transport = Arc::new(hub.endpoint(*name));
            let node =
                Node::start(&config(name, names, policy, timeout_ms), transport, JsonCodec)
                    .unwrap();
            let echo = Actor::spawn(
                format!("echo@{name}"),
                Echo {
                    node: name.to_string(),
                },
                MailboxConfig::default(),
            );
            node.register("echo", &echo).unwrap();
            node
        })
        .collect()
}

#[test_log::test(tokio::test)]
async fn remote_call_round_trips_through_the_hub() {
    let hub = InMemoryHub::new();
    let nodes = start_cluster(&hub, &["node-0", "node-1"], PolicyKind::HashMod, 3000);

    let reply: String = nodes[0]
        .call_to("node-1", "echo", "hello".to_string())
        .await
        .unwrap();
    assert_eq!(reply, "node-1:hello");
    assert_eq!(nodes[0].pending_calls(), 0);

    for node in &nodes {
        node.shutdown();
    }
}

#[tokio::test]
async fn keyed_call_is_served_by_the_responsible_node() {
    let hub = InMemoryHub::new();
    let nodes = start_cluster(
        &hub,
        &["node-0", "node-1", "node-2"],
        PolicyKind::ConsistentHashKetama,
        3000,
    );

    for key in ["order-1", "order-2", "order-3", "order-4"] {
        let owner = nodes[0].calc_node(key).to_string();
        let reply: String = nodes[0].call(key, "echo", key.to_string()).await.unwrap();
        assert_eq!(reply, format!("{owner}:{key}"));
        // Every node agrees on the owner.
        for node in &nodes {
            assert_eq!(node.calc_node(key), owner);
        }
    }
}

#[tokio::test]
async fn remote_fault_comes_back_as_remote_error() {
    let hub = InMemoryHub::new();
    let nodes = start_cluster(&hub, &["node-0", "node-1"], PolicyKind::HashMod, 3000);

    let err = nodes[0]
        .call_to::<String, String>("node-1", "echo", "boom".to_string())
        .await
        .unwrap_err();
    assert_eq!(err.category(), "remote");
    assert!(err.to_string().contains("echo exploded"));
    assert_eq!(nodes[0].pending_calls(), 0);
}

#[tokio::test]
async fn unknown_remote_method_faults_back() {
    let hub = InMemoryHub::new();
    let nodes = start_cluster(&hub, &["node-0", "node-1"], PolicyKind::HashMod, 3000);

    let err = nodes[0]
        .call_to::<String, String>("node-1", "nope", "x".to_string())
        .await
        .unwrap_err();
    assert_eq!(err.category(), "remote");
    assert!(err.to_string().contains("unknown method 'nope'"));
}

#[tokio::test]
async fn failed_publish_cleans_up_the_pending_entry() {
    let hub = InMemoryHub::new();
    let nodes = start_cluster(&hub, &["node-0", "node-1"], PolicyKind::HashMod, 3000);
    hub.disconnect("node-1");

    let err = nodes[0]
        .call_to::<String, String>("node-1", "echo", "hello".to_string())
        .await
        .unwrap_err();
    assert_eq!(err.category(), "transport");
    assert_eq!(nodes[0].pending_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn lost_response_times_out_as_no_response() {
    let hub = InMemoryHub::new();
    let nodes = start_cluster(&hub, &["node-0", "node-1"], PolicyKind::HashMod, 500);
    hub.drop_responses_to("node-0");

    let err = nodes[0]
        .call_to::<String, String>("node-1", "echo", "hello".to_string())
        .await
        .unwrap_err();
    assert!(matches!(err, ClusterError::TimeoutNoResponse { ref node, .. } if node == "node-1"));
    assert_eq!(nodes[0].pending_calls(), 0);
}

#[tokio::test]
async fn call_all_gathers_replies_in_node_order() {
    let hub = InMemoryHub::new();
    let nodes = start_cluster(
        &hub,
        &["node-0", "node-1", "node-2"],
        PolicyKind::HashMod,
        3000,
    );

    let replies: Vec<String> = nodes[1].call_all("echo", "ping".to_string()).await.unwrap();
    assert_eq!(
        replies,
        vec!["node-0:ping", "node-1:ping", "node-2:ping"]
    );
}

#[test_log::test(tokio::test)]
async fn batched_call_merges_replies_in_request_order() {
    let hub = InMemoryHub::new();
    let nodes = start_cluster(
        &hub,
        &["node-0", "node-1", "node-2"],
        PolicyKind::ConsistentHashFnv1,
        3000,
    );

    let requests: Vec<String> = (0..20).map(|i| format!("req-{i}")).collect();
    let replies: Vec<String> = nodes[0]
        .call_batch("echo", requests.clone(), |request| request.clone())
        .await
        .unwrap();

    assert_eq!(replies.len(), requests.len());
    for (request, reply) in requests.iter().zip(&replies) {
        let owner = nodes[0].calc_node(request);
        assert_eq!(reply, &format!("{owner}:{request}"));
    }
}

#[tokio::test]
async fn batched_call_to_one_node_travels_as_one_envelope() {
    let hub = InMemoryHub::new();
    let nodes = start_cluster(&hub, &["node-0", "node-1"], PolicyKind::HashMod, 3000);

    // Same key for every element forces a single partition.
    let replies: Vec<String> = nodes[0]
        .call_batch(
            "echo",
            vec!["a".to_string(), "b".to_string(), "c".to_string()],
            |_| "same-key".to_string(),
        )
        .await
        .unwrap();

    let owner = nodes[0].calc_node("same-key").to_string();
    assert_eq!(
        replies,
        vec![
            format!("{owner}:a"),
            format!("{owner}:b"),
            format!("{owner}:c")
        ]
    );
}

#[tokio::test]
async fn one_faulting_element_fails_the_whole_batch() {
    let hub = InMemoryHub::new();
    let nodes = start_cluster(&hub, &["node-0", "node-1"], PolicyKind::HashMod, 3000);

    let err = nodes[0]
        .call_batch::<String, String, _>(
            "echo",
            vec!["ok-1".to_string(), "boom".to_string(), "ok-2".to_string()],
            |request| request.clone(),
        )
        .await
        .unwrap_err();
    assert!(err.category() == "remote" || err.category() == "handler");
}

#[tokio::test]
async fn empty_batch_returns_immediately() {
    let hub = InMemoryHub::new();
    let nodes = start_cluster(&hub, &["node-0"], PolicyKind::HashMod, 3000);

    let replies: Vec<String> = nodes[0]
        .call_batch("echo", Vec::<String>::new(), |request| request.clone())
        .await
        .unwrap();
    assert!(replies.is_empty());
}

#[tokio::test]
async fn remote_cast_feeds_the_same_mailbox_as_calls() {
    let hub = InMemoryHub::new();
    let names = ["node-0", "node-1"];
    let nodes = start_cluster(&hub, &names, PolicyKind::HashMod, 3000);

    let counter = Actor::spawn("counter", Counter { total: 0 }, MailboxConfig::default());
    nodes[1].register_oneway("counter.add", &counter).unwrap();
    nodes[1].register("counter.read", &counter).unwrap();

    for _ in 0..5 {
        nodes[0].cast_to("node-1", "counter.add", 2i64).await.unwrap();
    }
    // Same mailbox, so the read is ordered after every cast.
    let total: i64 = nodes[0]
        .call_to("node-1", "counter.read", 0i64)
        .await
        .unwrap();
    assert_eq!(total, 10);
}

#[tokio::test]
async fn polling_round_robins_across_nodes() {
    let hub = InMemoryHub::new();
    let nodes = start_cluster(
        &hub,
        &["node-0", "node-1", "node-2"],
        PolicyKind::Polling,
        3000,
    );

    let mut seen = std::collections::HashSet::new();
    for _ in 0..3 {
        let reply: String = nodes[0]
            .call("ignored-key", "echo", "hi".to_string())
            .await
            .unwrap();
        seen.insert(reply);
    }
    assert_eq!(seen.len(), 3);
}

#[tokio::test]
async fn shutdown_fails_inflight_calls() {
    let hub = InMemoryHub::new();
    let nodes = start_cluster(&hub, &["node-0", "node-1"], PolicyKind::HashMod, 60_000);
    hub.drop_responses_to("node-0");

    let caller = nodes[0].clone();
    let inflight = tokio::spawn(async move {
        caller
            .call_to::<String, String>("node-1", "echo", "hello".to_string())
            .await
    });
    // Give the request time to publish before shutting down.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(nodes[0].pending_calls(), 1);
    nodes[0].shutdown();

    let err = inflight.await.unwrap().unwrap_err();
    assert_eq!(err.category(), "transport");
    assert_eq!(nodes[0].pending_calls(), 0);
}
