//! Dispatch policy implementations.
//!
//! A policy is built once from the configured node list and is immutable
//! afterwards, so `node_for` can be called concurrently without locking.
//! Construction with an empty node list fails with
//! [`PolicyError::EmptyNodeList`]; an uninitialized policy is
//! unrepresentable.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PolicyError, Result};
use crate::hash::{ketama_hash, modified_fnv1_32};

/// Virtual points placed on a ring per physical node.
const RING_REPLICAS: u32 = 250;

/// Strategy mapping an opaque string key to a destination node name.
pub trait DispatchPolicy: Send + Sync {
    /// Destination node for `key`.
    fn node_for(&self, key: &str) -> &str;

    /// All nodes known to this policy.
    fn nodes(&self) -> &[String];
}

/// Policy selector as it appears in configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolicyKind {
    /// Round-robin over the sorted node list; ignores the key
    #[serde(rename = "polling")]
    Polling,
    /// FNV1 hash modulo node count
    #[serde(rename = "hashMod")]
    HashMod,
    /// Consistent hashing, FNV1 ring
    #[serde(rename = "consistentHash_fnv1", alias = "consistentHash")]
    ConsistentHashFnv1,
    /// Consistent hashing, Ketama (MD5) ring
    #[serde(rename = "consistentHash_ketama")]
    ConsistentHashKetama,
}

impl PolicyKind {
    /// Build the policy this kind names over `nodes`.
    pub fn build(self, nodes: &[String]) -> Result<Box<dyn DispatchPolicy>> {
        let policy: Box<dyn DispatchPolicy> = match self {
            PolicyKind::Polling => Box::new(Polling::new(nodes)?),
            PolicyKind::HashMod => Box::new(HashMod::new(nodes)?),
            PolicyKind::ConsistentHashFnv1 => Box::new(Fnv1Ring::new(nodes)?),
            PolicyKind::ConsistentHashKetama => Box::new(KetamaRing::new(nodes)?),
        };
        debug!(policy = %self, nodes = policy.nodes().len(), "built dispatch policy");
        Ok(policy)
    }
}

impl FromStr for PolicyKind {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "polling" => Ok(PolicyKind::Polling),
            "hashMod" => Ok(PolicyKind::HashMod),
            "consistentHash" | "consistentHash_fnv1" => Ok(PolicyKind::ConsistentHashFnv1),
            "consistentHash_ketama" => Ok(PolicyKind::ConsistentHashKetama),
            other => Err(PolicyError::unknown(other)),
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PolicyKind::Polling => "polling",
            PolicyKind::HashMod => "hashMod",
            PolicyKind::ConsistentHashFnv1 => "consistentHash_fnv1",
            PolicyKind::ConsistentHashKetama => "consistentHash_ketama",
        };
        f.write_str(name)
    }
}

/// Sorted, deduplicated copy of the configured node list.
fn sorted_nodes(nodes: &[String]) -> Result<Vec<String>> {
    if nodes.is_empty() {
        return Err(PolicyError::EmptyNodeList);
    }
    let mut out: Vec<String> = nodes.to_vec();
    out.sort();
    out.dedup();
    Ok(out)
}

/// Deduplicated copy preserving the configured order (ring policies).
fn dedup_nodes(nodes: &[String]) -> Result<Vec<String>> {
    if nodes.is_empty() {
        return Err(PolicyError::EmptyNodeList);
    }
    let mut out: Vec<String> = Vec::with_capacity(nodes.len());
    for node in nodes {
        if !out.contains(node) {
            out.push(node.clone());
        }
    }
    Ok(out)
}

/// Round-robin dispatch. Successive calls walk the node list regardless of
/// key, so the same key may land on different nodes; callers needing
/// idempotent routing must not use this policy.
pub struct Polling {
    nodes: Vec<String>,
    seq: AtomicUsize,
}

impl Polling {
    pub fn new(nodes: &[String]) -> Result<Self> {
        Ok(Self {
            nodes: sorted_nodes(nodes)?,
            seq: AtomicUsize::new(0),
        })
    }
}

impl DispatchPolicy for Polling {
    fn node_for(&self, _key: &str) -> &str {
        let i = self.seq.fetch_add(1, Ordering::Relaxed) % self.nodes.len();
        &self.nodes[i]
    }

    fn nodes(&self) -> &[String] {
        &self.nodes
    }
}

/// FNV1-hash-modulo dispatch. Deterministic per key, but adding or removing
/// a node remaps almost every key.
pub struct HashMod {
    nodes: Vec<String>,
}

impl HashMod {
    pub fn new(nodes: &[String]) -> Result<Self> {
        Ok(Self {
            nodes: sorted_nodes(nodes)?,
        })
    }
}

impl DispatchPolicy for HashMod {
    fn node_for(&self, key: &str) -> &str {
        let hash = modified_fnv1_32(key) as usize;
        &self.nodes[hash % self.nodes.len()]
    }

    fn nodes(&self) -> &[String] {
        &self.nodes
    }
}

/// Sorted ring of virtual node points. Lookup is least-upper-bound with
/// wraparound to the smallest point.
struct Ring {
    /// Sorted ascending, unique. Parallel to `owners`.
    points: Vec<u32>,
    owners: Vec<String>,
}

impl Ring {
    /// Build a ring with `RING_REPLICAS` points per node, point key
    /// `"{node}-{replica}"`. Hash collisions keep the first writer.
    fn build(nodes: &[String], hash: fn(&str) -> u32) -> Self {
        let mut entries: Vec<(u32, &String)> = Vec::with_capacity(nodes.len() * RING_REPLICAS as usize);
        for node in nodes {
            for replica in 0..RING_REPLICAS {
                entries.push((hash(&format!("{node}-{replica}")), node));
            }
        }
        // Stable sort keeps insertion order among equal hashes, so dedup
        // below retains the first writer.
        entries.sort_by_key(|(point, _)| *point);
        entries.dedup_by_key(|(point, _)| *point);

        let mut points = Vec::with_capacity(entries.len());
        let mut owners = Vec::with_capacity(entries.len());
        for (point, node) in entries {
            points.push(point);
            owners.push(node.clone());
        }
        Self { points, owners }
    }

    fn lookup(&self, hash: u32) -> &str {
        let mut i = self.points.partition_point(|&p| p < hash);
        if i == self.points.len() {
            i = 0;
        }
        &self.owners[i]
    }
}

/// Consistent-hash dispatch over a modified-FNV1 ring.
pub struct Fnv1Ring {
    nodes: Vec<String>,
    ring: Ring,
}

impl Fnv1Ring {
    pub fn new(nodes: &[String]) -> Result<Self> {
        let nodes = dedup_nodes(nodes)?;
        let ring = Ring::build(&nodes, modified_fnv1_32);
        Ok(Self { nodes, ring })
    }
}

impl DispatchPolicy for Fnv1Ring {
    fn node_for(&self, key: &str) -> &str {
        self.ring.lookup(modified_fnv1_32(key))
    }

    fn nodes(&self) -> &[String] {
        &self.nodes
    }
}

/// Consistent-hash dispatch over a Ketama (MD5) ring.
pub struct KetamaRing {
    nodes: Vec<String>,
    ring: Ring,
}

impl KetamaRing {
    pub fn new(nodes: &[String]) -> Result<Self> {
        let nodes = dedup_nodes(nodes)?;
        let ring = Ring::build(&nodes, ketama_hash);
        Ok(Self { nodes, ring })
    }
}

impl DispatchPolicy for KetamaRing {
    fn node_for(&self, key: &str) -> &str {
        self.ring.lookup(ketama_hash(key))
    }

    fn nodes(&self) -> &[String] {
        &self.nodes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use std::collections::HashMap;

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn empty_node_list_is_rejected() {
        assert_eq!(Polling::new(&[]).err(), Some(PolicyError::EmptyNodeList));
        assert_eq!(HashMod::new(&[]).err(), Some(PolicyError::EmptyNodeList));
        assert!(Fnv1Ring::new(&[]).is_err());
        assert!(KetamaRing::new(&[]).is_err());
    }

    #[test]
    fn policy_kind_parses_config_names() {
        assert_eq!("polling".parse::<PolicyKind>().unwrap(), PolicyKind::Polling);
        assert_eq!("hashMod".parse::<PolicyKind>().unwrap(), PolicyKind::HashMod);
        assert_eq!(
            "consistentHash".parse::<PolicyKind>().unwrap(),
            PolicyKind::ConsistentHashFnv1
        );
        assert_eq!(
            "consistentHash_fnv1".parse::<PolicyKind>().unwrap(),
            PolicyKind::ConsistentHashFnv1
        );
        assert_eq!(
            "consistentHash_ketama".parse::<PolicyKind>().unwrap(),
            PolicyKind::ConsistentHashKetama
        );
        assert!(matches!(
            "roundRobin".parse::<PolicyKind>(),
            Err(PolicyError::UnknownPolicy { .. })
        ));
    }

    #[test]
    fn polling_cycles_sorted_nodes() {
        let policy = Polling::new(&names(&["b", "a", "c", "a"])).unwrap();
        assert_eq!(policy.nodes(), &names(&["a", "b", "c"])[..]);
        let picks: Vec<&str> = (0..6).map(|_| policy.node_for("ignored")).collect();
        assert_eq!(picks, vec!["a", "b", "c", "a", "b", "c"]);
    }

    #[test]
    fn hash_mod_picks_member_deterministically() {
        let nodes = names(&["node-0", "node-1", "node-2"]);
        let policy = HashMod::new(&nodes).unwrap();
        for key in ["alpha", "beta", "gamma", ""] {
            let first = policy.node_for(key).to_string();
            assert!(nodes.contains(&first));
            assert_eq!(policy.node_for(key), first);
        }
    }

    #[test]
    fn ring_lookup_wraps_to_smallest_point() {
        let ring = Ring {
            points: vec![10, 20, 30],
            owners: names(&["a", "b", "c"]),
        };
        assert_eq!(ring.lookup(5), "a");
        assert_eq!(ring.lookup(10), "a");
        assert_eq!(ring.lookup(11), "b");
        assert_eq!(ring.lookup(30), "c");
        assert_eq!(ring.lookup(31), "a"); // wraparound
        assert_eq!(ring.lookup(u32::MAX), "a");
    }

    #[test]
    fn ring_points_are_sorted_and_unique() {
        let nodes = names(&["node-0", "node-1", "node-2", "node-3"]);
        let ring = Ring::build(&nodes, modified_fnv1_32);
        assert!(ring.points.windows(2).all(|w| w[0] < w[1]));
        assert!(ring.points.len() <= nodes.len() * RING_REPLICAS as usize);
    }

    #[test]
    fn ring_collision_keeps_first_writer() {
        // Constant hash function: every point collides; the first node's
        // first replica must own the single surviving point.
        fn constant(_: &str) -> u32 {
            42
        }
        let ring = Ring::build(&names(&["first", "second"]), constant);
        assert_eq!(ring.points, vec![42]);
        assert_eq!(ring.lookup(0), "first");
    }

    #[test]
    fn consistent_policies_are_deterministic_members() {
        let nodes = names(&["node-0", "node-1", "node-2"]);
        let fnv = Fnv1Ring::new(&nodes).unwrap();
        let ketama = KetamaRing::new(&nodes).unwrap();
        for i in 0..200 {
            let key = format!("key-{i}");
            for policy in [&fnv as &dyn DispatchPolicy, &ketama] {
                let node = policy.node_for(&key).to_string();
                assert!(nodes.contains(&node));
                assert_eq!(policy.node_for(&key), node);
            }
        }
    }

    #[test]
    fn adding_a_node_moves_a_small_fraction_of_keys() {
        let before = names(&["node-0", "node-1", "node-2", "node-3"]);
        let mut after = before.clone();
        after.push("node-4".to_string());

        let old = Fnv1Ring::new(&before).unwrap();
        let new = Fnv1Ring::new(&after).unwrap();

        let mut rng = StdRng::seed_from_u64(7);
        let samples = 20_000;
        let moved = (0..samples)
            .filter(|_| {
                let key = format!("k-{}", rng.gen::<u64>());
                old.node_for(&key) != new.node_for(&key)
            })
            .count();

        // Ideal disruption is 1/5 of keys; allow generous slack for ring
        // imbalance at 250 replicas.
        let fraction = moved as f64 / samples as f64;
        assert!(fraction < 0.35, "moved fraction {fraction} too high");
        assert!(fraction > 0.05, "moved fraction {fraction} suspiciously low");
    }

    #[test]
    fn ketama_ring_spreads_load_roughly_evenly() {
        let nodes = names(&["node-0", "node-1", "node-2"]);
        let policy = KetamaRing::new(&nodes).unwrap();
        let mut counts: HashMap<String, usize> = HashMap::new();
        for i in 0..30_000 {
            *counts
                .entry(policy.node_for(&format!("key:{i}")).to_string())
                .or_default() += 1;
        }
        for node in &nodes {
            let share = counts.get(node).copied().unwrap_or(0) as f64 / 30_000.0;
            assert!(share > 0.15, "node {node} owns only {share} of keys");
        }
    }

    proptest! {
        #[test]
        fn all_policies_return_members(key in ".*") {
            let nodes = names(&["n0", "n1", "n2"]);
            let policies: Vec<Box<dyn DispatchPolicy>> = vec![
                Box::new(Polling::new(&nodes).unwrap()),
                Box::new(HashMod::new(&nodes).unwrap()),
                Box::new(Fnv1Ring::new(&nodes).unwrap()),
                Box::new(KetamaRing::new(&nodes).unwrap()),
            ];
            for policy in &policies {
                let node = policy.node_for(&key).to_string();
                prop_assert!(policy.nodes().contains(&node));
            }
        }
    }
}
