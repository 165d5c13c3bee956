//! Key-to-Node Dispatch
//!
//! Maps opaque string keys to cluster node names. Four interchangeable
//! strategies are provided:
//!
//! - [`Polling`] — round-robin, ignores the key
//! - [`HashMod`] — FNV1 hash modulo node count
//! - [`Fnv1Ring`] — consistent hashing over an FNV1 ring
//! - [`KetamaRing`] — consistent hashing over a Ketama (MD5) ring
//!
//! The ring policies give stable key→node assignment that moves only ~1/N of
//! keys when the node set changes. [`Polling`] is not deterministic per key;
//! callers that need idempotent routing must pick one of the other three.
//!
//! Policies are immutable after construction and safe to share across tasks
//! without locking.

pub mod hash;
pub mod policy;

mod error;

pub use error::{PolicyError, Result};
pub use hash::{ketama_hash, ketama_slots, modified_fnv1_32};
pub use policy::{DispatchPolicy, Fnv1Ring, HashMod, KetamaRing, PolicyKind, Polling};
