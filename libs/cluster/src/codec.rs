//! Payload Codecs
//!
//! Pluggable serialization for envelope payloads. JSON is the readable
//! default; bincode is the compact option for homogeneous-Rust clusters.
//! Local calls never touch a codec, typed values pass straight through.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{ClusterError, Result};

/// Encodes and decodes payload bytes. Implementations must be cheap to
/// clone; every registered method holds its own copy.
pub trait Codec: Clone + Send + Sync + 'static {
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>>;
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T>;
}

/// JSON payload codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| ClusterError::codec(format!("json encode: {e}")))
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        serde_json::from_slice(bytes).map_err(|e| ClusterError::codec(format!("json decode: {e}")))
    }
}

/// Bincode payload codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

impl Codec for BincodeCodec {
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        bincode::serialize(value).map_err(|e| ClusterError::codec(format!("bincode encode: {e}")))
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        bincode::deserialize(bytes)
            .map_err(|e| ClusterError::codec(format!("bincode decode: {e}")))
    }
}
