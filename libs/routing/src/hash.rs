//! Deterministic 32-bit hash functions for key routing.
//!
//! Both functions are pinned bit-exactly by tests: ring layouts must be
//! reproducible across nodes and across releases, so neither function may
//! ever change output for a given input.

use md5::{Digest, Md5};

const FNV_PRIME: u32 = 16_777_619;
const FNV_OFFSET_BASIS: u32 = 2_166_136_261;

/// Modified FNV1-32: the standard FNV-1 fold followed by an avalanche mix.
///
/// Operates on the UTF-8 bytes of `key`. The mix spreads entropy into the
/// low bits, which matters because ring lookups binary-search raw values.
pub fn modified_fnv1_32(key: &str) -> u32 {
    let mut hash = fnv1_32_fold(key.as_bytes());
    hash = hash.wrapping_add(hash << 13);
    hash ^= hash >> 7;
    hash = hash.wrapping_add(hash << 3);
    hash ^= hash >> 17;
    hash = hash.wrapping_add(hash << 5);
    hash
}

/// Plain FNV-1 32-bit fold, no finalization.
fn fnv1_32_fold(bytes: &[u8]) -> u32 {
    let mut hash = FNV_OFFSET_BASIS;
    for &b in bytes {
        hash = hash.wrapping_mul(FNV_PRIME) ^ u32::from(b);
    }
    hash
}

/// Ketama hash: first 4 bytes of the MD5 digest of `key`, little-endian.
///
/// Equivalent to `ketama_slots(key)[0]`.
pub fn ketama_hash(key: &str) -> u32 {
    ketama_slots(key)[0]
}

/// All four 4-byte little-endian slots of the MD5 digest (offsets 0, 4, 8
/// and 12). The ring builder uses only slot 0; the remaining slots exist
/// for multi-point-per-digest ring construction.
pub fn ketama_slots(key: &str) -> [u32; 4] {
    let digest = Md5::digest(key.as_bytes());
    let mut slots = [0u32; 4];
    for (i, slot) in slots.iter_mut().enumerate() {
        let off = i * 4;
        *slot = u32::from_le_bytes([
            digest[off],
            digest[off + 1],
            digest[off + 2],
            digest[off + 3],
        ]);
    }
    slots
}
