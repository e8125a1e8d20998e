//! Key hashing and shard selection
//!
//! Keys are never used as filesystem paths directly; every key is addressed
//! on disk by a 128-bit digest (the first half of its SHA-256). The digest
//! is stable across processes, so an index rebuilt from disk always agrees
//! with new writes.

use sha2::{Digest, Sha256};

/// Length of a key digest in lowercase hex characters (128 bits)
pub const DIGEST_HEX_LEN: usize = 32;

/// Number of leading hex characters used for shard selection (32 bits)
const SHARD_PREFIX_LEN: usize = 8;

/// Compute the 32-hex-character digest of a key.
pub fn key_digest(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    let hex = format!("{:x}", hasher.finalize());
    hex[..DIGEST_HEX_LEN].to_string()
}

/// Shard index for a digest: first 32 bits interpreted as an unsigned
/// integer, modulo the shard count.
pub fn shard_index(digest: &str, shards: usize) -> usize {
    let prefix = u32::from_str_radix(&digest[..SHARD_PREFIX_LEN.min(digest.len())], 16)
        .unwrap_or_default();
    prefix as usize % shards.max(1)
}

/// Directory name for a shard index: two lowercase hex characters.
pub fn shard_dir_name(index: usize) -> String {
    format!("{index:02x}")
}
