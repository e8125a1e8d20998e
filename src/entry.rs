//! Entry records and expiry arithmetic
//!
//! The on-disk unit is the [`Envelope`]: a JSON object carrying the full
//! (possibly namespaced) key, the user value as an opaque JSON fragment,
//! and an optional absolute expiry in epoch milliseconds. The memory tier
//! holds only the serialized value bytes; the file store index holds
//! per-entry bookkeeping without the value.

use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::error::{Error, Result};

/// TTL sentinel: the key exists and has no expiry
pub const TTL_NO_EXPIRY: i64 = -1;

/// TTL sentinel: the key does not exist (or has already expired)
pub const TTL_MISSING: i64 = -2;

/// Current time in milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

/// Whether an absolute expiry lies in the past.
pub fn is_expired(expires_at: Option<u64>, now: u64) -> bool {
    matches!(expires_at, Some(at) if at <= now)
}

/// Remaining lifetime in milliseconds, or a TTL sentinel. An expired entry
/// reports [`TTL_MISSING`]: it is logically absent for all observers.
pub fn remaining_ttl_ms(expires_at: Option<u64>, now: u64) -> i64 {
    match expires_at {
        None => TTL_NO_EXPIRY,
        Some(at) if at <= now => TTL_MISSING,
        Some(at) => (at - now) as i64,
    }
}

// =============================================================================
// On-disk envelope
// =============================================================================

/// The decoded on-disk record
///
/// `value` stays an unparsed JSON fragment so the file store can manage
/// entries without knowing the caller's value type.
#[derive(Debug, Deserialize)]
pub struct Envelope {
    /// Full key, including any namespace prefix
    pub key: String,
    /// User value as raw JSON
    pub value: Box<RawValue>,
    /// Absolute expiry in epoch milliseconds; `None` means no expiry
    #[serde(default)]
    pub expires_at: Option<u64>,
}

impl Envelope {
    /// Decode an envelope from plain (already codec-decoded) JSON bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|err| Error::Corrupt(err.to_string()))
    }

    /// The serialized value bytes, exactly as stored inside the envelope.
    pub fn value_bytes(&self) -> &[u8] {
        self.value.get().as_bytes()
    }
}

/// Borrowing form of [`Envelope`] used to serialize without re-encoding the
/// value: the coordinator serializes the value once and reuses those bytes
/// for both the envelope and the memory tier.
#[derive(Debug, Serialize)]
pub struct EnvelopeRef<'a> {
    pub key: &'a str,
    pub value: &'a RawValue,
    pub expires_at: Option<u64>,
}

impl<'a> EnvelopeRef<'a> {
    /// Serialize to the JSON form stored on disk (before the codec runs).
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(Error::InvalidValue)
    }
}

// =============================================================================
// Tier bookkeeping records
// =============================================================================

/// A memory-tier entry: serialized value bytes plus expiry
#[derive(Debug, Clone)]
pub struct MemoryEntry {
    /// Codec output for the value only, not the enclosing envelope
    pub serialized: Bytes,
    /// Absolute expiry in epoch milliseconds
    pub expires_at: Option<u64>,
    /// Byte length of `serialized`
    pub size: u64,
}

/// File-store index entry: everything needed to manage an on-disk file
/// without reading it
#[derive(Debug, Clone)]
pub struct IndexEntry {
    /// 32-hex key digest; also the file stem
    pub hash: String,
    /// Absolute expiry in epoch milliseconds
    pub expires_at: Option<u64>,
    /// Last access in epoch milliseconds (mtime after an index rebuild)
    pub last_accessed_at: u64,
    /// Size in bytes of the on-disk file after the codec ran
    pub size: u64,
}
