//! Error types for the cache
//!
//! A single crate-wide error enum. Only three classes ever reach callers of
//! the public API: [`Error::Closed`], [`Error::InvalidValue`] and
//! [`Error::Io`] (plus [`Error::Flight`], which wraps one of the former for
//! waiters of a shared computation). Everything else (unreadable files,
//! corrupt envelopes, stale index entries) is handled locally by dropping
//! the affected entry and reporting a miss.

use std::sync::Arc;
use thiserror::Error;

/// Unified error type for cache operations
#[derive(Error, Debug)]
pub enum Error {
    /// The cache has been closed; no further operations are accepted.
    #[error("cache is closed")]
    Closed,

    /// The value could not be represented by the payload codec.
    #[error("value cannot be serialized: {0}")]
    InvalidValue(#[source] serde_json::Error),

    /// Unrecoverable filesystem error, propagated from the atomic write path
    /// or from store initialization.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored file did not decode to a valid envelope. Never surfaced by
    /// the public API; the owning entry is dropped and the read misses.
    #[error("corrupt cache file: {0}")]
    Corrupt(String),

    /// A pattern failed to compile into a matcher.
    #[error("invalid key pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// A shared `get_or_set` computation failed; every caller that awaited
    /// the same flight observes the same underlying error.
    #[error("shared computation failed: {0}")]
    Flight(Arc<Error>),
}

impl Error {
    /// Whether this error came from the closed-cache guard.
    pub fn is_closed(&self) -> bool {
        matches!(self, Error::Closed)
    }

    /// Whether this error (or the flight error it wraps) is an
    /// invalid-value rejection from the codec.
    pub fn is_invalid_value(&self) -> bool {
        match self {
            Error::InvalidValue(_) => true,
            Error::Flight(inner) => inner.is_invalid_value(),
            _ => false,
        }
    }
}

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(Error::Closed.is_closed());
        assert!(!Error::Closed.is_invalid_value());

        let invalid = serde_json::from_str::<u32>("not json").unwrap_err();
        let err = Error::InvalidValue(invalid);
        assert!(err.is_invalid_value());

        let wrapped = Error::Flight(Arc::new(err));
        assert!(wrapped.is_invalid_value());
        assert!(!wrapped.is_closed());
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
