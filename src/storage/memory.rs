//! In-memory hot tier
//!
//! A bounded insertion-ordered map from key to serialized value bytes.
//! Iteration order is LRU-to-MRU: a read or touch re-inserts the entry at
//! the back. Expired entries are dropped lazily on encounter; eviction under
//! pressure prefers any expired entry over the least-recently-used live one.
//!
//! All operations are synchronous and perform no I/O. The coordinator wraps
//! the store in a mutex and holds the lock only for the duration of a call.

use bytes::Bytes;
use indexmap::IndexMap;

use crate::entry::{is_expired, now_ms, remaining_ttl_ms, MemoryEntry, TTL_MISSING};
use crate::pattern::KeyPattern;

/// Snapshot of memory-tier counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryStats {
    /// Number of live entries (expired-but-unswept entries included)
    pub items: usize,
    /// Sum of entry sizes in bytes
    pub current_size: u64,
}

/// Bounded LRU over serialized values
#[derive(Debug)]
pub struct MemoryStore {
    /// Front = least recently used, back = most recently used
    entries: IndexMap<String, MemoryEntry>,
    max_items: usize,
    max_size: u64,
    current_size: u64,
}

impl MemoryStore {
    pub fn new(max_items: usize, max_size: u64) -> Self {
        Self {
            entries: IndexMap::new(),
            max_items,
            max_size,
            current_size: 0,
        }
    }

    /// Get the serialized bytes for a key, promoting it to MRU. An expired
    /// entry is removed and reported as absent.
    pub fn get(&mut self, key: &str) -> Option<Bytes> {
        let entry = self.entries.shift_remove(key)?;
        if is_expired(entry.expires_at, now_ms()) {
            self.current_size = self.current_size.saturating_sub(entry.size);
            return None;
        }
        let bytes = entry.serialized.clone();
        self.entries.insert(key.to_string(), entry);
        Some(bytes)
    }

    /// Same as [`MemoryStore::get`] without the LRU promotion.
    pub fn peek(&mut self, key: &str) -> Option<Bytes> {
        let expired = {
            let entry = self.entries.get(key)?;
            is_expired(entry.expires_at, now_ms())
        };
        if expired {
            self.remove(key);
            return None;
        }
        self.entries.get(key).map(|e| e.serialized.clone())
    }

    /// Insert a value at MRU, evicting as needed to stay within the item
    /// and byte bounds. Overwrites recompute the entry size.
    pub fn set(&mut self, key: &str, serialized: Bytes, expires_at: Option<u64>) {
        if let Some(old) = self.entries.shift_remove(key) {
            self.current_size = self.current_size.saturating_sub(old.size);
        }

        let size = serialized.len() as u64;
        while (self.entries.len() >= self.max_items
            || self.current_size + size > self.max_size)
            && !self.entries.is_empty()
        {
            self.evict_one();
        }

        self.current_size += size;
        self.entries.insert(
            key.to_string(),
            MemoryEntry {
                serialized,
                expires_at,
                size,
            },
        );
    }

    /// Remove a key. Returns whether it was present.
    pub fn delete(&mut self, key: &str) -> bool {
        self.remove(key).is_some()
    }

    /// Whether a key is present and not expired. Expired entries are
    /// dropped on encounter.
    pub fn has(&mut self, key: &str) -> bool {
        let expired = match self.entries.get(key) {
            None => return false,
            Some(entry) => is_expired(entry.expires_at, now_ms()),
        };
        if expired {
            self.remove(key);
            return false;
        }
        true
    }

    /// Live keys matching a pattern. Expired entries encountered during the
    /// scan are dropped.
    pub fn keys(&mut self, pattern: &KeyPattern) -> Vec<String> {
        let now = now_ms();
        let mut expired = Vec::new();
        let mut matches = Vec::new();
        for (key, entry) in &self.entries {
            if is_expired(entry.expires_at, now) {
                expired.push(key.clone());
            } else if pattern.matches(key) {
                matches.push(key.clone());
            }
        }
        for key in expired {
            self.remove(&key);
        }
        matches
    }

    /// Replace the expiry in place, without changing the LRU position.
    /// Returns false if the key is missing or already expired.
    pub fn set_expiry(&mut self, key: &str, expires_at: Option<u64>) -> bool {
        if !self.has(key) {
            return false;
        }
        if let Some(entry) = self.entries.get_mut(key) {
            entry.expires_at = expires_at;
            return true;
        }
        false
    }

    /// Promote a key to MRU without reading its value. Returns false if the
    /// key is missing or expired.
    pub fn touch(&mut self, key: &str) -> bool {
        let entry = match self.entries.shift_remove(key) {
            None => return false,
            Some(entry) => entry,
        };
        if is_expired(entry.expires_at, now_ms()) {
            self.current_size = self.current_size.saturating_sub(entry.size);
            return false;
        }
        self.entries.insert(key.to_string(), entry);
        true
    }

    /// Remaining TTL in milliseconds, `-1` for no expiry, `-2` for missing.
    pub fn get_ttl(&mut self, key: &str) -> i64 {
        let now = now_ms();
        let ttl = match self.entries.get(key) {
            None => return TTL_MISSING,
            Some(entry) => remaining_ttl_ms(entry.expires_at, now),
        };
        if ttl == TTL_MISSING {
            self.remove(key);
        }
        ttl
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn prune(&mut self) -> usize {
        let now = now_ms();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| is_expired(e.expires_at, now))
            .map(|(k, _)| k.clone())
            .collect();
        let count = expired.len();
        for key in expired {
            self.remove(&key);
        }
        count
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.current_size = 0;
    }

    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            items: self.entries.len(),
            current_size: self.current_size,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn remove(&mut self, key: &str) -> Option<MemoryEntry> {
        let entry = self.entries.shift_remove(key)?;
        self.current_size = self.current_size.saturating_sub(entry.size);
        Some(entry)
    }

    /// Evict one entry: the first expired one in insertion order if any,
    /// otherwise the LRU head.
    fn evict_one(&mut self) {
        let now = now_ms();
        let expired = self
            .entries
            .iter()
            .find(|(_, e)| is_expired(e.expires_at, now))
            .map(|(k, _)| k.clone());

        match expired {
            Some(key) => {
                self.remove(&key);
            }
            None => {
                if let Some((_, entry)) = self.entries.shift_remove_index(0) {
                    self.current_size = self.current_size.saturating_sub(entry.size);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    fn store() -> MemoryStore {
        MemoryStore::new(100, 1024 * 1024)
    }

    #[test]
    fn test_set_get() {
        let mut store = store();
        store.set("a", bytes("\"A\""), None);

        assert_eq!(store.get("a"), Some(bytes("\"A\"")));
        assert_eq!(store.get("missing"), None);
        assert_eq!(store.len(), 1);
        assert_eq!(store.stats().current_size, 3);
    }

    #[test]
    fn test_overwrite_recomputes_size() {
        let mut store = store();
        store.set("a", bytes("short"), None);
        store.set("a", bytes("a much longer payload"), None);

        assert_eq!(store.len(), 1);
        assert_eq!(store.stats().current_size, 21);
    }

    #[test]
    fn test_delete() {
        let mut store = store();
        store.set("a", bytes("x"), None);

        assert!(store.delete("a"));
        assert!(!store.delete("a"));
        assert_eq!(store.stats().current_size, 0);
    }

    #[test]
    fn test_item_bound_evicts_lru_head() {
        let mut store = MemoryStore::new(2, 1024);
        store.set("a", bytes("1"), None);
        store.set("b", bytes("2"), None);
        store.set("c", bytes("3"), None);

        assert_eq!(store.len(), 2);
        assert!(!store.has("a"));
        assert!(store.has("b"));
        assert!(store.has("c"));
    }

    #[test]
    fn test_get_promotes_to_mru() {
        let mut store = MemoryStore::new(2, 1024);
        store.set("a", bytes("1"), None);
        store.set("b", bytes("2"), None);

        // "a" becomes MRU, so "b" is the next victim.
        store.get("a");
        store.set("c", bytes("3"), None);

        assert!(store.has("a"));
        assert!(!store.has("b"));
    }

    #[test]
    fn test_peek_does_not_promote() {
        let mut store = MemoryStore::new(2, 1024);
        store.set("a", bytes("1"), None);
        store.set("b", bytes("2"), None);

        store.peek("a");
        store.set("c", bytes("3"), None);

        assert!(!store.has("a"));
        assert!(store.has("b"));
    }

    #[test]
    fn test_size_bound() {
        let mut store = MemoryStore::new(100, 10);
        store.set("a", bytes("12345"), None);
        store.set("b", bytes("67890"), None);
        assert_eq!(store.len(), 2);

        // 5 more bytes exceed the bound; the oldest entry goes.
        store.set("c", bytes("abcde"), None);
        assert!(!store.has("a"));
        assert!(store.stats().current_size <= 10);
    }

    #[test]
    fn test_eviction_prefers_expired() {
        let mut store = MemoryStore::new(2, 1024);
        let past = now_ms() - 1000;
        store.set("old", bytes("1"), None);
        store.set("dead", bytes("2"), Some(past));

        // "old" is the LRU head, but "dead" is expired and goes first.
        store.set("new", bytes("3"), None);

        assert!(store.has("old"));
        assert!(!store.has("dead"));
        assert!(store.has("new"));
    }

    #[test]
    fn test_expired_entry_is_absent() {
        let mut store = store();
        let past = now_ms() - 1;
        store.set("gone", bytes("x"), Some(past));

        assert_eq!(store.get("gone"), None);
        assert_eq!(store.len(), 0);
        assert_eq!(store.stats().current_size, 0);
    }

    #[test]
    fn test_keys_pattern_skips_expired() {
        let mut store = store();
        let past = now_ms() - 1;
        store.set("user:1", bytes("a"), None);
        store.set("user:2", bytes("b"), Some(past));
        store.set("other", bytes("c"), None);

        let pattern = KeyPattern::compile("user:*").unwrap();
        let keys = store.keys(&pattern);
        assert_eq!(keys, vec!["user:1".to_string()]);
        // The expired entry was swept during the scan.
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_set_expiry() {
        let mut store = store();
        store.set("a", bytes("x"), None);

        let future = now_ms() + 60_000;
        assert!(store.set_expiry("a", Some(future)));
        let ttl = store.get_ttl("a");
        assert!(ttl > 0 && ttl <= 60_000);

        assert!(store.set_expiry("a", None));
        assert_eq!(store.get_ttl("a"), crate::entry::TTL_NO_EXPIRY);

        assert!(!store.set_expiry("missing", None));
    }

    #[test]
    fn test_touch() {
        let mut store = MemoryStore::new(2, 1024);
        store.set("a", bytes("1"), None);
        store.set("b", bytes("2"), None);

        assert!(store.touch("a"));
        store.set("c", bytes("3"), None);
        assert!(store.has("a"));
        assert!(!store.has("b"));

        assert!(!store.touch("missing"));
        let past = now_ms() - 1;
        store.set("dead", bytes("x"), Some(past));
        assert!(!store.touch("dead"));
    }

    #[test]
    fn test_ttl_sentinels() {
        let mut store = store();
        assert_eq!(store.get_ttl("missing"), TTL_MISSING);

        store.set("forever", bytes("x"), None);
        assert_eq!(store.get_ttl("forever"), crate::entry::TTL_NO_EXPIRY);

        store.set("dying", bytes("x"), Some(now_ms() + 5000));
        let ttl = store.get_ttl("dying");
        assert!(ttl > 0 && ttl <= 5000);
    }

    #[test]
    fn test_prune() {
        let mut store = store();
        let past = now_ms() - 1;
        store.set("a", bytes("1"), Some(past));
        store.set("b", bytes("2"), Some(past));
        store.set("c", bytes("3"), None);

        assert_eq!(store.prune(), 2);
        assert_eq!(store.len(), 1);
        assert_eq!(store.prune(), 0);
    }

    #[test]
    fn test_clear() {
        let mut store = store();
        store.set("a", bytes("1"), None);
        store.set("b", bytes("2"), None);

        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.stats().current_size, 0);
    }
}
