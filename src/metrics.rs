//! Hit/miss accounting
//!
//! Plain atomic counters updated inline with each operation; `snapshot` is
//! taken without coordination, so concurrent updates may land between field
//! reads.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters owned by the coordinator
#[derive(Debug, Default)]
pub struct CacheMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl CacheMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    /// Zero the hit/miss/eviction counters.
    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }
}

/// Point-in-time view of cache state
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    /// Reads answered by either tier
    pub hits: u64,
    /// Reads answered by neither tier
    pub misses: u64,
    /// Entries removed from the disk tier other than by explicit delete
    pub evictions: u64,
    /// Entries currently in memory
    pub memory_items: usize,
    /// Bytes currently in memory
    pub memory_bytes: u64,
    /// Entries currently on disk
    pub disk_items: usize,
    /// Bytes currently on disk
    pub disk_bytes: u64,
}

impl CacheStats {
    /// Fraction of reads served from cache, in `[0, 1]`.
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = CacheMetrics::new();
        metrics.record_hit();
        metrics.record_hit();
        metrics.record_miss();
        metrics.record_eviction();

        assert_eq!(metrics.hits(), 2);
        assert_eq!(metrics.misses(), 1);
        assert_eq!(metrics.evictions(), 1);

        metrics.reset();
        assert_eq!(metrics.hits(), 0);
        assert_eq!(metrics.misses(), 0);
        assert_eq!(metrics.evictions(), 0);
    }

    #[test]
    fn test_hit_ratio() {
        let stats = CacheStats {
            hits: 3,
            misses: 1,
            evictions: 0,
            memory_items: 0,
            memory_bytes: 0,
            disk_items: 0,
            disk_bytes: 0,
        };
        assert!((stats.hit_ratio() - 0.75).abs() < f64::EPSILON);

        let empty = CacheStats { hits: 0, misses: 0, ..stats };
        assert_eq!(empty.hit_ratio(), 0.0);
    }
}
