//! Cache configuration

use std::path::PathBuf;
use std::time::Duration;

/// Default root directory for cache files
pub const DEFAULT_DIR: &str = ".cache";

/// Default memory tier cardinality bound
pub const DEFAULT_MAX_MEMORY_ITEMS: usize = 1000;

/// Default memory tier byte bound: 50 MiB
pub const DEFAULT_MAX_MEMORY_SIZE: u64 = 50 * 1024 * 1024;

/// Default disk tier byte bound: 500 MiB
pub const DEFAULT_MAX_DISK_SIZE: u64 = 500 * 1024 * 1024;

/// Default number of shard directories
pub const DEFAULT_SHARD_COUNT: usize = 16;

/// Configuration for a [`TieredCache`](crate::TieredCache)
///
/// All fields have working defaults; construct with struct-update syntax:
///
/// ```ignore
/// let config = CacheConfig {
///     dir: "/var/cache/myapp".into(),
///     namespace: Some("sessions".into()),
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Root directory for the disk tier
    pub dir: PathBuf,
    /// Maximum number of entries held in memory
    pub max_memory_items: usize,
    /// Maximum total bytes held in memory. Also the per-value eligibility
    /// bound: a value whose serialized form is larger never enters memory.
    pub max_memory_size: u64,
    /// Disk byte bound that triggers eviction
    pub max_disk_size: u64,
    /// Number of shard directories. Must match across restarts on the same
    /// directory, otherwise previously written entries become unreachable.
    pub shards: usize,
    /// TTL applied when a write omits one. A per-call TTL of
    /// `Duration::ZERO` opts out of the default explicitly.
    pub default_ttl: Option<Duration>,
    /// Prefix applied to every key as `<namespace>:`
    pub namespace: Option<String>,
    /// Whether new writes are gzip-compressed. Reads auto-detect either
    /// format, so this can be toggled between runs on the same directory.
    pub gzip: bool,
    /// Cadence of the periodic prune task; unset disables it
    pub prune_interval: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(DEFAULT_DIR),
            max_memory_items: DEFAULT_MAX_MEMORY_ITEMS,
            max_memory_size: DEFAULT_MAX_MEMORY_SIZE,
            max_disk_size: DEFAULT_MAX_DISK_SIZE,
            shards: DEFAULT_SHARD_COUNT,
            default_ttl: None,
            namespace: None,
            gzip: false,
            prune_interval: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.dir, PathBuf::from(".cache"));
        assert_eq!(config.max_memory_items, 1000);
        assert_eq!(config.max_memory_size, 50 * 1024 * 1024);
        assert_eq!(config.max_disk_size, 500 * 1024 * 1024);
        assert_eq!(config.shards, 16);
        assert!(config.default_ttl.is_none());
        assert!(config.namespace.is_none());
        assert!(!config.gzip);
        assert!(config.prune_interval.is_none());
    }

    #[test]
    fn test_struct_update() {
        let config = CacheConfig {
            shards: 4,
            gzip: true,
            ..Default::default()
        };
        assert_eq!(config.shards, 4);
        assert!(config.gzip);
        assert_eq!(config.max_memory_items, 1000);
    }
}
