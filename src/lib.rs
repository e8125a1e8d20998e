//! tierkv - Embedded Two-Tier Key/Value Cache
//!
//! A Redis-flavoured cache (`get`/`set`/`del`, TTLs, glob listing, batch
//! access, cache-aside with stampede protection) that lives inside one
//! process: no server, no network. Disk is the durable source of truth; a
//! bounded in-memory tier holds the hot subset for latency.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                       TieredCache<T>                              │
//! │   namespace · TTL defaults · stats · single-flight get_or_set     │
//! ├───────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────────────┐         ┌───────────────────────────┐   │
//! │  │     MemoryStore      │  evict  │         FileStore         │   │
//! │  │  bounded LRU over    │ ◄────── │  <dir>/<ss>/<hash>.json   │   │
//! │  │  serialized values   │  upcall │  in-memory index, atomic  │   │
//! │  │                      │         │  temp+rename writes       │   │
//! │  └──────────────────────┘         └───────────────────────────┘   │
//! ├───────────────────────────────────────────────────────────────────┤
//! │  background: debounced disk-touch scheduler · periodic pruner     │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Reads go memory → disk, promoting disk hits that fit the memory bound.
//! Writes land on disk first and mirror into memory afterwards, so memory
//! is always a subset of disk; when the disk tier evicts an entry (space
//! pressure or a digest collision) an upcall removes the same key from
//! memory.
//!
//! # Usage
//!
//! ```ignore
//! use tierkv::{CacheConfig, TieredCache};
//! use std::time::Duration;
//!
//! let cache: TieredCache<String> = TieredCache::new(CacheConfig {
//!     dir: "/var/cache/myapp".into(),
//!     ..Default::default()
//! })
//! .await;
//!
//! cache.set("greeting", &"hello".to_string(), Some(Duration::from_secs(60))).await?;
//! assert_eq!(cache.get("greeting").await?, Some("hello".to_string()));
//!
//! // Cache-aside: concurrent callers share one load.
//! let user = cache.get_or_set("user:42", || async {
//!     Ok(load_user_from_db(42).await?)
//! }, None).await?;
//! ```
//!
//! # Caveats
//!
//! - One process per directory. Concurrent writers from multiple processes
//!   are not coordinated and may corrupt the index's view of the world.
//! - The cache is not authoritative storage: any entry may be evicted at
//!   any time.
//! - `get` returns `None` for both "missing" and "stored JSON null".

pub mod codec;
pub mod config;
pub mod entry;
pub mod error;
pub mod hasher;
pub mod manager;
pub mod metrics;
pub mod pattern;
pub mod storage;
pub mod tasks;

pub use codec::{Codec, GzipCodec, IdentityCodec};
pub use config::CacheConfig;
pub use entry::{TTL_MISSING, TTL_NO_EXPIRY};
pub use error::{Error, Result};
pub use manager::TieredCache;
pub use metrics::CacheStats;
pub use pattern::KeyPattern;
pub use storage::{FileStore, MemoryStore};
