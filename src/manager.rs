//! Two-tier cache coordinator
//!
//! [`TieredCache`] is the public face of the crate. It routes reads through
//! the memory tier and falls back to disk with promotion, mirrors writes
//! disk-first into memory, applies the namespace prefix and TTL defaults,
//! and owns the background machinery: the debounced disk-touch scheduler,
//! the optional periodic pruner, and the single-flight table that protects
//! `get_or_set` against stampedes.
//!
//! Keys in memory are always a subset of keys on disk. The file store
//! reports every non-explicit removal through an eviction upcall, which the
//! coordinator uses to drop the same key from memory.

use std::collections::HashSet;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::value::RawValue;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::codec::{Codec, GzipCodec, IdentityCodec};
use crate::config::CacheConfig;
use crate::entry::{now_ms, Envelope, EnvelopeRef, TTL_MISSING, TTL_NO_EXPIRY};
use crate::error::{Error, Result};
use crate::metrics::{CacheMetrics, CacheStats};
use crate::pattern::KeyPattern;
use crate::storage::{EvictionCallback, FileStore, MemoryStore};
use crate::tasks::{spawn_prune_task, TouchScheduler, TOUCH_DEBOUNCE};

/// Broadcast payload of a single-flight computation: the serialized value
/// on success, the shared error otherwise.
type FlightResult = std::result::Result<Bytes, Arc<Error>>;

/// Embedded two-tier cache over values of type `T`
///
/// Values are serialized as JSON. `get` returns `None` both for a missing
/// key and for a stored JSON `null`; callers that need negative caching
/// should store a sentinel value instead of `Option::None`.
///
/// Public TTLs are [`Duration`]s; a TTL of `Duration::ZERO` opts out of the
/// configured `default_ttl` explicitly. [`TieredCache::ttl`] reports whole
/// seconds with the Redis sentinels `-1` (no expiry) and `-2` (missing).
pub struct TieredCache<T> {
    config: CacheConfig,
    memory: Arc<Mutex<MemoryStore>>,
    file: Arc<FileStore>,
    metrics: Arc<CacheMetrics>,
    touches: Arc<TouchScheduler>,
    in_flight: DashMap<String, broadcast::Sender<FlightResult>>,
    prune_task: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
    _value: PhantomData<fn() -> T>,
}

impl<T> TieredCache<T>
where
    T: Serialize + DeserializeOwned,
{
    /// Create a cache over `config.dir`. The directory is created and its
    /// index rebuilt lazily on the first operation that needs it.
    pub async fn new(config: CacheConfig) -> Self {
        let memory = Arc::new(Mutex::new(MemoryStore::new(
            config.max_memory_items,
            config.max_memory_size,
        )));
        let touches = Arc::new(TouchScheduler::new(TOUCH_DEBOUNCE));
        let metrics = Arc::new(CacheMetrics::new());
        let codec: Arc<dyn Codec> = if config.gzip {
            Arc::new(GzipCodec)
        } else {
            Arc::new(IdentityCodec)
        };

        // Disk-tier evictions mirror into the memory tier to preserve the
        // memory-is-a-subset-of-disk invariant.
        let on_evict: EvictionCallback = {
            let memory = Arc::clone(&memory);
            let touches = Arc::clone(&touches);
            let metrics = Arc::clone(&metrics);
            Box::new(move |key: &str| {
                memory.lock().delete(key);
                touches.cancel(key);
                metrics.record_eviction();
            })
        };

        let file = Arc::new(FileStore::new(
            config.dir.clone(),
            config.shards,
            config.max_disk_size,
            codec,
            on_evict,
        ));

        let prune_task = config
            .prune_interval
            .map(|interval| spawn_prune_task(Arc::clone(&memory), Arc::clone(&file), interval));

        Self {
            config,
            memory,
            file,
            metrics,
            touches,
            in_flight: DashMap::new(),
            prune_task: Mutex::new(prune_task),
            closed: AtomicBool::new(false),
            _value: PhantomData,
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Look a key up: memory first, then disk. A disk hit is promoted into
    /// memory when the serialized value fits the memory size bound.
    pub async fn get(&self, key: &str) -> Result<Option<T>> {
        self.ensure_open()?;
        let full = self.full_key(key);

        let from_memory = self.memory.lock().get(&full);
        if let Some(bytes) = from_memory {
            match serde_json::from_slice(&bytes) {
                Ok(value) => {
                    self.metrics.record_hit();
                    self.touches.schedule(&full, &self.file);
                    return Ok(Some(value));
                }
                Err(_) => {
                    // Bytes that no longer decode as T: drop the copy and
                    // fall through to disk.
                    self.memory.lock().delete(&full);
                }
            }
        }

        match self.file.get(&full).await? {
            Some(envelope) => match serde_json::from_str(envelope.value.get()) {
                Ok(value) => {
                    self.metrics.record_hit();
                    self.promote(&full, &envelope);
                    Ok(Some(value))
                }
                Err(_) => {
                    self.metrics.record_miss();
                    Ok(None)
                }
            },
            None => {
                self.metrics.record_miss();
                Ok(None)
            }
        }
    }

    /// Whether a key exists in either tier. Does not count as a hit or miss.
    pub async fn exists(&self, key: &str) -> Result<bool> {
        self.ensure_open()?;
        let full = self.full_key(key);
        if self.memory.lock().has(&full) {
            return Ok(true);
        }
        self.file.has(&full).await
    }

    /// Keys matching a glob pattern (`"*"` for all), deduplicated across
    /// tiers, with the namespace prefix stripped.
    pub async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        self.ensure_open()?;
        let prefixed = match &self.config.namespace {
            Some(ns) => format!("{ns}:{pattern}"),
            None => pattern.to_string(),
        };
        let compiled = KeyPattern::compile(&prefixed)?;

        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for key in self.memory.lock().keys(&compiled) {
            if seen.insert(key.clone()) {
                out.push(key);
            }
        }
        for key in self.file.keys(&compiled).await? {
            if seen.insert(key.clone()) {
                out.push(key);
            }
        }
        Ok(out.into_iter().map(|key| self.strip_key(key)).collect())
    }

    /// Remaining TTL in whole seconds (rounded up), `-1` for a key without
    /// expiry, `-2` for a missing key. Memory is authoritative when it
    /// holds the key.
    pub async fn ttl(&self, key: &str) -> Result<i64> {
        self.ensure_open()?;
        let full = self.full_key(key);
        let ms = {
            let from_memory = self.memory.lock().get_ttl(&full);
            if from_memory != TTL_MISSING {
                from_memory
            } else {
                self.file.get_ttl(&full).await?
            }
        };
        Ok(match ms {
            TTL_NO_EXPIRY | TTL_MISSING => ms,
            ms => (ms + 999) / 1000,
        })
    }

    /// Concurrent [`TieredCache::get`] over a list of keys, preserving
    /// order; `None` marks a miss.
    pub async fn mget(&self, keys: &[&str]) -> Result<Vec<Option<T>>> {
        self.ensure_open()?;
        join_all(keys.iter().map(|key| self.get(key)))
            .await
            .into_iter()
            .collect()
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Store a value. The disk write happens first; the memory tier is
    /// updated only after it succeeds, and only when the serialized value
    /// fits the memory size bound.
    pub async fn set(&self, key: &str, value: &T, ttl: Option<Duration>) -> Result<()> {
        self.ensure_open()?;
        let full = self.full_key(key);
        let expires_at = self.resolve_expiry(ttl);

        let serialized = serde_json::to_string(value).map_err(Error::InvalidValue)?;
        let raw: &RawValue = serde_json::from_str(&serialized).map_err(Error::InvalidValue)?;
        let envelope = EnvelopeRef {
            key: &full,
            value: raw,
            expires_at,
        }
        .to_json()?;

        if let Err(err) = self.file.set(&full, envelope, expires_at).await {
            // Disk state is unknown; drop the memory copy to stay a subset.
            self.memory.lock().delete(&full);
            self.touches.cancel(&full);
            return Err(err);
        }

        if serialized.len() as u64 <= self.config.max_memory_size {
            self.memory
                .lock()
                .set(&full, Bytes::from(serialized), expires_at);
        } else {
            // An oversized overwrite must not leave a stale hot copy behind.
            self.memory.lock().delete(&full);
        }
        Ok(())
    }

    /// Remove a key from both tiers. Returns whether either tier had it.
    pub async fn del(&self, key: &str) -> Result<bool> {
        self.ensure_open()?;
        let full = self.full_key(key);
        self.touches.cancel(&full);
        let in_memory = self.memory.lock().delete(&full);
        let on_disk = self.file.delete(&full).await?;
        Ok(in_memory || on_disk)
    }

    /// Store several entries. Every envelope is prepared before any write,
    /// so a non-serializable value fails the whole batch with no partial
    /// effects; the file writes then run concurrently.
    pub async fn mset(&self, entries: &[(&str, T, Option<Duration>)]) -> Result<()> {
        self.ensure_open()?;

        struct Prepared {
            full: String,
            serialized: String,
            envelope: String,
            expires_at: Option<u64>,
        }

        let mut prepared = Vec::with_capacity(entries.len());
        for (key, value, ttl) in entries {
            let full = self.full_key(key);
            let expires_at = self.resolve_expiry(*ttl);
            let serialized = serde_json::to_string(value).map_err(Error::InvalidValue)?;
            let raw: &RawValue = serde_json::from_str(&serialized).map_err(Error::InvalidValue)?;
            let envelope = EnvelopeRef {
                key: &full,
                value: raw,
                expires_at,
            }
            .to_json()?;
            prepared.push(Prepared {
                full,
                serialized,
                envelope,
                expires_at,
            });
        }

        let results = join_all(
            prepared
                .iter()
                .map(|p| self.file.set(&p.full, p.envelope.clone(), p.expires_at)),
        )
        .await;

        let mut first_err = None;
        for (p, result) in prepared.into_iter().zip(results) {
            match result {
                Ok(()) => {
                    if p.serialized.len() as u64 <= self.config.max_memory_size {
                        self.memory
                            .lock()
                            .set(&p.full, Bytes::from(p.serialized), p.expires_at);
                    } else {
                        self.memory.lock().delete(&p.full);
                    }
                }
                Err(err) => {
                    self.memory.lock().delete(&p.full);
                    self.touches.cancel(&p.full);
                    if first_err.is_none() {
                        first_err = Some(err);
                    }
                }
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    // =========================================================================
    // Expiry management
    // =========================================================================

    /// Set a fresh TTL on an existing key. Disk first, memory best-effort.
    pub async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.set_expiry(key, Some(now_ms() + ttl.as_millis() as u64))
            .await
    }

    /// Remove the expiry from an existing key.
    pub async fn persist(&self, key: &str) -> Result<bool> {
        self.set_expiry(key, None).await
    }

    async fn set_expiry(&self, key: &str, expires_at: Option<u64>) -> Result<bool> {
        self.ensure_open()?;
        let full = self.full_key(key);
        let updated = self.file.set_expiry(&full, expires_at).await?;
        if updated {
            self.memory.lock().set_expiry(&full, expires_at);
        }
        Ok(updated)
    }

    /// Refresh a key's LRU position in both tiers without reading it.
    pub async fn touch(&self, key: &str) -> Result<bool> {
        self.ensure_open()?;
        let full = self.full_key(key);
        let touched = self.file.touch(&full).await?;
        if touched {
            self.memory.lock().touch(&full);
        }
        Ok(touched)
    }

    // =========================================================================
    // Cache-aside
    // =========================================================================

    /// Get a value, or compute and store it on a miss. Concurrent calls for
    /// the same key share one invocation of `f`: the first caller computes,
    /// the rest await the same result. If `f` fails, every caller observes
    /// the error (wrapped in [`Error::Flight`] with the shared cause) and
    /// nothing is cached, so the next call runs `f` again.
    pub async fn get_or_set<F, Fut>(&self, key: &str, f: F, ttl: Option<Duration>) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.ensure_open()?;
        if let Some(value) = self.get(key).await? {
            return Ok(value);
        }

        let full = self.full_key(key);
        loop {
            match self.in_flight.entry(full.clone()) {
                Entry::Occupied(occupied) => {
                    // Subscribe while the entry is held: the leader removes
                    // the entry before broadcasting, and that removal has to
                    // wait for this shard reference to drop.
                    let mut rx = occupied.get().subscribe();
                    drop(occupied);
                    match rx.recv().await {
                        Ok(Ok(bytes)) => {
                            return serde_json::from_slice(&bytes).map_err(Error::InvalidValue)
                        }
                        Ok(Err(shared)) => return Err(Error::Flight(shared)),
                        // Leader vanished without a result; start over.
                        Err(_) => continue,
                    }
                }
                Entry::Vacant(vacant) => {
                    let (tx, _keep) = broadcast::channel(1);
                    drop(vacant.insert(tx.clone()));

                    let outcome: Result<(T, Bytes)> = async {
                        // Another writer may have filled the key while this
                        // caller raced for leadership.
                        if let Some(value) = self.get(key).await? {
                            let bytes =
                                serde_json::to_vec(&value).map_err(Error::InvalidValue)?;
                            return Ok((value, Bytes::from(bytes)));
                        }
                        let value = f().await?;
                        self.set(key, &value, ttl).await?;
                        let bytes = serde_json::to_vec(&value).map_err(Error::InvalidValue)?;
                        Ok((value, Bytes::from(bytes)))
                    }
                    .await;

                    self.in_flight.remove(&full);
                    return match outcome {
                        Ok((value, bytes)) => {
                            let _ = tx.send(Ok(bytes));
                            Ok(value)
                        }
                        Err(err) => {
                            let shared = Arc::new(err);
                            let _ = tx.send(Err(Arc::clone(&shared)));
                            Err(Error::Flight(shared))
                        }
                    };
                }
            }
        }
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Number of entries on disk, the durable source of truth.
    pub async fn size(&self) -> Result<usize> {
        self.ensure_open()?;
        self.file.item_count().await
    }

    /// Sweep expired entries from both tiers. Returns the disk count.
    pub async fn prune(&self) -> Result<usize> {
        self.ensure_open()?;
        self.memory.lock().prune();
        self.file.prune().await
    }

    /// Snapshot of counters and tier sizes.
    pub async fn stats(&self) -> Result<CacheStats> {
        self.ensure_open()?;
        let memory = self.memory.lock().stats();
        let disk_items = self.file.item_count().await?;
        let disk_bytes = self.file.size().await?;
        Ok(CacheStats {
            hits: self.metrics.hits(),
            misses: self.metrics.misses(),
            evictions: self.metrics.evictions(),
            memory_items: memory.items,
            memory_bytes: memory.current_size,
            disk_items,
            disk_bytes,
        })
    }

    /// Zero the hit/miss/eviction counters.
    pub fn reset_stats(&self) -> Result<()> {
        self.ensure_open()?;
        self.metrics.reset();
        Ok(())
    }

    /// Remove every entry from both tiers.
    pub async fn clear(&self) -> Result<()> {
        self.ensure_open()?;
        self.touches.cancel_all();
        self.memory.lock().clear();
        self.file.clear().await
    }

    /// Stop background tasks and reject all further operations. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.prune_task.lock().take() {
            handle.abort();
        }
        self.touches.cancel_all();
        debug!("cache closed");
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(Error::Closed)
        } else {
            Ok(())
        }
    }

    fn full_key(&self, key: &str) -> String {
        match &self.config.namespace {
            Some(ns) => format!("{ns}:{key}"),
            None => key.to_string(),
        }
    }

    fn strip_key(&self, key: String) -> String {
        match &self.config.namespace {
            Some(ns) => {
                if key.len() > ns.len()
                    && key.starts_with(ns.as_str())
                    && key.as_bytes()[ns.len()] == b':'
                {
                    key[ns.len() + 1..].to_string()
                } else {
                    key
                }
            }
            None => key,
        }
    }

    /// Resolve a caller TTL to an absolute expiry. Absent falls back to the
    /// configured default; an explicit zero means "no expiry".
    fn resolve_expiry(&self, ttl: Option<Duration>) -> Option<u64> {
        let effective = match ttl {
            None => self.config.default_ttl,
            Some(d) if d.is_zero() => None,
            Some(d) => Some(d),
        };
        effective.map(|d| now_ms() + d.as_millis() as u64)
    }

    /// Copy a disk hit into memory if the value fits the size bound.
    fn promote(&self, full: &str, envelope: &Envelope) {
        let bytes = envelope.value_bytes();
        if bytes.len() as u64 <= self.config.max_memory_size {
            self.memory
                .lock()
                .set(full, Bytes::copy_from_slice(bytes), envelope.expires_at);
        }
    }
}

impl<T> Drop for TieredCache<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.prune_task.lock().take() {
            handle.abort();
        }
        self.touches.cancel_all();
    }
}
