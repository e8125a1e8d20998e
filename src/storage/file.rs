//! Durable disk tier
//!
//! Entries live as one file per key, `<root>/<ss>/<hash>.json`, where `<ss>`
//! is the two-hex shard index derived from the key digest. File contents are
//! the JSON envelope run through the payload codec, so they are either plain
//! UTF-8 JSON or a gzip stream.
//!
//! The store keeps a full in-memory index (key → bookkeeping, hash → key)
//! rebuilt lazily from disk on first use. Writes are atomic: a uniquely
//! named temp file in the root is renamed into place, so readers observe
//! either the old file or the new one. Locks are never held across an
//! `.await`; all filesystem work happens between lock scopes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::RwLock;
use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::codec::Codec;
use crate::entry::{is_expired, now_ms, remaining_ttl_ms, Envelope, IndexEntry, TTL_MISSING};
use crate::error::Result;
use crate::hasher::{key_digest, shard_dir_name, shard_index};
use crate::pattern::KeyPattern;

/// Upcall fired when the store removes an entry other than by an explicit
/// [`FileStore::delete`]: space eviction, hash-collision eviction.
pub type EvictionCallback = Box<dyn Fn(&str) + Send + Sync>;

struct StoreState {
    /// key → bookkeeping for its on-disk file
    index: HashMap<String, IndexEntry>,
    /// hash → the single live key owning that digest
    hash_to_key: HashMap<String, String>,
    /// Sum of index entry sizes
    total_size: u64,
    initialized: bool,
}

/// Sharded, size-bounded file store
pub struct FileStore {
    root: PathBuf,
    shards: usize,
    max_size: u64,
    codec: Arc<dyn Codec>,
    state: RwLock<StoreState>,
    /// Serializes the lazy first-use initialization
    init_lock: tokio::sync::Mutex<()>,
    on_evict: EvictionCallback,
}

impl FileStore {
    pub fn new(
        root: impl Into<PathBuf>,
        shards: usize,
        max_size: u64,
        codec: Arc<dyn Codec>,
        on_evict: EvictionCallback,
    ) -> Self {
        Self {
            root: root.into(),
            shards: shards.max(1),
            max_size,
            codec,
            state: RwLock::new(StoreState {
                index: HashMap::new(),
                hash_to_key: HashMap::new(),
                total_size: 0,
                initialized: false,
            }),
            init_lock: tokio::sync::Mutex::new(()),
            on_evict,
        }
    }

    // =========================================================================
    // Initialization
    // =========================================================================

    async fn ensure_init(&self) -> Result<()> {
        if self.state.read().initialized {
            return Ok(());
        }
        let _guard = self.init_lock.lock().await;
        if self.state.read().initialized {
            return Ok(());
        }
        self.initialize().await
    }

    /// Create the directory layout and rebuild the index from whatever is
    /// already on disk. Expired files are deleted; unreadable or malformed
    /// files are skipped.
    async fn initialize(&self) -> Result<()> {
        fs::create_dir_all(&self.root).await?;
        for shard in 0..self.shards {
            fs::create_dir_all(self.root.join(shard_dir_name(shard))).await?;
        }

        let now = now_ms();
        let mut index = HashMap::new();
        let mut hash_to_key = HashMap::new();
        let mut total_size = 0u64;

        for shard in 0..self.shards {
            let dir = self.root.join(shard_dir_name(shard));
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(dirent) = entries.next_entry().await? {
                let path = dirent.path();
                if path.extension().map(|ext| ext != "json").unwrap_or(true) {
                    continue;
                }
                let hash = match path.file_stem().and_then(|s| s.to_str()) {
                    Some(stem) => stem.to_string(),
                    None => continue,
                };

                let meta = match fs::metadata(&path).await {
                    Ok(meta) => meta,
                    Err(_) => continue,
                };
                let raw = match fs::read(&path).await {
                    Ok(raw) => raw,
                    Err(_) => continue,
                };
                let envelope = match self.decode_envelope(&raw) {
                    Ok(envelope) => envelope,
                    Err(err) => {
                        debug!(path = %path.display(), error = %err, "skipping malformed cache file");
                        continue;
                    }
                };

                if is_expired(envelope.expires_at, now) {
                    let _ = fs::remove_file(&path).await;
                    continue;
                }

                let mtime_ms = meta
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                    .map(|d| d.as_millis() as u64)
                    .unwrap_or(now);

                total_size += meta.len();
                hash_to_key.insert(hash.clone(), envelope.key.clone());
                index.insert(
                    envelope.key,
                    IndexEntry {
                        hash,
                        expires_at: envelope.expires_at,
                        last_accessed_at: mtime_ms,
                        size: meta.len(),
                    },
                );
            }
        }

        let mut state = self.state.write();
        info!(
            entries = index.len(),
            bytes = total_size,
            dir = %self.root.display(),
            "file store index rebuilt"
        );
        state.index = index;
        state.hash_to_key = hash_to_key;
        state.total_size = total_size;
        state.initialized = true;
        Ok(())
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Fetch and decode the entry for a key, updating its access time.
    pub async fn get(&self, key: &str) -> Result<Option<Envelope>> {
        self.read_entry(key, true).await
    }

    /// Same as [`FileStore::get`] without updating the access time.
    pub async fn peek(&self, key: &str) -> Result<Option<Envelope>> {
        self.read_entry(key, false).await
    }

    async fn read_entry(&self, key: &str, touch: bool) -> Result<Option<Envelope>> {
        self.ensure_init().await?;
        let now = now_ms();

        let path = {
            let mut state = self.state.write();
            match state.index.get(key) {
                None => return Ok(None),
                Some(entry) if is_expired(entry.expires_at, now) => {
                    let hash = entry.hash.clone();
                    Self::drop_locked(&mut state, key);
                    drop(state);
                    let _ = fs::remove_file(self.entry_path(&hash)).await;
                    return Ok(None);
                }
                Some(entry) => self.entry_path(&entry.hash),
            }
        };

        let raw = match fs::read(&path).await {
            Ok(raw) => raw,
            Err(_) => {
                // The file vanished or is unreadable: the entry is lost.
                self.drop_entry(key);
                return Ok(None);
            }
        };
        let envelope = match self.decode_envelope(&raw) {
            Ok(envelope) => envelope,
            Err(err) => {
                debug!(key, error = %err, "dropping undecodable cache file");
                self.drop_entry(key);
                return Ok(None);
            }
        };

        // A different key in the file means this index entry points at a
        // digest now owned by someone else.
        if envelope.key != key {
            self.drop_entry(key);
            return Ok(None);
        }

        if touch {
            let mut state = self.state.write();
            if let Some(entry) = state.index.get_mut(key) {
                entry.last_accessed_at = now_ms();
            }
        }
        Ok(Some(envelope))
    }

    /// Whether a key is present and live. Index-only; expired entries are
    /// dropped on encounter.
    pub async fn has(&self, key: &str) -> Result<bool> {
        self.ensure_init().await?;
        let now = now_ms();

        let expired_hash = {
            let mut state = self.state.write();
            match state.index.get(key) {
                None => return Ok(false),
                Some(entry) if is_expired(entry.expires_at, now) => {
                    let hash = entry.hash.clone();
                    Self::drop_locked(&mut state, key);
                    Some(hash)
                }
                Some(_) => None,
            }
        };

        match expired_hash {
            Some(hash) => {
                let _ = fs::remove_file(self.entry_path(&hash)).await;
                Ok(false)
            }
            None => Ok(true),
        }
    }

    /// Live keys matching a pattern. Expired entries found during the scan
    /// are deleted concurrently.
    pub async fn keys(&self, pattern: &KeyPattern) -> Result<Vec<String>> {
        self.ensure_init().await?;
        let now = now_ms();

        let (matches, expired) = {
            let mut state = self.state.write();
            let mut matches = Vec::new();
            let mut expired = Vec::new();
            for (key, entry) in &state.index {
                if is_expired(entry.expires_at, now) {
                    expired.push((key.clone(), entry.hash.clone()));
                } else if pattern.matches(key) {
                    matches.push(key.clone());
                }
            }
            for (key, _) in &expired {
                Self::drop_locked(&mut state, key);
            }
            (matches, expired)
        };

        join_all(
            expired
                .iter()
                .map(|(_, hash)| fs::remove_file(self.entry_path(hash))),
        )
        .await;

        Ok(matches)
    }

    /// Remaining TTL in milliseconds, `-1` for no expiry, `-2` for missing.
    /// Index-only.
    pub async fn get_ttl(&self, key: &str) -> Result<i64> {
        self.ensure_init().await?;
        let state = self.state.read();
        Ok(state
            .index
            .get(key)
            .map(|entry| remaining_ttl_ms(entry.expires_at, now_ms()))
            .unwrap_or(TTL_MISSING))
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Store a pre-serialized envelope for a key. Evicts a colliding digest
    /// owner and makes room under the byte bound before writing; the write
    /// itself is temp-file-plus-rename atomic.
    pub async fn set(&self, key: &str, envelope_json: String, expires_at: Option<u64>) -> Result<()> {
        self.ensure_init().await?;

        let digest = key_digest(key);
        let path = self.entry_path(&digest);
        let bytes = self.codec.encode(envelope_json.as_bytes())?;
        let size = bytes.len() as u64;

        let (collision, victims) = {
            let mut state = self.state.write();

            if let Some(old) = state.index.remove(key) {
                state.total_size = state.total_size.saturating_sub(old.size);
                state.hash_to_key.remove(&old.hash);
            }

            // Another live key already owns this digest: evict it. Its file
            // is this same path and is replaced by the rename below.
            let collision = match state.hash_to_key.get(&digest) {
                Some(owner) if owner != key => {
                    let owner = owner.clone();
                    if let Some(entry) = state.index.remove(&owner) {
                        state.total_size = state.total_size.saturating_sub(entry.size);
                    }
                    state.hash_to_key.remove(&digest);
                    Some(owner)
                }
                _ => None,
            };

            let victims = Self::collect_space_victims(&mut state, size, self.max_size);
            (collision, victims)
        };

        if let Some(owner) = &collision {
            debug!(evicted = %owner, key, "hash collision evicted previous owner");
            (self.on_evict)(owner);
        }
        for (victim, entry) in &victims {
            debug!(key = %victim, size = entry.size, "evicted for space");
            (self.on_evict)(victim);
        }
        join_all(
            victims
                .iter()
                .map(|(_, entry)| fs::remove_file(self.entry_path(&entry.hash))),
        )
        .await;

        self.atomic_write(&path, &bytes).await?;

        let mut state = self.state.write();
        state.hash_to_key.insert(digest.clone(), key.to_string());
        state.index.insert(
            key.to_string(),
            IndexEntry {
                hash: digest,
                expires_at,
                last_accessed_at: now_ms(),
                size,
            },
        );
        state.total_size += size;
        Ok(())
    }

    /// Remove a key. Index state is corrected first; the unlink is
    /// best-effort. Returns whether the entry was indexed.
    pub async fn delete(&self, key: &str) -> Result<bool> {
        self.ensure_init().await?;

        let entry = {
            let mut state = self.state.write();
            match state.index.remove(key) {
                Some(entry) => {
                    state.hash_to_key.remove(&entry.hash);
                    state.total_size = state.total_size.saturating_sub(entry.size);
                    Some(entry)
                }
                None => None,
            }
        };

        match entry {
            Some(entry) => {
                let _ = fs::remove_file(self.entry_path(&entry.hash)).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Rewrite the stored envelope with a new expiry. Returns false if the
    /// key is missing, expired, or its file turned out to be lost.
    pub async fn set_expiry(&self, key: &str, expires_at: Option<u64>) -> Result<bool> {
        let envelope = match self.peek(key).await? {
            Some(envelope) => envelope,
            None => return Ok(false),
        };

        let json = crate::entry::EnvelopeRef {
            key: &envelope.key,
            value: &envelope.value,
            expires_at,
        }
        .to_json()?;
        let bytes = self.codec.encode(json.as_bytes())?;
        let size = bytes.len() as u64;
        let path = {
            let state = self.state.read();
            match state.index.get(key) {
                Some(entry) => self.entry_path(&entry.hash),
                None => return Ok(false),
            }
        };

        self.atomic_write(&path, &bytes).await?;

        let mut state = self.state.write();
        if let Some(entry) = state.index.get_mut(key) {
            let old_size = entry.size;
            entry.expires_at = expires_at;
            entry.size = size;
            state.total_size = state.total_size.saturating_sub(old_size) + size;
        }
        Ok(true)
    }

    /// Refresh the access time in the index and, best-effort, the file
    /// mtime so the LRU position survives a restart.
    pub async fn touch(&self, key: &str) -> Result<bool> {
        self.ensure_init().await?;
        let now = now_ms();

        let hash = {
            let mut state = self.state.write();
            match state.index.get_mut(key) {
                None => return Ok(false),
                Some(entry) if is_expired(entry.expires_at, now) => return Ok(false),
                Some(entry) => {
                    entry.last_accessed_at = now;
                    entry.hash.clone()
                }
            }
        };

        let path = self.entry_path(&hash);
        let _ = tokio::task::spawn_blocking(move || {
            if let Ok(file) = std::fs::OpenOptions::new().write(true).open(&path) {
                let _ = file.set_modified(std::time::SystemTime::now());
            }
        })
        .await;
        Ok(true)
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Delete every expired entry. Returns how many were removed.
    pub async fn prune(&self) -> Result<usize> {
        self.ensure_init().await?;
        let now = now_ms();

        let expired = {
            let mut state = self.state.write();
            let expired: Vec<(String, String)> = state
                .index
                .iter()
                .filter(|(_, entry)| is_expired(entry.expires_at, now))
                .map(|(key, entry)| (key.clone(), entry.hash.clone()))
                .collect();
            for (key, _) in &expired {
                Self::drop_locked(&mut state, key);
            }
            expired
        };

        join_all(
            expired
                .iter()
                .map(|(_, hash)| fs::remove_file(self.entry_path(hash))),
        )
        .await;

        if !expired.is_empty() {
            debug!(count = expired.len(), "pruned expired disk entries");
        }
        Ok(expired.len())
    }

    /// Remove every entry and reset all counters.
    pub async fn clear(&self) -> Result<()> {
        self.ensure_init().await?;

        let hashes: Vec<String> = {
            let mut state = self.state.write();
            let hashes = state.index.values().map(|e| e.hash.clone()).collect();
            state.index.clear();
            state.hash_to_key.clear();
            state.total_size = 0;
            hashes
        };

        join_all(hashes.iter().map(|hash| fs::remove_file(self.entry_path(hash)))).await;
        Ok(())
    }

    pub async fn size(&self) -> Result<u64> {
        self.ensure_init().await?;
        Ok(self.state.read().total_size)
    }

    pub async fn item_count(&self) -> Result<usize> {
        self.ensure_init().await?;
        Ok(self.state.read().index.len())
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn entry_path(&self, hash: &str) -> PathBuf {
        let shard = shard_index(hash, self.shards);
        self.root
            .join(shard_dir_name(shard))
            .join(format!("{hash}.json"))
    }

    fn decode_envelope(&self, raw: &[u8]) -> Result<Envelope> {
        let plain = self.codec.decode(raw)?;
        Envelope::from_slice(&plain)
    }

    /// Forget an entry whose file is gone or unreadable.
    fn drop_entry(&self, key: &str) {
        let mut state = self.state.write();
        Self::drop_locked(&mut state, key);
    }

    fn drop_locked(state: &mut StoreState, key: &str) {
        if let Some(entry) = state.index.remove(key) {
            state.hash_to_key.remove(&entry.hash);
            state.total_size = state.total_size.saturating_sub(entry.size);
        }
    }

    /// Pick and unindex eviction victims so that `needed` more bytes fit
    /// under the bound. Expired entries go first, then coldest-first by
    /// last access. Returns the victims for callback and unlink.
    fn collect_space_victims(
        state: &mut StoreState,
        needed: u64,
        max_size: u64,
    ) -> Vec<(String, IndexEntry)> {
        if state.total_size + needed <= max_size {
            return Vec::new();
        }
        let target = state.total_size + needed - max_size;
        let now = now_ms();
        let mut freed = 0u64;
        let mut victims = Vec::new();

        let expired: Vec<String> = state
            .index
            .iter()
            .filter(|(_, entry)| is_expired(entry.expires_at, now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in expired {
            if freed >= target {
                break;
            }
            if let Some(entry) = state.index.remove(&key) {
                state.hash_to_key.remove(&entry.hash);
                state.total_size = state.total_size.saturating_sub(entry.size);
                freed += entry.size;
                victims.push((key, entry));
            }
        }

        while freed < target && !state.index.is_empty() {
            let coldest = state
                .index
                .iter()
                .min_by_key(|(_, entry)| entry.last_accessed_at)
                .map(|(key, _)| key.clone());
            let Some(key) = coldest else { break };
            if let Some(entry) = state.index.remove(&key) {
                state.hash_to_key.remove(&entry.hash);
                state.total_size = state.total_size.saturating_sub(entry.size);
                freed += entry.size;
                victims.push((key, entry));
            }
        }

        victims
    }

    /// Write bytes to a uniquely named temp file in the root, then rename
    /// into place. On any failure the temp file is removed best-effort and
    /// the error propagates.
    async fn atomic_write(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        let tmp = self.root.join(format!(".tmp-{}", Uuid::new_v4()));
        if let Err(err) = fs::write(&tmp, bytes).await {
            let _ = fs::remove_file(&tmp).await;
            warn!(path = %path.display(), error = %err, "cache write failed");
            return Err(err.into());
        }
        if let Err(err) = fs::rename(&tmp, path).await {
            let _ = fs::remove_file(&tmp).await;
            warn!(path = %path.display(), error = %err, "cache rename failed");
            return Err(err.into());
        }
        Ok(())
    }
}
