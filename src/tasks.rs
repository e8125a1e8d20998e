//! Background tasks
//!
//! Two kinds: a debounced per-key disk-touch scheduler, and a periodic
//! pruner. Both are ordinary spawned tasks owned by the coordinator and
//! aborted on `close`, so they never extend the life of the process on
//! their own.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::storage::{FileStore, MemoryStore};

/// Window within which repeated reads of one key coalesce into a single
/// disk-touch
pub const TOUCH_DEBOUNCE: Duration = Duration::from_secs(5);

/// Debounced disk-touch scheduler
///
/// A memory hit schedules one delayed mtime refresh for its key; further
/// hits inside the window are no-ops. Pending touches are cancelled when
/// the key is deleted or evicted, and en masse on `clear`/`close`.
pub struct TouchScheduler {
    pending: DashMap<String, JoinHandle<()>>,
    delay: Duration,
}

impl TouchScheduler {
    pub fn new(delay: Duration) -> Self {
        Self {
            pending: DashMap::new(),
            delay,
        }
    }

    /// Schedule a touch for `key` unless one is already pending.
    pub fn schedule(self: &Arc<Self>, key: &str, store: &Arc<FileStore>) {
        if self.pending.contains_key(key) {
            return;
        }
        let delay = self.delay;
        let owned_key = key.to_string();
        let store = Arc::clone(store);
        let scheduler = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            scheduler.pending.remove(&owned_key);
            if let Err(err) = store.touch(&owned_key).await {
                debug!(key = %owned_key, error = %err, "debounced touch failed");
            }
        });
        self.pending.insert(key.to_string(), handle);
    }

    /// Cancel the pending touch for one key, if any.
    pub fn cancel(&self, key: &str) {
        if let Some((_, handle)) = self.pending.remove(key) {
            handle.abort();
        }
    }

    /// Cancel every pending touch.
    pub fn cancel_all(&self) {
        let keys: Vec<String> = self.pending.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            self.cancel(&key);
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

/// Spawn the periodic prune loop. Errors from a sweep are logged and the
/// loop continues; the returned handle is aborted on `close`.
pub fn spawn_prune_task(
    memory: Arc<Mutex<MemoryStore>>,
    file: Arc<FileStore>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        debug!(interval_ms = interval.as_millis() as u64, "prune task started");
        loop {
            tokio::time::sleep(interval).await;
            let from_memory = memory.lock().prune();
            match file.prune().await {
                Ok(from_disk) => {
                    if from_memory + from_disk > 0 {
                        debug!(memory = from_memory, disk = from_disk, "pruned expired entries");
                    }
                }
                Err(err) => warn!(error = %err, "periodic prune failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::IdentityCodec;
    use crate::entry::{now_ms, EnvelopeRef};
    use bytes::Bytes;
    use tempfile::TempDir;

    fn file_store(dir: &std::path::Path) -> Arc<FileStore> {
        Arc::new(FileStore::new(
            dir,
            2,
            1 << 20,
            Arc::new(IdentityCodec),
            Box::new(|_| {}),
        ))
    }

    fn envelope_json(key: &str, expires_at: Option<u64>) -> String {
        let raw = serde_json::value::RawValue::from_string("\"v\"".to_string()).unwrap();
        EnvelopeRef {
            key,
            value: &raw,
            expires_at,
        }
        .to_json()
        .unwrap()
    }

    #[tokio::test]
    async fn test_touches_coalesce() {
        let tmp = TempDir::new().unwrap();
        let store = file_store(tmp.path());
        let scheduler = Arc::new(TouchScheduler::new(Duration::from_millis(50)));

        scheduler.schedule("k", &store);
        scheduler.schedule("k", &store);
        scheduler.schedule("k", &store);
        assert_eq!(scheduler.pending_count(), 1);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(scheduler.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_prevents_touch() {
        let tmp = TempDir::new().unwrap();
        let store = file_store(tmp.path());
        store
            .set("k", envelope_json("k", None), None)
            .await
            .unwrap();
        let scheduler = Arc::new(TouchScheduler::new(Duration::from_millis(50)));

        scheduler.schedule("k", &store);
        scheduler.cancel("k");
        assert_eq!(scheduler.pending_count(), 0);

        scheduler.schedule("a", &store);
        scheduler.schedule("b", &store);
        scheduler.cancel_all();
        assert_eq!(scheduler.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_prune_task_sweeps_expired() {
        let tmp = TempDir::new().unwrap();
        let store = file_store(tmp.path());
        let memory = Arc::new(Mutex::new(MemoryStore::new(10, 1024)));

        let past = now_ms() - 1;
        store
            .set("dead", envelope_json("dead", Some(past)), Some(past))
            .await
            .unwrap();
        memory
            .lock()
            .set("dead", Bytes::from_static(b"\"v\""), Some(past));

        let handle = spawn_prune_task(
            Arc::clone(&memory),
            Arc::clone(&store),
            Duration::from_millis(20),
        );
        tokio::time::sleep(Duration::from_millis(60)).await;
        handle.abort();

        assert_eq!(store.item_count().await.unwrap(), 0);
        assert!(memory.lock().is_empty());
    }
}
