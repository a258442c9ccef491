//! The tiered counter engine.
//!
//! Writes land in a per-key in-memory buffer and reach the backend in
//! batches; reads come from a TTL cache when fresh and fold in whatever is
//! still buffered. The write path never touches the backend, so a burst of
//! visits costs one `INCRBY` per key per flush interval instead of one
//! round trip per visit.

mod flusher;

pub use flusher::{FlushWorker, FlushWorkerHandle};

use crate::shard::{ShardError, ShardManager};
use crate::store::CounterStore;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::warn;

/// Where a read's base value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ServedVia {
    #[serde(rename = "in_memory")]
    InMemory,
    #[serde(rename = "in_redis")]
    InRedis,
}

impl ServedVia {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServedVia::InMemory => "in_memory",
            ServedVia::InRedis => "in_redis",
        }
    }
}

impl std::fmt::Display for ServedVia {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pending increments for one key.
///
/// `retired` marks a slot that a flush has detached from the buffer map. A
/// writer that raced the flush and still holds the old slot re-fetches a
/// fresh one instead of updating the dead entry, so no visit is lost to the
/// removal.
#[derive(Debug, Default)]
struct BufferSlot {
    count: u64,
    retired: bool,
}

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    count: i64,
    at: Instant,
}

/// Per-key write coalescing and read caching in front of the shard fleet.
pub struct CounterEngine<S> {
    shards: Arc<ShardManager<S>>,
    buffer: DashMap<String, Arc<Mutex<BufferSlot>>>,
    cache: DashMap<String, CacheEntry>,
    cache_ttl: Duration,
    flush_interval: Duration,
}

impl<S: CounterStore> CounterEngine<S> {
    pub fn new(shards: Arc<ShardManager<S>>, cache_ttl: Duration, flush_interval: Duration) -> Self {
        CounterEngine {
            shards,
            buffer: DashMap::new(),
            cache: DashMap::new(),
            cache_ttl,
            flush_interval,
        }
    }

    pub fn shard_manager(&self) -> &Arc<ShardManager<S>> {
        &self.shards
    }

    pub fn flush_interval(&self) -> Duration {
        self.flush_interval
    }

    /// Buffer one visit for `page_id`. Never touches the backend.
    pub async fn record_visit(&self, page_id: &str) {
        loop {
            let slot = Arc::clone(self.buffer.entry(page_id.to_string()).or_default().value());
            let mut pending = slot.lock().await;
            if pending.retired {
                // Lost the race against a flush that removed this slot.
                continue;
            }
            pending.count += 1;
            return;
        }
    }

    /// Current count for `page_id` and where its base value came from.
    ///
    /// A fresh cache hit serves from memory. On a miss, the pending delta is
    /// flushed first so the backend read reflects every visit accepted
    /// before this point, then the fetched value refreshes the cache.
    /// Either way the *current* buffered delta is added on top, so visits
    /// accepted after the flush still show up.
    pub async fn visit_count(&self, page_id: &str) -> Result<(i64, ServedVia), ShardError> {
        let (base, source) = match self.cached(page_id) {
            Some(count) => (count, ServedVia::InMemory),
            None => {
                self.flush_key(page_id).await?;
                let store = self.shards.store_for(page_id)?;
                let count = store.get(page_id).await?.unwrap_or(0);
                self.cache.insert(
                    page_id.to_string(),
                    CacheEntry {
                        count,
                        at: Instant::now(),
                    },
                );
                (count, ServedVia::InRedis)
            }
        };

        let mut count = base;
        if let Some(slot) = self.buffer.get(page_id).map(|s| Arc::clone(s.value())) {
            let pending = slot.lock().await;
            if !pending.retired {
                count += pending.count as i64;
            }
        }

        Ok((count, source))
    }

    /// Promote `page_id`'s buffered delta into an `INCRBY` on its shard.
    ///
    /// The key's buffer lock is held across the backend call, so a
    /// concurrent visit either lands in this flush or starts a fresh slot
    /// afterwards. On failure the delta stays buffered for the next attempt.
    pub async fn flush_key(&self, page_id: &str) -> Result<(), ShardError> {
        let Some(slot) = self.buffer.get(page_id).map(|s| Arc::clone(s.value())) else {
            return Ok(());
        };
        let mut pending = slot.lock().await;
        if pending.retired {
            // Another flush already drained this slot.
            return Ok(());
        }
        if pending.count > 0 {
            let store = self.shards.store_for(page_id)?;
            store.incr_by(page_id, pending.count as i64).await?;
        }
        pending.retired = true;
        self.buffer.remove(page_id);
        Ok(())
    }

    /// One flush sweep over every key buffered at this instant. Per-key
    /// failures are logged and their deltas retained; the sweep itself never
    /// fails.
    pub async fn flush_all(&self) {
        for key in self.buffered_keys() {
            if let Err(e) = self.flush_key(&key).await {
                warn!("Flush failed for {}, delta retained: {}", key, e);
            }
        }
    }

    /// Keys with pending deltas at this instant.
    pub fn buffered_keys(&self) -> Vec<String> {
        self.buffer.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Buffered-but-unflushed visits for `page_id`.
    pub async fn pending_visits(&self, page_id: &str) -> u64 {
        match self.buffer.get(page_id).map(|s| Arc::clone(s.value())) {
            Some(slot) => {
                let pending = slot.lock().await;
                if pending.retired {
                    0
                } else {
                    pending.count
                }
            }
            None => 0,
        }
    }

    fn cached(&self, page_id: &str) -> Option<i64> {
        let entry = self.cache.get(page_id)?;
        (entry.at.elapsed() < self.cache_ttl).then_some(entry.count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    async fn single_shard_engine(cache_ttl: Duration) -> (CounterEngine<MemoryStore>, Arc<MemoryStore>) {
        let shards = Arc::new(ShardManager::<MemoryStore>::new(100, 4));
        shards.add_shard("mem://a").await.unwrap();
        let store = shards.store("mem://a").unwrap();
        let engine = CounterEngine::new(shards, cache_ttl, Duration::from_secs(3600));
        (engine, store)
    }

    #[tokio::test]
    async fn visits_accumulate_in_the_buffer_only() {
        let (engine, store) = single_shard_engine(Duration::from_secs(50)).await;
        for _ in 0..7 {
            engine.record_visit("page").await;
        }
        assert_eq!(engine.pending_visits("page").await, 7);
        assert!(store.is_empty(), "write path must not touch the backend");
    }

    #[tokio::test]
    async fn flush_drains_the_delta_exactly_once() {
        let (engine, store) = single_shard_engine(Duration::from_secs(50)).await;
        for _ in 0..3 {
            engine.record_visit("page").await;
        }

        engine.flush_key("page").await.unwrap();
        assert_eq!(store.get("page").await.unwrap(), Some(3));
        assert_eq!(engine.pending_visits("page").await, 0);

        // A second flush with nothing buffered is a no-op.
        engine.flush_key("page").await.unwrap();
        assert_eq!(store.get("page").await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn the_buffer_restarts_after_a_flush() {
        let (engine, store) = single_shard_engine(Duration::from_secs(50)).await;
        engine.record_visit("page").await;
        engine.flush_key("page").await.unwrap();
        engine.record_visit("page").await;
        engine.record_visit("page").await;

        assert_eq!(engine.pending_visits("page").await, 2);
        engine.flush_key("page").await.unwrap();
        assert_eq!(store.get("page").await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn stale_cache_entries_are_refreshed_from_the_backend() {
        let (engine, store) = single_shard_engine(Duration::from_millis(40)).await;
        engine.record_visit("page").await;

        let (count, via) = engine.visit_count("page").await.unwrap();
        assert_eq!((count, via), (1, ServedVia::InRedis));

        // Fresh: served from memory even though the backend moved on.
        store.set("page", 100).await.unwrap();
        let (count, via) = engine.visit_count("page").await.unwrap();
        assert_eq!((count, via), (1, ServedVia::InMemory));

        // Stale: the next read goes back to the backend.
        tokio::time::sleep(Duration::from_millis(60)).await;
        let (count, via) = engine.visit_count("page").await.unwrap();
        assert_eq!((count, via), (100, ServedVia::InRedis));
    }

    #[tokio::test]
    async fn concurrent_visits_are_all_counted() {
        let (engine, store) = single_shard_engine(Duration::from_secs(50)).await;
        let engine = Arc::new(engine);

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let engine = engine.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..250 {
                    engine.record_visit("hot").await;
                }
            }));
        }
        // Flushes race the writers; retired slots force re-fetch, so none of
        // the 2000 visits may be dropped.
        for _ in 0..4 {
            let engine = engine.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..20 {
                    let _ = engine.flush_key("hot").await;
                    tokio::task::yield_now().await;
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        engine.flush_key("hot").await.unwrap();
        assert_eq!(store.get("hot").await.unwrap(), Some(2000));
        assert_eq!(engine.pending_visits("hot").await, 0);
    }
}
