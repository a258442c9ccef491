//! Periodic write-buffer flush worker.

use super::CounterEngine;
use crate::store::CounterStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::time::interval;
use tracing::debug;

struct Shutdown {
    requested: AtomicBool,
    notify: Notify,
}

/// Background task that sweeps the engine's write buffer once per flush
/// interval. Errors never escape the loop; a failed key keeps its delta and
/// is retried on the next tick.
pub struct FlushWorker<S: CounterStore> {
    engine: Arc<CounterEngine<S>>,
    shutdown: Arc<Shutdown>,
}

/// Handle for stopping a [`FlushWorker`]. Signalling shutdown triggers one
/// final sweep before the task exits, so buffered visits reach the backend.
pub struct FlushWorkerHandle {
    shutdown: Arc<Shutdown>,
}

impl FlushWorkerHandle {
    pub fn shutdown(&self) {
        self.shutdown.requested.store(true, Ordering::SeqCst);
        self.shutdown.notify.notify_one();
    }
}

impl<S: CounterStore> FlushWorker<S> {
    pub fn new(engine: Arc<CounterEngine<S>>) -> (Self, FlushWorkerHandle) {
        let shutdown = Arc::new(Shutdown {
            requested: AtomicBool::new(false),
            notify: Notify::new(),
        });
        let worker = FlushWorker {
            engine,
            shutdown: shutdown.clone(),
        };
        (worker, FlushWorkerHandle { shutdown })
    }

    pub async fn run(self) {
        let mut tick = interval(self.engine.flush_interval());
        // The first tick completes immediately; consume it so the first
        // sweep happens one full interval after startup.
        tick.tick().await;

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    debug!("Flushing write buffer");
                    self.engine.flush_all().await;
                }
                _ = self.shutdown.notify.notified() => {}
            }
            if self.shutdown.requested.load(Ordering::SeqCst) {
                self.engine.flush_all().await;
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shard::ShardManager;
    use crate::store::{CounterStore, MemoryStore};
    use std::time::Duration;

    async fn engine(flush_interval: Duration) -> (Arc<CounterEngine<MemoryStore>>, Arc<MemoryStore>) {
        let shards = Arc::new(ShardManager::<MemoryStore>::new(100, 4));
        shards.add_shard("mem://a").await.unwrap();
        let store = shards.store("mem://a").unwrap();
        let engine = Arc::new(CounterEngine::new(
            shards,
            Duration::from_secs(50),
            flush_interval,
        ));
        (engine, store)
    }

    #[tokio::test]
    async fn ticks_flush_the_buffer() {
        let (engine, store) = engine(Duration::from_millis(30)).await;
        let (worker, handle) = FlushWorker::new(engine.clone());
        let task = tokio::spawn(worker.run());

        engine.record_visit("page").await;
        engine.record_visit("page").await;
        tokio::time::sleep(Duration::from_millis(120)).await;

        assert_eq!(store.get("page").await.unwrap(), Some(2));

        handle.shutdown();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_performs_a_final_sweep() {
        let (engine, store) = engine(Duration::from_secs(3600)).await;
        let (worker, handle) = FlushWorker::new(engine.clone());
        let task = tokio::spawn(worker.run());

        engine.record_visit("page").await;
        handle.shutdown();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("worker exits promptly on shutdown")
            .unwrap();

        assert_eq!(store.get("page").await.unwrap(), Some(1));
    }
}
