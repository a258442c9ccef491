//! In-process store used by tests and single-node development runs.

use super::{CounterStore, StoreError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

/// Shared-map store with the same observable semantics as a real shard:
/// absent keys read as `None` and `incr_by` starts from zero.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, i64>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    /// Number of keys currently stored.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn connect(_url: &str, _pool_max: usize) -> Result<Self, StoreError> {
        Ok(MemoryStore::new())
    }

    async fn get(&self, key: &str) -> Result<Option<i64>, StoreError> {
        Ok(self.entries.lock().get(key).copied())
    }

    async fn set(&self, key: &str, value: i64) -> Result<(), StoreError> {
        self.entries.lock().insert(key.to_string(), value);
        Ok(())
    }

    async fn incr_by(&self, key: &str, n: i64) -> Result<i64, StoreError> {
        let mut entries = self.entries.lock();
        let value = entries.entry(key.to_string()).or_insert(0);
        *value += n;
        Ok(*value)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.entries.lock().keys().cloned().collect())
    }
}
