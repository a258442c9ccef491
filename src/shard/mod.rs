//! Shard membership, routing, and key migration.
//!
//! The manager owns one pooled client per backend shard and a published
//! [`HashRing`] snapshot. Admin operations serialize on an async mutex,
//! rebuild the ring copy-on-write, and move the keys whose owner changed.
//! Lookups never block behind a migration: they read whichever ring
//! snapshot is currently published.

use crate::ring::HashRing;
use crate::store::{CounterStore, StoreError};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug)]
pub enum ShardError {
    /// The ring is empty; no shard can own the key.
    NoShards,
    /// Refused to remove the only remaining shard.
    LastShard,
    /// Some keys could not be moved during a membership change. The system
    /// keeps serving; the keys that failed stay on their old shard.
    MigrationPartial { moved: usize, failed: usize },
    /// A backend client failed.
    Store(StoreError),
}

impl fmt::Display for ShardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShardError::NoShards => write!(f, "no backend shards available"),
            ShardError::LastShard => write!(f, "cannot remove the last backend shard"),
            ShardError::MigrationPartial { moved, failed } => write!(
                f,
                "migration incomplete: {} keys moved, {} failed",
                moved, failed
            ),
            ShardError::Store(e) => write!(f, "backend store error: {}", e),
        }
    }
}

impl std::error::Error for ShardError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ShardError::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for ShardError {
    fn from(e: StoreError) -> Self {
        ShardError::Store(e)
    }
}

/// Registry of live shard clients plus the hash ring that routes keys to
/// them.
pub struct ShardManager<S> {
    stores: RwLock<HashMap<String, Arc<S>>>,
    ring: RwLock<Arc<HashRing>>,
    /// Serializes add/remove so two membership changes never interleave.
    admin: Mutex<()>,
    pool_max: usize,
}

impl<S: CounterStore> ShardManager<S> {
    pub fn new(virtual_nodes: u32, pool_max: usize) -> Self {
        ShardManager {
            stores: RwLock::new(HashMap::new()),
            ring: RwLock::new(Arc::new(HashRing::new(virtual_nodes))),
            admin: Mutex::new(()),
            pool_max,
        }
    }

    /// The currently published ring.
    fn ring_snapshot(&self) -> Arc<HashRing> {
        self.ring.read().clone()
    }

    /// Resolve the client owning `key`.
    pub fn store_for(&self, key: &str) -> Result<Arc<S>, ShardError> {
        let ring = self.ring_snapshot();
        let shard = ring.node_for(key).ok_or(ShardError::NoShards)?;
        self.stores
            .read()
            .get(shard)
            .cloned()
            .ok_or(ShardError::NoShards)
    }

    /// Shard id owning `key`, if any.
    pub fn shard_for(&self, key: &str) -> Option<String> {
        self.ring_snapshot().node_for(key).map(str::to_string)
    }

    /// Client registered under a shard id, if any.
    pub fn store(&self, shard: &str) -> Option<Arc<S>> {
        self.stores.read().get(shard).cloned()
    }

    pub fn shard_ids(&self) -> Vec<String> {
        self.stores.read().keys().cloned().collect()
    }

    pub fn shard_count(&self) -> usize {
        self.stores.read().len()
    }

    /// Register a new shard and pull over the keys it now owns.
    ///
    /// Idempotent for a shard id that is already registered. The new ring is
    /// published before keys move, so a lookup racing the migration may
    /// route to the new shard slightly early.
    pub async fn add_shard(&self, shard: &str) -> Result<(), ShardError> {
        let _admin = self.admin.lock().await;

        if self.stores.read().contains_key(shard) {
            return Ok(());
        }

        info!("Adding backend shard: {}", shard);
        let store = Arc::new(S::connect(shard, self.pool_max).await?);

        // Migration resolves each key's previous owner against this
        // pre-change snapshot.
        let old_ring = self.ring_snapshot();
        let mut next = (*old_ring).clone();
        next.add_node(shard);
        let new_ring = Arc::new(next);
        *self.ring.write() = new_ring.clone();

        let existing: Vec<(String, Arc<S>)> = self
            .stores
            .read()
            .iter()
            .map(|(id, s)| (id.clone(), s.clone()))
            .collect();
        self.stores.write().insert(shard.to_string(), store.clone());

        if existing.is_empty() {
            return Ok(());
        }

        // Candidates: everything on the pre-existing shards, minus whatever
        // the new shard already holds.
        let mut candidates: HashSet<String> = HashSet::new();
        for (_, peer) in &existing {
            candidates.extend(peer.keys().await?);
        }
        for key in store.keys().await? {
            candidates.remove(&key);
        }

        let mut moved = 0usize;
        let mut failed = 0usize;
        for key in &candidates {
            if new_ring.node_for(key) != Some(shard) {
                continue;
            }
            let Some(old_owner) = old_ring.node_at(HashRing::position_of(key)) else {
                continue;
            };
            let Some(source) = existing
                .iter()
                .find(|(id, _)| id.as_str() == old_owner)
                .map(|(_, s)| s)
            else {
                warn!("No client for previous owner {} of key {}", old_owner, key);
                failed += 1;
                continue;
            };
            match Self::move_key(key, source, &store).await {
                Ok(true) => {
                    info!("Migrated key {} from {} to {}", key, old_owner, shard);
                    moved += 1;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(
                        "Failed to migrate key {} from {} to {}: {}",
                        key, old_owner, shard, e
                    );
                    failed += 1;
                }
            }
        }

        if failed > 0 {
            return Err(ShardError::MigrationPartial { moved, failed });
        }
        Ok(())
    }

    /// Deregister a shard, draining its keys to their new owners first.
    ///
    /// A no-op when the shard is unknown; refused when it is the only shard,
    /// since the keys would have nowhere to go.
    pub async fn remove_shard(&self, shard: &str) -> Result<(), ShardError> {
        let _admin = self.admin.lock().await;

        let Some(departing) = self.store(shard) else {
            return Ok(());
        };
        if self.stores.read().len() == 1 {
            return Err(ShardError::LastShard);
        }

        info!("Removing backend shard: {}", shard);
        let mut next = (*self.ring_snapshot()).clone();
        next.remove_node(shard);
        let new_ring = Arc::new(next);
        *self.ring.write() = new_ring.clone();

        let keys = departing.keys().await?;
        let mut moved = 0usize;
        let mut failed = 0usize;
        for key in &keys {
            let Some(target) = new_ring.node_for(key).and_then(|owner| self.store(owner)) else {
                warn!("No surviving owner for key {}", key);
                failed += 1;
                continue;
            };
            match Self::move_key(key, &departing, &target).await {
                Ok(true) => moved += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!("Failed to migrate key {} off {}: {}", key, shard, e);
                    failed += 1;
                }
            }
        }

        self.stores.write().remove(shard);
        info!("Shard {} drained: {} keys moved, {} failed", shard, moved, failed);

        if failed > 0 {
            return Err(ShardError::MigrationPartial { moved, failed });
        }
        Ok(())
    }

    /// Copy a key to its new owner, then remove it from the old one. `SET`
    /// runs before `DELETE`, so an interrupted move leaves at worst a
    /// duplicate with the same value, never divergent copies.
    ///
    /// Returns `false` when the key vanished before the move.
    async fn move_key(key: &str, from: &Arc<S>, to: &Arc<S>) -> Result<bool, StoreError> {
        let Some(value) = from.get(key).await? else {
            return Ok(false);
        };
        to.set(key, value).await?;
        from.delete(key).await?;
        Ok(true)
    }
}
