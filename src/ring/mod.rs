//! Consistent hash ring for shard placement.
//!
//! Maps keys to shard identifiers via consistent hashing with virtual nodes.
//! Positions are 32-bit values derived from SHA-256, so two rings built by
//! the same membership sequence route every key identically, across
//! processes and across restarts.

use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Default number of virtual nodes each shard contributes to the ring.
pub const DEFAULT_VIRTUAL_NODES: u32 = 100;

/// Consistent hash ring mapping keys to shard ids.
///
/// The ring is a sorted sequence of positions plus a position-to-shard map.
/// Mutation happens only through [`HashRing::add_node`] and
/// [`HashRing::remove_node`]; callers that need lock-free lookups clone the
/// ring, modify the copy, and publish it atomically.
#[derive(Debug, Clone)]
pub struct HashRing {
    /// Ring positions, ascending.
    positions: Vec<u32>,
    /// Position -> owning shard id.
    owners: HashMap<u32, String>,
    /// Virtual nodes per shard.
    virtual_nodes: u32,
}

impl HashRing {
    pub fn new(virtual_nodes: u32) -> Self {
        debug_assert!(virtual_nodes > 0, "each shard needs at least one virtual node");
        HashRing {
            positions: Vec::new(),
            owners: HashMap::new(),
            virtual_nodes,
        }
    }

    /// Ring position of a key: the SHA-256 digest reduced mod 2^32.
    pub fn position_of(key: &str) -> u32 {
        let digest = Sha256::digest(key.as_bytes());
        // The digest is a big-endian 256-bit integer, so mod 2^32 keeps the
        // last four bytes.
        u32::from_be_bytes([digest[28], digest[29], digest[30], digest[31]])
    }

    /// Add a shard's virtual nodes to the ring.
    ///
    /// Idempotent: a position that is already present (the same shard added
    /// twice, or a rare cross-shard collision) is skipped, never overwritten.
    pub fn add_node(&mut self, shard: &str) {
        for i in 0..self.virtual_nodes {
            let position = Self::position_of(&format!("{}-{}", shard, i));
            if self.owners.contains_key(&position) {
                continue;
            }
            let idx = self.positions.partition_point(|p| *p < position);
            self.positions.insert(idx, position);
            self.owners.insert(position, shard.to_string());
        }
    }

    /// Remove every position owned by `shard`. Positions owned by other
    /// shards are untouched.
    pub fn remove_node(&mut self, shard: &str) {
        self.owners.retain(|_, owner| owner != shard);
        let owners = &self.owners;
        self.positions.retain(|p| owners.contains_key(p));
    }

    /// Shard owning `key`: the first position at or after the key's hash,
    /// wrapping past the top of the ring. `None` iff the ring is empty.
    pub fn node_for(&self, key: &str) -> Option<&str> {
        self.node_at(Self::position_of(key))
    }

    /// Shard owning a raw ring position.
    ///
    /// Migration uses this against a pre-change snapshot to find where a key
    /// lived before a membership change.
    pub fn node_at(&self, position: u32) -> Option<&str> {
        if self.positions.is_empty() {
            return None;
        }
        let idx = self.positions.partition_point(|p| *p < position);
        let slot = self.positions[idx % self.positions.len()];
        self.owners.get(&slot).map(String::as_str)
    }

    pub fn contains_node(&self, shard: &str) -> bool {
        self.owners.values().any(|owner| owner == shard)
    }

    /// Number of positions currently on the ring.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

impl Default for HashRing {
    fn default() -> Self {
        Self::new(DEFAULT_VIRTUAL_NODES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_ring_has_no_owner() {
        let ring = HashRing::new(100);
        assert!(ring.is_empty());
        assert_eq!(ring.node_for("page-1"), None);
    }

    #[test]
    fn add_and_remove_track_positions_exactly() {
        let mut ring = HashRing::new(100);
        ring.add_node("redis://a:6379");
        let after_a = ring.len();
        assert!(after_a <= 100);

        ring.add_node("redis://b:6379");
        assert!(ring.contains_node("redis://b:6379"));

        ring.remove_node("redis://b:6379");
        assert!(!ring.contains_node("redis://b:6379"));
        assert_eq!(ring.len(), after_a);
        assert!(ring.contains_node("redis://a:6379"));
    }

    #[test]
    fn re_adding_a_shard_changes_nothing() {
        let mut ring = HashRing::new(100);
        ring.add_node("redis://a:6379");
        let len = ring.len();
        ring.add_node("redis://a:6379");
        assert_eq!(ring.len(), len);
    }

    #[test]
    fn identically_built_rings_route_identically() {
        let mut one = HashRing::new(100);
        let mut two = HashRing::new(100);
        for ring in [&mut one, &mut two] {
            ring.add_node("redis://x:6379");
            ring.add_node("redis://y:6379");
            ring.add_node("redis://z:6379");
            ring.remove_node("redis://z:6379");
        }

        for i in 0..500 {
            let key = format!("page-{}", i);
            assert_eq!(one.node_for(&key), two.node_for(&key));
        }
    }

    #[test]
    fn lookup_is_stable_across_calls() {
        let mut ring = HashRing::new(100);
        ring.add_node("redis://x:6379");
        ring.add_node("redis://y:6379");

        let first = ring.node_for("page-42").map(str::to_string);
        assert!(first.is_some());
        for _ in 0..100 {
            assert_eq!(ring.node_for("page-42"), first.as_deref());
        }
    }

    #[test]
    fn every_key_lands_somewhere_on_a_nonempty_ring() {
        let mut ring = HashRing::new(100);
        ring.add_node("redis://only:6379");
        for i in 0..1000 {
            assert_eq!(ring.node_for(&format!("k{}", i)), Some("redis://only:6379"));
        }
    }

    #[test]
    fn keys_spread_over_all_shards() {
        let mut ring = HashRing::new(100);
        for shard in ["redis://a:6379", "redis://b:6379", "redis://c:6379"] {
            ring.add_node(shard);
        }

        let mut counts: HashMap<&str, usize> = HashMap::new();
        for i in 0..3000 {
            let owner = ring.node_for(&format!("page-{}", i)).expect("nonempty ring");
            *counts.entry(owner).or_insert(0) += 1;
        }

        assert_eq!(counts.len(), 3, "every shard should own some keys");
        for (&shard, &count) in &counts {
            assert!(
                count > 300,
                "shard {} owns only {} of 3000 keys",
                shard,
                count
            );
        }
    }

    #[test]
    fn removing_one_shard_only_reassigns_its_keys() {
        let mut ring = HashRing::new(100);
        ring.add_node("redis://a:6379");
        ring.add_node("redis://b:6379");
        ring.add_node("redis://c:6379");

        let before: Vec<Option<String>> = (0..500)
            .map(|i| ring.node_for(&format!("page-{}", i)).map(str::to_string))
            .collect();

        ring.remove_node("redis://c:6379");

        for (i, old_owner) in before.iter().enumerate() {
            let new_owner = ring.node_for(&format!("page-{}", i));
            match old_owner.as_deref() {
                Some("redis://c:6379") => assert_ne!(new_owner, Some("redis://c:6379")),
                other => assert_eq!(new_owner, other),
            }
        }
    }
}
