//! Consistent hash ring
//!
//! Maps routing keys to node ids through weighted virtual nodes. Each node
//! owns `round(virtual_nodes × weight)` positions, hashed from
//! `"{node_id}:{index}"`. The positions live in a `BTreeMap` so a lookup is a
//! single ordered range query.

use serde::{Deserialize, Serialize};
use siphasher::sip::SipHasher13;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::hash::Hasher;
use std::str::FromStr;
use tracing::warn;

/// Default number of virtual nodes per unit of weight
pub const DEFAULT_VIRTUAL_NODES: usize = 160;

/// Hash function used to place keys and virtual nodes on the ring
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RingHash {
    /// First 8 bytes of the MD5 digest
    #[default]
    Md5,
    SipHash,
    Xxh64,
}

impl RingHash {
    pub fn hash(&self, data: &[u8]) -> u64 {
        match self {
            RingHash::Md5 => {
                let digest = md5::compute(data);
                let mut prefix = [0u8; 8];
                prefix.copy_from_slice(&digest.0[..8]);
                u64::from_be_bytes(prefix)
            }
            RingHash::SipHash => {
                let mut hasher = SipHasher13::new();
                hasher.write(data);
                hasher.finish()
            }
            RingHash::Xxh64 => xxhash_rust::xxh64::xxh64(data, 0),
        }
    }
}

impl FromStr for RingHash {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "md5" => Ok(RingHash::Md5),
            "siphash" | "sip" => Ok(RingHash::SipHash),
            "xxh64" | "xxhash" => Ok(RingHash::Xxh64),
            other => Err(other.to_string()),
        }
    }
}

impl fmt::Display for RingHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RingHash::Md5 => "md5",
            RingHash::SipHash => "siphash",
            RingHash::Xxh64 => "xxh64",
        })
    }
}

/// Ring of virtual node positions
#[derive(Debug, Clone)]
pub struct HashRing {
    ring: BTreeMap<u64, String>,
    virtual_nodes: usize,
    hash: RingHash,

    /// Positions a node could not take because another owner held them
    shadowed: Vec<(u64, String)>,
}

impl HashRing {
    pub fn new(virtual_nodes: usize, hash: RingHash) -> Self {
        HashRing {
            ring: BTreeMap::new(),
            virtual_nodes,
            hash,
            shadowed: Vec::new(),
        }
    }

    /// Number of positions a node of this weight receives
    pub fn virtual_count(&self, weight: f64) -> usize {
        (self.virtual_nodes as f64 * weight).round().max(0.0) as usize
    }

    /// Place a node's virtual entries on the ring
    pub fn add(&mut self, node_id: &str, weight: f64) {
        for index in 0..self.virtual_count(weight) {
            let position = self.hash.hash(format!("{}:{}", node_id, index).as_bytes());
            self.place(position, node_id);
        }
    }

    /// Claim one position; the first owner keeps a colliding position
    fn place(&mut self, position: u64, node_id: &str) {
        match self.ring.get(&position) {
            None => {
                self.ring.insert(position, node_id.to_string());
            }
            Some(owner) if owner == node_id => {}
            Some(owner) => {
                warn!(
                    "Ring position {:#018x} of {} already owned by {}",
                    position, node_id, owner
                );
                self.shadowed.push((position, node_id.to_string()));
            }
        }
    }

    /// Remove every virtual entry owned by `node_id`
    ///
    /// Positions it shadowed go back to the node that collided on them.
    pub fn remove(&mut self, node_id: &str) {
        self.ring.retain(|_, owner| owner != node_id);
        self.shadowed.retain(|(_, owner)| owner != node_id);

        let shadowed = std::mem::take(&mut self.shadowed);
        for (position, owner) in shadowed {
            self.place(position, &owner);
        }
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.ring.values().any(|owner| owner == node_id)
    }

    /// Number of virtual entries
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn hash_function(&self) -> RingHash {
        self.hash
    }

    /// Owner of the first position clockwise from the key's hash
    pub fn route(&self, key: &str) -> Option<&str> {
        self.route_live(key, |_| true)
    }

    /// Like `route`, but keeps walking clockwise past owners rejected by
    /// `is_live`. Each physical node is considered at most once.
    pub fn route_live<F>(&self, key: &str, mut is_live: F) -> Option<&str>
    where
        F: FnMut(&str) -> bool,
    {
        let key_hash = self.hash.hash(key.as_bytes());
        let mut rejected: HashSet<&str> = HashSet::new();

        let clockwise = self.ring.range(key_hash..).chain(self.ring.range(..key_hash));
        for (_, owner) in clockwise {
            let owner = owner.as_str();
            if rejected.contains(owner) {
                continue;
            }
            if is_live(owner) {
                return Some(owner);
            }
            rejected.insert(owner);
        }

        None
    }
}

impl Default for HashRing {
    fn default() -> Self {
        Self::new(DEFAULT_VIRTUAL_NODES, RingHash::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn ring_of(nodes: &[(&str, f64)]) -> HashRing {
        let mut ring = HashRing::default();
        for (id, weight) in nodes {
            ring.add(id, *weight);
        }
        ring
    }

    #[test]
    fn test_routing_deterministic() {
        let ring = ring_of(&[("a", 1.0), ("b", 1.0), ("c", 1.0)]);

        for i in 0..100 {
            let key = format!("key_{}", i);
            assert_eq!(ring.route(&key), ring.route(&key));
        }
    }

    #[test]
    fn test_virtual_node_count_follows_weight() {
        let ring = ring_of(&[("a", 1.0), ("b", 1.5)]);
        assert_eq!(ring.virtual_count(1.0), 160);
        assert_eq!(ring.virtual_count(1.5), 240);
        assert_eq!(ring.len(), 400);
    }

    #[test]
    fn test_remove_only_remaps_removed_owner() {
        let mut ring = ring_of(&[("a", 1.0), ("b", 1.0), ("c", 1.0), ("d", 1.0)]);

        let keys: Vec<String> = (0..5000).map(|i| format!("user:{}", i)).collect();
        let before: Vec<String> = keys.iter().map(|k| ring.route(k).unwrap().to_string()).collect();

        ring.remove("c");
        assert!(!ring.contains("c"));
        assert_eq!(ring.len(), 480);

        let mut moved = 0;
        for (key, owner) in keys.iter().zip(&before) {
            let now = ring.route(key).unwrap();
            if owner != "c" {
                assert_eq!(now, owner, "key {} moved although its owner stayed", key);
            } else {
                moved += 1;
            }
        }

        // Roughly a quarter of the keys belonged to the removed node
        assert!(moved > 900 && moved < 1600, "moved {}", moved);
    }

    #[test]
    fn test_weight_proportionality() {
        let ring = ring_of(&[("a", 1.0), ("b", 1.0), ("c", 2.0)]);
        let mut counts: HashMap<&str, usize> = HashMap::new();

        for i in 0..10_000 {
            let key = format!("company:{}", i);
            *counts.entry(ring.route(&key).unwrap()).or_default() += 1;
        }

        let share = counts["c"] as f64 / 10_000.0;
        assert!((share - 0.5).abs() <= 0.05, "heavy node share {}", share);
    }

    #[test]
    fn test_route_live_skips_rejected_owners() {
        let ring = ring_of(&[("a", 1.0), ("b", 1.0), ("c", 1.0)]);

        for i in 0..200 {
            let key = format!("k{}", i);
            let owner = ring.route(&key).unwrap().to_string();
            let alternative = ring.route_live(&key, |id| id != owner).unwrap();
            assert_ne!(alternative, owner);
        }

        assert_eq!(ring.route_live("any", |_| false), None);
    }

    #[test]
    fn test_colliding_position_keeps_first_owner() {
        let mut ring = HashRing::new(0, RingHash::Md5);
        ring.place(42, "a");
        ring.place(42, "b");
        assert_eq!(ring.route("any"), Some("a"));
        assert_eq!(ring.len(), 1);

        // Removing the newcomer leaves the first owner in place
        ring.remove("b");
        assert_eq!(ring.route("any"), Some("a"));

        // Removing the first owner hands the position over
        ring.place(42, "b");
        ring.remove("a");
        assert_eq!(ring.route("any"), Some("b"));
        assert!(!ring.contains("a"));
    }

    #[test]
    fn test_empty_ring() {
        let ring = HashRing::default();
        assert!(ring.is_empty());
        assert_eq!(ring.route("key"), None);
    }

    #[test]
    fn test_hash_functions_differ_but_are_stable() {
        for hash in [RingHash::Md5, RingHash::SipHash, RingHash::Xxh64] {
            assert_eq!(hash.hash(b"node:1"), hash.hash(b"node:1"));
            assert_eq!(hash.to_string().parse::<RingHash>(), Ok(hash));
        }
        assert_ne!(RingHash::Md5.hash(b"x"), RingHash::Xxh64.hash(b"x"));
        assert!("crc32".parse::<RingHash>().is_err());
    }

    #[test]
    fn test_other_hashes_keep_proportions() {
        for hash in [RingHash::SipHash, RingHash::Xxh64] {
            let mut ring = HashRing::new(DEFAULT_VIRTUAL_NODES, hash);
            ring.add("a", 1.0);
            ring.add("b", 1.0);
            let a = (0..4000)
                .filter(|i| ring.route(&format!("k{}", i)) == Some("a"))
                .count();
            assert!(a > 1400 && a < 2600, "{} share for a: {}", hash, a);
        }
    }
}
