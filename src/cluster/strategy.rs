//! Load balancing strategies
//!
//! Every strategy implements `LoadBalancer` and only ever picks a node whose
//! status is not `Failed`. The manager builds one balancer when the strategy
//! is configured and keeps it in sync with node registration.

use super::node::Node;
use super::ring::{HashRing, RingHash};
use crate::error::ClusterError;
use parking_lot::RwLock;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Smallest weight used when dividing by a node's weight
const MIN_WEIGHT: f64 = 0.1;

/// Selectable strategy names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    RoundRobin,
    ConsistentHash,
    LeastConnections,
    /// Weighted random
    Random,
    PerformanceBased,
}

impl Strategy {
    pub const ALL: [Strategy; 5] = [
        Strategy::RoundRobin,
        Strategy::ConsistentHash,
        Strategy::LeastConnections,
        Strategy::Random,
        Strategy::PerformanceBased,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::RoundRobin => "round_robin",
            Strategy::ConsistentHash => "consistent_hash",
            Strategy::LeastConnections => "least_connections",
            Strategy::Random => "random",
            Strategy::PerformanceBased => "performance_based",
        }
    }
}

impl FromStr for Strategy {
    type Err = ClusterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase();
        Strategy::ALL
            .into_iter()
            .find(|strategy| strategy.as_str() == name)
            .ok_or_else(|| ClusterError::UnknownStrategy(s.to_string()))
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Node selection policy
pub trait LoadBalancer: Send + Sync {
    fn strategy(&self) -> Strategy;

    /// Pick a node among `nodes`, or None when no node is available
    fn select(&self, nodes: &[Arc<Node>], key: Option<&str>) -> Option<Arc<Node>>;

    /// A node was registered
    fn node_added(&self, _node: &Node) {}

    /// A node was deregistered
    fn node_removed(&self, _node_id: &str) {}
}

/// Build the balancer for `strategy` over the currently registered nodes
pub fn build(
    strategy: Strategy,
    nodes: &[Arc<Node>],
    virtual_nodes: usize,
    hash: RingHash,
) -> Arc<dyn LoadBalancer> {
    match strategy {
        Strategy::RoundRobin => Arc::new(RoundRobin::default()),
        Strategy::LeastConnections => Arc::new(LeastConnections),
        Strategy::Random => Arc::new(WeightedRandom),
        Strategy::PerformanceBased => Arc::new(PerformanceBased),
        Strategy::ConsistentHash => {
            let balancer = ConsistentHash::new(virtual_nodes, hash);
            for node in nodes {
                balancer.node_added(node);
            }
            Arc::new(balancer)
        }
    }
}

fn live_nodes(nodes: &[Arc<Node>]) -> Vec<&Arc<Node>> {
    nodes.iter().filter(|n| n.is_available()).collect()
}

/// Cycles through the live nodes
#[derive(Debug, Default)]
pub struct RoundRobin {
    next: AtomicUsize,
}

impl LoadBalancer for RoundRobin {
    fn strategy(&self) -> Strategy {
        Strategy::RoundRobin
    }

    fn select(&self, nodes: &[Arc<Node>], _key: Option<&str>) -> Option<Arc<Node>> {
        let live = live_nodes(nodes);
        if live.is_empty() {
            return None;
        }
        let index = self.next.fetch_add(1, Ordering::Relaxed);
        Some(live[index % live.len()].clone())
    }
}

/// Fewest operations in flight
#[derive(Debug, Default)]
pub struct LeastConnections;

impl LoadBalancer for LeastConnections {
    fn strategy(&self) -> Strategy {
        Strategy::LeastConnections
    }

    fn select(&self, nodes: &[Arc<Node>], _key: Option<&str>) -> Option<Arc<Node>> {
        live_nodes(nodes)
            .into_iter()
            .min_by_key(|n| n.in_flight())
            .cloned()
    }
}

/// Lowest load factor per unit of weight
#[derive(Debug, Default)]
pub struct PerformanceBased;

impl LoadBalancer for PerformanceBased {
    fn strategy(&self) -> Strategy {
        Strategy::PerformanceBased
    }

    fn select(&self, nodes: &[Arc<Node>], _key: Option<&str>) -> Option<Arc<Node>> {
        let score = |n: &Node| n.load_factor() / n.weight().max(MIN_WEIGHT);
        live_nodes(nodes)
            .into_iter()
            .min_by(|a, b| score(a).total_cmp(&score(b)))
            .cloned()
    }
}

/// Random draw proportional to weight
#[derive(Debug, Default)]
pub struct WeightedRandom;

impl LoadBalancer for WeightedRandom {
    fn strategy(&self) -> Strategy {
        Strategy::Random
    }

    fn select(&self, nodes: &[Arc<Node>], _key: Option<&str>) -> Option<Arc<Node>> {
        let live = live_nodes(nodes);
        if live.is_empty() {
            return None;
        }

        let mut rng = rand::thread_rng();
        let total: f64 = live.iter().map(|n| n.weight().max(0.0)).sum();
        if total <= 0.0 {
            return Some(live[rng.gen_range(0..live.len())].clone());
        }

        let mut target = rng.gen_range(0.0..total);
        for node in &live {
            let weight = node.weight().max(0.0);
            if target < weight {
                return Some((*node).clone());
            }
            target -= weight;
        }

        // Float rounding can leave a sliver past the last node
        live.last().map(|n| (*n).clone())
    }
}

/// Routes by key over a hash ring; keyless requests fall back to round-robin
pub struct ConsistentHash {
    ring: RwLock<HashRing>,
    fallback: RoundRobin,
}

impl ConsistentHash {
    pub fn new(virtual_nodes: usize, hash: RingHash) -> Self {
        ConsistentHash {
            ring: RwLock::new(HashRing::new(virtual_nodes, hash)),
            fallback: RoundRobin::default(),
        }
    }

    /// Node id owning `key`, ignoring health
    pub fn owner_of(&self, key: &str) -> Option<String> {
        self.ring.read().route(key).map(str::to_string)
    }

    pub fn ring_len(&self) -> usize {
        self.ring.read().len()
    }
}

impl LoadBalancer for ConsistentHash {
    fn strategy(&self) -> Strategy {
        Strategy::ConsistentHash
    }

    fn select(&self, nodes: &[Arc<Node>], key: Option<&str>) -> Option<Arc<Node>> {
        let key = match key {
            Some(key) => key,
            None => return self.fallback.select(nodes, None),
        };

        let find = |id: &str| nodes.iter().find(|n| n.id() == id);
        let ring = self.ring.read();
        let owner = ring.route_live(key, |id| find(id).map_or(false, |n| n.is_available()))?;
        find(owner).cloned()
    }

    fn node_added(&self, node: &Node) {
        self.ring.write().add(node.id(), node.weight());
    }

    fn node_removed(&self, node_id: &str) {
        self.ring.write().remove(node_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockConnector;
    use crate::backend::NodeEndpoint;
    use crate::cluster::node::NodeStatus;
    use std::collections::HashMap;
    use std::time::Duration;

    fn nodes(weights: &[f64]) -> Vec<Arc<Node>> {
        let connector = MockConnector::new();
        weights
            .iter()
            .enumerate()
            .map(|(i, w)| {
                let endpoint = NodeEndpoint::new("127.0.0.1", 7000 + i as u16)
                    .with_id(format!("n{}", i))
                    .with_weight(*w);
                let node = Arc::new(Node::new(endpoint, connector.clone()));
                node.set_status(NodeStatus::Healthy);
                node
            })
            .collect()
    }

    fn ids(picks: impl Iterator<Item = Option<Arc<Node>>>) -> Vec<String> {
        picks.map(|n| n.unwrap().id().to_string()).collect()
    }

    #[test]
    fn test_strategy_names() {
        for strategy in Strategy::ALL {
            assert_eq!(strategy.as_str().parse::<Strategy>().unwrap(), strategy);
        }
        assert!(matches!(
            "fastest".parse::<Strategy>(),
            Err(ClusterError::UnknownStrategy(name)) if name == "fastest"
        ));
    }

    #[test]
    fn test_round_robin_cycles_live_nodes() {
        let nodes = nodes(&[1.0, 1.0, 1.0]);
        let rr = RoundRobin::default();
        let picks = ids((0..6).map(|_| rr.select(&nodes, None)));
        assert_eq!(picks, ["n0", "n1", "n2", "n0", "n1", "n2"]);

        nodes[1].set_status(NodeStatus::Failed);
        let picks = ids((0..4).map(|_| rr.select(&nodes, None)));
        assert!(picks.iter().all(|id| id != "n1"));
    }

    #[test]
    fn test_least_connections() {
        let nodes = nodes(&[1.0, 1.0]);
        let lc = LeastConnections;

        // Equal load picks the first; a busy node is skipped
        assert_eq!(lc.select(&nodes, None).unwrap().id(), "n0");
        nodes[0].update_performance_metrics(true, Duration::ZERO);
        assert_eq!(lc.select(&nodes, None).unwrap().id(), "n0");
    }

    #[test]
    fn test_performance_based_prefers_low_load_per_weight() {
        let nodes = nodes(&[1.0, 1.0]);
        nodes[0].update_performance_metrics(false, Duration::from_millis(300));
        nodes[1].update_performance_metrics(true, Duration::from_millis(1));

        assert_eq!(PerformanceBased.select(&nodes, None).unwrap().id(), "n1");
    }

    #[test]
    fn test_weighted_random_follows_weights() {
        let nodes = nodes(&[1.0, 3.0]);
        let mut counts: HashMap<String, usize> = HashMap::new();
        for _ in 0..8000 {
            let id = WeightedRandom.select(&nodes, None).unwrap().id().to_string();
            *counts.entry(id).or_default() += 1;
        }
        let share = counts["n1"] as f64 / 8000.0;
        assert!((share - 0.75).abs() < 0.05, "share {}", share);
    }

    #[test]
    fn test_no_live_nodes() {
        let nodes = nodes(&[1.0, 1.0]);
        for node in &nodes {
            node.set_status(NodeStatus::Failed);
        }

        for strategy in Strategy::ALL {
            let balancer = build(strategy, &nodes, 160, RingHash::Md5);
            assert!(balancer.select(&nodes, Some("key")).is_none(), "{}", strategy);
            assert!(balancer.select(&nodes, None).is_none(), "{}", strategy);
        }
    }

    #[test]
    fn test_consistent_hash_is_sticky_and_fails_over() {
        let nodes = nodes(&[1.0, 1.0, 1.0]);
        let balancer = build(Strategy::ConsistentHash, &nodes, 160, RingHash::Md5);

        let first = balancer.select(&nodes, Some("company:42")).unwrap();
        for _ in 0..10 {
            assert_eq!(balancer.select(&nodes, Some("company:42")).unwrap().id(), first.id());
        }

        first.set_status(NodeStatus::Failed);
        let next = balancer.select(&nodes, Some("company:42")).unwrap();
        assert_ne!(next.id(), first.id());

        first.set_status(NodeStatus::Healthy);
        assert_eq!(balancer.select(&nodes, Some("company:42")).unwrap().id(), first.id());
    }

    #[test]
    fn test_consistent_hash_tracks_registration() {
        let all = nodes(&[1.0, 1.0]);
        let ch = ConsistentHash::new(160, RingHash::Md5);
        ch.node_added(&all[0]);
        assert_eq!(ch.ring_len(), 160);

        ch.node_added(&all[1]);
        ch.node_removed("n0");
        assert_eq!(ch.ring_len(), 160);
        assert_eq!(ch.owner_of("anything").as_deref(), Some("n1"));
    }

    #[test]
    fn test_consistent_hash_without_key_round_robins() {
        let nodes = nodes(&[1.0, 1.0]);
        let balancer = build(Strategy::ConsistentHash, &nodes, 160, RingHash::Md5);
        let picks = ids((0..4).map(|_| balancer.select(&nodes, None)));
        assert_eq!(picks, ["n0", "n1", "n0", "n1"]);
    }
}
