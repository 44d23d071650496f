//! Cluster management
//!
//! The `ClusterManager` owns the registered nodes and the active load balancer.
//! It dispatches operations with bounded retries and failover, and keeps node
//! status current through a background health loop.

mod health;
mod node;
mod ring;
mod strategy;

pub use node::{Node, NodeInfo, NodeStatus, DEGRADED_LATENCY, HEALTHY_LATENCY, RESPONSE_WINDOW};
pub use ring::{HashRing, RingHash, DEFAULT_VIRTUAL_NODES};
pub use strategy::{
    ConsistentHash, LeastConnections, LoadBalancer, PerformanceBased, RoundRobin, Strategy,
    WeightedRandom,
};

use crate::backend::{Connector, NodeEndpoint, Operation, TcpConnector};
use crate::error::{ClusterError, Result};
use crate::protocol::RespValue;
use futures::future::join_all;
use health::HealthMonitor;
pub(crate) use node::round3;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Tuning parameters of a manager
#[derive(Debug, Clone, PartialEq)]
pub struct ManagerSettings {
    pub strategy: Strategy,
    pub health_check_interval: Duration,
    /// Attempts per operation, at least one is always made
    pub max_retries: u32,
    /// Base delay, multiplied by the attempt number between retries
    pub retry_delay: Duration,
    pub virtual_nodes: usize,
    pub ring_hash: RingHash,
    /// When disabled every operation gets a single attempt
    pub auto_failover: bool,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        ManagerSettings {
            strategy: Strategy::ConsistentHash,
            health_check_interval: Duration::from_secs(30),
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            virtual_nodes: DEFAULT_VIRTUAL_NODES,
            ring_hash: RingHash::Md5,
            auto_failover: true,
        }
    }
}

/// Registry of store nodes with failover dispatch
pub struct ClusterManager {
    connector: Arc<dyn Connector>,

    /// Registration order is kept for round-robin and reporting
    nodes: RwLock<Vec<Arc<Node>>>,

    balancer: RwLock<Arc<dyn LoadBalancer>>,

    settings: RwLock<ManagerSettings>,

    monitor: Mutex<Option<HealthMonitor>>,
}

impl ClusterManager {
    /// Manager dialing nodes over TCP with default timeouts
    pub fn new(settings: ManagerSettings) -> Self {
        Self::with_connector(settings, Arc::new(TcpConnector::default()))
    }

    pub fn with_connector(settings: ManagerSettings, connector: Arc<dyn Connector>) -> Self {
        let balancer = strategy::build(
            settings.strategy,
            &[],
            settings.virtual_nodes,
            settings.ring_hash,
        );
        info!("Initializing cluster manager with {} strategy", settings.strategy);

        ClusterManager {
            connector,
            nodes: RwLock::new(Vec::new()),
            balancer: RwLock::new(balancer),
            settings: RwLock::new(settings),
            monitor: Mutex::new(None),
        }
    }

    /// Register a node; it is not connected until `connect_all` or its first use
    pub fn add_node(&self, endpoint: NodeEndpoint) -> Result<String> {
        let mut nodes = self.nodes.write();
        if nodes.iter().any(|n| n.id() == endpoint.node_id) {
            return Err(ClusterError::DuplicateNode(endpoint.node_id));
        }

        let node = Arc::new(Node::new(endpoint, self.connector.clone()));
        self.balancer.read().node_added(&node);
        let node_id = node.id().to_string();
        info!("Added store node {} (weight {})", node_id, node.weight());
        nodes.push(node);

        Ok(node_id)
    }

    /// Deregister a node and close its connection
    pub async fn remove_node(&self, node_id: &str) -> Result<()> {
        let node = {
            let mut nodes = self.nodes.write();
            let index = nodes
                .iter()
                .position(|n| n.id() == node_id)
                .ok_or_else(|| ClusterError::UnknownNode(node_id.to_string()))?;
            self.balancer.read().node_removed(node_id);
            nodes.remove(index)
        };

        node.disconnect().await;
        info!("Removed store node {}", node_id);
        Ok(())
    }

    pub fn node(&self, node_id: &str) -> Option<Arc<Node>> {
        self.nodes.read().iter().find(|n| n.id() == node_id).cloned()
    }

    /// Snapshot of the registered nodes
    pub fn nodes(&self) -> Vec<Arc<Node>> {
        self.nodes.read().clone()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn strategy(&self) -> Strategy {
        self.balancer.read().strategy()
    }

    pub fn settings(&self) -> ManagerSettings {
        self.settings.read().clone()
    }

    pub fn health_check_interval(&self) -> Duration {
        self.settings.read().health_check_interval
    }

    /// Switch the load balancing strategy
    pub fn set_strategy(&self, strategy: Strategy) {
        self.settings.write().strategy = strategy;
        self.rebuild_balancer();
        info!("Load balance strategy set to {}", strategy);
    }

    /// Replace every tuning parameter at once
    pub fn apply_settings(&self, settings: ManagerSettings) {
        let strategy = settings.strategy;
        *self.settings.write() = settings;
        self.rebuild_balancer();
        debug!("Applied manager settings ({} strategy)", strategy);
    }

    fn rebuild_balancer(&self) {
        let nodes = self.nodes.read();
        let settings = self.settings.read();
        let balancer = strategy::build(
            settings.strategy,
            &nodes,
            settings.virtual_nodes,
            settings.ring_hash,
        );
        *self.balancer.write() = balancer;
    }

    /// Node the active strategy would pick for `key`
    pub fn select_node(&self, key: Option<&str>) -> Option<Arc<Node>> {
        let nodes = self.nodes.read();
        self.balancer.read().select(&nodes, key)
    }

    /// Connect every node concurrently; returns the outcome per node id
    pub async fn connect_all(&self) -> HashMap<String, bool> {
        let nodes = self.nodes();
        let results = join_all(nodes.iter().map(|n| n.connect())).await;

        let outcome: HashMap<String, bool> = nodes
            .iter()
            .map(|n| n.id().to_string())
            .zip(results)
            .collect();

        let connected = outcome.values().filter(|ok| **ok).count();
        info!("Connected to {}/{} store nodes", connected, outcome.len());
        outcome
    }

    pub async fn disconnect_all(&self) {
        let nodes = self.nodes();
        join_all(nodes.iter().map(|n| n.disconnect())).await;
        info!("Disconnected from all store nodes");
    }

    /// Health check every node concurrently; returns how many are usable
    pub async fn perform_health_checks(&self) -> usize {
        let nodes = self.nodes();
        let results = join_all(nodes.iter().map(|n| n.health_check())).await;
        let usable = results.into_iter().filter(|ok| *ok).count();

        debug!("Health check completed: {}/{} nodes usable", usable, nodes.len());
        usable
    }

    /// Start the background health loop; does nothing when already running
    pub fn start_health_monitoring(self: &Arc<Self>) {
        let mut monitor = self.monitor.lock();
        if monitor.as_ref().map_or(false, |m| m.is_running()) {
            return;
        }
        *monitor = Some(HealthMonitor::spawn(Arc::downgrade(self)));
    }

    /// Stop the health loop and wait for it to exit
    pub async fn stop_health_monitoring(&self) {
        let monitor = self.monitor.lock().take();
        if let Some(monitor) = monitor {
            monitor.stop().await;
        }
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitor.lock().as_ref().map_or(false, |m| m.is_running())
    }

    /// Run an operation with failover
    ///
    /// Each attempt selects a node through the active strategy. Permanent
    /// command errors are returned at once; anything else is retried after
    /// `retry_delay × attempt` until the attempt budget is spent.
    pub async fn execute(&self, key: Option<&str>, operation: &Operation) -> Result<RespValue> {
        let (attempts, retry_delay) = {
            let settings = self.settings.read();
            let attempts = if settings.auto_failover {
                settings.max_retries.max(1)
            } else {
                1
            };
            (attempts, settings.retry_delay)
        };

        let mut last_error = ClusterError::NoHealthyNodes;

        for attempt in 1..=attempts {
            let result = match self.select_node(key) {
                Some(node) => node.execute(operation).await,
                None => Err(ClusterError::NoHealthyNodes),
            };

            match result {
                Ok(reply) => return Ok(reply),
                Err(e) if !e.is_retryable() => {
                    debug!("Non-retryable error for operation '{}': {}", operation.name(), e);
                    return Err(e);
                }
                Err(e) => last_error = e,
            }

            if attempt < attempts {
                warn!(
                    "Retrying operation '{}' (attempt {}): {}",
                    operation.name(),
                    attempt + 1,
                    last_error
                );
                tokio::time::sleep(retry_delay * attempt).await;
            }
        }

        let error = ClusterError::RetriesExhausted {
            operation: operation.name(),
            attempts,
            source: Box::new(last_error),
        };
        error!("{}", error);
        Err(error)
    }

    /// Aggregate view of the cluster
    pub fn cluster_info(&self) -> ClusterInfo {
        let nodes = self.nodes();
        let count = |status: NodeStatus| nodes.iter().filter(|n| n.status() == status).count();

        let total_requests: u64 = nodes.iter().map(|n| n.total_requests()).sum();
        let successful: u64 = nodes.iter().map(|n| n.successful_requests()).sum();
        let success_rate = if total_requests > 0 {
            successful as f64 / total_requests as f64
        } else {
            1.0
        };
        let avg_response_time = if nodes.is_empty() {
            0.0
        } else {
            nodes
                .iter()
                .map(|n| n.avg_response_time().as_secs_f64())
                .sum::<f64>()
                / nodes.len() as f64
        };

        ClusterInfo {
            strategy: self.strategy(),
            total_nodes: nodes.len(),
            healthy_nodes: count(NodeStatus::Healthy),
            degraded_nodes: count(NodeStatus::Degraded),
            failed_nodes: count(NodeStatus::Failed),
            total_requests,
            success_rate: round3(success_rate),
            avg_response_time: round3(avg_response_time),
            health_check_interval: self.health_check_interval().as_secs(),
            is_monitoring: self.is_monitoring(),
            nodes: nodes.iter().map(|n| n.info()).collect(),
        }
    }
}

/// Point-in-time view of the whole cluster
#[derive(Debug, Clone, Serialize)]
pub struct ClusterInfo {
    pub strategy: Strategy,
    pub total_nodes: usize,
    pub healthy_nodes: usize,
    pub degraded_nodes: usize,
    pub failed_nodes: usize,
    pub total_requests: u64,
    pub success_rate: f64,
    /// Mean of the nodes' average response times, in seconds
    pub avg_response_time: f64,
    /// Seconds
    pub health_check_interval: u64,
    pub is_monitoring: bool,
    pub nodes: Vec<NodeInfo>,
}
