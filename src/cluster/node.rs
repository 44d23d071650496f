//! Store node
//!
//! A `Node` owns the connection to one backing store instance together with
//! its health status and rolling performance metrics. Node-level failures are
//! absorbed into status and counters; only `execute` returns errors, and only
//! so the manager can decide whether to fail over.

use crate::backend::{Connector, NodeEndpoint, Operation, StoreConnection};
use crate::error::{ClusterError, Result};
use crate::protocol::RespValue;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Health checks faster than this leave the node healthy
pub const HEALTHY_LATENCY: Duration = Duration::from_millis(100);

/// Health checks faster than this (but not healthy) degrade the node; slower ones fail it
pub const DEGRADED_LATENCY: Duration = Duration::from_millis(500);

/// Number of response times kept for the rolling average
pub const RESPONSE_WINDOW: usize = 100;

/// Health status of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Unknown,
    Healthy,
    /// Reachable but slow
    Degraded,
    Failed,
}

impl NodeStatus {
    /// Status implied by one PING round trip
    pub fn from_latency(elapsed: Duration) -> Self {
        if elapsed < HEALTHY_LATENCY {
            NodeStatus::Healthy
        } else if elapsed < DEGRADED_LATENCY {
            NodeStatus::Degraded
        } else {
            NodeStatus::Failed
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeStatus::Unknown => "unknown",
            NodeStatus::Healthy => "healthy",
            NodeStatus::Degraded => "degraded",
            NodeStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Counters and derived metrics
#[derive(Debug)]
struct NodeMetrics {
    total_requests: u64,
    successful_requests: u64,
    error_count: u64,
    response_times: VecDeque<Duration>,
    avg_response_time: Duration,
    success_rate: f64,
    load_factor: f64,
    last_check: Option<SystemTime>,
}

impl Default for NodeMetrics {
    fn default() -> Self {
        NodeMetrics {
            total_requests: 0,
            successful_requests: 0,
            error_count: 0,
            response_times: VecDeque::with_capacity(RESPONSE_WINDOW),
            avg_response_time: Duration::ZERO,
            success_rate: 1.0,
            load_factor: 0.0,
            last_check: None,
        }
    }
}

impl NodeMetrics {
    fn record_response_time(&mut self, elapsed: Duration) {
        if self.response_times.len() == RESPONSE_WINDOW {
            self.response_times.pop_front();
        }
        self.response_times.push_back(elapsed);

        let total: Duration = self.response_times.iter().sum();
        self.avg_response_time = total / self.response_times.len() as u32;
    }
}

/// Keeps the in-flight counter balanced even if the caller is cancelled
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        InFlight(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// One backing store instance
pub struct Node {
    endpoint: NodeEndpoint,

    connector: Arc<dyn Connector>,

    /// Live connection, if any; held across each round trip
    connection: tokio::sync::Mutex<Option<Box<dyn StoreConnection>>>,

    /// Mirror of `connection.is_some()` readable without awaiting
    connected: AtomicBool,

    status: RwLock<NodeStatus>,

    /// Operations currently dispatched or waiting for the connection
    in_flight: AtomicUsize,

    metrics: Mutex<NodeMetrics>,
}

impl Node {
    pub fn new(endpoint: NodeEndpoint, connector: Arc<dyn Connector>) -> Self {
        Node {
            endpoint,
            connector,
            connection: tokio::sync::Mutex::new(None),
            connected: AtomicBool::new(false),
            status: RwLock::new(NodeStatus::Unknown),
            in_flight: AtomicUsize::new(0),
            metrics: Mutex::new(NodeMetrics::default()),
        }
    }

    pub fn id(&self) -> &str {
        &self.endpoint.node_id
    }

    pub fn endpoint(&self) -> &NodeEndpoint {
        &self.endpoint
    }

    pub fn weight(&self) -> f64 {
        self.endpoint.weight
    }

    pub fn status(&self) -> NodeStatus {
        *self.status.read()
    }

    pub fn set_status(&self, status: NodeStatus) {
        *self.status.write() = status;
    }

    /// Whether strategies may select this node
    pub fn is_available(&self) -> bool {
        self.status() != NodeStatus::Failed
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn load_factor(&self) -> f64 {
        self.metrics.lock().load_factor
    }

    pub fn success_rate(&self) -> f64 {
        self.metrics.lock().success_rate
    }

    pub fn avg_response_time(&self) -> Duration {
        self.metrics.lock().avg_response_time
    }

    pub fn total_requests(&self) -> u64 {
        self.metrics.lock().total_requests
    }

    pub fn successful_requests(&self) -> u64 {
        self.metrics.lock().successful_requests
    }

    pub fn error_count(&self) -> u64 {
        self.metrics.lock().error_count
    }

    /// Establish the connection
    ///
    /// Never fails: the outcome is recorded in the node status and returned.
    pub async fn connect(&self) -> bool {
        let mut slot = self.connection.lock().await;
        self.connect_locked(&mut slot).await
    }

    async fn connect_locked(&self, slot: &mut Option<Box<dyn StoreConnection>>) -> bool {
        self.release(slot).await;

        let attempt = match self.connector.connect(&self.endpoint).await {
            Ok(mut conn) => match conn.call(&Operation::Ping.to_command()).await {
                Ok(_) => Ok(conn),
                Err(e) => {
                    let _ = conn.close().await;
                    Err(e)
                }
            },
            Err(e) => Err(e),
        };

        match attempt {
            Ok(conn) => {
                *slot = Some(conn);
                self.connected.store(true, Ordering::SeqCst);
                self.set_status(NodeStatus::Healthy);
                self.metrics.lock().error_count = 0;
                info!("Connected to store node {}", self.id());
                true
            }
            Err(e) => {
                error!("Failed to connect to store node {}: {}", self.id(), e);
                self.set_status(NodeStatus::Failed);
                self.metrics.lock().error_count += 1;
                false
            }
        }
    }

    /// Close the connection, if any
    pub async fn disconnect(&self) {
        let mut slot = self.connection.lock().await;
        if slot.is_some() {
            self.release(&mut slot).await;
            info!("Disconnected from store node {}", self.id());
        }
    }

    /// Drop a connection a cancelled caller left waiting for its reply
    async fn discard_interrupted(&self, slot: &mut Option<Box<dyn StoreConnection>>) {
        if slot.as_ref().map_or(false, |conn| !conn.is_reusable()) {
            warn!("Discarding interrupted connection to store node {}", self.id());
            self.release(slot).await;
        }
    }

    async fn release(&self, slot: &mut Option<Box<dyn StoreConnection>>) {
        if let Some(mut conn) = slot.take() {
            if let Err(e) = conn.close().await {
                debug!("Error closing connection to {}: {}", self.id(), e);
            }
        }
        self.connected.store(false, Ordering::SeqCst);
    }

    /// PING the node and update its status
    ///
    /// Reconnects when disconnected, otherwise times a PING round trip.
    /// Returns whether the node is usable afterwards.
    pub async fn health_check(&self) -> bool {
        let mut slot = self.connection.lock().await;
        self.discard_interrupted(&mut slot).await;

        let conn = match slot.as_mut() {
            Some(conn) => conn,
            None => return self.connect_locked(&mut slot).await,
        };

        let start = Instant::now();
        match conn.call(&Operation::Ping.to_command()).await {
            Ok(_) => {
                let elapsed = start.elapsed();
                let status = NodeStatus::from_latency(elapsed);
                {
                    let mut metrics = self.metrics.lock();
                    metrics.record_response_time(elapsed);
                    metrics.last_check = Some(SystemTime::now());
                }
                if status != self.status() {
                    info!("Store node {} is now {} ({:?} PING)", self.id(), status, elapsed);
                }
                self.set_status(status);
                status != NodeStatus::Failed
            }
            Err(e) => {
                warn!("Health check failed for store node {}: {}", self.id(), e);
                self.set_status(NodeStatus::Failed);
                {
                    let mut metrics = self.metrics.lock();
                    metrics.error_count += 1;
                    metrics.last_check = Some(SystemTime::now());
                }
                // Reconnect on the next check
                self.release(&mut slot).await;
                false
            }
        }
    }

    /// Fold one dispatched operation into the counters and load factor
    pub fn update_performance_metrics(&self, success: bool, elapsed: Duration) {
        let in_flight = self.in_flight() as f64;
        let max_connections = self.endpoint.max_connections.max(1) as f64;
        let mut m = self.metrics.lock();

        m.total_requests += 1;
        if success {
            m.successful_requests += 1;
        }
        m.success_rate = m.successful_requests as f64 / m.total_requests as f64;
        m.record_response_time(elapsed);

        let connection_factor = (in_flight / max_connections).min(1.0);
        let response_factor = m.avg_response_time.as_secs_f64().min(1.0);
        let failure_factor = 1.0 - m.success_rate;

        m.load_factor = (connection_factor + response_factor + failure_factor) / 3.0;
    }

    /// Run one operation on this node
    ///
    /// Connects lazily when the previous connection was dropped or left
    /// mid-request. Transport failures drop the connection and degrade a
    /// healthy node.
    pub async fn execute(&self, operation: &Operation) -> Result<RespValue> {
        let guard = InFlight::enter(&self.in_flight);
        let mut slot = self.connection.lock().await;
        self.discard_interrupted(&mut slot).await;

        if slot.is_none() && !self.connect_locked(&mut slot).await {
            return Err(ClusterError::NotConnected(self.id().to_string()));
        }
        let conn = match slot.as_mut() {
            Some(conn) => conn,
            None => return Err(ClusterError::NotConnected(self.id().to_string())),
        };

        let command = operation.to_command();
        let blocking = operation.blocking_for();

        let start = Instant::now();
        let result = match blocking {
            Some(block) => conn.call_blocking(&command, block).await,
            None => conn.call(&command).await,
        };
        // Time the server may spend blocked is not latency
        let elapsed = start.elapsed().saturating_sub(blocking.unwrap_or_default());

        if let Err(e) = &result {
            debug!("Operation '{}' failed on node {}: {}", operation.name(), self.id(), e);

            if e.is_connection_error() {
                self.release(&mut slot).await;
                self.metrics.lock().error_count += 1;
                if self.status() == NodeStatus::Healthy {
                    self.set_status(NodeStatus::Degraded);
                }
            }
        }
        drop(slot);
        drop(guard);

        self.update_performance_metrics(result.is_ok(), elapsed);
        result
    }

    /// Serializable snapshot for diagnostics
    pub fn info(&self) -> NodeInfo {
        let m = self.metrics.lock();
        NodeInfo {
            node_id: self.endpoint.node_id.clone(),
            host: self.endpoint.host.clone(),
            port: self.endpoint.port,
            status: self.status(),
            weight: self.endpoint.weight,
            connection_count: self.in_flight(),
            error_count: m.error_count,
            total_requests: m.total_requests,
            successful_requests: m.successful_requests,
            success_rate: round3(m.success_rate),
            avg_response_time: round3(m.avg_response_time.as_secs_f64()),
            load_factor: round3(m.load_factor),
            last_check: m
                .last_check
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_millis() as u64),
            is_connected: self.is_connected(),
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("node_id", &self.endpoint.node_id)
            .field("status", &self.status())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

pub(crate) fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Point-in-time view of a node
#[derive(Debug, Clone, Serialize)]
pub struct NodeInfo {
    pub node_id: String,
    pub host: String,
    pub port: u16,
    pub status: NodeStatus,
    pub weight: f64,
    pub connection_count: usize,
    pub error_count: u64,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub success_rate: f64,
    /// Seconds
    pub avg_response_time: f64,
    pub load_factor: f64,
    /// Unix epoch milliseconds of the last health check
    pub last_check: Option<u64>,
    pub is_connected: bool,
}
