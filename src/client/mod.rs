//! Cluster-aware client
//!
//! `ClusterClient` is the entry point applications use. It hides whether the
//! process talks to a cluster of nodes, to a single fallback node, or to no
//! store at all.
//!
//! Data operations never fail: any error, including an exhausted retry
//! budget, is logged and turned into an empty value (`None`, `false`, `0`, an
//! empty collection). Administrative calls return `Result` instead.

mod value;

pub use value::StoreValue;

use crate::backend::{Connector, NodeEndpoint, Operation, TcpConnector};
use crate::cluster::{round3, ClusterInfo, ClusterManager, Node, NodeInfo, NodeStatus, Strategy};
use crate::config::{
    fallback_endpoint, ClusterConfig, ConfigChanges, ConfigSummary, CONFIG_PATH_VAR,
    DEFAULT_CONFIG_PATH, EXAMPLE_CONFIG_FILE,
};
use crate::error::{ClusterError, CommandErrorKind, Result};
use crate::protocol::RespValue;
use bytes::Bytes;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// How `ClusterClient::connect` finds its store
#[derive(Clone, Default)]
pub struct ClientOptions {
    /// Use this configuration instead of the file and environment lookup
    pub config: Option<ClusterConfig>,

    /// Configuration file; defaults to `REDIS_CLUSTER_CONFIG`, then
    /// `redis_cluster.yaml`
    pub config_path: Option<PathBuf>,

    /// Single node used when cluster mode cannot start; defaults to
    /// `REDIS_HOST`/`REDIS_PORT`/`REDIS_PASSWORD`
    pub fallback: Option<NodeEndpoint>,

    /// Replaces the TCP connector
    pub connector: Option<Arc<dyn Connector>>,
}

/// Operating mode of a client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientMode {
    Cluster,
    SingleNode,
    /// No store reachable; every operation returns its empty value
    None,
}

enum Mode {
    Cluster {
        manager: Arc<ClusterManager>,
        /// Configuration last applied; replaced on reload and save
        config: RwLock<Option<ClusterConfig>>,
    },
    SingleNode(Arc<Node>),
    Unavailable,
}

/// One entry of an append-only stream
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamEntry {
    pub id: String,
    pub fields: HashMap<String, String>,
}

/// Diagnostic view of the client connection
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ConnectionInfo {
    Cluster {
        strategy: Strategy,
        connected: bool,
        cluster_info: ClusterInfo,
    },
    SingleNode {
        connected: bool,
        host: String,
        port: u16,
        node: NodeInfo,
    },
    #[serde(rename = "none")]
    Unavailable { connected: bool },
}

/// Aggregated request metrics
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceSummary {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub success_rate: f64,
    /// Mean over the nodes that have timed requests, in seconds
    pub avg_response_time: f64,
    pub node_performance: Vec<NodeInfo>,
}

impl PerformanceSummary {
    fn from_nodes(nodes: Vec<NodeInfo>) -> Self {
        let total_requests: u64 = nodes.iter().map(|n| n.total_requests).sum();
        let successful_requests: u64 = nodes.iter().map(|n| n.successful_requests).sum();
        let timed: Vec<f64> = nodes
            .iter()
            .map(|n| n.avg_response_time)
            .filter(|t| *t > 0.0)
            .collect();

        PerformanceSummary {
            total_requests,
            successful_requests,
            success_rate: if total_requests > 0 {
                round3(successful_requests as f64 / total_requests as f64)
            } else {
                1.0
            },
            avg_response_time: if timed.is_empty() {
                0.0
            } else {
                round3(timed.iter().sum::<f64>() / timed.len() as f64)
            },
            node_performance: nodes,
        }
    }
}

/// Key-value client over a cluster, a single node, or nothing
pub struct ClusterClient {
    mode: Mode,

    /// File read by `reload_config` and written by `save_config`
    config_path: PathBuf,
}

fn default_config_path() -> PathBuf {
    std::env::var(CONFIG_PATH_VAR)
        .unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string())
        .into()
}

impl ClusterClient {
    /// Start in the best mode available
    ///
    /// Cluster mode when the configuration is valid and at least one node
    /// connects, else single node mode when the fallback node answers, else
    /// no-store mode.
    pub async fn connect(options: ClientOptions) -> Self {
        let config_path = options.config_path.unwrap_or_else(default_config_path);
        let config = match options.config {
            Some(config) => config,
            None => {
                let (config, source) =
                    ClusterConfig::resolve_from(&config_path, |key| std::env::var(key).ok());
                info!("Using {} cluster configuration", source);
                config
            }
        };

        let mode = match Self::start_cluster(&config, options.connector.clone()).await {
            Some(manager) => Mode::Cluster {
                manager,
                config: RwLock::new(Some(config)),
            },
            None => {
                let endpoint = options.fallback.unwrap_or_else(fallback_endpoint);
                Self::start_single(endpoint, options.connector).await
            }
        };

        ClusterClient { mode, config_path }
    }

    async fn start_cluster(
        config: &ClusterConfig,
        connector: Option<Arc<dyn Connector>>,
    ) -> Option<Arc<ClusterManager>> {
        let errors = config.validate();
        if !errors.is_empty() {
            warn!("Cluster configuration is invalid: {}", errors.join("; "));
            return None;
        }

        let connector: Arc<dyn Connector> = match connector {
            Some(connector) => connector,
            None => Arc::new(config.connector()),
        };
        let manager = Arc::new(ClusterManager::with_connector(config.manager_settings(), connector));

        if let Err(e) = config.apply_to(&manager) {
            error!("Failed to apply cluster configuration: {}", e);
            return None;
        }

        let connected = manager.connect_all().await.values().filter(|ok| **ok).count();
        if connected == 0 {
            warn!("No cluster nodes could be connected");
            manager.disconnect_all().await;
            return None;
        }

        manager.start_health_monitoring();
        info!("Cluster mode activated with {} nodes", connected);
        Some(manager)
    }

    async fn start_single(endpoint: NodeEndpoint, connector: Option<Arc<dyn Connector>>) -> Mode {
        info!("Falling back to single node mode at {}", endpoint.address());

        let connector: Arc<dyn Connector> = match connector {
            Some(connector) => connector,
            None => Arc::new(TcpConnector::default()),
        };
        let node = Arc::new(Node::new(endpoint, connector));

        if node.connect().await {
            info!("Single node store connected at {}", node.endpoint().address());
            Mode::SingleNode(node)
        } else {
            error!("Store unavailable, running without it");
            Mode::Unavailable
        }
    }

    fn with_mode(mode: Mode) -> Self {
        ClusterClient {
            mode,
            config_path: default_config_path(),
        }
    }

    /// Client over an already configured manager
    pub fn from_manager(manager: Arc<ClusterManager>) -> Self {
        Self::with_mode(Mode::Cluster {
            manager,
            config: RwLock::new(None),
        })
    }

    pub fn single(node: Arc<Node>) -> Self {
        Self::with_mode(Mode::SingleNode(node))
    }

    /// Client in no-store mode
    pub fn disconnected() -> Self {
        Self::with_mode(Mode::Unavailable)
    }

    /// Use another configuration file for reload and save
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = path.into();
        self
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn mode(&self) -> ClientMode {
        match self.mode {
            Mode::Cluster { .. } => ClientMode::Cluster,
            Mode::SingleNode(_) => ClientMode::SingleNode,
            Mode::Unavailable => ClientMode::None,
        }
    }

    pub fn manager(&self) -> Option<&Arc<ClusterManager>> {
        match &self.mode {
            Mode::Cluster { manager, .. } => Some(manager),
            _ => None,
        }
    }

    async fn run(&self, operation: &Operation) -> Result<RespValue> {
        match &self.mode {
            Mode::Cluster { manager, .. } => {
                manager.execute(operation.routing_key(), operation).await
            }
            Mode::SingleNode(node) => node.execute(operation).await,
            Mode::Unavailable => Err(ClusterError::NoHealthyNodes),
        }
    }

    /// Run `operation` and convert its reply, falling back to `T::default()`
    async fn call<T, F>(&self, operation: Operation, convert: F) -> T
    where
        T: Default,
        F: FnOnce(RespValue) -> Option<T>,
    {
        if let Mode::Unavailable = self.mode {
            debug!("Store not available, skipping {}", operation.name());
            return T::default();
        }

        match self.run(&operation).await {
            Ok(reply) => convert(reply).unwrap_or_else(|| {
                warn!("Unexpected reply to {}", operation.name());
                T::default()
            }),
            Err(e) => {
                error!("Store {} error: {}", operation.name(), e);
                T::default()
            }
        }
    }

    // === Strings and keys ===

    /// Store a value, optionally expiring after `expire_secs`
    pub async fn set(&self, key: &str, value: impl StoreValue, expire_secs: Option<u64>) -> bool {
        let operation = Operation::Set {
            key: key.to_string(),
            value: value.into_store_bytes(),
            expire_secs,
        };
        self.call(operation, |r| Some(r.is_ok())).await
    }

    /// Store a value as JSON
    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T, expire_secs: Option<u64>) -> bool {
        match serde_json::to_vec(value) {
            Ok(json) => self.set(key, Bytes::from(json), expire_secs).await,
            Err(e) => {
                error!("Cannot serialize value for {}: {}", key, e);
                false
            }
        }
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        let operation = Operation::Get { key: key.to_string() };
        self.call(operation, optional_text).await
    }

    /// Read a JSON value; `None` when absent or not valid JSON for `T`
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let text = self.get(key).await?;
        match serde_json::from_str(&text) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Value at {} is not the expected JSON: {}", key, e);
                None
            }
        }
    }

    /// Delete keys; returns how many existed
    ///
    /// In cluster mode every key is routed on its own, since keys may live
    /// on different nodes.
    pub async fn delete(&self, keys: &[&str]) -> i64 {
        if keys.is_empty() {
            return 0;
        }

        if let Mode::Cluster { .. } = self.mode {
            let mut deleted = 0;
            for key in keys {
                let operation = Operation::Del {
                    keys: vec![key.to_string()],
                };
                deleted += self.call(operation, |r| r.as_integer()).await;
            }
            return deleted;
        }

        let operation = Operation::Del {
            keys: keys.iter().map(|k| k.to_string()).collect(),
        };
        self.call(operation, |r| r.as_integer()).await
    }

    pub async fn exists(&self, key: &str) -> bool {
        let operation = Operation::Exists { key: key.to_string() };
        self.call(operation, |r| r.as_integer().map(|n| n > 0)).await
    }

    pub async fn expire(&self, key: &str, seconds: i64) -> bool {
        let operation = Operation::Expire {
            key: key.to_string(),
            seconds,
        };
        self.call(operation, |r| r.as_integer().map(|n| n > 0)).await
    }

    // === Lists ===

    /// Prepend values; returns the new list length
    pub async fn lpush<I, V>(&self, key: &str, values: I) -> i64
    where
        I: IntoIterator<Item = V>,
        V: StoreValue,
    {
        let values = encode_all(values);
        if values.is_empty() {
            return 0;
        }
        let operation = Operation::LPush {
            key: key.to_string(),
            values,
        };
        self.call(operation, |r| r.as_integer()).await
    }

    /// Append values; returns the new list length
    pub async fn rpush<I, V>(&self, key: &str, values: I) -> i64
    where
        I: IntoIterator<Item = V>,
        V: StoreValue,
    {
        let values = encode_all(values);
        if values.is_empty() {
            return 0;
        }
        let operation = Operation::RPush {
            key: key.to_string(),
            values,
        };
        self.call(operation, |r| r.as_integer()).await
    }

    pub async fn lpop(&self, key: &str) -> Option<String> {
        self.call(Operation::LPop { key: key.to_string() }, optional_text).await
    }

    pub async fn rpop(&self, key: &str) -> Option<String> {
        self.call(Operation::RPop { key: key.to_string() }, optional_text).await
    }

    pub async fn llen(&self, key: &str) -> i64 {
        self.call(Operation::LLen { key: key.to_string() }, |r| r.as_integer()).await
    }

    /// Elements between `start` and `stop` inclusive; negative indexes count
    /// from the end
    pub async fn lrange(&self, key: &str, start: i64, stop: i64) -> Vec<String> {
        let operation = Operation::LRange {
            key: key.to_string(),
            start,
            stop,
        };
        self.call(operation, text_list).await
    }

    pub async fn ltrim(&self, key: &str, start: i64, stop: i64) -> bool {
        let operation = Operation::LTrim {
            key: key.to_string(),
            start,
            stop,
        };
        self.call(operation, |r| Some(r.is_ok())).await
    }

    // === Hashes ===

    /// Set one field; true when the write was accepted, whether or not the
    /// field existed
    pub async fn hset(&self, key: &str, field: &str, value: impl StoreValue) -> bool {
        let operation = Operation::HSet {
            key: key.to_string(),
            field: field.to_string(),
            value: value.into_store_bytes(),
        };
        self.call(operation, |r| r.as_integer().map(|_| true)).await
    }

    pub async fn hget(&self, key: &str, field: &str) -> Option<String> {
        let operation = Operation::HGet {
            key: key.to_string(),
            field: field.to_string(),
        };
        self.call(operation, optional_text).await
    }

    pub async fn hgetall(&self, key: &str) -> HashMap<String, String> {
        self.call(Operation::HGetAll { key: key.to_string() }, text_pairs).await
    }

    pub async fn hdel(&self, key: &str, fields: &[&str]) -> i64 {
        if fields.is_empty() {
            return 0;
        }
        let operation = Operation::HDel {
            key: key.to_string(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
        };
        self.call(operation, |r| r.as_integer()).await
    }

    // === Sets ===

    /// Add members; returns how many were new
    pub async fn sadd<I, V>(&self, key: &str, members: I) -> i64
    where
        I: IntoIterator<Item = V>,
        V: StoreValue,
    {
        let members = encode_all(members);
        if members.is_empty() {
            return 0;
        }
        let operation = Operation::SAdd {
            key: key.to_string(),
            members,
        };
        self.call(operation, |r| r.as_integer()).await
    }

    pub async fn srem<I, V>(&self, key: &str, members: I) -> i64
    where
        I: IntoIterator<Item = V>,
        V: StoreValue,
    {
        let members = encode_all(members);
        if members.is_empty() {
            return 0;
        }
        let operation = Operation::SRem {
            key: key.to_string(),
            members,
        };
        self.call(operation, |r| r.as_integer()).await
    }

    pub async fn smembers(&self, key: &str) -> HashSet<String> {
        self.call(Operation::SMembers { key: key.to_string() }, |r| {
            text_list(r).map(|members| members.into_iter().collect())
        })
        .await
    }

    // === Streams ===

    /// Append an entry; returns its id
    pub async fn xadd<I, K, V>(&self, stream: &str, fields: I, max_len: Option<usize>) -> Option<String>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: StoreValue,
    {
        let operation = Operation::XAdd {
            stream: stream.to_string(),
            fields: fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into_store_bytes()))
                .collect(),
            max_len,
        };
        self.call(operation, optional_text).await
    }

    /// Entries between two ids (`-` and `+` for the whole stream)
    pub async fn xrange(&self, stream: &str, start: &str, end: &str, count: Option<usize>) -> Vec<StreamEntry> {
        let operation = Operation::XRange {
            stream: stream.to_string(),
            start: start.to_string(),
            end: end.to_string(),
            count,
        };
        self.call(operation, stream_entries).await
    }

    /// Entries newer than the given id, per stream
    ///
    /// `block_ms` must be finite: the node's connection stays busy while the
    /// server blocks.
    pub async fn xread(
        &self,
        streams: &[(&str, &str)],
        count: Option<usize>,
        block_ms: Option<u64>,
    ) -> Vec<(String, Vec<StreamEntry>)> {
        if streams.is_empty() {
            return Vec::new();
        }
        // BLOCK 0 waits forever and would hold the node's connection
        if block_ms == Some(0) {
            warn!("Refusing XREAD with BLOCK 0, give a finite block time");
            return Vec::new();
        }
        let operation = Operation::XRead {
            streams: streams
                .iter()
                .map(|(s, id)| (s.to_string(), id.to_string()))
                .collect(),
            count,
            block_ms,
        };
        self.call(operation, |r| {
            r.into_array()?
                .into_iter()
                .map(|pair| {
                    let mut pair = pair.into_array()?.into_iter();
                    let name = pair.next()?.into_text()?;
                    let entries = stream_entries(pair.next()?)?;
                    Some((name, entries))
                })
                .collect()
        })
        .await
    }

    pub async fn xlen(&self, stream: &str) -> i64 {
        self.call(Operation::XLen { stream: stream.to_string() }, |r| r.as_integer()).await
    }

    /// Create a consumer group; an existing group counts as success
    pub async fn xgroup_create(&self, stream: &str, group: &str, id: &str, mkstream: bool) -> bool {
        if let Mode::Unavailable = self.mode {
            debug!("Store not available, skipping XGROUP CREATE");
            return false;
        }

        let operation = Operation::XGroupCreate {
            stream: stream.to_string(),
            group: group.to_string(),
            id: id.to_string(),
            mkstream,
        };
        match self.run(&operation).await {
            Ok(reply) => reply.is_ok(),
            Err(e) if e.command_kind() == Some(CommandErrorKind::BusyGroup) => {
                debug!("Consumer group {} already exists on {}", group, stream);
                true
            }
            Err(e) => {
                error!("Store XGROUP CREATE error: {}", e);
                false
            }
        }
    }

    // === Server ===

    pub async fn ping(&self) -> bool {
        self.call(Operation::Ping, |r| {
            r.into_text().map(|t| t.eq_ignore_ascii_case("PONG"))
        })
        .await
    }

    pub async fn dbsize(&self) -> i64 {
        self.call(Operation::DbSize, |r| r.as_integer()).await
    }

    /// `INFO` fields of one node, keyed by name
    pub async fn info(&self, section: Option<&str>) -> Option<HashMap<String, String>> {
        let operation = Operation::Info {
            section: section.map(str::to_string),
        };
        self.call(operation, |r| Some(r.into_text().map(|t| parse_info(&t)))).await
    }

    // === Administration ===

    fn require_cluster(&self) -> Result<&Arc<ClusterManager>> {
        self.manager().ok_or(ClusterError::NotClusterMode)
    }

    /// Register and connect a node
    pub async fn add_node(&self, endpoint: NodeEndpoint) -> Result<String> {
        let manager = self.require_cluster()?;
        let node_id = manager.add_node(endpoint)?;
        if let Some(node) = manager.node(&node_id) {
            node.connect().await;
        }
        Ok(node_id)
    }

    pub async fn remove_node(&self, node_id: &str) -> Result<()> {
        self.require_cluster()?.remove_node(node_id).await
    }

    pub fn set_strategy(&self, strategy: &str) -> Result<Strategy> {
        let manager = self.require_cluster()?;
        let strategy: Strategy = strategy.parse()?;
        manager.set_strategy(strategy);
        Ok(strategy)
    }

    /// Health check every node now; returns how many are usable
    pub async fn run_health_checks(&self) -> Result<usize> {
        Ok(self.require_cluster()?.perform_health_checks().await)
    }

    pub fn cluster_info(&self) -> Result<ClusterInfo> {
        Ok(self.require_cluster()?.cluster_info())
    }

    /// Summary of the configuration last applied
    pub fn config_summary(&self) -> Option<ConfigSummary> {
        match &self.mode {
            Mode::Cluster { config, .. } => config.read().as_ref().map(ClusterConfig::summary),
            _ => None,
        }
    }

    fn cluster_parts(&self) -> Result<(&Arc<ClusterManager>, &RwLock<Option<ClusterConfig>>)> {
        match &self.mode {
            Mode::Cluster { manager, config } => Ok((manager, config)),
            _ => Err(ClusterError::NotClusterMode),
        }
    }

    /// Re-read the configuration file and apply it to the running cluster
    ///
    /// An unreadable or invalid file leaves the cluster untouched.
    pub async fn reload_config(&self) -> Result<ConfigChanges> {
        let (manager, current) = self.cluster_parts()?;

        let config = ClusterConfig::load(&self.config_path)?;
        let changes = config.reapply_to(manager).await?;
        *current.write() = Some(config);

        info!("Reloaded cluster configuration from {}", self.config_path.display());
        Ok(changes)
    }

    /// Write the running topology and tuning to the configuration file
    pub fn save_config(&self) -> Result<PathBuf> {
        let (manager, current) = self.cluster_parts()?;

        let base = current
            .read()
            .as_ref()
            .map(|config| config.cluster.clone())
            .unwrap_or_default();
        let snapshot = ClusterConfig::snapshot(&base, manager);
        snapshot.save(&self.config_path)?;
        *current.write() = Some(snapshot);

        Ok(self.config_path.clone())
    }

    /// Write the sample configuration next to the configuration file
    pub fn write_example_config(&self) -> Result<PathBuf> {
        let path = self.config_path.with_file_name(EXAMPLE_CONFIG_FILE);
        ClusterConfig::example().save(&path)?;
        Ok(path)
    }

    /// Request metrics summed over every node in use
    pub fn performance(&self) -> PerformanceSummary {
        match &self.mode {
            Mode::Cluster { manager, .. } => {
                PerformanceSummary::from_nodes(manager.nodes().iter().map(|n| n.info()).collect())
            }
            Mode::SingleNode(node) => PerformanceSummary::from_nodes(vec![node.info()]),
            Mode::Unavailable => PerformanceSummary {
                total_requests: 0,
                successful_requests: 0,
                success_rate: 0.0,
                avg_response_time: 0.0,
                node_performance: Vec::new(),
            },
        }
    }

    pub fn connection_info(&self) -> ConnectionInfo {
        match &self.mode {
            Mode::Cluster { manager, .. } => {
                let cluster_info = manager.cluster_info();
                ConnectionInfo::Cluster {
                    strategy: cluster_info.strategy,
                    connected: cluster_info.healthy_nodes + cluster_info.degraded_nodes > 0,
                    cluster_info,
                }
            }
            Mode::SingleNode(node) => ConnectionInfo::SingleNode {
                connected: node.is_connected() && node.status() != NodeStatus::Failed,
                host: node.endpoint().host.clone(),
                port: node.endpoint().port,
                node: node.info(),
            },
            Mode::Unavailable => ConnectionInfo::Unavailable { connected: false },
        }
    }

    /// Stop the health loop and close every connection
    pub async fn shutdown(&self) {
        match &self.mode {
            Mode::Cluster { manager, .. } => {
                manager.stop_health_monitoring().await;
                manager.disconnect_all().await;
                info!("Disconnected from store cluster");
            }
            Mode::SingleNode(node) => {
                node.disconnect().await;
                info!("Disconnected from single node store");
            }
            Mode::Unavailable => {}
        }
    }
}

fn encode_all<I, V>(values: I) -> Vec<Bytes>
where
    I: IntoIterator<Item = V>,
    V: StoreValue,
{
    values.into_iter().map(StoreValue::into_store_bytes).collect()
}

fn optional_text(reply: RespValue) -> Option<Option<String>> {
    if reply.is_null() {
        Some(None)
    } else {
        reply.into_text().map(Some)
    }
}

fn text_list(reply: RespValue) -> Option<Vec<String>> {
    reply.into_array()?.into_iter().map(RespValue::into_text).collect()
}

fn text_pairs(reply: RespValue) -> Option<HashMap<String, String>> {
    let flat = text_list(reply)?;
    if flat.len() % 2 != 0 {
        return None;
    }
    let mut pairs = HashMap::with_capacity(flat.len() / 2);
    let mut items = flat.into_iter();
    while let (Some(k), Some(v)) = (items.next(), items.next()) {
        pairs.insert(k, v);
    }
    Some(pairs)
}

fn stream_entries(reply: RespValue) -> Option<Vec<StreamEntry>> {
    reply
        .into_array()?
        .into_iter()
        .map(|entry| {
            let mut parts = entry.into_array()?.into_iter();
            let id = parts.next()?.into_text()?;
            let fields = text_pairs(parts.next()?)?;
            Some(StreamEntry { id, fields })
        })
        .collect()
}

/// `INFO` text as a flat map; section headers and blank lines are skipped
fn parse_info(text: &str) -> HashMap<String, String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
