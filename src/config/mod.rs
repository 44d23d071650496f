//! Cluster configuration
//!
//! A configuration is the manager tuning plus the node list. It can come from
//! a YAML or JSON file, from environment variables, or from the built-in
//! single node default, and is applied to a `ClusterManager` in one step.

mod env;

pub use env::{
    fallback_endpoint, fallback_endpoint_with, parse_node_list, CONFIG_PATH_VAR, DEFAULT_CONFIG_PATH,
};

/// File written by `ClusterClient::write_example_config`, next to the main one
pub const EXAMPLE_CONFIG_FILE: &str = "redis_cluster_example.yaml";

use crate::backend::{NodeEndpoint, TcpConnector};
use crate::cluster::{ClusterManager, ManagerSettings, RingHash, Strategy};
use crate::error::{ClusterError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Manager tuning as written in configuration files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterSettings {
    pub strategy: String,
    /// Seconds
    pub health_check_interval: i64,
    pub max_retries: i64,
    /// Seconds
    pub retry_delay: f64,
    pub virtual_nodes: usize,
    pub auto_failover: bool,
    /// Seconds
    pub connection_timeout: f64,
    /// Seconds
    pub socket_timeout: f64,
    pub hash_function: String,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        ClusterSettings {
            strategy: Strategy::ConsistentHash.to_string(),
            health_check_interval: 30,
            max_retries: 3,
            retry_delay: 1.0,
            virtual_nodes: crate::cluster::DEFAULT_VIRTUAL_NODES,
            auto_failover: true,
            connection_timeout: 5.0,
            socket_timeout: 5.0,
            hash_function: RingHash::Md5.to_string(),
        }
    }
}

/// One configured store node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub host: String,
    /// Wider than a port so out-of-range values reach validation
    pub port: u32,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default)]
    pub node_id: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

fn default_weight() -> f64 {
    1.0
}

fn default_max_connections() -> usize {
    100
}

impl NodeConfig {
    pub fn new(host: impl Into<String>, port: u32) -> Self {
        NodeConfig {
            host: host.into(),
            port,
            password: None,
            weight: default_weight(),
            node_id: None,
            max_connections: default_max_connections(),
        }
    }

    /// Configured id, or `host:port`
    pub fn resolved_id(&self) -> String {
        self.node_id
            .clone()
            .unwrap_or_else(|| format!("{}:{}", self.host, self.port))
    }

    pub fn endpoint(&self) -> Result<NodeEndpoint> {
        let port = u16::try_from(self.port)
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| {
                ClusterError::InvalidConfig(vec![format!(
                    "node {}: invalid port {}",
                    self.resolved_id(),
                    self.port
                )])
            })?;

        Ok(NodeEndpoint::new(self.host.clone(), port)
            .with_id(self.resolved_id())
            .with_password(self.password.clone())
            .with_weight(self.weight)
            .with_max_connections(self.max_connections))
    }
}

/// Where a resolved configuration came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigSource {
    File,
    Environment,
    Default,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConfigSource::File => "file",
            ConfigSource::Environment => "environment",
            ConfigSource::Default => "default",
        })
    }
}

/// Complete cluster configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(default)]
    pub cluster: ClusterSettings,
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}

fn io_error(path: &Path, reason: impl fmt::Display) -> ClusterError {
    ClusterError::ConfigIo {
        path: path.display().to_string(),
        reason: reason.to_string(),
    }
}

fn seconds(value: f64, fallback: Duration) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(fallback)
}

impl ClusterConfig {
    /// Single local node with default tuning
    pub fn default_single_node() -> Self {
        ClusterConfig {
            cluster: ClusterSettings::default(),
            nodes: vec![NodeConfig {
                node_id: Some("default_node".to_string()),
                ..NodeConfig::new("127.0.0.1", 6379)
            }],
        }
    }

    /// Three node sample, the third one heavier
    pub fn example() -> Self {
        let node = |port: u32, id: &str, weight: f64, max_connections: usize| NodeConfig {
            password: Some("your_password_here".to_string()),
            weight,
            node_id: Some(id.to_string()),
            max_connections,
            ..NodeConfig::new("127.0.0.1", port)
        };

        ClusterConfig {
            cluster: ClusterSettings::default(),
            nodes: vec![
                node(6379, "redis-1", 1.0, 100),
                node(6380, "redis-2", 1.0, 100),
                node(6381, "redis-3", 1.5, 150),
            ],
        }
    }

    /// Read a file; YAML for `.yaml`/`.yml`, JSON otherwise
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| io_error(path, e))?;

        let config: ClusterConfig = if is_yaml(path) {
            serde_yaml::from_str(&text).map_err(|e| io_error(path, e))?
        } else {
            serde_json::from_str(&text).map_err(|e| io_error(path, e))?
        };

        info!(
            "Loaded cluster configuration from {}: strategy {}, {} nodes",
            path.display(),
            config.cluster.strategy,
            config.nodes.len()
        );
        Ok(config)
    }

    /// Write a file in the format implied by its extension
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let text = if is_yaml(path) {
            serde_yaml::to_string(self).map_err(|e| io_error(path, e))?
        } else {
            serde_json::to_string_pretty(self).map_err(|e| io_error(path, e))?
        };

        std::fs::write(path, text).map_err(|e| io_error(path, e))?;
        info!("Saved cluster configuration to {}", path.display());
        Ok(())
    }

    /// Configuration file named by `REDIS_CLUSTER_CONFIG`, else the environment,
    /// else the single node default
    pub fn resolve() -> (Self, ConfigSource) {
        let path = std::env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::resolve_from(Path::new(&path), |key| std::env::var(key).ok())
    }

    pub fn resolve_from<F>(path: &Path, lookup: F) -> (Self, ConfigSource)
    where
        F: Fn(&str) -> Option<String>,
    {
        if path.exists() {
            match Self::load(path) {
                Ok(config) => return (config, ConfigSource::File),
                Err(e) => warn!("Ignoring cluster configuration file: {}", e),
            }
        }

        if let Some(config) = Self::from_env_with(lookup) {
            return (config, ConfigSource::Environment);
        }

        info!("No cluster configuration found, using a single local node");
        (Self::default_single_node(), ConfigSource::Default)
    }

    /// Every problem found, one message each; empty when valid
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.nodes.is_empty() {
            errors.push("no store nodes configured".to_string());
        }

        let mut seen = HashSet::new();
        for (i, node) in self.nodes.iter().enumerate() {
            if node.host.trim().is_empty() {
                errors.push(format!("node {}: missing host", i));
            }
            if node.port == 0 || node.port > u16::MAX as u32 {
                errors.push(format!("node {}: invalid port {}", i, node.port));
            }
            if !(node.weight > 0.0) {
                errors.push(format!("node {}: weight must be positive, got {}", i, node.weight));
            }
            let id = node.resolved_id();
            if !seen.insert(id.clone()) {
                errors.push(format!("node {}: duplicate node_id {}", i, id));
            }
        }

        let c = &self.cluster;
        if c.health_check_interval <= 0 {
            errors.push("health check interval must be positive".to_string());
        }
        if c.max_retries < 0 {
            errors.push("max retries cannot be negative".to_string());
        }
        if !(c.retry_delay > 0.0) {
            errors.push("retry delay must be positive".to_string());
        }
        if c.virtual_nodes == 0 {
            errors.push("virtual nodes must be positive".to_string());
        }
        if !(c.connection_timeout > 0.0) || !(c.socket_timeout > 0.0) {
            errors.push("timeouts must be positive".to_string());
        }
        if c.strategy.parse::<Strategy>().is_err() {
            errors.push(format!("invalid load balance strategy: {}", c.strategy));
        }
        if c.hash_function.parse::<RingHash>().is_err() {
            errors.push(format!("unknown hash function: {}", c.hash_function));
        }

        errors
    }

    /// Manager tuning, replacing unusable values with defaults
    pub fn manager_settings(&self) -> ManagerSettings {
        let c = &self.cluster;
        let defaults = ManagerSettings::default();

        let strategy = c.strategy.parse::<Strategy>().unwrap_or_else(|_| {
            warn!("Invalid strategy '{}', using {}", c.strategy, defaults.strategy);
            defaults.strategy
        });
        let ring_hash = c.hash_function.parse::<RingHash>().unwrap_or_else(|_| {
            warn!("Unknown hash function '{}', using {}", c.hash_function, defaults.ring_hash);
            defaults.ring_hash
        });

        ManagerSettings {
            strategy,
            health_check_interval: u64::try_from(c.health_check_interval)
                .ok()
                .filter(|s| *s > 0)
                .map_or(defaults.health_check_interval, Duration::from_secs),
            max_retries: u32::try_from(c.max_retries).unwrap_or(defaults.max_retries),
            retry_delay: seconds(c.retry_delay, defaults.retry_delay),
            virtual_nodes: if c.virtual_nodes > 0 {
                c.virtual_nodes
            } else {
                defaults.virtual_nodes
            },
            ring_hash,
            auto_failover: c.auto_failover,
        }
    }

    /// TCP connector with the configured timeouts
    pub fn connector(&self) -> TcpConnector {
        let fallback = Duration::from_secs(5);
        TcpConnector::new(
            seconds(self.cluster.connection_timeout, fallback),
            seconds(self.cluster.socket_timeout, fallback),
        )
    }

    /// Push tuning and nodes into `manager`; returns the number of nodes added
    pub fn apply_to(&self, manager: &ClusterManager) -> Result<usize> {
        if self.nodes.is_empty() {
            return Err(ClusterError::InvalidConfig(vec![
                "no store nodes configured".to_string()
            ]));
        }

        manager.apply_settings(self.manager_settings());

        for node in &self.nodes {
            manager.add_node(node.endpoint()?)?;
        }

        info!("Applied cluster configuration: {} nodes", self.nodes.len());
        Ok(self.nodes.len())
    }

    /// Bring a running manager in line with this configuration
    ///
    /// Tuning is replaced, nodes missing from the configuration are removed,
    /// new nodes are added and connected, and nodes whose endpoint changed
    /// are registered again. Unchanged nodes keep their connection and
    /// metrics. Nothing is touched when the configuration is invalid.
    pub async fn reapply_to(&self, manager: &ClusterManager) -> Result<ConfigChanges> {
        let errors = self.validate();
        if !errors.is_empty() {
            return Err(ClusterError::InvalidConfig(errors));
        }

        let wanted = self
            .nodes
            .iter()
            .map(NodeConfig::endpoint)
            .collect::<Result<Vec<_>>>()?;

        let mut changes = ConfigChanges::default();
        for node in manager.nodes() {
            match wanted.iter().find(|e| e.node_id == node.id()) {
                Some(endpoint) if endpoint == node.endpoint() => continue,
                Some(_) => changes.replaced.push(node.id().to_string()),
                None => changes.removed.push(node.id().to_string()),
            }
            manager.remove_node(node.id()).await?;
        }

        manager.apply_settings(self.manager_settings());

        for endpoint in wanted {
            if manager.node(&endpoint.node_id).is_some() {
                continue;
            }
            let node_id = manager.add_node(endpoint)?;
            if let Some(node) = manager.node(&node_id) {
                node.connect().await;
            }
            if !changes.replaced.contains(&node_id) {
                changes.added.push(node_id);
            }
        }

        changes.node_count = manager.node_count();
        info!(
            "Reapplied cluster configuration: {} added, {} removed, {} replaced",
            changes.added.len(),
            changes.removed.len(),
            changes.replaced.len()
        );
        Ok(changes)
    }

    /// Configuration describing a running manager
    ///
    /// Settings the manager does not hold (timeouts) are taken from `base`.
    pub fn snapshot(base: &ClusterSettings, manager: &ClusterManager) -> Self {
        let settings = manager.settings();
        let cluster = ClusterSettings {
            strategy: settings.strategy.to_string(),
            health_check_interval: settings.health_check_interval.as_secs() as i64,
            max_retries: i64::from(settings.max_retries),
            retry_delay: settings.retry_delay.as_secs_f64(),
            virtual_nodes: settings.virtual_nodes,
            auto_failover: settings.auto_failover,
            hash_function: settings.ring_hash.to_string(),
            ..base.clone()
        };

        let nodes = manager
            .nodes()
            .iter()
            .map(|node| {
                let endpoint = node.endpoint();
                NodeConfig {
                    host: endpoint.host.clone(),
                    port: u32::from(endpoint.port),
                    password: endpoint.password.clone(),
                    weight: endpoint.weight,
                    node_id: Some(endpoint.node_id.clone()),
                    max_connections: endpoint.max_connections,
                }
            })
            .collect();

        ClusterConfig { cluster, nodes }
    }

    /// Diagnostic view with passwords redacted
    pub fn summary(&self) -> ConfigSummary {
        ConfigSummary {
            cluster: self.cluster.clone(),
            node_count: self.nodes.len(),
            nodes: self
                .nodes
                .iter()
                .map(|n| NodeSummary {
                    node_id: n.resolved_id(),
                    host: n.host.clone(),
                    port: n.port,
                    weight: n.weight,
                    has_password: n.password.as_deref().map_or(false, |p| !p.is_empty()),
                })
                .collect(),
            validation_errors: self.validate(),
        }
    }
}

/// Topology changes made by `ClusterConfig::reapply_to`
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConfigChanges {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    /// Registered again because their endpoint changed
    pub replaced: Vec<String>,
    pub node_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfigSummary {
    pub cluster: ClusterSettings,
    pub node_count: usize,
    pub nodes: Vec<NodeSummary>,
    pub validation_errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeSummary {
    pub node_id: String,
    pub host: String,
    pub port: u32,
    pub weight: f64,
    pub has_password: bool,
}
