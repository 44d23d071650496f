//! Environment variable configuration
//!
//! | Variable                         | Default           | Description                            |
//! |----------------------------------|-------------------|----------------------------------------|
//! | `REDIS_CLUSTER_CONFIG`           | `redis_cluster.yaml` | Configuration file path             |
//! | `REDIS_CLUSTER_STRATEGY`         | `consistent_hash` | Load balance strategy                  |
//! | `REDIS_CLUSTER_HEALTH_INTERVAL`  | `30`              | Seconds between health checks          |
//! | `REDIS_CLUSTER_MAX_RETRIES`      | `3`               | Attempts per operation                 |
//! | `REDIS_CLUSTER_RETRY_DELAY`      | `1.0`             | Base retry delay in seconds            |
//! | `REDIS_CLUSTER_VIRTUAL_NODES`    | `160`             | Ring positions per unit of weight      |
//! | `REDIS_CLUSTER_AUTO_FAILOVER`    | `true`            | Retry on other nodes                   |
//! | `REDIS_CLUSTER_HASH_FUNCTION`    | `md5`             | Ring hash (md5, siphash, xxh64)        |
//! | `REDIS_CLUSTER_NODES`            |                   | `host:port:password:weight,...`        |
//! | `REDIS_HOST` / `REDIS_PORT`      |                   | Single node                            |
//! | `REDIS_PASSWORD`                 |                   | Password of the single node            |

use super::{ClusterConfig, ClusterSettings, NodeConfig};
use crate::backend::NodeEndpoint;
use std::str::FromStr;
use tracing::{info, warn};

pub const CONFIG_PATH_VAR: &str = "REDIS_CLUSTER_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "redis_cluster.yaml";

impl ClusterConfig {
    /// Configuration from the process environment
    ///
    /// Returns `None` when no node is described.
    pub fn from_env() -> Option<Self> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Configuration from an arbitrary variable lookup
    pub fn from_env_with<F>(lookup: F) -> Option<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = ClusterSettings::default();
        let cluster = ClusterSettings {
            strategy: env_str(&lookup, "REDIS_CLUSTER_STRATEGY", &defaults.strategy),
            health_check_interval: env_parse(
                &lookup,
                "REDIS_CLUSTER_HEALTH_INTERVAL",
                defaults.health_check_interval,
            ),
            max_retries: env_parse(&lookup, "REDIS_CLUSTER_MAX_RETRIES", defaults.max_retries),
            retry_delay: env_parse(&lookup, "REDIS_CLUSTER_RETRY_DELAY", defaults.retry_delay),
            virtual_nodes: env_parse(&lookup, "REDIS_CLUSTER_VIRTUAL_NODES", defaults.virtual_nodes),
            auto_failover: env_bool(&lookup, "REDIS_CLUSTER_AUTO_FAILOVER", defaults.auto_failover),
            hash_function: env_str(&lookup, "REDIS_CLUSTER_HASH_FUNCTION", &defaults.hash_function),
            ..defaults
        };

        let mut nodes = Vec::new();

        // Legacy single node
        if let (Some(host), Some(port)) = (lookup("REDIS_HOST"), lookup("REDIS_PORT")) {
            match port.trim().parse::<u32>() {
                Ok(port) => nodes.push(NodeConfig {
                    node_id: Some(format!("{}:{}", host, port)),
                    password: lookup("REDIS_PASSWORD").filter(|p| !p.is_empty()),
                    ..NodeConfig::new(host, port)
                }),
                Err(_) => warn!("Ignoring REDIS_PORT={}: not a port number", port),
            }
        }

        if let Some(list) = lookup("REDIS_CLUSTER_NODES") {
            nodes.extend(parse_node_list(&list));
        }

        if nodes.is_empty() {
            return None;
        }

        info!(
            "Loaded cluster configuration from environment: strategy {}, {} nodes",
            cluster.strategy,
            nodes.len()
        );
        Some(ClusterConfig { cluster, nodes })
    }
}

/// Single node used when cluster mode cannot start
pub fn fallback_endpoint() -> NodeEndpoint {
    fallback_endpoint_with(|key| std::env::var(key).ok())
}

/// `REDIS_HOST`/`REDIS_PORT`/`REDIS_PASSWORD`, defaulting to `127.0.0.1:6379`
pub fn fallback_endpoint_with<F>(lookup: F) -> NodeEndpoint
where
    F: Fn(&str) -> Option<String>,
{
    let host = env_str(&lookup, "REDIS_HOST", "127.0.0.1");
    let port = match env_parse(&lookup, "REDIS_PORT", 6379u16) {
        0 => {
            warn!("Ignoring REDIS_PORT=0, using 6379");
            6379
        }
        port => port,
    };
    let password = lookup("REDIS_PASSWORD").filter(|p| !p.is_empty());

    NodeEndpoint::new(host, port).with_password(password)
}

/// Parse `host:port[:password[:weight]]` entries separated by commas
pub fn parse_node_list(list: &str) -> Vec<NodeConfig> {
    let mut nodes = Vec::new();

    for entry in list.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let parts: Vec<&str> = entry.split(':').collect();
        if parts.len() < 2 {
            warn!("Ignoring cluster node entry '{}': expected host:port", entry);
            continue;
        }

        let port = match parts[1].parse::<u32>() {
            Ok(port) => port,
            Err(_) => {
                warn!("Ignoring cluster node entry '{}': bad port", entry);
                continue;
            }
        };

        let weight = match parts.get(3) {
            Some(w) => match w.parse::<f64>() {
                Ok(weight) => weight,
                Err(_) => {
                    warn!("Ignoring cluster node entry '{}': bad weight", entry);
                    continue;
                }
            },
            None => 1.0,
        };

        let host = parts[0].to_string();
        nodes.push(NodeConfig {
            node_id: Some(format!("{}:{}", host, port)),
            password: parts.get(2).filter(|p| !p.is_empty()).map(|p| p.to_string()),
            weight,
            ..NodeConfig::new(host, port)
        });
    }

    nodes
}

fn env_str<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str, default: &str) -> String {
    lookup(key).unwrap_or_else(|| default.to_string())
}

fn env_bool<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str, default: bool) -> bool {
    lookup(key).map_or(default, |v| v == "1" || v.eq_ignore_ascii_case("true"))
}

fn env_parse<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("Ignoring {}={}: not a valid value", key, raw);
            default
        }),
        None => default,
    }
}
