//! Store connection layer
//!
//! Defines how the cluster layer talks to a single backing store node:
//! - `Operation`: the closed set of commands that can be dispatched
//! - `StoreConnection`: one live connection able to run a request frame
//! - `Connector`: opens connections for a node endpoint
//!
//! The TCP implementation speaks RESP2 to any Redis-compatible server.

mod operation;
mod tcp;

#[cfg(test)]
pub(crate) mod mock;

pub use operation::Operation;
pub use tcp::{TcpConnection, TcpConnector};

use crate::error::Result;
use crate::protocol::RespValue;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

/// Where and how to reach a store node
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeEndpoint {
    /// Logical node identifier, `host:port` unless configured otherwise
    pub node_id: String,

    pub host: String,
    pub port: u16,

    #[serde(skip_serializing)]
    pub password: Option<String>,

    /// Relative share of traffic and ring positions
    pub weight: f64,

    /// In-flight count at which the node counts as fully loaded
    pub max_connections: usize,
}

impl NodeEndpoint {
    /// Endpoint with default weight and id
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        NodeEndpoint {
            node_id: format!("{}:{}", host, port),
            host,
            port,
            password: None,
            weight: 1.0,
            max_connections: 100,
        }
    }

    pub fn with_id(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = node_id.into();
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_password(mut self, password: Option<String>) -> Self {
        self.password = password;
        self
    }

    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }

    /// `host:port` socket address string
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// A live connection to one store node
#[async_trait]
pub trait StoreConnection: Send {
    /// Send one request frame and wait for its reply
    ///
    /// Error replies from the server come back as `ClusterError::Command`.
    async fn call(&mut self, command: &RespValue) -> Result<RespValue>;

    /// Like `call`, for a command the server may hold for up to `block`
    /// before replying
    async fn call_blocking(&mut self, command: &RespValue, _block: Duration) -> Result<RespValue> {
        self.call(command).await
    }

    /// Whether the connection can take another request
    ///
    /// False once a caller gave up between writing a request and reading its
    /// reply: the stale reply would answer the next command.
    fn is_reusable(&self) -> bool {
        true
    }

    /// Release the connection
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Opens connections to store nodes
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &NodeEndpoint) -> Result<Box<dyn StoreConnection>>;
}
