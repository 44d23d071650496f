//! FerrumCluster - A cluster-aware key-value access layer
//!
//! FerrumCluster spreads operations over several Redis-compatible nodes:
//! - `protocol`: RESP2 encoding and incremental parsing
//! - `backend`: store operations and node connections
//! - `cluster`: node health, hash ring, load balancing and failover
//! - `config`: file and environment configuration
//! - `client`: the façade applications talk to
//! - `web`: admin HTTP routes

pub mod backend;
pub mod client;
pub mod cluster;
pub mod config;
pub mod error;
pub mod protocol;
pub mod web;

/// Re-export commonly used types
pub use backend::{NodeEndpoint, Operation};
pub use client::{ClientMode, ClientOptions, ClusterClient};
pub use cluster::{ClusterManager, ManagerSettings, NodeStatus, Strategy};
pub use config::ClusterConfig;
pub use error::{ClusterError, Result};
pub use protocol::{RespError, RespValue};
