//! HTTP handlers for the admin interface

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

use crate::backend::NodeEndpoint;
use crate::client::{ClientMode, ClusterClient, ConnectionInfo, PerformanceSummary};
use crate::cluster::NodeInfo;
use crate::config::{ConfigChanges, ConfigSummary};
use crate::error::ClusterError;

/// Shared application state
pub type AppState = Arc<ClusterClient>;

/// Error body returned by every failing route
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

/// Cluster error paired with the HTTP status it maps to
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        ApiError {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<ClusterError> for ApiError {
    fn from(err: ClusterError) -> Self {
        let status = match &err {
            ClusterError::UnknownNode(_) => StatusCode::NOT_FOUND,
            ClusterError::DuplicateNode(_) | ClusterError::NotClusterMode => StatusCode::CONFLICT,
            ClusterError::UnknownStrategy(_)
            | ClusterError::UnknownHashFunction(_)
            | ClusterError::InvalidConfig(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                success: false,
                error: self.message,
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<(StatusCode, Json<T>), ApiError>;

/// Overall health of the store connection
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub mode: ClientMode,
    pub healthy: bool,
    pub total_nodes: usize,
    pub healthy_nodes: usize,
    pub degraded_nodes: usize,
    pub failed_nodes: usize,
}

/// Request body for node registration
#[derive(Debug, Deserialize)]
pub struct AddNodeRequest {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub weight: Option<f64>,
    #[serde(default)]
    pub node_id: Option<String>,
    #[serde(default)]
    pub max_connections: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct NodeResponse {
    pub success: bool,
    pub node_id: String,
}

#[derive(Debug, Serialize)]
pub struct HealthCheckResponse {
    pub usable_nodes: usize,
}

/// Request body for a strategy change
#[derive(Debug, Deserialize, Serialize)]
pub struct StrategyRequest {
    pub strategy: String,
}

/// Configuration file written by the admin interface
#[derive(Debug, Serialize)]
pub struct ConfigFileResponse {
    pub success: bool,
    pub path: PathBuf,
}

/// Connection mode and cluster snapshot
pub async fn cluster_info(State(client): State<AppState>) -> (StatusCode, Json<ConnectionInfo>) {
    (StatusCode::OK, Json(client.connection_info()))
}

/// Node counts by status
pub async fn cluster_health(State(client): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let health = match client.connection_info() {
        ConnectionInfo::Cluster { cluster_info, .. } => HealthResponse {
            mode: ClientMode::Cluster,
            healthy: cluster_info.healthy_nodes + cluster_info.degraded_nodes > 0,
            total_nodes: cluster_info.total_nodes,
            healthy_nodes: cluster_info.healthy_nodes,
            degraded_nodes: cluster_info.degraded_nodes,
            failed_nodes: cluster_info.failed_nodes,
        },
        ConnectionInfo::SingleNode { connected, .. } => HealthResponse {
            mode: ClientMode::SingleNode,
            healthy: connected,
            total_nodes: 1,
            healthy_nodes: connected as usize,
            degraded_nodes: 0,
            failed_nodes: (!connected) as usize,
        },
        ConnectionInfo::Unavailable { .. } => HealthResponse {
            mode: ClientMode::None,
            healthy: false,
            total_nodes: 0,
            healthy_nodes: 0,
            degraded_nodes: 0,
            failed_nodes: 0,
        },
    };

    (StatusCode::OK, Json(health))
}

pub async fn list_nodes(State(client): State<AppState>) -> ApiResult<Vec<NodeInfo>> {
    let info = client.cluster_info()?;
    Ok((StatusCode::OK, Json(info.nodes)))
}

/// Register and connect a node
pub async fn add_node(
    State(client): State<AppState>,
    Json(req): Json<AddNodeRequest>,
) -> ApiResult<NodeResponse> {
    debug!("Adding node {}:{}", req.host, req.port);

    if req.host.trim().is_empty() {
        return Err(ApiError::bad_request("host must not be empty"));
    }
    if req.port == 0 {
        return Err(ApiError::bad_request("invalid port 0"));
    }

    let mut endpoint = NodeEndpoint::new(req.host, req.port).with_password(req.password);
    if let Some(weight) = req.weight {
        if !(weight > 0.0) {
            return Err(ApiError::bad_request("weight must be positive"));
        }
        endpoint = endpoint.with_weight(weight);
    }
    if let Some(node_id) = req.node_id {
        endpoint = endpoint.with_id(node_id);
    }
    if let Some(max_connections) = req.max_connections {
        endpoint = endpoint.with_max_connections(max_connections);
    }

    let node_id = client.add_node(endpoint).await?;
    info!("Node {} added through admin interface", node_id);

    Ok((
        StatusCode::CREATED,
        Json(NodeResponse {
            success: true,
            node_id,
        }),
    ))
}

pub async fn remove_node(
    State(client): State<AppState>,
    Path(node_id): Path<String>,
) -> ApiResult<NodeResponse> {
    client.remove_node(&node_id).await?;
    info!("Node {} removed through admin interface", node_id);

    Ok((
        StatusCode::OK,
        Json(NodeResponse {
            success: true,
            node_id,
        }),
    ))
}

/// Health check every node immediately
pub async fn run_health_check(State(client): State<AppState>) -> ApiResult<HealthCheckResponse> {
    let usable_nodes = client.run_health_checks().await?;
    Ok((StatusCode::OK, Json(HealthCheckResponse { usable_nodes })))
}

pub async fn set_strategy(
    State(client): State<AppState>,
    Json(req): Json<StrategyRequest>,
) -> ApiResult<StrategyRequest> {
    let strategy = client.set_strategy(&req.strategy)?;
    Ok((
        StatusCode::OK,
        Json(StrategyRequest {
            strategy: strategy.to_string(),
        }),
    ))
}

/// Configuration the client started from, passwords redacted
pub async fn cluster_config(State(client): State<AppState>) -> ApiResult<ConfigSummary> {
    match client.config_summary() {
        Some(summary) => Ok((StatusCode::OK, Json(summary))),
        None => Err(ApiError {
            status: StatusCode::NOT_FOUND,
            message: "no cluster configuration loaded".to_string(),
        }),
    }
}

/// Re-read the configuration file and apply it
pub async fn reload_config(State(client): State<AppState>) -> ApiResult<ConfigChanges> {
    let changes = client.reload_config().await?;
    info!("Configuration reloaded through admin interface");
    Ok((StatusCode::OK, Json(changes)))
}

/// Persist the running topology
pub async fn save_config(State(client): State<AppState>) -> ApiResult<ConfigFileResponse> {
    let path = client.save_config()?;
    Ok((StatusCode::OK, Json(ConfigFileResponse { success: true, path })))
}

pub async fn create_example_config(
    State(client): State<AppState>,
) -> ApiResult<ConfigFileResponse> {
    let path = client.write_example_config()?;
    Ok((StatusCode::CREATED, Json(ConfigFileResponse { success: true, path })))
}

/// Request totals and per node metrics
pub async fn cluster_performance(
    State(client): State<AppState>,
) -> (StatusCode, Json<PerformanceSummary>) {
    (StatusCode::OK, Json(client.performance()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockConnector;
    use crate::cluster::{ClusterManager, ManagerSettings};

    fn state(ids: &[&str]) -> AppState {
        Arc::new(client(ids))
    }

    fn client(ids: &[&str]) -> ClusterClient {
        let connector = MockConnector::new();
        let manager = Arc::new(ClusterManager::with_connector(ManagerSettings::default(), connector));
        for (i, id) in ids.iter().enumerate() {
            manager
                .add_node(NodeEndpoint::new("127.0.0.1", 7000 + i as u16).with_id(*id))
                .unwrap();
        }
        ClusterClient::from_manager(manager)
    }

    fn add_request(id: &str) -> AddNodeRequest {
        AddNodeRequest {
            host: "127.0.0.1".to_string(),
            port: 7100,
            password: None,
            weight: Some(2.0),
            node_id: Some(id.to_string()),
            max_connections: None,
        }
    }

    #[tokio::test]
    async fn test_node_lifecycle() {
        let state = state(&["a"]);

        let (status, Json(body)) = add_node(State(state.clone()), Json(add_request("b"))).await.unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body.node_id, "b");

        let err = add_node(State(state.clone()), Json(add_request("b"))).await.unwrap_err();
        assert_eq!(err.status, StatusCode::CONFLICT);

        let (_, Json(nodes)) = list_nodes(State(state.clone())).await.unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[1].weight, 2.0);

        let (status, _) = remove_node(State(state.clone()), Path("b".to_string())).await.unwrap();
        assert_eq!(status, StatusCode::OK);

        let err = remove_node(State(state), Path("b".to_string())).await.unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_bad_requests() {
        let state = state(&["a"]);

        let mut req = add_request("c");
        req.weight = Some(0.0);
        let err = add_node(State(state.clone()), Json(req)).await.unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        let err = set_strategy(
            State(state.clone()),
            Json(StrategyRequest {
                strategy: "fastest".to_string(),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        let (_, Json(body)) = set_strategy(
            State(state),
            Json(StrategyRequest {
                strategy: "least_connections".to_string(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(body.strategy, "least_connections");
    }

    #[tokio::test]
    async fn test_health_routes() {
        let state = state(&["a", "b"]);

        let (_, Json(checked)) = run_health_check(State(state.clone())).await.unwrap();
        assert_eq!(checked.usable_nodes, 2);

        let (_, Json(health)) = cluster_health(State(state.clone())).await;
        assert!(health.healthy);
        assert_eq!(health.healthy_nodes, 2);

        // Started from a manager, not a configuration
        let err = cluster_config(State(state)).await.unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_admin_routes_outside_cluster_mode() {
        let state: AppState = Arc::new(ClusterClient::disconnected());

        let err = list_nodes(State(state.clone())).await.unwrap_err();
        assert_eq!(err.status, StatusCode::CONFLICT);

        let (_, Json(health)) = cluster_health(State(state.clone())).await;
        assert!(!health.healthy);
        assert_eq!(health.mode, ClientMode::None);

        let response = run_health_check(State(state.clone())).await.unwrap_err().into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let err = reload_config(State(state.clone())).await.unwrap_err();
        assert_eq!(err.status, StatusCode::CONFLICT);
        let err = save_config(State(state.clone())).await.unwrap_err();
        assert_eq!(err.status, StatusCode::CONFLICT);

        let (_, Json(perf)) = cluster_performance(State(state)).await;
        assert_eq!(perf.total_requests, 0);
    }

    #[tokio::test]
    async fn test_config_file_routes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cluster.yaml");
        let state: AppState = Arc::new(client(&["a", "b"]).with_config_path(&path));

        // Nothing on disk yet
        let err = reload_config(State(state.clone())).await.unwrap_err();
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);

        let (status, Json(saved)) = save_config(State(state.clone())).await.unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(saved.path, path);

        let (_, Json(changes)) = reload_config(State(state.clone())).await.unwrap();
        assert!(changes.added.is_empty() && changes.removed.is_empty());
        assert_eq!(changes.node_count, 2);

        let (_, Json(summary)) = cluster_config(State(state.clone())).await.unwrap();
        assert_eq!(summary.node_count, 2);

        let (status, Json(example)) = create_example_config(State(state.clone())).await.unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert!(example.path.exists());

        let (_, Json(perf)) = cluster_performance(State(state)).await;
        assert_eq!(perf.node_performance.len(), 2);
        assert_eq!(perf.success_rate, 1.0);
    }
}
