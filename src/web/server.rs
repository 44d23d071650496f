//! HTTP server implementation

use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

use super::handlers::{
    add_node, cluster_config, cluster_health, cluster_info, cluster_performance,
    create_example_config, list_nodes, reload_config, remove_node, run_health_check, save_config,
    set_strategy,
};
use crate::client::ClusterClient;

/// Admin routes over a shared client
pub fn router(client: Arc<ClusterClient>) -> Router {
    Router::new()
        .route("/cluster/info", get(cluster_info))
        .route("/cluster/health", get(cluster_health))
        .route("/cluster/nodes", get(list_nodes).post(add_node))
        .route("/cluster/nodes/:node_id", delete(remove_node))
        .route("/cluster/health-check", post(run_health_check))
        .route("/cluster/strategy", post(set_strategy))
        .route("/cluster/config", get(cluster_config))
        .route("/cluster/config/reload", post(reload_config))
        .route("/cluster/config/save", post(save_config))
        .route("/cluster/config/create-example", post(create_example_config))
        .route("/cluster/performance", get(cluster_performance))
        .layer(CorsLayer::permissive())
        .with_state(client)
}

/// Serve the admin interface until the listener fails
pub async fn run_admin_server(
    addr: &str,
    client: Arc<ClusterClient>,
) -> Result<(), Box<dyn std::error::Error>> {
    let app = router(client);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Admin interface available at http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
