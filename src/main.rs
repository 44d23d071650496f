use anyhow::Context;
use ferrum_cluster::{web, ClientOptions, ClusterClient};
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging (DEBUG level for detailed routing traces)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::DEBUG.into()),
        )
        .init();

    info!("FerrumCluster starting...");

    let admin_addr =
        std::env::var("CLUSTER_ADMIN_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());

    let client = Arc::new(ClusterClient::connect(ClientOptions::default()).await);
    info!("Store client running in {:?} mode", client.mode());

    // Start admin server in background task
    let web_client = client.clone();
    let web_handle = tokio::spawn(async move {
        info!("Starting admin server on {}", admin_addr);
        if let Err(e) = web::run_admin_server(&admin_addr, web_client).await {
            error!("Admin server error: {}", e);
        }
    });

    tokio::select! {
        _ = web_handle => error!("Admin server stopped"),
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for shutdown signal")?;
            info!("Shutdown requested");
        }
    }

    client.shutdown().await;
    info!("FerrumCluster stopped");
    Ok(())
}
