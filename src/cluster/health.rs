//! Background health monitoring
//!
//! The loop health checks every node, then sleeps for the configured interval. It
//! only holds a weak reference to the manager so dropping the manager also
//! ends the loop.

use super::ClusterManager;
use std::sync::Weak;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Handle on a running health loop
pub(crate) struct HealthMonitor {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl HealthMonitor {
    pub fn spawn(manager: Weak<ClusterManager>) -> Self {
        let token = CancellationToken::new();
        let handle = tokio::spawn(run(manager, token.clone()));
        HealthMonitor { token, handle }
    }

    pub fn is_running(&self) -> bool {
        !self.token.is_cancelled() && !self.handle.is_finished()
    }

    /// Cancel the loop and wait for it to exit
    pub async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.handle.await {
            debug!("Health loop ended abnormally: {}", e);
        }
    }
}

async fn run(manager: Weak<ClusterManager>, token: CancellationToken) {
    info!("Started cluster health monitoring");

    loop {
        let interval = match manager.upgrade() {
            Some(manager) => {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = manager.perform_health_checks() => {}
                }
                manager.health_check_interval()
            }
            None => break,
        };

        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(interval.max(Duration::from_millis(10))) => {}
        }
    }

    info!("Stopped cluster health monitoring");
}
