use anyhow::Result;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::jobs::WorkOrderJobs;

/// Graceful shutdown for processes following scrape jobs.
///
/// Shutting down only stops observing: backend jobs keep running and their
/// markers stay, so the next `resume` picks them up.
pub struct ShutdownCoordinator {
    drain_timeout: Duration,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl ShutdownCoordinator {
    pub fn new(drain_timeout: Duration) -> Self {
        Self { drain_timeout }
    }

    /// Wait for Ctrl-C
    pub async fn wait_for_signal() -> Result<()> {
        tokio::signal::ctrl_c().await?;
        info!("Interrupt received");
        Ok(())
    }

    /// Unmount every job of the owner, then wait for in-flight status fetches
    /// to settle so their connections close cleanly.
    pub async fn shutdown(&self, jobs: &WorkOrderJobs) -> Result<()> {
        info!(owner_id = jobs.owner_id(), "Stopping job observation");
        jobs.unmount();

        let drained = timeout(self.drain_timeout, async {
            while jobs
                .guard()
                .machines_for(jobs.owner_id())
                .any(|m| m.poller().is_fetching())
            {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await;

        if drained.is_err() {
            warn!("Timeout waiting for in-flight status requests, exiting anyway");
        }
        info!("Shutdown complete; backend jobs keep running");
        Ok(())
    }
}
