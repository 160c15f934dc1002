//! Sample pruner — background deletion of expired utilization samples.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use capscale_core::epoch_secs;
use capscale_state::{StateResult, StateStore};

/// Periodically deletes samples older than the retention period.
pub struct SamplePruner {
    state: StateStore,
    retention: Duration,
    interval: Duration,
}

impl SamplePruner {
    pub fn new(state: StateStore, retention: Duration, interval: Duration) -> Self {
        Self {
            state,
            retention,
            interval,
        }
    }

    /// Delete samples older than `now - retention`. Returns the count removed.
    pub fn prune_at(&self, now: u64) -> StateResult<u32> {
        let cutoff = now.saturating_sub(self.retention.as_secs());
        self.state.prune_samples_before(cutoff)
    }

    /// Run the prune loop until shutdown signal.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            retention_secs = self.retention.as_secs(),
            interval_secs = self.interval.as_secs(),
            "sample pruner started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    match self.prune_at(epoch_secs()) {
                        Ok(0) => {}
                        Ok(removed) => debug!(removed, "expired samples pruned"),
                        Err(e) => warn!(error = %e, "sample prune failed"),
                    }
                }
                _ = shutdown.changed() => {
                    info!("sample pruner shutting down");
                    break;
                }
            }
        }
    }
}
