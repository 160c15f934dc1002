//! Store-backed metric source.
//!
//! Utilization samples are pushed into the state store (via the REST API
//! or a collector agent); the engine reads the mean over the sampling
//! window ending now.

use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tracing::debug;

use capscale_core::{
    CollaboratorError, CollaboratorResult, MetricSource, UtilizationReading, epoch_secs_of,
    system_time_from_secs,
};
use capscale_state::StateStore;

/// `MetricSource` reading utilization samples from the state store.
#[derive(Clone)]
pub struct StoreMetricSource {
    state: StateStore,
}

impl StoreMetricSource {
    pub fn new(state: StateStore) -> Self {
        Self { state }
    }

    /// Mean utilization over `[now - window, now]`.
    ///
    /// Fails with `NotFound` when the window holds no samples; the
    /// reading's timestamp is that of the newest sample.
    pub fn sample_at(
        &self,
        id: &str,
        window: Duration,
        now: SystemTime,
    ) -> CollaboratorResult<UtilizationReading> {
        let to = epoch_secs_of(now);
        let from = to.saturating_sub(window.as_secs());
        let samples = self
            .state
            .list_samples_between(id, from, to)
            .map_err(CollaboratorError::from)?;

        let Some(newest) = samples.last() else {
            let stale = match self.state.latest_sample(id).map_err(CollaboratorError::from)? {
                Some(sample) => format!("newest sample at {}", sample.sampled_at),
                None => String::from("none recorded"),
            };
            return Err(CollaboratorError::NotFound(format!(
                "no utilization samples for {id} in the last {}s ({stale})",
                window.as_secs()
            )));
        };

        let sum: f64 = samples.iter().map(|s| s.utilization_percent).sum();
        let percent = sum / samples.len() as f64;
        debug!(
            resource = %id,
            samples = samples.len(),
            from,
            to,
            percent,
            "utilization sampled"
        );

        Ok(UtilizationReading {
            percent,
            sampled_at: system_time_from_secs(newest.sampled_at),
        })
    }
}

#[async_trait]
impl MetricSource for StoreMetricSource {
    async fn sample_utilization(
        &self,
        id: &str,
        window: Duration,
    ) -> CollaboratorResult<UtilizationReading> {
        self.sample_at(id, window, SystemTime::now())
    }
}
