//! Engine metrics — counters and gauges updated by the reconciler.
//!
//! Counters are lock-free atomics; per-resource gauges live behind an
//! `RwLock`ed map keyed by resource id.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::RwLock;

use capscale_core::ScaleDirection;

/// How a single reconciliation pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// Completed end to end (with or without a scaling action).
    Succeeded,
    /// Aborted on a retryable collaborator failure.
    Transient,
    /// The capacity mutator refused the requested node count.
    Permanent,
    /// The spec failed validation.
    Invalid,
    /// The status write lost a race with a newer spec generation.
    Conflict,
    /// Another pass for the same key was already running.
    Busy,
}

/// Latest observed values for one resource.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceGauges {
    pub current_nodes: u32,
    pub desired_nodes: u32,
    pub utilization_percent: f64,
}

/// Point-in-time copy of every engine metric.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineSnapshot {
    pub passes_succeeded: u64,
    pub passes_transient: u64,
    pub passes_permanent: u64,
    pub passes_invalid: u64,
    pub passes_conflict: u64,
    pub passes_busy: u64,
    pub scale_ups: u64,
    pub scale_downs: u64,
    /// Sorted by resource id.
    pub resources: Vec<(String, ResourceGauges)>,
}

/// Shared engine metrics.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    passes_succeeded: AtomicU64,
    passes_transient: AtomicU64,
    passes_permanent: AtomicU64,
    passes_invalid: AtomicU64,
    passes_conflict: AtomicU64,
    passes_busy: AtomicU64,
    scale_ups: AtomicU64,
    scale_downs: AtomicU64,
    resources: RwLock<BTreeMap<String, ResourceGauges>>,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a finished pass.
    pub fn record_pass(&self, outcome: PassOutcome) {
        let counter = match outcome {
            PassOutcome::Succeeded => &self.passes_succeeded,
            PassOutcome::Transient => &self.passes_transient,
            PassOutcome::Permanent => &self.passes_permanent,
            PassOutcome::Invalid => &self.passes_invalid,
            PassOutcome::Conflict => &self.passes_conflict,
            PassOutcome::Busy => &self.passes_busy,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Count an applied scaling action.
    pub fn record_scale(&self, direction: ScaleDirection) {
        match direction {
            ScaleDirection::Up => self.scale_ups.fetch_add(1, Ordering::Relaxed),
            ScaleDirection::Down => self.scale_downs.fetch_add(1, Ordering::Relaxed),
            ScaleDirection::None => return,
        };
    }

    /// Update the gauges for a resource.
    pub async fn set_resource(&self, id: &str, gauges: ResourceGauges) {
        self.resources.write().await.insert(id.to_string(), gauges);
    }

    /// Drop the gauges of a deleted resource.
    pub async fn remove_resource(&self, id: &str) {
        self.resources.write().await.remove(id);
    }

    pub async fn snapshot(&self) -> EngineSnapshot {
        let resources = self.resources.read().await;
        EngineSnapshot {
            passes_succeeded: self.passes_succeeded.load(Ordering::Relaxed),
            passes_transient: self.passes_transient.load(Ordering::Relaxed),
            passes_permanent: self.passes_permanent.load(Ordering::Relaxed),
            passes_invalid: self.passes_invalid.load(Ordering::Relaxed),
            passes_conflict: self.passes_conflict.load(Ordering::Relaxed),
            passes_busy: self.passes_busy.load(Ordering::Relaxed),
            scale_ups: self.scale_ups.load(Ordering::Relaxed),
            scale_downs: self.scale_downs.load(Ordering::Relaxed),
            resources: resources
                .iter()
                .map(|(id, g)| (id.clone(), g.clone()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn counters_accumulate() {
        let metrics = EngineMetrics::new();
        metrics.record_pass(PassOutcome::Succeeded);
        metrics.record_pass(PassOutcome::Succeeded);
        metrics.record_pass(PassOutcome::Transient);
        metrics.record_pass(PassOutcome::Busy);
        metrics.record_scale(ScaleDirection::Up);
        metrics.record_scale(ScaleDirection::None);

        let snap = metrics.snapshot().await;
        assert_eq!(snap.passes_succeeded, 2);
        assert_eq!(snap.passes_transient, 1);
        assert_eq!(snap.passes_busy, 1);
        assert_eq!(snap.scale_ups, 1);
        assert_eq!(snap.scale_downs, 0);
    }

    #[tokio::test]
    async fn gauges_are_per_resource_and_sorted() {
        let metrics = EngineMetrics::new();
        let gauges = ResourceGauges {
            current_nodes: 3,
            desired_nodes: 4,
            utilization_percent: 71.0,
        };
        metrics.set_resource("b", gauges.clone()).await;
        metrics.set_resource("a", ResourceGauges::default()).await;

        let snap = metrics.snapshot().await;
        let ids: Vec<&str> = snap.resources.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(snap.resources[1].1, gauges);

        metrics.remove_resource("a").await;
        assert_eq!(metrics.snapshot().await.resources.len(), 1);
    }
}
