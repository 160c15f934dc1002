//! Contracts the reconciliation engine consumes from its collaborators.
//!
//! Each collaborator is expected to be backed by a remote API in a
//! deployed system; the engine only sees these traits and the error
//! taxonomy below.

use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::types::{ResourceId, ResourceSpec, ResourceStatus};

/// Errors a collaborator can report, classified by how the engine reacts.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CollaboratorError {
    /// The named resource does not exist on the collaborator's side.
    #[error("not found: {0}")]
    NotFound(String),

    /// A write lost a race with a newer spec update.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Network, timeout, or rate-limit failure. Safe to retry later.
    #[error("transient failure: {0}")]
    Transient(String),

    /// The request was understood and refused (e.g. quota exceeded).
    #[error("permanent failure: {0}")]
    Permanent(String),
}

pub type CollaboratorResult<T> = Result<T, CollaboratorError>;

/// The declared desired state of every resource, plus its persisted status.
#[async_trait]
pub trait DesiredStateStore: Send + Sync {
    /// Fetch the spec for a resource.
    async fn get_spec(&self, id: &str) -> CollaboratorResult<ResourceSpec>;

    /// Fetch the last persisted status, if any.
    async fn get_status(&self, id: &str) -> CollaboratorResult<Option<ResourceStatus>>;

    /// Persist a status. Fails with `Conflict` when the spec generation has
    /// moved past `status.observed_generation`.
    async fn write_status(&self, id: &str, status: &ResourceStatus) -> CollaboratorResult<()>;

    /// All resource ids currently declared.
    async fn list_resources(&self) -> CollaboratorResult<Vec<ResourceId>>;

    /// Change notifications. Delivery is at-least-once and may drop under
    /// load (a lagged receiver); callers compensate with periodic resync.
    fn subscribe(&self) -> broadcast::Receiver<ResourceId>;
}

/// A utilization reading returned by a metric source.
#[derive(Debug, Clone, PartialEq)]
pub struct UtilizationReading {
    /// Utilization in percent (0–100).
    pub percent: f64,
    pub sampled_at: SystemTime,
}

/// Supplies utilization samples for resources.
#[async_trait]
pub trait MetricSource: Send + Sync {
    /// Utilization of `id` over the `window` ending now.
    async fn sample_utilization(
        &self,
        id: &str,
        window: Duration,
    ) -> CollaboratorResult<UtilizationReading>;
}

/// Reads and applies node counts on the managed resource.
#[async_trait]
pub trait CapacityMutator: Send + Sync {
    async fn get_node_count(&self, id: &str) -> CollaboratorResult<u32>;

    async fn set_node_count(&self, id: &str, nodes: u32) -> CollaboratorResult<()>;
}

/// Outcome categories for emitted events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    Scaled,
    Unchanged,
    Invalid,
    Rejected,
    Failed,
}

impl EventOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventOutcome::Scaled => "scaled",
            EventOutcome::Unchanged => "unchanged",
            EventOutcome::Invalid => "invalid",
            EventOutcome::Rejected => "rejected",
            EventOutcome::Failed => "failed",
        }
    }
}

/// Fire-and-forget sink for reconciliation events.
pub trait EventSink: Send + Sync {
    fn emit(&self, id: &str, outcome: EventOutcome, message: &str);
}

/// Sink that drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit(&self, _id: &str, _outcome: EventOutcome, _message: &str) {}
}
