//! In-memory capacity simulator.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::info;

use capscale_core::{CapacityMutator, CollaboratorError, CollaboratorResult};

use crate::error::CapacityError;

#[derive(Debug, Default)]
struct Inner {
    nodes: HashMap<String, u32>,
    /// Errors returned by upcoming `get_node_count` calls, oldest first.
    get_failures: VecDeque<CollaboratorError>,
    /// Errors returned by upcoming `set_node_count` calls, oldest first.
    set_failures: VecDeque<CollaboratorError>,
    set_calls: Vec<(String, u32)>,
}

/// Capacity mutator that keeps node counts in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCapacity {
    inner: Arc<Mutex<Inner>>,
    /// Node count reported for ids never seen before.
    default_nodes: Option<u32>,
    /// Largest node count `set_node_count` accepts.
    quota: Option<u32>,
}

impl InMemoryCapacity {
    /// Empty simulator; unknown ids are `NotFound`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `nodes` for ids that were never set.
    pub fn with_default_nodes(mut self, nodes: u32) -> Self {
        self.default_nodes = Some(nodes);
        self
    }

    /// Refuse node counts above `quota` with a permanent error.
    pub fn with_quota(mut self, quota: u32) -> Self {
        self.quota = Some(quota);
        self
    }

    /// Set the node count of an instance directly.
    pub async fn insert(&self, id: &str, nodes: u32) {
        self.inner.lock().await.nodes.insert(id.to_string(), nodes);
    }

    /// Current node count, if known.
    pub async fn nodes(&self, id: &str) -> Option<u32> {
        self.inner.lock().await.nodes.get(id).copied()
    }

    /// Fail the next `get_node_count` with `err`.
    pub async fn fail_next_get(&self, err: CollaboratorError) {
        self.inner.lock().await.get_failures.push_back(err);
    }

    /// Fail the next `set_node_count` with `err`.
    pub async fn fail_next_set(&self, err: CollaboratorError) {
        self.inner.lock().await.set_failures.push_back(err);
    }

    /// Every `set_node_count` that was accepted, in order.
    pub async fn set_calls(&self) -> Vec<(String, u32)> {
        self.inner.lock().await.set_calls.clone()
    }
}

#[async_trait]
impl CapacityMutator for InMemoryCapacity {
    async fn get_node_count(&self, id: &str) -> CollaboratorResult<u32> {
        let mut inner = self.inner.lock().await;
        if let Some(err) = inner.get_failures.pop_front() {
            return Err(err);
        }
        inner
            .nodes
            .get(id)
            .copied()
            .or(self.default_nodes)
            .ok_or_else(|| CapacityError::UnknownResource(id.to_string()).into())
    }

    async fn set_node_count(&self, id: &str, nodes: u32) -> CollaboratorResult<()> {
        let mut inner = self.inner.lock().await;
        if let Some(err) = inner.set_failures.pop_front() {
            return Err(err);
        }
        if let Some(quota) = self.quota
            && nodes > quota
        {
            return Err(CapacityError::QuotaExceeded {
                requested: nodes,
                quota,
            }
            .into());
        }
        info!(resource = %id, nodes, "simulated capacity change");
        inner.nodes.insert(id.to_string(), nodes);
        inner.set_calls.push((id.to_string(), nodes));
        Ok(())
    }
}
