//! `DesiredStateStore` implementation for the redb-backed store.
//!
//! redb calls are synchronous and short; they run inline on the calling
//! task the same way the API handlers use the store.

use async_trait::async_trait;
use tokio::sync::broadcast;

use capscale_core::{
    CollaboratorError, CollaboratorResult, DesiredStateStore, ResourceId, ResourceSpec,
    ResourceStatus,
};

use crate::error::StateError;
use crate::store::StateStore;

impl From<StateError> for CollaboratorError {
    fn from(e: StateError) -> Self {
        match e {
            StateError::NotFound(id) => CollaboratorError::NotFound(id),
            StateError::Conflict { .. } => CollaboratorError::Conflict(e.to_string()),
            other => CollaboratorError::Transient(other.to_string()),
        }
    }
}

#[async_trait]
impl DesiredStateStore for StateStore {
    async fn get_spec(&self, id: &str) -> CollaboratorResult<ResourceSpec> {
        StateStore::get_spec(self, id)?.ok_or_else(|| CollaboratorError::NotFound(id.to_string()))
    }

    async fn get_status(&self, id: &str) -> CollaboratorResult<Option<ResourceStatus>> {
        Ok(StateStore::get_status(self, id)?)
    }

    async fn write_status(&self, id: &str, status: &ResourceStatus) -> CollaboratorResult<()> {
        Ok(self.put_status(id, status)?)
    }

    async fn list_resources(&self) -> CollaboratorResult<Vec<ResourceId>> {
        Ok(self.list_resource_ids()?)
    }

    fn subscribe(&self) -> broadcast::Receiver<ResourceId> {
        StateStore::subscribe(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> StateStore {
        StateStore::open_in_memory().unwrap()
    }

    #[tokio::test]
    async fn missing_spec_maps_to_not_found() {
        let store = store();
        let desired: &dyn DesiredStateStore = &store;
        let err = desired.get_spec("ghost").await.unwrap_err();
        assert_eq!(err, CollaboratorError::NotFound("ghost".to_string()));
    }

    #[tokio::test]
    async fn stale_status_write_maps_to_conflict() {
        let store = store();
        store
            .put_spec(&ResourceSpec::new("db-1", 1, 5, 50.0))
            .unwrap();
        store
            .put_spec(&ResourceSpec::new("db-1", 1, 6, 50.0))
            .unwrap();

        let desired: &dyn DesiredStateStore = &store;
        let stale = ResourceStatus {
            observed_generation: 1,
            ..ResourceStatus::default()
        };
        let err = desired.write_status("db-1", &stale).await.unwrap_err();
        assert!(matches!(err, CollaboratorError::Conflict(_)));

        let fresh = ResourceStatus {
            observed_generation: 2,
            current_nodes: Some(3),
            ..ResourceStatus::default()
        };
        desired.write_status("db-1", &fresh).await.unwrap();
        assert_eq!(desired.get_status("db-1").await.unwrap(), Some(fresh));
    }

    #[tokio::test]
    async fn list_and_subscribe_go_through_the_trait() {
        let store = store();
        let desired: &dyn DesiredStateStore = &store;
        let mut rx = desired.subscribe();

        store
            .put_spec(&ResourceSpec::new("db-1", 1, 5, 50.0))
            .unwrap();

        assert_eq!(desired.list_resources().await.unwrap(), vec!["db-1"]);
        assert_eq!(rx.recv().await.unwrap(), "db-1");
    }

    #[test]
    fn storage_failures_are_transient() {
        let err: CollaboratorError = StateError::Transaction("disk full".into()).into();
        assert!(matches!(err, CollaboratorError::Transient(_)));
    }
}
