//! StateStore — redb-backed desired-state persistence.
//!
//! Provides typed operations over resource specs, statuses, and
//! utilization samples. All values are JSON-serialized into redb's
//! `&[u8]` value columns. The store supports both on-disk and in-memory
//! backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tokio::sync::broadcast;
use tracing::debug;

use capscale_core::{ResourceId, ResourceSpec, ResourceStatus, UtilizationSample, epoch_secs};

use crate::error::{StateError, StateResult};
use crate::tables::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Capacity of the change-notification channel. Slow subscribers lag
/// and are expected to resync.
const NOTIFY_CAPACITY: usize = 1024;

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
    notify_tx: broadcast::Sender<ResourceId>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self::from_database(db);
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self::from_database(db);
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    fn from_database(db: Database) -> Self {
        let (notify_tx, _) = broadcast::channel(NOTIFY_CAPACITY);
        Self {
            db: Arc::new(db),
            notify_tx,
        }
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(RESOURCES).map_err(map_err!(Table))?;
        txn.open_table(STATUSES).map_err(map_err!(Table))?;
        txn.open_table(SAMPLES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Notifications ──────────────────────────────────────────────

    /// Subscribe to resource change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<ResourceId> {
        self.notify_tx.subscribe()
    }

    /// Publish a change notification for a resource without modifying it.
    pub fn notify(&self, id: &str) {
        // No subscribers is fine; the periodic resync covers it.
        let _ = self.notify_tx.send(id.to_string());
    }

    // ── Specs ──────────────────────────────────────────────────────

    /// Insert or update a resource spec.
    ///
    /// The stored spec gets the next generation number and fresh
    /// timestamps; the returned value is exactly what was persisted.
    pub fn put_spec(&self, spec: &ResourceSpec) -> StateResult<ResourceSpec> {
        let now = epoch_secs();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let stored;
        {
            let mut table = txn.open_table(RESOURCES).map_err(map_err!(Table))?;
            let existing: Option<ResourceSpec> = match table
                .get(spec.id.as_str())
                .map_err(map_err!(Read))?
            {
                Some(guard) => {
                    Some(serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?)
                }
                None => None,
            };

            let mut next = spec.clone();
            match existing {
                Some(prev) => {
                    next.generation = prev.generation + 1;
                    next.created_at = prev.created_at;
                }
                None => {
                    next.generation = 1;
                    next.created_at = now;
                }
            }
            next.updated_at = now;

            let value = serde_json::to_vec(&next).map_err(map_err!(Serialize))?;
            table
                .insert(next.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
            stored = next;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(resource = %stored.id, generation = stored.generation, "spec stored");
        self.notify(&stored.id);
        Ok(stored)
    }

    /// Get a resource spec by id.
    pub fn get_spec(&self, id: &str) -> StateResult<Option<ResourceSpec>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(RESOURCES).map_err(map_err!(Table))?;
        match table.get(id).map_err(map_err!(Read))? {
            Some(guard) => {
                let spec: ResourceSpec =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(spec))
            }
            None => Ok(None),
        }
    }

    /// List all resource specs.
    pub fn list_specs(&self) -> StateResult<Vec<ResourceSpec>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(RESOURCES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let spec: ResourceSpec =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(spec);
        }
        Ok(results)
    }

    /// List the ids of all declared resources.
    pub fn list_resource_ids(&self) -> StateResult<Vec<ResourceId>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(RESOURCES).map_err(map_err!(Table))?;
        let mut ids = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, _) = entry.map_err(map_err!(Read))?;
            ids.push(key.value().to_string());
        }
        Ok(ids)
    }

    /// Delete a resource spec together with its status and samples.
    /// Returns true if the spec existed.
    pub fn delete_spec(&self, id: &str) -> StateResult<bool> {
        let sample_keys = self.sample_keys_for(id)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(RESOURCES).map_err(map_err!(Table))?;
            existed = table.remove(id).map_err(map_err!(Write))?.is_some();
        }
        {
            let mut table = txn.open_table(STATUSES).map_err(map_err!(Table))?;
            table.remove(id).map_err(map_err!(Write))?;
        }
        {
            let mut table = txn.open_table(SAMPLES).map_err(map_err!(Table))?;
            for key in &sample_keys {
                table.remove(key.as_str()).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(resource = %id, existed, samples = sample_keys.len(), "spec deleted");
        if existed {
            self.notify(id);
        }
        Ok(existed)
    }

    // ── Status ─────────────────────────────────────────────────────

    /// Persist a status for a resource.
    ///
    /// Rejected with `NotFound` if the spec is gone, and with `Conflict`
    /// if the spec generation differs from `status.observed_generation`.
    pub fn put_status(&self, id: &str, status: &ResourceStatus) -> StateResult<()> {
        let value = serde_json::to_vec(status).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let specs = txn.open_table(RESOURCES).map_err(map_err!(Table))?;
            let current = match specs.get(id).map_err(map_err!(Read))? {
                Some(guard) => {
                    let spec: ResourceSpec =
                        serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                    spec.generation
                }
                None => return Err(StateError::NotFound(id.to_string())),
            };
            if current != status.observed_generation {
                return Err(StateError::Conflict {
                    id: id.to_string(),
                    observed: status.observed_generation,
                    current,
                });
            }
        }
        {
            let mut table = txn.open_table(STATUSES).map_err(map_err!(Table))?;
            table
                .insert(id, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Get the persisted status of a resource.
    pub fn get_status(&self, id: &str) -> StateResult<Option<ResourceStatus>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(STATUSES).map_err(map_err!(Table))?;
        match table.get(id).map_err(map_err!(Read))? {
            Some(guard) => {
                let status: ResourceStatus =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(status))
            }
            None => Ok(None),
        }
    }

    // ── Samples ────────────────────────────────────────────────────

    /// Insert a utilization sample. A second sample with the same
    /// timestamp replaces the first.
    pub fn put_sample(&self, sample: &UtilizationSample) -> StateResult<()> {
        let key = sample.table_key();
        let value = serde_json::to_vec(sample).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(SAMPLES).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Samples for a resource with `from <= sampled_at <= to`, oldest first.
    pub fn list_samples_between(
        &self,
        resource_id: &str,
        from: u64,
        to: u64,
    ) -> StateResult<Vec<UtilizationSample>> {
        if from > to {
            return Ok(Vec::new());
        }
        let start = format!("{resource_id}:{from:020}");
        let end = format!("{resource_id}:{to:020}");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SAMPLES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table
            .range(start.as_str()..=end.as_str())
            .map_err(map_err!(Read))?
        {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if !is_sample_key_of(resource_id, key.value()) {
                continue;
            }
            let sample: UtilizationSample =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(sample);
        }
        Ok(results)
    }

    /// Most recent sample for a resource, if any.
    pub fn latest_sample(&self, resource_id: &str) -> StateResult<Option<UtilizationSample>> {
        let (start, end) = sample_key_bounds(resource_id);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SAMPLES).map_err(map_err!(Table))?;
        for entry in table
            .range(start.as_str()..=end.as_str())
            .map_err(map_err!(Read))?
            .rev()
        {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if is_sample_key_of(resource_id, key.value()) {
                let sample: UtilizationSample =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                return Ok(Some(sample));
            }
        }
        Ok(None)
    }

    /// Delete every sample older than `cutoff` (epoch seconds).
    /// Returns the number of samples removed.
    pub fn prune_samples_before(&self, cutoff: u64) -> StateResult<u32> {
        // Collect keys in a read transaction first.
        let keys: Vec<String> = {
            let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
            let table = txn.open_table(SAMPLES).map_err(map_err!(Table))?;
            let mut keys = Vec::new();
            for entry in table.iter().map_err(map_err!(Read))? {
                let (key, value) = entry.map_err(map_err!(Read))?;
                let sample: UtilizationSample =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                if sample.sampled_at < cutoff {
                    keys.push(key.value().to_string());
                }
            }
            keys
        };
        if keys.is_empty() {
            return Ok(0);
        }
        // Delete in a write transaction.
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let count = keys.len() as u32;
        {
            let mut table = txn.open_table(SAMPLES).map_err(map_err!(Table))?;
            for key in &keys {
                table.remove(key.as_str()).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(count, cutoff, "utilization samples pruned");
        Ok(count)
    }

    fn sample_keys_for(&self, resource_id: &str) -> StateResult<Vec<String>> {
        let (start, end) = sample_key_bounds(resource_id);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SAMPLES).map_err(map_err!(Table))?;
        let mut keys = Vec::new();
        for entry in table
            .range(start.as_str()..=end.as_str())
            .map_err(map_err!(Read))?
        {
            let (key, _) = entry.map_err(map_err!(Read))?;
            if is_sample_key_of(resource_id, key.value()) {
                keys.push(key.value().to_string());
            }
        }
        Ok(keys)
    }
}

/// First and last possible sample keys for a resource.
fn sample_key_bounds(resource_id: &str) -> (String, String) {
    (
        format!("{resource_id}:{:020}", 0u64),
        format!("{resource_id}:{:020}", u64::MAX),
    )
}

/// Whether `key` is `"{resource_id}:{timestamp:020}"`.
///
/// Range bounds alone are not enough: ids may contain `:`, so the samples
/// of `db:0` sort inside the key range of `db`.
fn is_sample_key_of(resource_id: &str, key: &str) -> bool {
    key.strip_prefix(resource_id)
        .and_then(|rest| rest.strip_prefix(':'))
        .is_some_and(|ts| ts.len() == 20 && ts.bytes().all(|b| b.is_ascii_digit()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use capscale_core::{ConditionType, LastDecision};

    fn test_spec(id: &str) -> ResourceSpec {
        ResourceSpec::new(id, 1, 10, 50.0)
    }

    fn test_sample(id: &str, at: u64, pct: f64) -> UtilizationSample {
        UtilizationSample {
            resource_id: id.to_string(),
            utilization_percent: pct,
            sampled_at: at,
        }
    }

    // ── Spec CRUD ──────────────────────────────────────────────────

    #[test]
    fn spec_put_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let stored = store.put_spec(&test_spec("db-1")).unwrap();

        assert_eq!(stored.generation, 1);
        assert!(stored.created_at > 0);
        assert_eq!(store.get_spec("db-1").unwrap(), Some(stored));
    }

    #[test]
    fn spec_get_nonexistent_returns_none() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(store.get_spec("nope").unwrap().is_none());
    }

    #[test]
    fn spec_update_bumps_generation() {
        let store = StateStore::open_in_memory().unwrap();
        let first = store.put_spec(&test_spec("db-1")).unwrap();

        let mut spec = test_spec("db-1");
        spec.max_nodes = 20;
        // A caller-supplied generation is ignored.
        spec.generation = 99;
        let second = store.put_spec(&spec).unwrap();

        assert_eq!(second.generation, 2);
        assert_eq!(second.created_at, first.created_at);
        assert_eq!(store.get_spec("db-1").unwrap().unwrap().max_nodes, 20);
    }

    #[test]
    fn spec_list_and_ids() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_spec(&test_spec("a")).unwrap();
        store.put_spec(&test_spec("b")).unwrap();
        store.put_spec(&test_spec("c")).unwrap();

        assert_eq!(store.list_specs().unwrap().len(), 3);
        assert_eq!(store.list_resource_ids().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn spec_delete_removes_status_and_samples() {
        let store = StateStore::open_in_memory().unwrap();
        let spec = store.put_spec(&test_spec("db-1")).unwrap();
        store
            .put_status(
                "db-1",
                &ResourceStatus {
                    observed_generation: spec.generation,
                    ..ResourceStatus::default()
                },
            )
            .unwrap();
        store.put_sample(&test_sample("db-1", 100, 40.0)).unwrap();
        store.put_sample(&test_sample("db-10", 100, 40.0)).unwrap();

        assert!(store.delete_spec("db-1").unwrap());
        assert!(!store.delete_spec("db-1").unwrap());
        assert!(store.get_spec("db-1").unwrap().is_none());
        assert!(store.get_status("db-1").unwrap().is_none());
        assert!(store.latest_sample("db-1").unwrap().is_none());
        // A resource whose id shares the prefix is untouched.
        assert!(store.latest_sample("db-10").unwrap().is_some());
    }

    // ── Status ─────────────────────────────────────────────────────

    #[test]
    fn status_round_trip() {
        let store = StateStore::open_in_memory().unwrap();
        let spec = store.put_spec(&test_spec("db-1")).unwrap();

        let mut status = ResourceStatus {
            observed_generation: spec.generation,
            current_nodes: Some(3),
            desired_nodes: Some(4),
            current_utilization_percent: Some(72.5),
            last_decision: Some(LastDecision::ScaleTo { from: 3, to: 4 }),
            ..ResourceStatus::default()
        };
        status.set_condition(ConditionType::Ready, true, "Reconciled", "ok", 10);

        store.put_status("db-1", &status).unwrap();
        assert_eq!(store.get_status("db-1").unwrap(), Some(status));
    }

    #[test]
    fn status_for_stale_generation_conflicts() {
        let store = StateStore::open_in_memory().unwrap();
        let first = store.put_spec(&test_spec("db-1")).unwrap();
        store.put_spec(&test_spec("db-1")).unwrap();

        let status = ResourceStatus {
            observed_generation: first.generation,
            ..ResourceStatus::default()
        };
        let err = store.put_status("db-1", &status).unwrap_err();
        assert!(matches!(
            err,
            StateError::Conflict {
                observed: 1,
                current: 2,
                ..
            }
        ));
        assert!(store.get_status("db-1").unwrap().is_none());
    }

    #[test]
    fn status_for_missing_spec_is_not_found() {
        let store = StateStore::open_in_memory().unwrap();
        let err = store
            .put_status("ghost", &ResourceStatus::default())
            .unwrap_err();
        assert!(matches!(err, StateError::NotFound(_)));
    }

    // ── Samples ────────────────────────────────────────────────────

    #[test]
    fn samples_between_is_inclusive_and_ordered() {
        let store = StateStore::open_in_memory().unwrap();
        for (at, pct) in [(1000u64, 10.0), (1030, 20.0), (1060, 30.0), (1090, 40.0)] {
            store.put_sample(&test_sample("db-1", at, pct)).unwrap();
        }
        store.put_sample(&test_sample("db-2", 1030, 99.0)).unwrap();

        let window = store.list_samples_between("db-1", 1030, 1060).unwrap();
        let values: Vec<f64> = window.iter().map(|s| s.utilization_percent).collect();
        assert_eq!(values, vec![20.0, 30.0]);

        assert!(store.list_samples_between("db-1", 2000, 1000).unwrap().is_empty());
    }

    #[test]
    fn latest_sample_picks_newest() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_sample(&test_sample("db-1", 1060, 30.0)).unwrap();
        store.put_sample(&test_sample("db-1", 1000, 10.0)).unwrap();
        store.put_sample(&test_sample("db-1", 9999, 55.0)).unwrap();

        let latest = store.latest_sample("db-1").unwrap().unwrap();
        assert_eq!(latest.sampled_at, 9999);
        assert!(store.latest_sample("other").unwrap().is_none());
    }

    #[test]
    fn colon_ids_do_not_share_samples() {
        let store = StateStore::open_in_memory().unwrap();
        for id in ["db", "db:1", "db:0"] {
            store.put_spec(&test_spec(id)).unwrap();
        }
        store.put_sample(&test_sample("db:1", 1000, 10.0)).unwrap();
        store.put_sample(&test_sample("db:0", 500, 20.0)).unwrap();

        assert!(store.latest_sample("db").unwrap().is_none());
        assert!(store.list_samples_between("db", 0, u64::MAX).unwrap().is_empty());

        assert!(store.delete_spec("db").unwrap());
        let kept = store.latest_sample("db:1").unwrap().unwrap();
        assert_eq!(kept.sampled_at, 1000);
        assert_eq!(store.list_samples_between("db:1", 0, u64::MAX).unwrap().len(), 1);
        assert_eq!(store.list_samples_between("db:0", 0, u64::MAX).unwrap().len(), 1);
    }

    #[test]
    fn prune_drops_only_old_samples() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_sample(&test_sample("db-1", 100, 1.0)).unwrap();
        store.put_sample(&test_sample("db-1", 200, 2.0)).unwrap();
        store.put_sample(&test_sample("db-2", 150, 3.0)).unwrap();
        store.put_sample(&test_sample("db-2", 300, 4.0)).unwrap();

        assert_eq!(store.prune_samples_before(200).unwrap(), 2);
        assert_eq!(store.list_samples_between("db-1", 0, 1000).unwrap().len(), 1);
        assert_eq!(store.list_samples_between("db-2", 0, 1000).unwrap().len(), 1);
        assert_eq!(store.prune_samples_before(200).unwrap(), 0);
    }

    // ── Notifications ──────────────────────────────────────────────

    #[tokio::test]
    async fn spec_writes_publish_notifications() {
        let store = StateStore::open_in_memory().unwrap();
        let mut rx = store.subscribe();

        store.put_spec(&test_spec("db-1")).unwrap();
        store.notify("db-2");
        store.delete_spec("db-1").unwrap();
        // Deleting a missing spec publishes nothing.
        store.delete_spec("db-1").unwrap();

        assert_eq!(rx.recv().await.unwrap(), "db-1");
        assert_eq!(rx.recv().await.unwrap(), "db-2");
        assert_eq!(rx.recv().await.unwrap(), "db-1");
        assert!(rx.try_recv().is_err());
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            store.put_spec(&test_spec("prod-db")).unwrap();
        }

        // Reopen the same database file.
        let store = StateStore::open(&db_path).unwrap();
        let spec = store.get_spec("prod-db").unwrap().unwrap();
        assert_eq!(spec.generation, 1);
        assert_eq!(spec.max_nodes, 10);
    }

    #[test]
    fn empty_store_operations() {
        let store = StateStore::open_in_memory().unwrap();

        assert!(store.list_specs().unwrap().is_empty());
        assert!(store.list_resource_ids().unwrap().is_empty());
        assert!(store.get_status("any").unwrap().is_none());
        assert!(store.latest_sample("any").unwrap().is_none());
        assert!(!store.delete_spec("nope").unwrap());
        assert_eq!(store.prune_samples_before(u64::MAX).unwrap(), 0);
    }
}
