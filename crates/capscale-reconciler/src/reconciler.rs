//! Reconciler — one fetch → decide → apply → persist pass per resource.
//!
//! The `Reconciler` owns the `ReconciliationRecord` of every resource it
//! has seen. A pass checks the record out under the single-flight guard,
//! works on its own copy, and checks it back in when it ends, so a record
//! is only ever touched by one pass at a time.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use capscale_autoscale::{
    BoundLimit, Evaluation, HoldReason, ReconciliationRecord, ScaleDecision, ScalingPolicy,
    evaluate,
};
use capscale_core::{
    CapacityMutator, CollaboratorError, ConditionType, DesiredStateStore, EngineConfig,
    EventOutcome, EventSink, LastDecision, MetricSource, NoopEventSink, ObservedState, ResourceId,
    ResourceSpec, ResourceStatus, epoch_secs_of, system_time_from_secs,
};
use capscale_metrics::{EngineMetrics, PassOutcome, ResourceGauges};

use crate::backoff::Backoff;
use crate::clock::{Clock, SystemClock};
use crate::error::ReconcileError;

/// What the dispatcher should do with a key after a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Run the key again after the delay.
    Requeue(Duration),
    /// Wait for the next notification or periodic resync.
    AwaitChange,
}

/// How a pass ended when it did not fail.
enum PassEnd {
    Completed,
    /// The spec was deleted; forget the resource.
    Deleted,
    /// Spec already rejected at this generation; nothing to do.
    StillInvalid,
}

/// Drives reconciliation passes for every resource.
pub struct Reconciler {
    store: Arc<dyn DesiredStateStore>,
    metric_source: Arc<dyn MetricSource>,
    capacity: Arc<dyn CapacityMutator>,
    events: Arc<dyn EventSink>,
    metrics: Arc<EngineMetrics>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    backoff: Backoff,
    /// Per-resource records: resource_id → record.
    records: Mutex<HashMap<ResourceId, ReconciliationRecord>>,
}

impl Reconciler {
    /// Create a reconciler with a no-op event sink, fresh metrics, and
    /// the system clock.
    pub fn new(
        store: Arc<dyn DesiredStateStore>,
        metric_source: Arc<dyn MetricSource>,
        capacity: Arc<dyn CapacityMutator>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            metric_source,
            capacity,
            events: Arc::new(NoopEventSink),
            metrics: Arc::new(EngineMetrics::new()),
            clock: Arc::new(SystemClock),
            backoff: Backoff::from_config(&config),
            config,
            records: Mutex::new(HashMap::new()),
        }
    }

    /// Set the sink that receives one event per pass.
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Share engine metrics with the caller (e.g. the `/metrics` route).
    pub fn with_metrics(mut self, metrics: Arc<EngineMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Replace the wall clock used for cooldowns.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<EngineMetrics> {
        &self.metrics
    }

    /// Copy of the record for a resource, if one exists.
    pub async fn record(&self, id: &str) -> Option<ReconciliationRecord> {
        self.records.lock().await.get(id).cloned()
    }

    /// Run one pass for `id`.
    ///
    /// Fails with `ReconcileError::Busy` if a pass for the same id is
    /// already running.
    pub async fn reconcile(&self, id: &str) -> Result<Action, ReconcileError> {
        let Some(mut record) = self.check_out(id).await else {
            debug!(resource = %id, "pass already in flight");
            self.metrics.record_pass(PassOutcome::Busy);
            return Err(ReconcileError::Busy);
        };

        let result = self.run_pass(id, &mut record).await;

        match &result {
            Ok(PassEnd::Deleted) => {
                self.records.lock().await.remove(id);
                self.metrics.remove_resource(id).await;
                info!(resource = %id, "resource deleted, record dropped");
            }
            _ => self.check_in(id, record).await,
        }

        match result {
            Ok(PassEnd::Completed) => {
                self.metrics.record_pass(PassOutcome::Succeeded);
                Ok(Action::AwaitChange)
            }
            Ok(PassEnd::Deleted | PassEnd::StillInvalid) => Ok(Action::AwaitChange),
            Err(e) => {
                self.metrics.record_pass(e.outcome());
                Err(e)
            }
        }
    }

    /// Decide how to retry after a failed pass.
    ///
    /// Transient failures back off exponentially on the resource's
    /// consecutive-failure count; everything else waits for the next
    /// change or resync.
    pub async fn error_policy(&self, id: &str, err: &ReconcileError) -> Action {
        match err {
            ReconcileError::Busy => Action::Requeue(self.config.busy_requeue),
            e if e.is_transient() => {
                let failures = self
                    .records
                    .lock()
                    .await
                    .get(id)
                    .map(|r| r.consecutive_failures)
                    .unwrap_or(1);
                Action::Requeue(self.backoff.delay(failures.max(1)))
            }
            _ => Action::AwaitChange,
        }
    }

    async fn check_out(&self, id: &str) -> Option<ReconciliationRecord> {
        let mut records = self.records.lock().await;
        let record = records.entry(id.to_string()).or_default();
        if record.in_flight {
            return None;
        }
        record.in_flight = true;
        Some(record.clone())
    }

    async fn check_in(&self, id: &str, mut record: ReconciliationRecord) {
        record.in_flight = false;
        self.records.lock().await.insert(id.to_string(), record);
    }

    async fn run_pass(
        &self,
        id: &str,
        record: &mut ReconciliationRecord,
    ) -> Result<PassEnd, ReconcileError> {
        // 1. Spec.
        let spec = match self.store.get_spec(id).await {
            Ok(spec) => spec,
            Err(CollaboratorError::NotFound(_)) => return Ok(PassEnd::Deleted),
            Err(source) => {
                return Err(self.transient_failure(
                    id,
                    record,
                    ReconcileError::Fetch {
                        what: "spec",
                        source,
                    },
                ));
            }
        };

        if let Err(source) = spec.validate() {
            if record.invalid_generation == Some(spec.generation) {
                debug!(
                    resource = %id,
                    generation = spec.generation,
                    "spec still invalid, skipping"
                );
                return Ok(PassEnd::StillInvalid);
            }
            return self.reject_invalid(id, &spec, record, source).await;
        }
        record.invalid_generation = None;

        // 2. Observations. Nothing has been changed yet, so any failure
        // here simply aborts the pass.
        let previous = match self.store.get_status(id).await {
            Ok(status) => status.unwrap_or_default(),
            Err(source) => {
                return Err(self.transient_failure(
                    id,
                    record,
                    ReconcileError::Fetch {
                        what: "status",
                        source,
                    },
                ));
            }
        };
        restore_scale_history(record, &previous);

        let current_nodes = match self.capacity.get_node_count(id).await {
            Ok(n) => n,
            Err(source) => {
                return Err(self.transient_failure(
                    id,
                    record,
                    ReconcileError::Fetch {
                        what: "node count",
                        source,
                    },
                ));
            }
        };

        let reading = match self
            .metric_source
            .sample_utilization(id, self.config.sync_period)
            .await
        {
            Ok(r) => r,
            Err(source) => {
                return Err(self.transient_failure(
                    id,
                    record,
                    ReconcileError::Fetch {
                        what: "utilization",
                        source,
                    },
                ));
            }
        };

        let observed = ObservedState {
            current_nodes,
            current_utilization_percent: reading.percent,
            sample_time: reading.sampled_at,
        };

        // 3. Decide.
        let now = self.clock.now();
        let policy =
            ScalingPolicy::from_engine(&self.config).with_overrides(spec.behavior.as_ref());
        let eval = evaluate(&spec, &observed, record, now, &policy);
        debug!(
            resource = %id,
            current = current_nodes,
            utilization = reading.percent,
            target = spec.target_utilization_percent,
            ratio = eval.ratio,
            raw_desired = eval.raw_desired,
            desired = eval.desired,
            hold = eval.hold.map(|h| h.as_str()),
            "evaluated"
        );

        let mut status = previous;
        status.observed_generation = spec.generation;
        status.current_nodes = Some(current_nodes);
        status.current_utilization_percent = Some(reading.percent);
        status.sampled_at = Some(epoch_secs_of(reading.sampled_at));
        let ts = epoch_secs_of(now);
        status.set_condition(ConditionType::SpecValid, true, "Valid", "spec is valid", ts);
        set_limit_condition(&mut status, &eval, ts);

        // 4. Apply.
        let mut rejected = None;
        match eval.decision {
            ScaleDecision::NoOp => {
                status.desired_nodes = Some(current_nodes);
                status.last_decision = Some(LastDecision::NoOp);
            }
            ScaleDecision::ScaleTo(nodes) => match self.capacity.set_node_count(id, nodes).await {
                Ok(()) => {
                    record.note_scaled(current_nodes, nodes, now);
                    self.metrics.record_scale(eval.direction());
                    info!(resource = %id, from = current_nodes, to = nodes, "capacity changed");
                    status.desired_nodes = Some(nodes);
                    status.last_decision = Some(LastDecision::ScaleTo {
                        from: current_nodes,
                        to: nodes,
                    });
                    status.set_condition(
                        ConditionType::CapacityAccepted,
                        true,
                        "Accepted",
                        &format!("capacity set to {nodes} nodes"),
                        ts,
                    );
                }
                Err(CollaboratorError::Permanent(reason)) => {
                    warn!(resource = %id, nodes, %reason, "capacity change rejected");
                    status.desired_nodes = Some(nodes);
                    status.last_decision = Some(LastDecision::NoOp);
                    status.set_condition(
                        ConditionType::CapacityAccepted,
                        false,
                        "Rejected",
                        &reason,
                        ts,
                    );
                    rejected = Some(ReconcileError::Rejected { nodes, reason });
                }
                Err(source) => {
                    // The request may have landed before the failure; hold
                    // the cooldown as if it did.
                    record.note_scaled(current_nodes, nodes, now);
                    return Err(self.transient_failure(
                        id,
                        record,
                        ReconcileError::Apply { nodes, source },
                    ));
                }
            },
        }

        status.last_scale_time = record.last_scale_time.map(epoch_secs_of);
        status.last_scale_direction = record.last_scale_direction;
        match &rejected {
            Some(e) => {
                let message = e.to_string();
                status.set_condition(ConditionType::Ready, false, "CapacityRejected", &message, ts)
            }
            None => {
                status.set_condition(ConditionType::Ready, true, "Reconciled", "last pass completed", ts)
            }
        }
        status.updated_at = ts;

        self.metrics
            .set_resource(
                id,
                ResourceGauges {
                    current_nodes,
                    desired_nodes: status.desired_nodes.unwrap_or(current_nodes),
                    utilization_percent: reading.percent,
                },
            )
            .await;

        // 5. Persist.
        match self.store.write_status(id, &status).await {
            Ok(()) => {}
            Err(CollaboratorError::Conflict(msg)) => {
                debug!(resource = %id, %msg, "status write lost to newer spec, discarding pass");
                record.consecutive_failures = 0;
                return Err(ReconcileError::Conflict(msg));
            }
            Err(CollaboratorError::NotFound(_)) => return Ok(PassEnd::Deleted),
            Err(source) => {
                warn!(resource = %id, error = %source, "status write failed, retrying on next resync");
                return Err(ReconcileError::StatusWrite(source));
            }
        }

        if let Some(err) = rejected {
            self.events.emit(id, EventOutcome::Rejected, &err.to_string());
            return Err(err);
        }

        // 6. Done.
        record.consecutive_failures = 0;
        match eval.decision {
            ScaleDecision::ScaleTo(nodes) => self.events.emit(
                id,
                EventOutcome::Scaled,
                &format!("scaled from {current_nodes} to {nodes} nodes"),
            ),
            ScaleDecision::NoOp => self.events.emit(
                id,
                EventOutcome::Unchanged,
                &format!("holding at {current_nodes} nodes"),
            ),
        }
        Ok(PassEnd::Completed)
    }

    /// Count a retryable failure and log it; only the first few in a row
    /// are logged at warn.
    fn transient_failure(
        &self,
        id: &str,
        record: &mut ReconciliationRecord,
        err: ReconcileError,
    ) -> ReconcileError {
        record.consecutive_failures = record.consecutive_failures.saturating_add(1);
        let failures = record.consecutive_failures;
        if failures <= self.config.failure_log_threshold {
            warn!(resource = %id, failures, error = %err, "reconcile pass failed");
        } else {
            debug!(resource = %id, failures, error = %err, "reconcile pass failed");
        }
        self.events.emit(id, EventOutcome::Failed, &err.to_string());
        err
    }

    /// Persist a `SpecValid=false` condition for an invalid spec. The
    /// rest of the last-known-good status is kept.
    ///
    /// The generation only counts as reported once the condition is
    /// stored; until then the pass fails as transient and is retried.
    async fn reject_invalid(
        &self,
        id: &str,
        spec: &ResourceSpec,
        record: &mut ReconciliationRecord,
        source: capscale_core::SpecError,
    ) -> Result<PassEnd, ReconcileError> {
        let generation = spec.generation;
        let err = ReconcileError::Validation { generation, source };

        let previous = match self.store.get_status(id).await {
            Ok(previous) => previous,
            Err(source) => {
                return Err(self.transient_failure(
                    id,
                    record,
                    ReconcileError::ValidationUnrecorded { generation, source },
                ));
            }
        };

        let ts = epoch_secs_of(self.clock.now());
        let message = err.to_string();
        let mut status = previous.unwrap_or_default();
        status.observed_generation = generation;
        status.set_condition(ConditionType::SpecValid, false, "InvalidSpec", &message, ts);
        status.set_condition(ConditionType::Ready, false, "InvalidSpec", &message, ts);
        status.updated_at = ts;

        match self.store.write_status(id, &status).await {
            Ok(()) => {}
            Err(CollaboratorError::Conflict(msg)) => {
                debug!(resource = %id, %msg, "spec moved on before invalid status was written");
            }
            Err(CollaboratorError::NotFound(_)) => return Ok(PassEnd::Deleted),
            Err(source) => {
                return Err(self.transient_failure(
                    id,
                    record,
                    ReconcileError::ValidationUnrecorded { generation, source },
                ));
            }
        }

        warn!(resource = %id, error = %err, "spec rejected");
        record.invalid_generation = Some(generation);
        record.consecutive_failures = 0;
        self.events.emit(id, EventOutcome::Invalid, &message);
        Err(err)
    }
}

/// Seed cooldown bookkeeping from persisted status after a restart.
fn restore_scale_history(record: &mut ReconciliationRecord, status: &ResourceStatus) {
    if record.last_scale_time.is_none()
        && let Some(secs) = status.last_scale_time
    {
        record.last_scale_time = Some(system_time_from_secs(secs));
        record.last_scale_direction = status.last_scale_direction;
    }
}

fn set_limit_condition(status: &mut ResourceStatus, eval: &Evaluation, ts: u64) {
    let (limited, reason, message) = match (eval.hold, eval.limited) {
        (Some(HoldReason::ScaleUpCooldown { remaining }), _)
        | (Some(HoldReason::ScaleDownCooldown { remaining }), _) => (
            true,
            eval.hold.map(|h| h.as_str()).unwrap_or_default(),
            format!(
                "holding at {} nodes, {} wanted, cooldown ends in {}s",
                eval.current_nodes,
                eval.desired,
                remaining.as_secs()
            ),
        ),
        (Some(hold), _) => (
            true,
            hold.as_str(),
            format!("holding at {} nodes", eval.current_nodes),
        ),
        (None, Some(BoundLimit::AtMax)) => (
            true,
            "AtMaxNodes",
            format!("wanted {} nodes, capped at {}", eval.raw_desired, eval.desired),
        ),
        (None, Some(BoundLimit::AtMin)) => (
            true,
            "AtMinNodes",
            format!("wanted {} nodes, floored at {}", eval.raw_desired, eval.desired),
        ),
        (None, None) => (false, "WithinBounds", String::from("desired capacity within bounds")),
    };
    status.set_condition(ConditionType::ScalingLimited, limited, reason, &message, ts);
}
