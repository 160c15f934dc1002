//! Resource data model shared across capscale crates.
//!
//! `ResourceSpec` is the operator-declared desired state, `ResourceStatus`
//! is what the reconciliation engine writes back after each pass, and
//! `UtilizationSample` is a single load observation. All types are
//! serializable to/from JSON for storage and the REST API.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::duration::HumanDuration;

/// Opaque, stable identifier of a managed resource.
pub type ResourceId = String;

// ── Spec ───────────────────────────────────────────────────────────

/// Declared configuration for one managed resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceSpec {
    pub id: ResourceId,
    /// Lower capacity bound (nodes). Must be at least 1.
    pub min_nodes: u32,
    /// Upper capacity bound (nodes). Must be at least `min_nodes`.
    pub max_nodes: u32,
    /// Utilization the autoscaler steers towards, in (0, 100].
    pub target_utilization_percent: f64,
    /// Per-resource overrides of the engine's scaling behavior.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub behavior: Option<ScalingBehavior>,
    /// Bumped by the store on every write.
    #[serde(default)]
    pub generation: u64,
    /// Unix timestamp (seconds) when this spec was created.
    #[serde(default)]
    pub created_at: u64,
    /// Unix timestamp (seconds) when this spec was last updated.
    #[serde(default)]
    pub updated_at: u64,
}

/// Optional scaling overrides. An absent field means "use the engine
/// default from `[engine]` in capscale.toml".
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ScalingBehavior {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_up_cooldown: Option<HumanDuration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_down_cooldown: Option<HumanDuration>,
    /// Fraction by which utilization must exceed the target before a
    /// scale-up is allowed (0.1 = 10% over target).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_up_margin: Option<f64>,
}

/// Reasons a spec is rejected before it reaches the control loop.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SpecError {
    #[error("resource id must not be empty")]
    EmptyId,

    #[error("min_nodes must be at least 1")]
    MinNodesZero,

    #[error("max_nodes ({max}) is below min_nodes ({min})")]
    MaxBelowMin { min: u32, max: u32 },

    #[error("target_utilization_percent must be in (0, 100], got {0}")]
    TargetOutOfRange(f64),

    #[error("scale_up_margin must be a finite value >= 0, got {0}")]
    InvalidMargin(f64),
}

impl ResourceSpec {
    /// Create a spec with no behavior overrides.
    pub fn new(id: &str, min_nodes: u32, max_nodes: u32, target_utilization_percent: f64) -> Self {
        Self {
            id: id.to_string(),
            min_nodes,
            max_nodes,
            target_utilization_percent,
            behavior: None,
            generation: 0,
            created_at: 0,
            updated_at: 0,
        }
    }

    /// Check the spec invariants.
    pub fn validate(&self) -> Result<(), SpecError> {
        if self.id.trim().is_empty() {
            return Err(SpecError::EmptyId);
        }
        if self.min_nodes == 0 {
            return Err(SpecError::MinNodesZero);
        }
        if self.max_nodes < self.min_nodes {
            return Err(SpecError::MaxBelowMin {
                min: self.min_nodes,
                max: self.max_nodes,
            });
        }
        let target = self.target_utilization_percent;
        if !target.is_finite() || target <= 0.0 || target > 100.0 {
            return Err(SpecError::TargetOutOfRange(target));
        }
        if let Some(margin) = self.behavior.as_ref().and_then(|b| b.scale_up_margin)
            && (!margin.is_finite() || margin < 0.0)
        {
            return Err(SpecError::InvalidMargin(margin));
        }
        Ok(())
    }

    /// Clamp a node count into `[min_nodes, max_nodes]`.
    pub fn clamp(&self, nodes: u32) -> u32 {
        nodes.clamp(self.min_nodes, self.max_nodes.max(self.min_nodes))
    }
}

// ── Observations ───────────────────────────────────────────────────

/// Latest known facts about a resource, gathered at the start of a pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservedState {
    pub current_nodes: u32,
    pub current_utilization_percent: f64,
    pub sample_time: SystemTime,
}

/// A single utilization observation for a resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UtilizationSample {
    pub resource_id: ResourceId,
    /// Utilization in percent (0–100).
    pub utilization_percent: f64,
    /// Unix timestamp (seconds) of the observation.
    pub sampled_at: u64,
}

impl UtilizationSample {
    /// Build the composite key for the samples table.
    ///
    /// The timestamp is zero-padded so keys sort chronologically.
    pub fn table_key(&self) -> String {
        format!("{}:{:020}", self.resource_id, self.sampled_at)
    }
}

// ── Status ─────────────────────────────────────────────────────────

/// Direction of the most recent scaling action.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleDirection {
    Up,
    Down,
    #[default]
    None,
}

/// The decision taken by the most recent completed pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LastDecision {
    NoOp,
    ScaleTo { from: u32, to: u32 },
}

/// Kinds of status conditions surfaced to operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionType {
    /// The last pass completed end to end.
    Ready,
    /// The spec passed validation.
    SpecValid,
    /// The capacity mutator accepted the last requested node count.
    CapacityAccepted,
    /// The desired capacity was clamped to a bound or held by a cooldown.
    ScalingLimited,
}

/// A single status condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(rename = "type")]
    pub kind: ConditionType,
    pub status: bool,
    pub reason: String,
    pub message: String,
    /// Unix timestamp of the last change of `status`.
    pub last_transition: u64,
}

/// Observed state plus the outcome of the last pass, written back to the
/// desired-state store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceStatus {
    /// Spec generation this status was derived from.
    pub observed_generation: u64,
    pub current_nodes: Option<u32>,
    pub desired_nodes: Option<u32>,
    pub current_utilization_percent: Option<f64>,
    /// Unix timestamp of the utilization sample.
    pub sampled_at: Option<u64>,
    pub last_decision: Option<LastDecision>,
    /// Unix timestamp of the last applied scaling action.
    pub last_scale_time: Option<u64>,
    #[serde(default)]
    pub last_scale_direction: ScaleDirection,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    pub updated_at: u64,
}

impl ResourceStatus {
    /// Look up a condition by type.
    pub fn condition(&self, kind: ConditionType) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.kind == kind)
    }

    /// Insert or update a condition. `last_transition` only moves when
    /// the boolean status actually flips.
    pub fn set_condition(
        &mut self,
        kind: ConditionType,
        status: bool,
        reason: &str,
        message: &str,
        now: u64,
    ) {
        match self.conditions.iter_mut().find(|c| c.kind == kind) {
            Some(existing) => {
                if existing.status != status {
                    existing.last_transition = now;
                }
                existing.status = status;
                existing.reason = reason.to_string();
                existing.message = message.to_string();
            }
            None => self.conditions.push(Condition {
                kind,
                status,
                reason: reason.to_string(),
                message: message.to_string(),
                last_transition: now,
            }),
        }
    }
}

// ── Time helpers ───────────────────────────────────────────────────

/// Unix epoch seconds of a `SystemTime` (0 for pre-epoch times).
pub fn epoch_secs_of(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

/// `SystemTime` for a Unix epoch second count.
pub fn system_time_from_secs(secs: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(secs)
}

/// Current Unix epoch in seconds.
pub fn epoch_secs() -> u64 {
    epoch_secs_of(SystemTime::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_spec_passes() {
        assert_eq!(ResourceSpec::new("db-1", 1, 10, 50.0).validate(), Ok(()));
        assert_eq!(ResourceSpec::new("db-1", 3, 3, 100.0).validate(), Ok(()));
    }

    #[test]
    fn bounds_are_checked() {
        assert_eq!(
            ResourceSpec::new("db-1", 0, 10, 50.0).validate(),
            Err(SpecError::MinNodesZero)
        );
        assert_eq!(
            ResourceSpec::new("db-1", 5, 4, 50.0).validate(),
            Err(SpecError::MaxBelowMin { min: 5, max: 4 })
        );
    }

    #[test]
    fn zero_target_is_rejected() {
        assert_eq!(
            ResourceSpec::new("db-1", 1, 10, 0.0).validate(),
            Err(SpecError::TargetOutOfRange(0.0))
        );
        assert!(ResourceSpec::new("db-1", 1, 10, 101.0).validate().is_err());
        assert!(ResourceSpec::new("db-1", 1, 10, f64::NAN).validate().is_err());
    }

    #[test]
    fn empty_id_and_bad_margin_rejected() {
        assert_eq!(
            ResourceSpec::new("  ", 1, 10, 50.0).validate(),
            Err(SpecError::EmptyId)
        );

        let mut spec = ResourceSpec::new("db-1", 1, 10, 50.0);
        spec.behavior = Some(ScalingBehavior {
            scale_up_margin: Some(-0.5),
            ..ScalingBehavior::default()
        });
        assert_eq!(spec.validate(), Err(SpecError::InvalidMargin(-0.5)));
    }

    #[test]
    fn clamp_respects_bounds() {
        let spec = ResourceSpec::new("db-1", 2, 10, 50.0);
        assert_eq!(spec.clamp(0), 2);
        assert_eq!(spec.clamp(7), 7);
        assert_eq!(spec.clamp(18), 10);
    }

    #[test]
    fn spec_json_with_behavior_overrides() {
        let json = r#"{
            "id": "db-1",
            "min_nodes": 1,
            "max_nodes": 5,
            "target_utilization_percent": 65.0,
            "behavior": { "scale_down_cooldown": "10m" }
        }"#;
        let spec: ResourceSpec = serde_json::from_str(json).unwrap();
        let behavior = spec.behavior.unwrap();
        assert_eq!(
            behavior.scale_down_cooldown,
            Some(HumanDuration::from_secs(600))
        );
        assert_eq!(behavior.scale_up_cooldown, None);
        assert_eq!(spec.generation, 0);
    }

    #[test]
    fn sample_keys_sort_chronologically() {
        let a = UtilizationSample {
            resource_id: "db-1".to_string(),
            utilization_percent: 10.0,
            sampled_at: 999,
        };
        let b = UtilizationSample {
            sampled_at: 1000,
            ..a.clone()
        };
        assert!(a.table_key() < b.table_key());
    }

    #[test]
    fn set_condition_tracks_transitions() {
        let mut status = ResourceStatus::default();
        status.set_condition(ConditionType::Ready, true, "Reconciled", "ok", 100);
        status.set_condition(ConditionType::Ready, true, "Reconciled", "still ok", 200);

        let ready = status.condition(ConditionType::Ready).unwrap();
        assert_eq!(ready.last_transition, 100);
        assert_eq!(ready.message, "still ok");

        status.set_condition(ConditionType::Ready, false, "FetchFailed", "boom", 300);
        let ready = status.condition(ConditionType::Ready).unwrap();
        assert_eq!(ready.last_transition, 300);
        assert!(!ready.status);
        assert_eq!(status.conditions.len(), 1);
    }

    #[test]
    fn last_decision_json_shape() {
        let json = serde_json::to_value(LastDecision::ScaleTo { from: 2, to: 4 }).unwrap();
        assert_eq!(json["type"], "scale_to");
        assert_eq!(json["to"], 4);
    }
}
