//! Decision engine — proportional control with hysteresis.
//!
//! `evaluate()` computes the full set of intermediate values for logging
//! and status conditions; `decide()` returns just the decision. Both are
//! deterministic: the same inputs always give the same output.

use std::time::{Duration, SystemTime};

use capscale_core::{ObservedState, ResourceSpec, ScaleDirection};

use crate::policy::ScalingPolicy;

/// A scaling decision for a single resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDecision {
    /// Leave capacity unchanged.
    NoOp,
    /// Set capacity to the given node count.
    ScaleTo(u32),
}

/// Per-resource bookkeeping owned by the reconciliation loop.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconciliationRecord {
    /// Time of the last successfully applied scaling action.
    pub last_scale_time: Option<SystemTime>,
    pub last_scale_direction: ScaleDirection,
    pub consecutive_failures: u32,
    /// Set while a pass for this resource is running.
    pub in_flight: bool,
    /// Spec generation last rejected by validation.
    pub invalid_generation: Option<u64>,
}

impl ReconciliationRecord {
    /// Record a successfully applied scaling action.
    pub fn note_scaled(&mut self, from: u32, to: u32, now: SystemTime) {
        self.last_scale_time = Some(now);
        self.last_scale_direction = if to > from {
            ScaleDirection::Up
        } else {
            ScaleDirection::Down
        };
    }
}

/// Why a change the proportional rule asked for was held back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldReason {
    /// Utilization ratio did not clear `1 + scale_up_margin`.
    BelowScaleUpMargin,
    /// Scale-up cooldown still running.
    ScaleUpCooldown { remaining: Duration },
    /// Scale-down cooldown still running.
    ScaleDownCooldown { remaining: Duration },
    /// Inputs the engine cannot act on (non-positive target, NaN utilization).
    InvalidInput,
}

impl HoldReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            HoldReason::BelowScaleUpMargin => "BelowScaleUpMargin",
            HoldReason::ScaleUpCooldown { .. } => "ScaleUpCooldown",
            HoldReason::ScaleDownCooldown { .. } => "ScaleDownCooldown",
            HoldReason::InvalidInput => "InvalidInput",
        }
    }
}

/// The raw proportional result fell outside the spec bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundLimit {
    AtMin,
    AtMax,
}

/// Full result of one evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub decision: ScaleDecision,
    pub current_nodes: u32,
    /// `current_utilization / target_utilization`.
    pub ratio: f64,
    /// `ceil(current_nodes * ratio)` before clamping.
    pub raw_desired: u32,
    /// `raw_desired` clamped into `[min_nodes, max_nodes]`.
    pub desired: u32,
    pub hold: Option<HoldReason>,
    pub limited: Option<BoundLimit>,
}

impl Evaluation {
    /// Direction of the decision, `None` for `NoOp`.
    pub fn direction(&self) -> ScaleDirection {
        match self.decision {
            ScaleDecision::ScaleTo(n) if n > self.current_nodes => ScaleDirection::Up,
            ScaleDecision::ScaleTo(_) => ScaleDirection::Down,
            ScaleDecision::NoOp => ScaleDirection::None,
        }
    }
}

/// Compute the scaling decision for one resource.
pub fn decide(
    spec: &ResourceSpec,
    observed: &ObservedState,
    record: &ReconciliationRecord,
    now: SystemTime,
    policy: &ScalingPolicy,
) -> ScaleDecision {
    evaluate(spec, observed, record, now, policy).decision
}

/// Compute the scaling decision together with its intermediate values.
pub fn evaluate(
    spec: &ResourceSpec,
    observed: &ObservedState,
    record: &ReconciliationRecord,
    now: SystemTime,
    policy: &ScalingPolicy,
) -> Evaluation {
    let current = observed.current_nodes;
    let target = spec.target_utilization_percent;
    let utilization = observed.current_utilization_percent;

    let mut eval = Evaluation {
        decision: ScaleDecision::NoOp,
        current_nodes: current,
        ratio: 0.0,
        raw_desired: current,
        desired: current,
        hold: None,
        limited: None,
    };

    if target.is_nan() || target <= 0.0 || !utilization.is_finite() {
        eval.hold = Some(HoldReason::InvalidInput);
        return eval;
    }

    eval.ratio = utilization.max(0.0) / target;
    // `as` saturates, so an enormous ratio lands on u32::MAX and is clamped.
    eval.raw_desired = (current as f64 * eval.ratio).ceil() as u32;
    eval.desired = spec.clamp(eval.raw_desired);
    eval.limited = if eval.raw_desired > spec.max_nodes {
        Some(BoundLimit::AtMax)
    } else if eval.raw_desired < spec.min_nodes {
        Some(BoundLimit::AtMin)
    } else {
        None
    };

    // Out-of-bounds capacity is corrected before the proportional rule.
    if current < spec.min_nodes {
        eval.desired = spec.min_nodes;
        eval.limited = Some(BoundLimit::AtMin);
        eval.decision = ScaleDecision::ScaleTo(spec.min_nodes);
        return eval;
    }
    if current > spec.max_nodes {
        eval.desired = spec.max_nodes;
        eval.limited = Some(BoundLimit::AtMax);
        match cooldown_remaining(record, now, policy.scale_down_cooldown) {
            Some(remaining) => eval.hold = Some(HoldReason::ScaleDownCooldown { remaining }),
            None => eval.decision = ScaleDecision::ScaleTo(spec.max_nodes),
        }
        return eval;
    }

    if eval.desired == current {
        return eval;
    }

    if eval.desired > current {
        if eval.ratio <= 1.0 + policy.scale_up_margin {
            eval.hold = Some(HoldReason::BelowScaleUpMargin);
        } else if let Some(remaining) = cooldown_remaining(record, now, policy.scale_up_cooldown) {
            eval.hold = Some(HoldReason::ScaleUpCooldown { remaining });
        } else {
            eval.decision = ScaleDecision::ScaleTo(eval.desired);
        }
        return eval;
    }

    match cooldown_remaining(record, now, policy.scale_down_cooldown) {
        Some(remaining) => eval.hold = Some(HoldReason::ScaleDownCooldown { remaining }),
        // One step at a time; `desired >= min_nodes` keeps the step in bounds.
        None => eval.decision = ScaleDecision::ScaleTo(eval.desired.max(current - 1)),
    }
    eval
}

/// Time left on a cooldown measured from the last scaling action, or
/// `None` once it has elapsed. A last-scale time in the future counts as
/// zero elapsed.
fn cooldown_remaining(
    record: &ReconciliationRecord,
    now: SystemTime,
    cooldown: Duration,
) -> Option<Duration> {
    let last = record.last_scale_time?;
    let elapsed = now.duration_since(last).unwrap_or_default();
    if elapsed >= cooldown {
        None
    } else {
        Some(cooldown - elapsed)
    }
}
