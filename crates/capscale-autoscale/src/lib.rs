//! capscale-autoscale — the scaling decision engine.
//!
//! A pure function from (spec, observed state, reconciliation record,
//! clock, policy) to a `ScaleDecision`. No I/O happens here; the
//! reconciler gathers observations and applies the result.
//!
//! # Scaling Algorithm
//!
//! ```text
//! ratio       = current_utilization / target_utilization
//! raw_desired = ceil(current_nodes * ratio)
//! desired     = clamp(raw_desired, min_nodes, max_nodes)
//!
//! if current_nodes < min_nodes:
//!     ScaleTo(min_nodes)                      // bounds correction, no gates
//! if current_nodes > max_nodes:
//!     ScaleTo(max_nodes) once scale-down cooldown elapsed
//!
//! if desired == current_nodes:
//!     NoOp
//! if desired > current_nodes:
//!     ScaleTo(desired) if ratio > 1 + margin and scale-up cooldown elapsed
//! if desired < current_nodes:
//!     ScaleTo(current_nodes - 1) if scale-down cooldown elapsed
//! ```
//!
//! Cooldowns are measured from the last applied scaling action in either
//! direction, which keeps a scale-up from being followed immediately by
//! a scale-down.

pub mod policy;
pub mod scaler;

pub use policy::ScalingPolicy;
pub use scaler::{
    BoundLimit, Evaluation, HoldReason, ReconciliationRecord, ScaleDecision, decide, evaluate,
};
