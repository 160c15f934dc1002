//! capscale-metrics — utilization input and engine observability.
//!
//! Reads utilization samples from the state store for the decision
//! engine, counts what the reconciliation engine does, and renders both
//! in Prometheus text format.
//!
//! # Architecture
//!
//! ```text
//! StoreMetricSource
//!   └── sample_utilization() ← mean of samples in [now - window, now]
//!
//! EngineMetrics
//!   ├── record_pass() / record_scale() ← called by the reconciler
//!   ├── set_resource() → per-resource gauges
//!   └── snapshot() → EngineSnapshot
//!
//! SamplePruner
//!   └── run() → periodic deletion of samples past retention
//!
//! Prometheus exposition
//!   └── render_prometheus() → text/plain for /metrics endpoint
//! ```

pub mod engine;
pub mod prometheus;
pub mod pruner;
pub mod source;

pub use engine::{EngineMetrics, EngineSnapshot, PassOutcome, ResourceGauges};
pub use prometheus::render_prometheus;
pub use pruner::SamplePruner;
pub use source::StoreMetricSource;
