//! capscale-core — types shared by every capscale crate.
//!
//! Holds the resource data model (`ResourceSpec`, `ResourceStatus`,
//! `UtilizationSample`), the contracts the reconciliation engine consumes
//! from its collaborators (desired-state store, metric source, capacity
//! mutator, event sink), and the `capscale.toml` configuration parser.

pub mod config;
pub mod contracts;
pub mod duration;
pub mod types;

pub use config::{CapscaleConfig, ConfigError, EngineConfig};
pub use contracts::{
    CapacityMutator, CollaboratorError, CollaboratorResult, DesiredStateStore, EventOutcome,
    EventSink, MetricSource, NoopEventSink, UtilizationReading,
};
pub use duration::{HumanDuration, parse_duration};
pub use types::*;
