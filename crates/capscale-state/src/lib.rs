//! capscale-state — the desired-state store.
//!
//! Backed by [redb](https://docs.rs/redb), persists resource specs, the
//! status the reconciliation engine writes back, and the utilization
//! samples the metric source reads.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Samples use `{resource_id}:{zero-padded epoch}` keys so a prefix scan
//! returns them in chronological order.
//!
//! Every spec write bumps the spec `generation` and publishes the resource
//! id on a broadcast channel; status writes carry the generation they were
//! derived from and are rejected with `StateError::Conflict` once the spec
//! has moved on.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and implements `capscale_core::DesiredStateStore`.

pub mod desired;
pub mod error;
pub mod store;
pub mod tables;

pub use error::{StateError, StateResult};
pub use store::StateStore;
