//! capscale-reconciler — the autoscaling reconciliation engine.
//!
//! Turns store notifications into reconciliation passes and drives each
//! pass through fetch → decide → apply → persist.
//!
//! # Architecture
//!
//! ```text
//! Dispatcher
//!   ├── subscription pump  (store notifications → queue)
//!   ├── resync ticker      (every resource → queue, every sync period)
//!   └── worker pool        (queue → Reconciler::reconcile)
//!
//! WorkQueue
//!   ├── dedup of queued and in-flight keys
//!   └── per-key delayed requeue timers (newest wins)
//!
//! Reconciler
//!   ├── single-flight guard over the per-resource ReconciliationRecord
//!   ├── capscale_autoscale::evaluate for the decision
//!   └── error_policy() → requeue delay (exponential backoff)
//! ```
//!
//! All collaborators (store, metric source, capacity mutator, event sink)
//! are passed in as trait objects; nothing here reaches for globals.

pub mod backoff;
pub mod clock;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod queue;
pub mod reconciler;

pub use backoff::Backoff;
pub use clock::{Clock, ManualClock, SystemClock};
pub use dispatcher::Dispatcher;
pub use error::ReconcileError;
pub use events::TracingEventSink;
pub use queue::WorkQueue;
pub use reconciler::{Action, Reconciler};
