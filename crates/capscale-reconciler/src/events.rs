//! Event sink that writes reconciliation events to the tracing log.

use tracing::{debug, info, warn};

use capscale_core::{EventOutcome, EventSink};

/// Logs every event under the `capscale::events` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, id: &str, outcome: EventOutcome, message: &str) {
        let outcome_str = outcome.as_str();
        match outcome {
            EventOutcome::Scaled => {
                info!(target: "capscale::events", resource = %id, outcome = outcome_str, "{message}")
            }
            EventOutcome::Unchanged => {
                debug!(target: "capscale::events", resource = %id, outcome = outcome_str, "{message}")
            }
            EventOutcome::Invalid | EventOutcome::Rejected | EventOutcome::Failed => {
                warn!(target: "capscale::events", resource = %id, outcome = outcome_str, "{message}")
            }
        }
    }
}
