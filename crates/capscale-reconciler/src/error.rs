//! Reconciliation error types.

use thiserror::Error;

use capscale_core::{CollaboratorError, SpecError};
use capscale_metrics::PassOutcome;

/// Ways a reconciliation pass can end short of full success.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("a pass for this resource is already running")]
    Busy,

    #[error("invalid spec (generation {generation}): {source}")]
    Validation {
        generation: u64,
        #[source]
        source: SpecError,
    },

    /// The spec is invalid but the `SpecValid=false` condition could not
    /// be stored yet.
    #[error("invalid spec (generation {generation}) not recorded: {source}")]
    ValidationUnrecorded {
        generation: u64,
        #[source]
        source: CollaboratorError,
    },

    #[error("failed to fetch {what}: {source}")]
    Fetch {
        what: &'static str,
        #[source]
        source: CollaboratorError,
    },

    #[error("failed to apply {nodes} nodes: {source}")]
    Apply {
        nodes: u32,
        #[source]
        source: CollaboratorError,
    },

    #[error("capacity change to {nodes} nodes rejected: {reason}")]
    Rejected { nodes: u32, reason: String },

    #[error("status discarded, spec moved on: {0}")]
    Conflict(String),

    #[error("failed to write status: {0}")]
    StatusWrite(#[source] CollaboratorError),
}

impl ReconcileError {
    /// Retried with per-key exponential backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ReconcileError::Fetch { .. }
                | ReconcileError::Apply { .. }
                | ReconcileError::ValidationUnrecorded { .. }
        )
    }

    /// Metric bucket for this error.
    pub fn outcome(&self) -> PassOutcome {
        match self {
            ReconcileError::Busy => PassOutcome::Busy,
            ReconcileError::Validation { .. } => PassOutcome::Invalid,
            ReconcileError::Fetch { .. }
            | ReconcileError::Apply { .. }
            | ReconcileError::ValidationUnrecorded { .. }
            | ReconcileError::StatusWrite(_) => PassOutcome::Transient,
            ReconcileError::Rejected { .. } => PassOutcome::Permanent,
            ReconcileError::Conflict(_) => PassOutcome::Conflict,
        }
    }
}
