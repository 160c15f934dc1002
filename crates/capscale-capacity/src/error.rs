//! Error types for the capacity clients.

use std::time::Duration;

use thiserror::Error;

use capscale_core::CollaboratorError;

/// Result type alias for capacity client operations.
pub type CapacityResult<T> = Result<T, CapacityError>;

#[derive(Debug, Error)]
pub enum CapacityError {
    #[error("invalid capacity endpoint {endpoint:?}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("connection to {address} failed: {reason}")]
    Connect { address: String, reason: String },

    #[error("capacity request timed out after {0:?}")]
    Timeout(Duration),

    #[error("capacity API returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid capacity API response: {0}")]
    Decode(String),

    #[error("failed to build request: {0}")]
    Request(String),

    #[error("capacity for {0} not found")]
    UnknownResource(String),

    #[error("requested {requested} nodes exceeds quota of {quota}")]
    QuotaExceeded { requested: u32, quota: u32 },
}

impl From<CapacityError> for CollaboratorError {
    fn from(e: CapacityError) -> Self {
        let message = e.to_string();
        match e {
            CapacityError::Status { status: 404, .. } | CapacityError::UnknownResource(_) => {
                CollaboratorError::NotFound(message)
            }
            CapacityError::Status { status, .. }
                if status == 408 || status == 429 || status >= 500 =>
            {
                CollaboratorError::Transient(message)
            }
            CapacityError::Status { .. }
            | CapacityError::InvalidEndpoint { .. }
            | CapacityError::Request(_)
            | CapacityError::QuotaExceeded { .. } => CollaboratorError::Permanent(message),
            CapacityError::Connect { .. } | CapacityError::Timeout(_) | CapacityError::Decode(_) => {
                CollaboratorError::Transient(message)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16) -> CollaboratorError {
        CapacityError::Status {
            status: code,
            body: String::new(),
        }
        .into()
    }

    #[test]
    fn status_codes_map_to_error_classes() {
        assert!(matches!(status(404), CollaboratorError::NotFound(_)));
        assert!(matches!(status(408), CollaboratorError::Transient(_)));
        assert!(matches!(status(429), CollaboratorError::Transient(_)));
        assert!(matches!(status(503), CollaboratorError::Transient(_)));
        assert!(matches!(status(400), CollaboratorError::Permanent(_)));
        assert!(matches!(status(403), CollaboratorError::Permanent(_)));
    }

    #[test]
    fn transport_failures_are_transient() {
        let timeout: CollaboratorError = CapacityError::Timeout(Duration::from_secs(5)).into();
        assert!(matches!(timeout, CollaboratorError::Transient(_)));

        let connect: CollaboratorError = CapacityError::Connect {
            address: "127.0.0.1:1".into(),
            reason: "refused".into(),
        }
        .into();
        assert!(matches!(connect, CollaboratorError::Transient(_)));
    }

    #[test]
    fn quota_is_permanent() {
        let err: CollaboratorError = CapacityError::QuotaExceeded {
            requested: 12,
            quota: 10,
        }
        .into();
        assert!(matches!(err, CollaboratorError::Permanent(_)));
    }
}
