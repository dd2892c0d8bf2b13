//! Cluster error types

use thiserror::Error;
use wavegate_types::{Classify, ClusterId, ErrorClass, UnitError};

/// Errors reported by cluster collaborators
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClusterError {
    // Preconditions: fatal for the units that need the context, never retried
    #[error("Cluster {cluster} is not configured")]
    UnknownCluster { cluster: ClusterId },

    #[error("Cluster {cluster} is unreachable: {reason}")]
    Unreachable { cluster: ClusterId, reason: String },

    #[error("Not authorized on cluster {cluster}: {reason}")]
    Unauthorized { cluster: ClusterId, reason: String },

    #[error("Credentials unavailable for cluster {cluster}: {reason}")]
    Credentials { cluster: ClusterId, reason: String },

    #[error("Reconciler unavailable on cluster {cluster}: {reason}")]
    ReconcilerUnavailable { cluster: ClusterId, reason: String },

    #[error("Cluster tooling unavailable: {0}")]
    ToolUnavailable(String),

    // Transient: retried with backoff
    #[error("Network error: {0}")]
    Network(String),

    #[error("Throttled by cluster API: {0}")]
    Throttled(String),

    #[error("Not ready: {0}")]
    NotReady(String),

    #[error("Command failed: {0}")]
    CommandFailed(String),

    // Permanent: fail immediately
    #[error("Malformed manifest: {0}")]
    MalformedManifest(String),

    #[error("Rejected by policy: {0}")]
    PolicyRejected(String),

    #[error("Schema validation failed: {0}")]
    SchemaValidation(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Unexpected response: {0}")]
    Decode(String),
}

impl Classify for ClusterError {
    fn class(&self) -> ErrorClass {
        match self {
            ClusterError::UnknownCluster { .. }
            | ClusterError::Unreachable { .. }
            | ClusterError::Unauthorized { .. }
            | ClusterError::Credentials { .. }
            | ClusterError::ReconcilerUnavailable { .. }
            | ClusterError::ToolUnavailable(_) => ErrorClass::Precondition,

            ClusterError::Network(_)
            | ClusterError::Throttled(_)
            | ClusterError::NotReady(_)
            | ClusterError::CommandFailed(_) => ErrorClass::Transient,

            ClusterError::MalformedManifest(_)
            | ClusterError::PolicyRejected(_)
            | ClusterError::SchemaValidation(_)
            | ClusterError::NotFound(_)
            | ClusterError::Decode(_) => ErrorClass::Permanent,
        }
    }
}

/// Result type for cluster operations
pub type Result<T> = std::result::Result<T, ClusterError>;

impl From<ClusterError> for UnitError {
    fn from(err: ClusterError) -> Self {
        match err.class() {
            ErrorClass::Transient => UnitError::TransientApply(err.to_string()),
            ErrorClass::Permanent => UnitError::Permanent(err.to_string()),
            ErrorClass::Precondition => UnitError::Precondition(err.to_string()),
        }
    }
}
