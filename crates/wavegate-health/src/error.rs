//! Error types for wavegate-health crate.

use std::time::Duration;

use thiserror::Error;
use wavegate_cluster::ClusterError;
use wavegate_types::{Classify, ErrorClass, UnitError, UnitName};

/// Errors produced while gating a unit.
#[derive(Debug, Clone, Error)]
pub enum HealthError {
    /// The unit did not converge in time.
    #[error("unit {unit} not healthy after {}s (last observed: {last_observed})", .waited.as_secs())]
    Timeout {
        unit: UnitName,
        waited: Duration,
        last_observed: String,
    },

    /// The reconciler could not be read.
    #[error("status read failed: {0}")]
    Reconciler(#[from] ClusterError),
}

impl Classify for HealthError {
    fn class(&self) -> ErrorClass {
        match self {
            HealthError::Timeout { .. } => ErrorClass::Transient,
            HealthError::Reconciler(err) => err.class(),
        }
    }
}

impl From<HealthError> for UnitError {
    fn from(err: HealthError) -> Self {
        match err {
            HealthError::Timeout {
                waited,
                last_observed,
                ..
            } => UnitError::HealthTimeout {
                timeout: waited,
                last_observed,
            },
            HealthError::Reconciler(err) => err.into(),
        }
    }
}

/// Result type for health operations.
pub type HealthResult<T> = Result<T, HealthError>;
