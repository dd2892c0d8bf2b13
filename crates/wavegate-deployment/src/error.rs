//! Deployment error types

use thiserror::Error;
use wavegate_types::{TransitionError, WaveSelection};

/// Errors that stop the orchestrator itself. Unit failures are not errors
/// here; they end up in the run record.
#[derive(Debug, Error)]
pub enum DeploymentError {
    #[error("Selection {0} matches no wave in the plan")]
    EmptySelection(WaveSelection),

    #[error("Run state error: {0}")]
    State(#[from] wavegate_state::StateError),

    #[error("Illegal unit transition: {0}")]
    Transition(#[from] TransitionError),
}

impl DeploymentError {
    /// Another run holds one of the target clusters.
    pub fn is_lock_conflict(&self) -> bool {
        matches!(
            self,
            DeploymentError::State(wavegate_state::StateError::LockHeld { .. })
        )
    }
}

/// Result type for deployment operations
pub type Result<T> = std::result::Result<T, DeploymentError>;
