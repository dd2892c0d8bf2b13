//! Error types for wavegate-state crate.

use thiserror::Error;
use wavegate_types::{ClusterId, RunId, UnitName};

/// Errors from history and lock storage.
#[derive(Debug, Error)]
pub enum StateError {
    /// No run with this ID in history.
    #[error("run not found: {0}")]
    RunNotFound(RunId),

    /// History is empty.
    #[error("no runs recorded")]
    NoRunsRecorded,

    /// The requested waves have nothing to restore.
    #[error("nothing to roll back at or after wave {wave}")]
    NothingToRollBack { wave: u32 },

    /// Another run holds a target cluster.
    #[error("cluster {cluster} is locked by {holder}")]
    LockHeld { cluster: ClusterId, holder: String },

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<std::io::Error> for StateError {
    fn from(err: std::io::Error) -> Self {
        StateError::Storage(err.to_string())
    }
}

/// Result type for state operations.
pub type Result<T> = std::result::Result<T, StateError>;

/// Restoring a wave's snapshots failed for one or more units.
#[derive(Debug, Clone, Error)]
#[error("rollback of wave {wave} failed for {}", describe(.failures))]
pub struct RollbackError {
    pub wave: u32,
    pub failures: Vec<(UnitName, String)>,
}

fn describe(failures: &[(UnitName, String)]) -> String {
    failures
        .iter()
        .map(|(unit, reason)| format!("{unit}: {reason}"))
        .collect::<Vec<_>>()
        .join("; ")
}
