//! Planner error types

use std::path::PathBuf;
use thiserror::Error;
use wavegate_types::ValidationError;

/// Errors raised while loading declarations or resolving a plan
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid YAML declarations: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid JSON declarations: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported declaration format: {0}")]
    UnsupportedFormat(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Result type for planner operations
pub type Result<T> = std::result::Result<T, PlanError>;
