//! CLI error types

use thiserror::Error;
use wavegate_deployment::DeploymentError;
use wavegate_observability::ObservabilityError;
use wavegate_planner::PlanError;
use wavegate_state::StateError;

/// Errors surfaced by CLI commands
#[derive(Debug, Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Config(#[from] ::config::ConfigError),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Deployment(#[from] DeploymentError),

    #[error(transparent)]
    Observability(#[from] ObservabilityError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Failed to render JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to render YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type for CLI operations
pub type CliResult<T> = std::result::Result<T, CliError>;
