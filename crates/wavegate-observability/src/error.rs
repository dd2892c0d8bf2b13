//! Error types for wavegate-observability crate.

use thiserror::Error;

/// Observability errors
#[derive(Debug, Error)]
pub enum ObservabilityError {
    /// Audit log could not be read or written
    #[error("audit storage error: {0}")]
    Io(#[from] std::io::Error),

    /// Audit entry could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Builder was missing a required field
    #[error("invalid audit entry: {0}")]
    InvalidEntry(&'static str),

    /// Log filter or subscriber setup failed
    #[error("tracing setup failed: {0}")]
    Tracing(String),
}

/// Result type for observability operations
pub type Result<T> = std::result::Result<T, ObservabilityError>;
