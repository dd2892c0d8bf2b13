//! Shared error taxonomy

use crate::{ClusterId, UnitName, UnitStatus};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Plan validation failures. Raised before any apply; nothing has side effects.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Cyclic dependency between units: {}", join(.units))]
    CyclicDependency { units: Vec<UnitName> },

    #[error(
        "Wave ordering violation: {unit} is pinned to wave {unit_wave} but depends on {dependency} in wave {dependency_wave}"
    )]
    WaveOrderingViolation {
        unit: UnitName,
        unit_wave: u32,
        dependency: UnitName,
        dependency_wave: u32,
    },

    #[error("Malformed unit {unit}: {reason}")]
    MalformedUnit { unit: UnitName, reason: String },

    #[error("Unit {unit} targets unknown cluster {cluster}")]
    UnknownTarget { unit: UnitName, cluster: ClusterId },

    #[error("Unit {unit} requires unknown unit {dependency}")]
    UnknownDependency { unit: UnitName, dependency: UnitName },

    #[error("Duplicate unit name: {0}")]
    DuplicateUnit(UnitName),

    #[error("No units declared")]
    EmptyPlan,
}

fn join(units: &[UnitName]) -> String {
    units
        .iter()
        .map(UnitName::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Rejected state-machine transition
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("Illegal transition for {unit}: {from} -> {to}")]
    Illegal {
        unit: UnitName,
        from: UnitStatus,
        to: UnitStatus,
    },

    #[error("Unit {0} is not part of this run")]
    UnknownUnit(UnitName),
}

/// How the retry controller treats a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Network blips, throttling, not-yet-ready: retried with backoff
    Transient,
    /// Malformed manifest, policy rejection, schema failure: fails immediately
    Permanent,
    /// Unreachable cluster or missing credentials: fails the unit, never retried
    Precondition,
}

impl ErrorClass {
    pub fn is_retryable(self) -> bool {
        self == ErrorClass::Transient
    }
}

/// Errors that know their retry class
pub trait Classify {
    fn class(&self) -> ErrorClass;
}

/// Why a unit ended up Degraded or Failed
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum UnitError {
    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Transient apply failure: {0}")]
    TransientApply(String),

    #[error("Health gate timed out after {}s (last observed: {last_observed})", .timeout.as_secs())]
    HealthTimeout {
        timeout: Duration,
        last_observed: String,
    },

    #[error("Permanent failure: {0}")]
    Permanent(String),
}

impl Classify for UnitError {
    fn class(&self) -> ErrorClass {
        match self {
            UnitError::Precondition(_) => ErrorClass::Precondition,
            UnitError::TransientApply(_) | UnitError::HealthTimeout { .. } => {
                ErrorClass::Transient
            }
            UnitError::Permanent(_) => ErrorClass::Permanent,
        }
    }
}
