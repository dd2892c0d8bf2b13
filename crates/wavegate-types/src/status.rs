//! Unit and run status state machines, and reconciler-reported status

use serde::{Deserialize, Serialize};
use std::fmt;

/// Per-unit lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnitStatus {
    /// Waiting for its wave
    Pending,
    /// Manifest apply in flight
    Applying,
    /// Applied, health gate polling
    Progressing,
    /// Synced and healthy
    Healthy,
    /// Transient failure or health timeout; may be retried
    Degraded,
    /// Terminal failure for this attempt sequence
    Failed,
    /// Restored to its pre-wave snapshot
    RolledBack,
    /// Never started because the run was cancelled
    Cancelled,
}

impl UnitStatus {
    /// Whether `next` is a legal successor of `self`.
    ///
    /// Re-recording the current status is handled by the run record as a
    /// no-op and is not considered a transition here.
    pub fn can_transition_to(self, next: UnitStatus) -> bool {
        use UnitStatus::*;
        matches!(
            (self, next),
            (Pending, Applying)
                | (Pending, Failed)
                | (Pending, Cancelled)
                | (Applying, Progressing)
                | (Applying, Degraded)
                | (Applying, Failed)
                | (Progressing, Healthy)
                | (Progressing, Degraded)
                | (Progressing, Failed)
                | (Degraded, Applying)
                | (Degraded, Failed)
                | (Degraded, RolledBack)
                | (Healthy, RolledBack)
                | (Failed, RolledBack)
        )
    }

    /// No further work is scheduled for a unit in this status
    pub fn is_settled(self) -> bool {
        matches!(
            self,
            UnitStatus::Healthy
                | UnitStatus::Degraded
                | UnitStatus::Failed
                | UnitStatus::RolledBack
                | UnitStatus::Cancelled
        )
    }

    /// The unit has been handed to the cluster at least once
    pub fn was_touched(self) -> bool {
        !matches!(self, UnitStatus::Pending | UnitStatus::Cancelled)
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UnitStatus::Pending => "Pending",
            UnitStatus::Applying => "Applying",
            UnitStatus::Progressing => "Progressing",
            UnitStatus::Healthy => "Healthy",
            UnitStatus::Degraded => "Degraded",
            UnitStatus::Failed => "Failed",
            UnitStatus::RolledBack => "RolledBack",
            UnitStatus::Cancelled => "Cancelled",
        };
        f.write_str(s)
    }
}

/// Overall status of a deployment run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunStatus {
    /// Created, no wave started
    Pending,
    /// Waves in progress
    Running,
    /// Every selected wave completed
    Succeeded,
    /// A wave failed and was restored to its snapshot
    RolledBack,
    /// A wave failed and restoring it failed too; manual intervention required
    FailedNoRollback,
    /// A wave failed and automatic rollback is disabled
    Failed,
    /// Stopped by the operator
    Cancelled,
}

impl RunStatus {
    pub fn is_finished(self) -> bool {
        !matches!(self, RunStatus::Pending | RunStatus::Running)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Pending => "Pending",
            RunStatus::Running => "Running",
            RunStatus::Succeeded => "Succeeded",
            RunStatus::RolledBack => "RolledBack",
            RunStatus::FailedNoRollback => "FailedNoRollback",
            RunStatus::Failed => "Failed",
            RunStatus::Cancelled => "Cancelled",
        };
        f.write_str(s)
    }
}

/// Reconciler sync axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SyncStatus {
    Synced,
    OutOfSync,
    #[default]
    Unknown,
}

impl SyncStatus {
    /// Parses a reconciler-reported value; anything unrecognised is `Unknown`.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "Synced" => SyncStatus::Synced,
            "OutOfSync" => SyncStatus::OutOfSync,
            _ => SyncStatus::Unknown,
        }
    }
}

/// Reconciler health axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum HealthState {
    Healthy,
    Progressing,
    Degraded,
    Missing,
    #[default]
    Unknown,
}

impl HealthState {
    /// Parses a reconciler-reported value; anything unrecognised is `Unknown`.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "Healthy" => HealthState::Healthy,
            "Progressing" => HealthState::Progressing,
            "Degraded" => HealthState::Degraded,
            "Missing" => HealthState::Missing,
            _ => HealthState::Unknown,
        }
    }
}

/// One observation of a unit as reported by the reconciler
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReconcileStatus {
    pub sync: SyncStatus,
    pub health: HealthState,
    /// Revision the reconciler reports as live, if any
    #[serde(default)]
    pub revision: Option<String>,
}

impl ReconcileStatus {
    pub fn new(sync: SyncStatus, health: HealthState) -> Self {
        Self {
            sync,
            health,
            revision: None,
        }
    }

    pub fn converged() -> Self {
        Self::new(SyncStatus::Synced, HealthState::Healthy)
    }

    /// Both axes at terminal success
    pub fn is_converged(&self) -> bool {
        self.sync == SyncStatus::Synced && self.health == HealthState::Healthy
    }
}

impl fmt::Display for ReconcileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}/{:?}", self.sync, self.health)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn healthy_requires_progressing_first() {
        assert!(!UnitStatus::Pending.can_transition_to(UnitStatus::Healthy));
        assert!(!UnitStatus::Applying.can_transition_to(UnitStatus::Healthy));
        assert!(UnitStatus::Progressing.can_transition_to(UnitStatus::Healthy));
    }

    #[test]
    fn retry_and_rollback_edges() {
        assert!(UnitStatus::Degraded.can_transition_to(UnitStatus::Applying));
        assert!(UnitStatus::Degraded.can_transition_to(UnitStatus::Failed));
        assert!(UnitStatus::Failed.can_transition_to(UnitStatus::RolledBack));
        assert!(UnitStatus::Healthy.can_transition_to(UnitStatus::RolledBack));
        assert!(!UnitStatus::RolledBack.can_transition_to(UnitStatus::Applying));
        assert!(!UnitStatus::Cancelled.can_transition_to(UnitStatus::Applying));
        assert!(!UnitStatus::Pending.can_transition_to(UnitStatus::RolledBack));
    }

    #[test]
    fn reconciler_strings_parse() {
        assert_eq!(SyncStatus::parse("Synced"), SyncStatus::Synced);
        assert_eq!(SyncStatus::parse("weird"), SyncStatus::Unknown);
        assert_eq!(HealthState::parse("Missing"), HealthState::Missing);
        assert!(ReconcileStatus::converged().is_converged());
        assert!(!ReconcileStatus::new(SyncStatus::OutOfSync, HealthState::Healthy).is_converged());
    }
}
