//! Event types for Wavegate observability
//!
//! Events provide a unified stream of run, wave, unit and rollback activity.
//! Observers consume them; nothing downstream of an event feeds back into the
//! orchestration.

use crate::{ClusterId, RunId, RunStatus, UnitName, UnitStatus};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Envelope wrapping all run events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEventEnvelope {
    /// Unique event ID
    pub id: Uuid,

    /// Event timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,

    /// Run the event belongs to
    pub run_id: RunId,

    /// Event severity
    pub severity: EventSeverity,

    /// Operator or process that triggered the run
    pub actor: Option<String>,

    /// The actual event
    pub event: RunEvent,
}

impl RunEventEnvelope {
    pub fn new(run_id: RunId, event: RunEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: chrono::Utc::now(),
            run_id,
            severity: event.infer_severity(),
            actor: None,
            event,
        }
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }
}

/// Event severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

/// Run events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RunEvent {
    // ═══════════════════════════════════════════════════════════════════
    // RUN EVENTS
    // ═══════════════════════════════════════════════════════════════════
    RunStarted {
        environment: String,
        waves: Vec<u32>,
        clusters: Vec<ClusterId>,
    },

    RunFinished {
        status: RunStatus,
        duration_seconds: u64,
    },

    CancelRequested {
        rollback: bool,
    },

    // ═══════════════════════════════════════════════════════════════════
    // WAVE EVENTS
    // ═══════════════════════════════════════════════════════════════════
    WaveStarted {
        wave: u32,
        units: Vec<UnitName>,
    },

    WaveCompleted {
        wave: u32,
    },

    WaveFailed {
        wave: u32,
        failed_units: Vec<UnitName>,
    },

    ContextUnavailable {
        cluster: ClusterId,
        reason: String,
    },

    // ═══════════════════════════════════════════════════════════════════
    // UNIT EVENTS
    // ═══════════════════════════════════════════════════════════════════
    UnitTransitioned {
        unit: UnitName,
        wave: u32,
        from: UnitStatus,
        to: UnitStatus,
        attempt: u32,
        error: Option<String>,
    },

    // ═══════════════════════════════════════════════════════════════════
    // ROLLBACK EVENTS
    // ═══════════════════════════════════════════════════════════════════
    RollbackStarted {
        wave: u32,
        units: Vec<UnitName>,
    },

    UnitRestored {
        unit: UnitName,
        wave: u32,
        restored_to: String,
    },

    RollbackFailed {
        wave: u32,
        unit: UnitName,
        reason: String,
    },

    RollbackCompleted {
        wave: u32,
    },
}

impl RunEvent {
    /// Severity derived from the event kind
    pub fn infer_severity(&self) -> EventSeverity {
        match self {
            RunEvent::RollbackFailed { .. } => EventSeverity::Critical,
            RunEvent::RunFinished { status, .. } => match status {
                RunStatus::Succeeded => EventSeverity::Info,
                RunStatus::Cancelled | RunStatus::RolledBack => EventSeverity::Warning,
                RunStatus::FailedNoRollback => EventSeverity::Critical,
                _ => EventSeverity::Error,
            },
            RunEvent::WaveFailed { .. } | RunEvent::ContextUnavailable { .. } => {
                EventSeverity::Error
            }
            RunEvent::UnitTransitioned { to, .. } => match to {
                UnitStatus::Failed => EventSeverity::Error,
                UnitStatus::Degraded | UnitStatus::RolledBack | UnitStatus::Cancelled => {
                    EventSeverity::Warning
                }
                _ => EventSeverity::Info,
            },
            RunEvent::RollbackStarted { .. } | RunEvent::CancelRequested { .. } => {
                EventSeverity::Warning
            }
            _ => EventSeverity::Info,
        }
    }

    /// Short event kind name for audit and logs
    pub fn kind(&self) -> &'static str {
        match self {
            RunEvent::RunStarted { .. } => "run_started",
            RunEvent::RunFinished { .. } => "run_finished",
            RunEvent::CancelRequested { .. } => "cancel_requested",
            RunEvent::WaveStarted { .. } => "wave_started",
            RunEvent::WaveCompleted { .. } => "wave_completed",
            RunEvent::WaveFailed { .. } => "wave_failed",
            RunEvent::ContextUnavailable { .. } => "context_unavailable",
            RunEvent::UnitTransitioned { .. } => "unit_transitioned",
            RunEvent::RollbackStarted { .. } => "rollback_started",
            RunEvent::UnitRestored { .. } => "unit_restored",
            RunEvent::RollbackFailed { .. } => "rollback_failed",
            RunEvent::RollbackCompleted { .. } => "rollback_completed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_tracks_outcome() {
        let failed = RunEvent::RunFinished {
            status: RunStatus::FailedNoRollback,
            duration_seconds: 3,
        };
        assert_eq!(failed.infer_severity(), EventSeverity::Critical);

        let healthy = RunEvent::UnitTransitioned {
            unit: "ingest".into(),
            wave: 1,
            from: UnitStatus::Progressing,
            to: UnitStatus::Healthy,
            attempt: 1,
            error: None,
        };
        assert_eq!(healthy.infer_severity(), EventSeverity::Info);

        let envelope = RunEventEnvelope::new(RunId::generate(), healthy).with_actor("ops");
        assert_eq!(envelope.severity, EventSeverity::Info);
        assert_eq!(envelope.event.kind(), "unit_transitioned");
    }
}
