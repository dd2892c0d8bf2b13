//! User-visible results of orchestrator operations

use serde::Serialize;
use wavegate_state::RollbackError;
use wavegate_types::{ClusterId, DeploymentRun, RunStatus, UnitName, UnitStatus};

/// A unit that did not end healthy, with its last error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedUnit {
    pub name: UnitName,
    pub wave: u32,
    pub status: UnitStatus,
    pub error: String,
}

/// A unit that could not be restored and needs an operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManualIntervention {
    pub unit: UnitName,
    pub wave: u32,
    pub reason: String,
}

fn interventions(err: RollbackError) -> impl Iterator<Item = ManualIntervention> {
    let wave = err.wave;
    err.failures
        .into_iter()
        .map(move |(unit, reason)| ManualIntervention { unit, wave, reason })
}

/// Result of a deploy or rollback.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub run: DeploymentRun,
    pub manual_intervention: Vec<ManualIntervention>,
}

impl RunOutcome {
    pub fn new(run: DeploymentRun, rollback_errors: Vec<RollbackError>) -> Self {
        Self {
            run,
            manual_intervention: rollback_errors.into_iter().flat_map(interventions).collect(),
        }
    }

    pub fn status(&self) -> RunStatus {
        self.run.status()
    }

    pub fn is_success(&self) -> bool {
        self.status() == RunStatus::Succeeded
    }

    pub fn failed_units(&self) -> Vec<FailedUnit> {
        self.run
            .failed_units()
            .into_iter()
            .map(|record| FailedUnit {
                name: record.name.clone(),
                wave: record.wave,
                status: record.status,
                error: record
                    .last_error
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_default(),
            })
            .collect()
    }

    /// Units rolled back, with what they were restored to.
    pub fn restored(&self) -> Vec<(UnitName, String)> {
        self.run
            .units()
            .filter_map(|u| u.restored_to.clone().map(|to| (u.name.clone(), to)))
            .collect()
    }
}

/// What a deploy would touch, without touching it.
#[derive(Debug, Clone, Serialize)]
pub struct DryRunReport {
    pub environment: String,
    pub waves: Vec<PlannedWave>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlannedWave {
    pub number: u32,
    pub units: Vec<PlannedUnit>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlannedUnit {
    pub name: UnitName,
    pub cluster: ClusterId,
    pub manifest: String,
    pub best_effort: bool,
    /// Live revision the apply would replace; `None` means it would be created
    pub current: Option<String>,
    /// Why the unit could not be inspected
    pub problem: Option<String>,
}

impl DryRunReport {
    /// Units whose cluster or live state could not be read.
    pub fn problems(&self) -> impl Iterator<Item = &PlannedUnit> {
        self.waves
            .iter()
            .flat_map(|w| w.units.iter())
            .filter(|u| u.problem.is_some())
    }
}
