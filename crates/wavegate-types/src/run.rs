//! Deployment run record
//!
//! A DeploymentRun is created per invocation and owned by exactly one control
//! loop. All unit status changes go through [`DeploymentRun::transition`],
//! which enforces the unit state machine.

use crate::{
    ClusterId, ManifestRef, RunId, RunStatus, TransitionError, UnitError, UnitName, UnitStatus, WavePlan,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A live revision of a unit, sufficient to re-apply it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    /// Reconciler revision or resource version
    pub reference: String,
    /// Serialized live object, when the cluster returned one
    #[serde(default)]
    pub document: Option<String>,
}

impl Revision {
    pub fn new(reference: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            document: None,
        }
    }

    pub fn with_document(mut self, document: impl Into<String>) -> Self {
        self.document = Some(document.into());
        self
    }
}

/// Pre-wave state of one unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackSnapshot {
    pub unit: UnitName,
    pub cluster: ClusterId,
    pub wave: u32,
    /// `None` when the unit did not exist before the wave
    pub previous: Option<Revision>,
    pub captured_at: DateTime<Utc>,
}

impl RollbackSnapshot {
    pub fn describe_previous(&self) -> String {
        match &self.previous {
            Some(rev) => rev.reference.clone(),
            None => "<absent>".to_string(),
        }
    }
}

/// Per-unit outcome tracked by the run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitRecord {
    pub name: UnitName,
    pub cluster: ClusterId,
    /// Manifest applied by this run; restores remove or re-apply from it
    #[serde(default)]
    pub manifest: ManifestRef,
    pub wave: u32,
    pub best_effort: bool,
    pub status: UnitStatus,
    /// Apply attempts started
    pub attempts: u32,
    pub last_error: Option<UnitError>,
    /// What the unit was restored to, if it was rolled back
    pub restored_to: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Mutable record of one orchestration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentRun {
    id: RunId,
    environment: String,
    status: RunStatus,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    current_wave: Option<u32>,
    waves: Vec<u32>,
    completed_waves: Vec<u32>,
    clusters: BTreeSet<ClusterId>,
    units: BTreeMap<UnitName, UnitRecord>,
    snapshots: BTreeMap<u32, Vec<RollbackSnapshot>>,
}

impl DeploymentRun {
    pub fn new(environment: impl Into<String>, plan: &WavePlan) -> Self {
        let now = Utc::now();
        let units = plan
            .waves()
            .iter()
            .flat_map(|wave| {
                wave.units.iter().map(move |unit| {
                    (
                        unit.name.clone(),
                        UnitRecord {
                            name: unit.name.clone(),
                            cluster: unit.cluster.clone(),
                            manifest: unit.manifest.clone(),
                            wave: wave.number,
                            best_effort: unit.best_effort,
                            status: UnitStatus::Pending,
                            attempts: 0,
                            last_error: None,
                            restored_to: None,
                            updated_at: now,
                        },
                    )
                })
            })
            .collect();

        Self {
            id: RunId::generate(),
            environment: environment.into(),
            status: RunStatus::Pending,
            started_at: now,
            finished_at: None,
            current_wave: None,
            waves: plan.waves().iter().map(|w| w.number).collect(),
            completed_waves: Vec::new(),
            clusters: plan.clusters(),
            units,
            snapshots: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> &RunId {
        &self.id
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    pub fn current_wave(&self) -> Option<u32> {
        self.current_wave
    }

    /// Wave numbers selected for this run, in execution order
    pub fn waves(&self) -> &[u32] {
        &self.waves
    }

    pub fn completed_waves(&self) -> &[u32] {
        &self.completed_waves
    }

    pub fn clusters(&self) -> &BTreeSet<ClusterId> {
        &self.clusters
    }

    pub fn unit(&self, name: &UnitName) -> Option<&UnitRecord> {
        self.units.get(name)
    }

    pub fn units(&self) -> impl Iterator<Item = &UnitRecord> {
        self.units.values()
    }

    pub fn units_in_wave(&self, wave: u32) -> impl Iterator<Item = &UnitRecord> {
        self.units.values().filter(move |u| u.wave == wave)
    }

    pub fn snapshots(&self) -> &BTreeMap<u32, Vec<RollbackSnapshot>> {
        &self.snapshots
    }

    pub fn snapshots_for(&self, wave: u32) -> &[RollbackSnapshot] {
        self.snapshots.get(&wave).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Units that block their wave: failed and not best-effort
    pub fn blocking_failures(&self, wave: u32) -> Vec<&UnitRecord> {
        self.units_in_wave(wave)
            .filter(|u| u.status == UnitStatus::Failed && !u.best_effort)
            .collect()
    }

    pub fn failed_units(&self) -> Vec<&UnitRecord> {
        self.units
            .values()
            .filter(|u| u.last_error.is_some() && u.status != UnitStatus::Healthy)
            .collect()
    }

    pub fn start(&mut self) {
        if self.status == RunStatus::Pending {
            self.status = RunStatus::Running;
        }
    }

    pub fn begin_wave(&mut self, wave: u32) {
        self.current_wave = Some(wave);
    }

    pub fn complete_wave(&mut self, wave: u32) {
        if !self.completed_waves.contains(&wave) {
            self.completed_waves.push(wave);
        }
    }

    pub fn store_snapshots(&mut self, wave: u32, snapshots: Vec<RollbackSnapshot>) {
        self.snapshots.insert(wave, snapshots);
    }

    /// Applies a status change.
    ///
    /// Returns `Ok(false)` when the unit is already in `next`, so repeated
    /// observations of the same state leave the record untouched.
    pub fn transition(
        &mut self,
        unit: &UnitName,
        next: UnitStatus,
    ) -> Result<bool, TransitionError> {
        let record = self
            .units
            .get_mut(unit)
            .ok_or_else(|| TransitionError::UnknownUnit(unit.clone()))?;

        if record.status == next {
            return Ok(false);
        }
        if !record.status.can_transition_to(next) {
            return Err(TransitionError::Illegal {
                unit: unit.clone(),
                from: record.status,
                to: next,
            });
        }

        if next == UnitStatus::Applying {
            record.attempts += 1;
        }
        record.status = next;
        record.updated_at = Utc::now();
        Ok(true)
    }

    pub fn record_error(&mut self, unit: &UnitName, error: UnitError) {
        if let Some(record) = self.units.get_mut(unit) {
            record.last_error = Some(error);
            record.updated_at = Utc::now();
        }
    }

    pub fn record_restored(&mut self, unit: &UnitName, restored_to: impl Into<String>) {
        if let Some(record) = self.units.get_mut(unit) {
            record.restored_to = Some(restored_to.into());
            record.updated_at = Utc::now();
        }
    }

    /// Sets the final status and stamps the finish time.
    pub fn finish(&mut self, status: RunStatus) {
        self.status = status;
        self.finished_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ServiceUnit, Wave};

    fn run() -> DeploymentRun {
        let plan = WavePlan::new(vec![
            Wave {
                number: 1,
                units: vec![ServiceUnit::new("ingest", "primary", "i.yaml")],
            },
            Wave {
                number: 2,
                units: vec![ServiceUnit::new("quality", "primary", "q.yaml").best_effort()],
            },
        ]);
        DeploymentRun::new("dev", &plan)
    }

    #[test]
    fn new_run_starts_all_units_pending() {
        let run = run();
        assert_eq!(run.status(), RunStatus::Pending);
        assert!(run.units().all(|u| u.status == UnitStatus::Pending));
        assert_eq!(run.waves(), &[1, 2]);
        assert_eq!(run.unit(&"quality".into()).unwrap().wave, 2);
        assert_eq!(run.unit(&"quality".into()).unwrap().manifest.as_str(), "q.yaml");
    }

    #[test]
    fn transitions_follow_state_machine() {
        let mut run = run();
        let unit = UnitName::new("ingest");

        assert!(run.transition(&unit, UnitStatus::Applying).unwrap());
        assert!(run.transition(&unit, UnitStatus::Progressing).unwrap());
        assert!(!run.transition(&unit, UnitStatus::Progressing).unwrap());
        assert!(run.transition(&unit, UnitStatus::Healthy).unwrap());

        let err = run.transition(&unit, UnitStatus::Applying).unwrap_err();
        assert!(matches!(err, TransitionError::Illegal { .. }));
        assert_eq!(run.unit(&unit).unwrap().attempts, 1);
    }

    #[test]
    fn unknown_unit_is_rejected() {
        let mut run = run();
        let err = run
            .transition(&UnitName::new("ghost"), UnitStatus::Applying)
            .unwrap_err();
        assert_eq!(err, TransitionError::UnknownUnit(UnitName::new("ghost")));
    }

    #[test]
    fn best_effort_failures_do_not_block() {
        let mut run = run();
        let unit = UnitName::new("quality");
        run.transition(&unit, UnitStatus::Applying).unwrap();
        run.transition(&unit, UnitStatus::Failed).unwrap();
        assert!(run.blocking_failures(2).is_empty());
    }

    #[test]
    fn run_record_survives_json() {
        let mut run = run();
        run.start();
        run.finish(RunStatus::Succeeded);
        let json = serde_json::to_string(&run).unwrap();
        let back: DeploymentRun = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id(), run.id());
        assert_eq!(back.status(), RunStatus::Succeeded);
        assert!(back.finished_at().is_some());
    }
}
