//! Status Reporter
//!
//! A pure observer of the run event stream. It keeps a per-run view of wave
//! and unit progress and logs each event at its severity; it never sends
//! anything back to the orchestrator.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use wavegate_types::{
    ClusterId, DeploymentRun, EventSeverity, RunEvent, RunEventEnvelope, RunId, RunStatus,
    UnitName, UnitStatus,
};

/// Observed state of one unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitView {
    pub name: UnitName,
    pub cluster: Option<ClusterId>,
    pub wave: u32,
    pub status: UnitStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub restored_to: Option<String>,
}

impl UnitView {
    fn pending(name: UnitName, wave: u32) -> Self {
        Self {
            name,
            cluster: None,
            wave,
            status: UnitStatus::Pending,
            attempts: 0,
            last_error: None,
            restored_to: None,
        }
    }
}

/// Observed state of one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunView {
    pub run_id: RunId,
    pub environment: String,
    pub status: RunStatus,
    pub current_wave: Option<u32>,
    pub waves: Vec<u32>,
    pub completed_waves: Vec<u32>,
    pub units: BTreeMap<UnitName, UnitView>,
    /// Units whose restore failed, with the reason
    pub rollback_failures: Vec<(UnitName, String)>,
}

impl RunView {
    fn new(run_id: RunId) -> Self {
        Self {
            run_id,
            environment: String::new(),
            status: RunStatus::Pending,
            current_wave: None,
            waves: Vec::new(),
            completed_waves: Vec::new(),
            units: BTreeMap::new(),
            rollback_failures: Vec::new(),
        }
    }

    /// View of a persisted run record, as shown by `status`.
    pub fn from_run(run: &DeploymentRun) -> Self {
        let units = run
            .units()
            .map(|record| {
                (
                    record.name.clone(),
                    UnitView {
                        name: record.name.clone(),
                        cluster: Some(record.cluster.clone()),
                        wave: record.wave,
                        status: record.status,
                        attempts: record.attempts,
                        last_error: record.last_error.as_ref().map(ToString::to_string),
                        restored_to: record.restored_to.clone(),
                    },
                )
            })
            .collect();

        Self {
            run_id: run.id().clone(),
            environment: run.environment().to_string(),
            status: run.status(),
            current_wave: run.current_wave(),
            waves: run.waves().to_vec(),
            completed_waves: run.completed_waves().to_vec(),
            units,
            rollback_failures: Vec::new(),
        }
    }

    pub fn count(&self, status: UnitStatus) -> usize {
        self.units.values().filter(|u| u.status == status).count()
    }

    /// Units in a wave, in name order
    pub fn wave_units(&self, wave: u32) -> impl Iterator<Item = &UnitView> {
        self.units.values().filter(move |u| u.wave == wave)
    }

    fn unit_mut(&mut self, name: &UnitName, wave: u32) -> &mut UnitView {
        self.units
            .entry(name.clone())
            .or_insert_with(|| UnitView::pending(name.clone(), wave))
    }

    /// Folds one event into the view.
    pub fn apply(&mut self, event: &RunEvent) {
        match event {
            RunEvent::RunStarted {
                environment, waves, ..
            } => {
                self.environment = environment.clone();
                self.waves = waves.clone();
                self.status = RunStatus::Running;
            }
            RunEvent::RunFinished { status, .. } => self.status = *status,
            RunEvent::CancelRequested { .. } | RunEvent::ContextUnavailable { .. } => {}
            RunEvent::WaveStarted { wave, units } => {
                self.current_wave = Some(*wave);
                for name in units {
                    self.unit_mut(name, *wave);
                }
            }
            RunEvent::WaveCompleted { wave } => {
                if !self.completed_waves.contains(wave) {
                    self.completed_waves.push(*wave);
                }
            }
            RunEvent::WaveFailed { wave, .. } | RunEvent::RollbackStarted { wave, .. } => {
                self.current_wave = Some(*wave);
            }
            RunEvent::UnitTransitioned {
                unit,
                wave,
                to,
                attempt,
                error,
                ..
            } => {
                let view = self.unit_mut(unit, *wave);
                view.status = *to;
                view.attempts = *attempt;
                if let Some(error) = error {
                    view.last_error = Some(error.clone());
                }
            }
            RunEvent::UnitRestored {
                unit,
                wave,
                restored_to,
            } => {
                self.unit_mut(unit, *wave).restored_to = Some(restored_to.clone());
            }
            RunEvent::RollbackFailed { unit, reason, .. } => {
                self.rollback_failures.push((unit.clone(), reason.clone()));
            }
            RunEvent::RollbackCompleted { .. } => {}
        }
    }
}

/// One-line human description of an event.
pub fn describe(event: &RunEvent) -> String {
    match event {
        RunEvent::RunStarted {
            environment,
            waves,
            clusters,
        } => format!(
            "run started in {environment}: {} wave(s) across {} cluster(s)",
            waves.len(),
            clusters.len()
        ),
        RunEvent::RunFinished {
            status,
            duration_seconds,
        } => format!("run finished: {status} after {duration_seconds}s"),
        RunEvent::CancelRequested { rollback: true } => {
            "cancel requested, current wave will be rolled back".to_string()
        }
        RunEvent::CancelRequested { rollback: false } => "cancel requested".to_string(),
        RunEvent::WaveStarted { wave, units } => {
            format!("wave {wave} started ({} unit(s))", units.len())
        }
        RunEvent::WaveCompleted { wave } => format!("wave {wave} completed"),
        RunEvent::WaveFailed { wave, failed_units } => format!(
            "wave {wave} failed: {}",
            failed_units
                .iter()
                .map(UnitName::as_str)
                .collect::<Vec<_>>()
                .join(", ")
        ),
        RunEvent::ContextUnavailable { cluster, reason } => {
            format!("cluster {cluster} unavailable: {reason}")
        }
        RunEvent::UnitTransitioned {
            unit,
            from,
            to,
            attempt,
            error,
            ..
        } => match error {
            Some(error) => format!("{unit}: {from} -> {to} (attempt {attempt}): {error}"),
            None => format!("{unit}: {from} -> {to} (attempt {attempt})"),
        },
        RunEvent::RollbackStarted { wave, units } => {
            format!("rolling back wave {wave} ({} unit(s))", units.len())
        }
        RunEvent::UnitRestored {
            unit, restored_to, ..
        } => format!("{unit} restored to {restored_to}"),
        RunEvent::RollbackFailed { unit, reason, .. } => {
            format!("{unit} could not be restored: {reason}")
        }
        RunEvent::RollbackCompleted { wave } => format!("wave {wave} rolled back"),
    }
}

/// Tracks every run seen on the event stream.
#[derive(Default)]
pub struct StatusReporter {
    views: RwLock<HashMap<RunId, RunView>>,
    latest: RwLock<Option<RunId>>,
}

impl StatusReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&self, envelope: &RunEventEnvelope) {
        log_event(envelope);

        let mut views = self.views.write();
        let view = views
            .entry(envelope.run_id.clone())
            .or_insert_with(|| RunView::new(envelope.run_id.clone()));
        view.apply(&envelope.event);
        *self.latest.write() = Some(envelope.run_id.clone());
    }

    pub fn view(&self, run_id: &RunId) -> Option<RunView> {
        self.views.read().get(run_id).cloned()
    }

    /// View of the run that produced the most recent event.
    pub fn latest(&self) -> Option<RunView> {
        let latest = self.latest.read().clone()?;
        self.view(&latest)
    }

    /// Consumes a subscription until the sender side closes.
    pub fn attach(self: Arc<Self>, mut events: broadcast::Receiver<RunEventEnvelope>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(envelope) => self.observe(&envelope),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Status reporter fell behind the event stream");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

fn log_event(envelope: &RunEventEnvelope) {
    let message = describe(&envelope.event);
    let run_id = &envelope.run_id;
    let kind = envelope.event.kind();
    match envelope.severity {
        EventSeverity::Debug => debug!(run_id = %run_id, kind, "{message}"),
        EventSeverity::Info => info!(run_id = %run_id, kind, "{message}"),
        EventSeverity::Warning => warn!(run_id = %run_id, kind, "{message}"),
        EventSeverity::Error | EventSeverity::Critical => {
            error!(run_id = %run_id, kind, "{message}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wavegate_types::{ServiceUnit, Wave, WavePlan};

    fn transitioned(unit: &str, wave: u32, from: UnitStatus, to: UnitStatus) -> RunEvent {
        RunEvent::UnitTransitioned {
            unit: unit.into(),
            wave,
            from,
            to,
            attempt: 1,
            error: None,
        }
    }

    #[test]
    fn folds_events_into_view() {
        let reporter = StatusReporter::new();
        let run = RunId::generate();
        let send = |event| reporter.observe(&RunEventEnvelope::new(run.clone(), event));

        send(RunEvent::RunStarted {
            environment: "staging".into(),
            waves: vec![1, 2],
            clusters: vec!["primary".into()],
        });
        send(RunEvent::WaveStarted {
            wave: 1,
            units: vec!["ingest".into(), "transform".into()],
        });
        send(transitioned("ingest", 1, UnitStatus::Pending, UnitStatus::Applying));
        send(transitioned("ingest", 1, UnitStatus::Applying, UnitStatus::Progressing));
        send(transitioned("ingest", 1, UnitStatus::Progressing, UnitStatus::Healthy));

        let view = reporter.latest().unwrap();
        assert_eq!(view.status, RunStatus::Running);
        assert_eq!(view.current_wave, Some(1));
        assert_eq!(view.units[&UnitName::new("ingest")].status, UnitStatus::Healthy);
        assert_eq!(view.units[&UnitName::new("transform")].status, UnitStatus::Pending);
        assert_eq!(view.count(UnitStatus::Pending), 1);

        send(RunEvent::UnitRestored {
            unit: "ingest".into(),
            wave: 1,
            restored_to: "<absent>".into(),
        });
        send(RunEvent::RunFinished {
            status: RunStatus::RolledBack,
            duration_seconds: 12,
        });
        let view = reporter.view(&run).unwrap();
        assert_eq!(view.status, RunStatus::RolledBack);
        assert_eq!(
            view.units[&UnitName::new("ingest")].restored_to.as_deref(),
            Some("<absent>")
        );
    }

    #[test]
    fn view_of_persisted_run() {
        let plan = WavePlan::new(vec![Wave {
            number: 1,
            units: vec![ServiceUnit::new("ingest", "primary", "i.yaml")],
        }]);
        let run = DeploymentRun::new("prod", &plan);
        let view = RunView::from_run(&run);
        assert_eq!(view.environment, "prod");
        assert_eq!(
            view.units[&UnitName::new("ingest")].cluster,
            Some(ClusterId::new("primary"))
        );
    }

    #[tokio::test]
    async fn attached_reporter_stops_when_stream_closes() {
        let (tx, rx) = broadcast::channel(16);
        let reporter = Arc::new(StatusReporter::new());
        let handle = reporter.clone().attach(rx);

        let run = RunId::generate();
        tx.send(RunEventEnvelope::new(
            run.clone(),
            RunEvent::WaveCompleted { wave: 1 },
        ))
        .unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(reporter.view(&run).unwrap().completed_waves, vec![1]);
    }
}
