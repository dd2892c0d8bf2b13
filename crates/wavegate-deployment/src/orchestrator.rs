//! Orchestrator - the per-run control loop
//!
//! Drives the waves of a plan strictly in order. For each wave it verifies
//! cluster contexts, captures rollback snapshots, launches the wave executor
//! and folds worker updates into the [`DeploymentRun`], which only this loop
//! mutates. A wave with an unresolved, non-best-effort failure halts the run
//! and is restored on its own; earlier waves are left as they are.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{error, info, instrument, warn};
use wavegate_cluster::{
    ClusterApi, ClusterContextManager, ClusterSpec, CredentialProvider, Reconciler,
    ResolvedContext,
};
use wavegate_health::{HealthGate, RetryController};
use wavegate_observability::{AuditAction, AuditEntry, AuditOutcome, AuditSink};
use wavegate_state::{RollbackCoordinator, RollbackError, RunHistory, RunLock, StateError};
use wavegate_types::{
    ClusterId, DeploymentRun, RunEvent, RunEventEnvelope, RunId, RunStatus, ServiceUnit,
    TransitionError, UnitError, UnitName, UnitRecord, UnitStatus, Wave, WavePlan, WaveSelection,
};

use crate::cancel::{CancelHandle, CancelMode};
use crate::config::OrchestratorConfig;
use crate::error::{DeploymentError, Result};
use crate::executor::{ExecutionOptions, WaveExecution, WaveExecutor};
use crate::outcome::{DryRunReport, PlannedUnit, PlannedWave, RunOutcome};

/// External collaborators and storage used by the orchestrator.
#[derive(Clone)]
pub struct Backends {
    pub api: Arc<dyn ClusterApi>,
    pub reconciler: Arc<dyn Reconciler>,
    pub credentials: Arc<dyn CredentialProvider>,
    pub history: Arc<dyn RunHistory>,
    pub lock: Arc<dyn RunLock>,
    pub audit: Arc<dyn AuditSink>,
}

/// Parameters of one deploy.
#[derive(Debug, Clone, Default)]
pub struct DeployRequest {
    pub selection: WaveSelection,
    pub force_sync: bool,
}

/// Deploys wave plans and rolls them back.
pub struct Orchestrator {
    config: OrchestratorConfig,
    clusters: Vec<ClusterSpec>,
    backends: Backends,
    executor: WaveExecutor,
    rollback: RollbackCoordinator,
    event_tx: broadcast::Sender<RunEventEnvelope>,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig, clusters: Vec<ClusterSpec>, backends: Backends) -> Self {
        let gate = Arc::new(HealthGate::new(
            backends.reconciler.clone(),
            config.health.clone(),
        ));
        let executor = WaveExecutor::new(
            backends.api.clone(),
            backends.reconciler.clone(),
            gate,
            RetryController::new(config.retry.clone()),
            config.concurrency_per_cluster,
        );
        let rollback = RollbackCoordinator::new(backends.api.clone(), config.retry.clone());
        let (event_tx, _) = broadcast::channel(4096);

        Self {
            config,
            clusters,
            backends,
            executor,
            rollback,
            event_tx,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Subscribe to run events
    pub fn subscribe(&self) -> broadcast::Receiver<RunEventEnvelope> {
        self.event_tx.subscribe()
    }

    /// Contexts are verified, and credentials issued, once per run.
    fn context_manager(&self) -> ClusterContextManager {
        ClusterContextManager::new(
            self.clusters.clone(),
            self.backends.credentials.clone(),
            self.backends.api.clone(),
        )
    }

    // ═══════════════════════════════════════════════════════════════════
    // DEPLOY
    // ═══════════════════════════════════════════════════════════════════

    /// Runs the selected waves of `plan` to completion, rollback, or cancel.
    ///
    /// Unit failures do not make this return `Err`; they are reflected in
    /// the outcome's run status. `Err` means the run could not start (lock
    /// conflict, empty selection) or its record could not be kept.
    #[instrument(skip(self, plan, request, cancel), fields(environment = %self.config.environment, selection = %request.selection))]
    pub async fn deploy(
        &self,
        plan: &WavePlan,
        request: DeployRequest,
        cancel: &CancelHandle,
    ) -> Result<RunOutcome> {
        let selected = plan.select(&request.selection);
        if selected.is_empty() {
            return Err(DeploymentError::EmptySelection(request.selection));
        }

        let mut run = DeploymentRun::new(&self.config.environment, &selected);
        if let Err(err) = self.backends.lock.acquire(run.id(), run.clusters()) {
            warn!(run_id = %run.id(), error = %err, "Run refused");
            self.audit(
                AuditAction::LockRejected,
                &run,
                AuditOutcome::failure(err.to_string()),
            )
            .await;
            return Err(err.into());
        }

        let options = ExecutionOptions {
            force_sync: request.force_sync,
        };
        let driven = self.drive(&selected, &mut run, options, cancel).await;
        if driven.is_err() && !run.status().is_finished() {
            self.finish(&mut run, RunStatus::Failed);
        }

        let archived = self.archive(&run, AuditAction::DeployFinished).await;
        let released = self.backends.lock.release(run.id(), run.clusters());

        let rollback_errors = driven?;
        archived?;
        released?;

        info!(run_id = %run.id(), status = %run.status(), "Run finished");
        Ok(RunOutcome::new(run, rollback_errors))
    }

    async fn drive(
        &self,
        plan: &WavePlan,
        run: &mut DeploymentRun,
        options: ExecutionOptions,
        cancel: &CancelHandle,
    ) -> Result<Vec<RollbackError>> {
        run.start();
        self.audit(AuditAction::DeployStarted, run, AuditOutcome::success())
            .await;
        self.emit(
            run.id(),
            RunEvent::RunStarted {
                environment: run.environment().to_string(),
                waves: run.waves().to_vec(),
                clusters: run.clusters().iter().cloned().collect(),
            },
        );

        let manager = self.context_manager();
        let mut status = RunStatus::Succeeded;
        let mut rollback_errors = Vec::new();

        for wave in plan.waves() {
            if let Some(mode) = cancel.mode() {
                // Nothing of this wave was applied, so there is nothing to restore
                self.emit(
                    run.id(),
                    RunEvent::CancelRequested {
                        rollback: mode == CancelMode::StopAndRollback,
                    },
                );
                self.audit(AuditAction::CancelRequested, run, AuditOutcome::success())
                    .await;
                status = RunStatus::Cancelled;
                break;
            }

            run.begin_wave(wave.number);
            self.emit(
                run.id(),
                RunEvent::WaveStarted {
                    wave: wave.number,
                    units: wave.unit_names(),
                },
            );
            info!(wave = wave.number, units = wave.units.len(), "Wave started");

            let (contexts, ready) = self.prepare_wave(run, wave, &manager).await?;
            let execution = self.executor.launch(ready, &contexts, options, cancel);
            self.collect(run, wave.number, execution).await?;

            if let Some(mode) = cancel.mode() {
                let rollback = mode == CancelMode::StopAndRollback;
                self.emit(run.id(), RunEvent::CancelRequested { rollback });
                self.audit(AuditAction::CancelRequested, run, AuditOutcome::success())
                    .await;
                status = RunStatus::Cancelled;
                if rollback {
                    let contexts = self.refresh_contexts(run, wave.clusters(), &manager).await;
                    if let Some(err) = self
                        .restore_wave(run, wave.number, wave.units.clone(), &contexts)
                        .await?
                    {
                        status = RunStatus::FailedNoRollback;
                        rollback_errors.push(err);
                    }
                }
                break;
            }

            let blocking: Vec<UnitName> = run
                .blocking_failures(wave.number)
                .into_iter()
                .map(|u| u.name.clone())
                .collect();
            if blocking.is_empty() {
                run.complete_wave(wave.number);
                self.emit(run.id(), RunEvent::WaveCompleted { wave: wave.number });
                info!(wave = wave.number, "Wave completed");
                continue;
            }

            error!(wave = wave.number, failed = ?blocking, "Wave failed");
            self.emit(
                run.id(),
                RunEvent::WaveFailed {
                    wave: wave.number,
                    failed_units: blocking,
                },
            );

            if !self.config.rollback_on_failure {
                warn!(wave = wave.number, "Automatic rollback disabled; leaving wave as is");
                status = RunStatus::Failed;
                break;
            }

            // Credentials issued for the wave may have lapsed while it ran
            let contexts = self.refresh_contexts(run, wave.clusters(), &manager).await;
            status = match self
                .restore_wave(run, wave.number, wave.units.clone(), &contexts)
                .await?
            {
                None => RunStatus::RolledBack,
                Some(err) => {
                    rollback_errors.push(err);
                    RunStatus::FailedNoRollback
                }
            };
            break;
        }

        if status == RunStatus::Cancelled || cancel.is_cancelled() {
            self.cancel_pending(run)?;
        }
        self.finish(run, status);
        Ok(rollback_errors)
    }

    /// Verifies the wave's contexts and captures snapshots. Units that lose
    /// either are failed as preconditions; the rest are returned ready.
    async fn prepare_wave(
        &self,
        run: &mut DeploymentRun,
        wave: &Wave,
        manager: &ClusterContextManager,
    ) -> Result<(BTreeMap<ClusterId, ResolvedContext>, Vec<ServiceUnit>)> {
        let clusters = wave.clusters();
        let mut contexts = BTreeMap::new();
        let mut unavailable = BTreeMap::new();
        for (cluster, verified) in manager.ensure_all(clusters.iter()).await {
            match verified {
                Ok(ctx) => {
                    contexts.insert(cluster, ctx);
                }
                Err(err) => {
                    self.emit(
                        run.id(),
                        RunEvent::ContextUnavailable {
                            cluster: cluster.clone(),
                            reason: err.to_string(),
                        },
                    );
                    unavailable.insert(cluster, UnitError::from(err));
                }
            }
        }

        let mut candidates = Vec::with_capacity(wave.units.len());
        for unit in &wave.units {
            match unavailable.get(&unit.cluster) {
                Some(err) => {
                    self.record(run, wave.number, &unit.name, UnitStatus::Failed, Some(err.clone()))?
                }
                None => candidates.push(unit.clone()),
            }
        }

        let capture = self.rollback.capture(wave.number, &candidates, &contexts).await;
        let mut uncaptured = BTreeSet::new();
        for (unit, err) in capture.failures {
            let error = UnitError::Precondition(format!("rollback snapshot unavailable: {err}"));
            self.record(run, wave.number, &unit, UnitStatus::Failed, Some(error))?;
            uncaptured.insert(unit);
        }
        run.store_snapshots(wave.number, capture.snapshots);

        candidates.retain(|u| !uncaptured.contains(&u.name));
        Ok((contexts, candidates))
    }

    /// Re-verifies contexts for a restore. Unavailable ones are reported and
    /// left out; their units fail to restore.
    async fn refresh_contexts(
        &self,
        run: &DeploymentRun,
        clusters: BTreeSet<ClusterId>,
        manager: &ClusterContextManager,
    ) -> BTreeMap<ClusterId, ResolvedContext> {
        let mut contexts = BTreeMap::new();
        for (cluster, verified) in manager.ensure_all(clusters.iter()).await {
            match verified {
                Ok(ctx) => {
                    contexts.insert(cluster, ctx);
                }
                Err(err) => self.emit(
                    run.id(),
                    RunEvent::ContextUnavailable {
                        cluster,
                        reason: err.to_string(),
                    },
                ),
            }
        }
        contexts
    }

    /// Folds worker updates into the run until every worker is done.
    async fn collect(
        &self,
        run: &mut DeploymentRun,
        wave: u32,
        mut execution: WaveExecution,
    ) -> Result<()> {
        while let Some(update) = execution.next().await {
            self.record(run, wave, &update.unit, update.status, update.error)?;
        }
        execution.join().await;

        // A worker that died leaves its unit unsettled
        let unsettled: Vec<UnitName> = run
            .units_in_wave(wave)
            .filter(|u| !u.status.is_settled())
            .map(|u| u.name.clone())
            .collect();
        for unit in unsettled {
            let error = UnitError::Permanent("unit worker ended without a result".to_string());
            self.record(run, wave, &unit, UnitStatus::Failed, Some(error))?;
        }
        Ok(())
    }

    /// Restores every unit of `wave` that was applied at least once.
    /// Units that could not be restored come back as a [`RollbackError`].
    async fn restore_wave(
        &self,
        run: &mut DeploymentRun,
        wave: u32,
        units: Vec<ServiceUnit>,
        contexts: &BTreeMap<ClusterId, ResolvedContext>,
    ) -> Result<Option<RollbackError>> {
        let touched: Vec<ServiceUnit> = units
            .into_iter()
            .filter(|u| run.unit(&u.name).is_some_and(is_restorable))
            .collect();
        self.emit(
            run.id(),
            RunEvent::RollbackStarted {
                wave,
                units: touched.iter().map(|u| u.name.clone()).collect(),
            },
        );
        warn!(wave, units = touched.len(), "Rolling back wave");

        let snapshots = run.snapshots_for(wave).to_vec();
        let report = self
            .rollback
            .restore(wave, &touched, &snapshots, contexts)
            .await;

        for restored in &report.restored {
            run.record_restored(&restored.unit, restored.restored_to.clone());
            self.record(run, wave, &restored.unit, UnitStatus::RolledBack, None)?;
            self.emit(
                run.id(),
                RunEvent::UnitRestored {
                    unit: restored.unit.clone(),
                    wave,
                    restored_to: restored.restored_to.clone(),
                },
            );
        }
        for failure in &report.failures {
            self.emit(
                run.id(),
                RunEvent::RollbackFailed {
                    wave,
                    unit: failure.unit.clone(),
                    reason: failure.reason.clone(),
                },
            );
        }

        let failed = report.into_result().err();
        let outcome = match &failed {
            None => {
                self.emit(run.id(), RunEvent::RollbackCompleted { wave });
                AuditOutcome::success()
            }
            Some(err) => {
                error!(error = %err, "Rollback incomplete; manual intervention required");
                AuditOutcome::partial(err.to_string())
            }
        };
        self.audit(AuditAction::WaveRolledBack { wave }, run, outcome)
            .await;

        Ok(failed)
    }

    fn cancel_pending(&self, run: &mut DeploymentRun) -> Result<()> {
        let pending: Vec<(UnitName, u32)> = run
            .units()
            .filter(|u| u.status == UnitStatus::Pending)
            .map(|u| (u.name.clone(), u.wave))
            .collect();
        for (unit, wave) in pending {
            self.record(run, wave, &unit, UnitStatus::Cancelled, None)?;
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════
    // MANUAL ROLLBACK
    // ═══════════════════════════════════════════════════════════════════

    /// Restores waves of the latest archived run from its snapshots.
    ///
    /// Without `to_wave`, only the last applied wave; with it, every applied
    /// wave at or after `to_wave`, last first. Units are restored from the
    /// cluster and manifest the run recorded; `plan` only contributes the
    /// remaining settings of units that are still declared.
    #[instrument(skip(self, plan))]
    pub async fn rollback(&self, plan: &WavePlan, to_wave: Option<u32>) -> Result<RunOutcome> {
        let mut run = self
            .backends
            .history
            .latest()
            .await?
            .ok_or(StateError::NoRunsRecorded)?;

        let waves = restorable_waves(&run, to_wave);
        if waves.is_empty() {
            return Err(StateError::NothingToRollBack {
                wave: to_wave.unwrap_or(1),
            }
            .into());
        }

        let clusters: BTreeSet<ClusterId> = run
            .units()
            .filter(|u| waves.contains(&u.wave) && is_restorable(u))
            .map(|u| u.cluster.clone())
            .collect();
        self.backends.lock.acquire(run.id(), &clusters)?;

        let restored = self.restore_waves(plan, &mut run, &waves).await;
        if restored.is_err() && !run.status().is_finished() {
            self.finish(&mut run, RunStatus::FailedNoRollback);
        }
        let from_wave = waves.last().copied().unwrap_or(1);
        let archived = self
            .archive(&run, AuditAction::ManualRollback { from_wave })
            .await;
        let released = self.backends.lock.release(run.id(), &clusters);

        let rollback_errors = restored?;
        archived?;
        released?;

        info!(run_id = %run.id(), status = %run.status(), "Manual rollback finished");
        Ok(RunOutcome::new(run, rollback_errors))
    }

    async fn restore_waves(
        &self,
        plan: &WavePlan,
        run: &mut DeploymentRun,
        waves: &[u32],
    ) -> Result<Vec<RollbackError>> {
        let manager = self.context_manager();
        let mut failures = Vec::new();

        for &wave in waves {
            let units: Vec<ServiceUnit> = run
                .units_in_wave(wave)
                .filter(|u| is_restorable(u))
                .map(|record| unit_for_restore(plan, record))
                .collect();
            let clusters: BTreeSet<ClusterId> = units.iter().map(|u| u.cluster.clone()).collect();
            let contexts = self.refresh_contexts(run, clusters, &manager).await;

            failures.extend(self.restore_wave(run, wave, units, &contexts).await?);
        }

        let status = if failures.is_empty() {
            RunStatus::RolledBack
        } else {
            RunStatus::FailedNoRollback
        };
        self.finish(run, status);
        Ok(failures)
    }

    // ═══════════════════════════════════════════════════════════════════
    // READ-ONLY OPERATIONS
    // ═══════════════════════════════════════════════════════════════════

    /// Verifies contexts and reads live revisions of the selected waves
    /// without applying anything, locking, or recording a run.
    #[instrument(skip(self, plan))]
    pub async fn dry_run(&self, plan: &WavePlan, selection: &WaveSelection) -> Result<DryRunReport> {
        let selected = plan.select(selection);
        if selected.is_empty() {
            return Err(DeploymentError::EmptySelection(selection.clone()));
        }

        let clusters = selected.clusters();
        let contexts = self.context_manager().ensure_all(clusters.iter()).await;

        let mut waves = Vec::with_capacity(selected.len());
        for wave in selected.waves() {
            let mut units = Vec::with_capacity(wave.units.len());
            for unit in &wave.units {
                let (current, problem) = match contexts.get(&unit.cluster) {
                    Some(Ok(ctx)) => match self.backends.api.live_revision(ctx, unit).await {
                        Ok(live) => (live.map(|r| r.reference), None),
                        Err(err) => (None, Some(err.to_string())),
                    },
                    Some(Err(err)) => (None, Some(err.to_string())),
                    None => (None, Some(format!("cluster {} not verified", unit.cluster))),
                };
                units.push(PlannedUnit {
                    name: unit.name.clone(),
                    cluster: unit.cluster.clone(),
                    manifest: unit.manifest.as_str().to_string(),
                    best_effort: unit.best_effort,
                    current,
                    problem,
                });
            }
            waves.push(PlannedWave {
                number: wave.number,
                units,
            });
        }

        Ok(DryRunReport {
            environment: self.config.environment.clone(),
            waves,
        })
    }

    /// A run from history: the given one, or the latest.
    pub async fn status(&self, run_id: Option<&RunId>) -> Result<DeploymentRun> {
        let run = match run_id {
            Some(id) => self
                .backends
                .history
                .get(id)
                .await?
                .ok_or_else(|| StateError::RunNotFound(id.clone()))?,
            None => self
                .backends
                .history
                .latest()
                .await?
                .ok_or(StateError::NoRunsRecorded)?,
        };
        Ok(run)
    }

    /// Most recent runs, newest first.
    pub async fn history(&self, limit: usize) -> Result<Vec<DeploymentRun>> {
        Ok(self.backends.history.list(limit).await?)
    }

    // ═══════════════════════════════════════════════════════════════════
    // BOOKKEEPING
    // ═══════════════════════════════════════════════════════════════════

    /// Applies a unit status change and publishes it. Re-recording the
    /// current status publishes nothing.
    fn record(
        &self,
        run: &mut DeploymentRun,
        wave: u32,
        unit: &UnitName,
        next: UnitStatus,
        error: Option<UnitError>,
    ) -> Result<()> {
        let from = run
            .unit(unit)
            .map(|u| u.status)
            .ok_or_else(|| TransitionError::UnknownUnit(unit.clone()))?;
        if let Some(err) = &error {
            run.record_error(unit, err.clone());
        }
        if run.transition(unit, next)? {
            let attempt = run.unit(unit).map_or(0, |u| u.attempts);
            self.emit(
                run.id(),
                RunEvent::UnitTransitioned {
                    unit: unit.clone(),
                    wave,
                    from,
                    to: next,
                    attempt,
                    error: error.map(|e| e.to_string()),
                },
            );
        }
        Ok(())
    }

    fn finish(&self, run: &mut DeploymentRun, status: RunStatus) {
        run.finish(status);
        let duration_seconds = run
            .finished_at()
            .map(|end| (end - run.started_at()).num_seconds().max(0) as u64)
            .unwrap_or(0);
        self.emit(
            run.id(),
            RunEvent::RunFinished {
                status,
                duration_seconds,
            },
        );
    }

    async fn archive(&self, run: &DeploymentRun, action: AuditAction) -> Result<()> {
        let appended = self.backends.history.append(run).await;
        let outcome = match run.status() {
            RunStatus::Succeeded => AuditOutcome::success(),
            RunStatus::RolledBack if matches!(action, AuditAction::ManualRollback { .. }) => {
                AuditOutcome::success()
            }
            status => AuditOutcome::failure(status.to_string()),
        };
        self.audit(action, run, outcome).await;
        Ok(appended?)
    }

    /// Audit is an observer: a write failure is logged, never fatal.
    async fn audit(&self, action: AuditAction, run: &DeploymentRun, outcome: AuditOutcome) {
        let entry = AuditEntry::builder()
            .environment(run.environment())
            .actor(&self.config.actor)
            .action(action)
            .run(run.id().clone())
            .outcome(outcome)
            .context("status", run.status())
            .context("clusters", run.clusters())
            .build();

        let written = match entry {
            Ok(partial) => self.backends.audit.write(partial).await.map(|_| ()),
            Err(err) => Err(err),
        };
        if let Err(err) = written {
            warn!(run_id = %run.id(), error = %err, "Failed to write audit entry");
        }
    }

    fn emit(&self, run_id: &RunId, event: RunEvent) {
        let envelope = RunEventEnvelope::new(run_id.clone(), event).with_actor(&self.config.actor);
        let _ = self.event_tx.send(envelope);
    }
}

/// Applied at least once and not already restored.
fn is_restorable(record: &UnitRecord) -> bool {
    record.attempts > 0 && record.status != UnitStatus::RolledBack
}

fn restorable_waves(run: &DeploymentRun, to_wave: Option<u32>) -> Vec<u32> {
    let mut waves: Vec<u32> = run
        .snapshots()
        .keys()
        .copied()
        .filter(|&wave| run.units_in_wave(wave).any(is_restorable))
        .collect();
    waves.sort_unstable_by(|a, b| b.cmp(a));
    match to_wave {
        Some(from) => waves.retain(|&w| w >= from),
        None => waves.truncate(1),
    }
    waves
}

/// The unit as the run applied it. A record without a manifest keeps an
/// empty reference, which the coordinator refuses to remove from.
fn unit_for_restore(plan: &WavePlan, record: &UnitRecord) -> ServiceUnit {
    let mut unit = plan.unit(&record.name).cloned().unwrap_or_else(|| {
        ServiceUnit::new(record.name.as_str(), record.cluster.as_str(), record.manifest.as_str())
    });
    unit.cluster = record.cluster.clone();
    unit.manifest = record.manifest.clone();
    unit
}
