//! Wave Executor
//!
//! Applies every unit of a wave concurrently, bounded per cluster, and
//! drives each unit through apply, health gate and retry. Workers never
//! touch the run record: each status change is sent to the control loop
//! as a [`UnitUpdate`].

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};
use wavegate_cluster::{ClusterApi, Reconciler, ResolvedContext};
use wavegate_health::{HealthGate, RetryController, RetryDecision};
use wavegate_types::{
    Classify, ClusterId, ErrorClass, RetryPolicy, ServiceUnit, UnitError, UnitName, UnitStatus,
};

use crate::cancel::CancelHandle;

/// A status change reported by a unit worker.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitUpdate {
    pub unit: UnitName,
    pub status: UnitStatus,
    pub error: Option<UnitError>,
}

/// Per-wave execution options.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecutionOptions {
    /// Ask the reconciler for a hard refresh after every apply
    pub force_sync: bool,
}

/// Launches unit workers for one wave at a time.
pub struct WaveExecutor {
    api: Arc<dyn ClusterApi>,
    reconciler: Arc<dyn Reconciler>,
    gate: Arc<HealthGate>,
    retry: RetryController,
    concurrency_per_cluster: usize,
}

impl WaveExecutor {
    pub fn new(
        api: Arc<dyn ClusterApi>,
        reconciler: Arc<dyn Reconciler>,
        gate: Arc<HealthGate>,
        retry: RetryController,
        concurrency_per_cluster: usize,
    ) -> Self {
        Self {
            api,
            reconciler,
            gate,
            retry,
            concurrency_per_cluster: concurrency_per_cluster.max(1),
        }
    }

    /// Spawns one worker per unit. Units without a context must be settled
    /// by the caller beforehand; they are skipped here.
    #[instrument(skip_all, fields(units = units.len()))]
    pub fn launch(
        &self,
        units: Vec<ServiceUnit>,
        contexts: &BTreeMap<ClusterId, ResolvedContext>,
        options: ExecutionOptions,
        cancel: &CancelHandle,
    ) -> WaveExecution {
        let (tx, rx) = mpsc::channel(256);
        let mut tasks = JoinSet::new();
        let mut permits: HashMap<ClusterId, Arc<Semaphore>> = HashMap::new();

        for unit in units {
            let Some(ctx) = contexts.get(&unit.cluster) else {
                warn!(unit = %unit.name, cluster = %unit.cluster, "No verified context; unit not launched");
                continue;
            };
            let semaphore = permits
                .entry(unit.cluster.clone())
                .or_insert_with(|| Arc::new(Semaphore::new(self.concurrency_per_cluster)))
                .clone();

            let worker = UnitWorker {
                api: self.api.clone(),
                reconciler: self.reconciler.clone(),
                gate: self.gate.clone(),
                retry: self.retry.clone(),
                policy: self.retry.policy_for(&unit),
                ctx: ctx.clone(),
                unit,
                options,
                cancel: cancel.clone(),
                updates: tx.clone(),
            };
            tasks.spawn(worker.run(semaphore));
        }

        WaveExecution { updates: rx, tasks }
    }
}

/// Handle on a launched wave.
pub struct WaveExecution {
    updates: mpsc::Receiver<UnitUpdate>,
    tasks: JoinSet<()>,
}

impl WaveExecution {
    /// Next update; `None` once every worker has finished.
    pub async fn next(&mut self) -> Option<UnitUpdate> {
        self.updates.recv().await
    }

    /// Joins all workers. Returns how many ended abnormally.
    pub async fn join(mut self) -> usize {
        let mut abnormal = 0;
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(err) = joined {
                warn!(error = %err, "Unit worker ended abnormally");
                abnormal += 1;
            }
        }
        abnormal
    }
}

struct UnitWorker {
    api: Arc<dyn ClusterApi>,
    reconciler: Arc<dyn Reconciler>,
    gate: Arc<HealthGate>,
    retry: RetryController,
    policy: RetryPolicy,
    ctx: ResolvedContext,
    unit: ServiceUnit,
    options: ExecutionOptions,
    cancel: CancelHandle,
    updates: mpsc::Sender<UnitUpdate>,
}

impl UnitWorker {
    async fn run(self, semaphore: Arc<Semaphore>) {
        let permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            permit = semaphore.acquire_owned() => permit.ok(),
        };
        let Some(_permit) = permit else {
            self.report(UnitStatus::Cancelled, None).await;
            return;
        };
        if self.cancel.is_cancelled() {
            self.report(UnitStatus::Cancelled, None).await;
            return;
        }

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            self.report(UnitStatus::Applying, None).await;

            let error = match self.attempt().await {
                Ok(()) => {
                    info!(unit = %self.unit.name, attempt, "Unit healthy");
                    self.report(UnitStatus::Healthy, None).await;
                    return;
                }
                Err(error) => error,
            };

            let class = error.class();
            if class != ErrorClass::Transient {
                warn!(unit = %self.unit.name, attempt, error = %error, "Unit failed");
                self.report(UnitStatus::Failed, Some(error)).await;
                return;
            }

            self.report(UnitStatus::Degraded, Some(error.clone())).await;
            match self.retry.decide(&self.policy, attempt, class) {
                RetryDecision::RetryAfter(delay) => {
                    debug!(unit = %self.unit.name, attempt, delay_secs = delay.as_secs(), "Retrying unit");
                    let cancelled = tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => true,
                        _ = tokio::time::sleep(delay) => false,
                    };
                    if cancelled {
                        info!(unit = %self.unit.name, "Run cancelled; no further attempts");
                        return;
                    }
                }
                RetryDecision::GiveUp(reason) => {
                    let accepted = self.unit.best_effort
                        && matches!(error, UnitError::HealthTimeout { .. });
                    if accepted {
                        warn!(unit = %self.unit.name, ?reason, "Best-effort unit left degraded");
                    } else {
                        warn!(unit = %self.unit.name, ?reason, error = %error, "Unit failed after retries");
                        self.report(UnitStatus::Failed, Some(error)).await;
                    }
                    return;
                }
            }
        }
    }

    /// One apply plus health gate. Reports Progressing once the apply lands.
    async fn attempt(&self) -> Result<(), UnitError> {
        let outcome = self.api.apply(&self.ctx, &self.unit).await?;
        debug!(unit = %self.unit.name, ?outcome, "Applied");

        if self.options.force_sync {
            if let Err(err) = self.reconciler.request_sync(&self.ctx, &self.unit).await {
                warn!(unit = %self.unit.name, error = %err, "Sync request failed; relying on reconciler polling");
            }
        }

        self.report(UnitStatus::Progressing, None).await;
        self.gate
            .wait_until_healthy(&self.ctx, &self.unit)
            .await
            .into_result(&self.unit)
            .map(|_| ())
            .map_err(UnitError::from)
    }

    async fn report(&self, status: UnitStatus, error: Option<UnitError>) {
        let update = UnitUpdate {
            unit: self.unit.name.clone(),
            status,
            error,
        };
        if self.updates.send(update).await.is_err() {
            warn!(unit = %self.unit.name, "Control loop no longer listening");
        }
    }
}
