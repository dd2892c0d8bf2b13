//! Health gate.
//!
//! Polls a unit's sync and health axes at a fixed interval until both reach
//! terminal success or the unit's timeout elapses. Transient read errors are
//! logged and polling continues; any other read error ends the gate. A read
//! still outstanding at the deadline is abandoned.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};
use wavegate_cluster::{ClusterError, Reconciler, ResolvedContext};
use wavegate_types::{Classify, ErrorClass, ReconcileStatus, ServiceUnit};

use crate::config::HealthGateConfig;
use crate::error::{HealthError, HealthResult};

/// How a gate ended.
#[derive(Debug, Clone)]
pub enum GateOutcome {
    /// Synced and Healthy.
    Healthy { status: ReconcileStatus, polls: u32 },

    /// Timeout elapsed before convergence.
    TimedOut {
        waited: Duration,
        last: Option<ReconcileStatus>,
        polls: u32,
    },

    /// A non-transient status read error.
    Failed(ClusterError),
}

impl GateOutcome {
    pub fn is_healthy(&self) -> bool {
        matches!(self, GateOutcome::Healthy { .. })
    }

    pub fn into_result(self, unit: &ServiceUnit) -> HealthResult<ReconcileStatus> {
        match self {
            GateOutcome::Healthy { status, .. } => Ok(status),
            GateOutcome::TimedOut { waited, last, .. } => Err(HealthError::Timeout {
                unit: unit.name.clone(),
                waited,
                last_observed: last
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "nothing".to_string()),
            }),
            GateOutcome::Failed(err) => Err(HealthError::Reconciler(err)),
        }
    }
}

/// Polls the reconciler for a unit's convergence.
pub struct HealthGate {
    reconciler: Arc<dyn Reconciler>,
    config: HealthGateConfig,
}

impl HealthGate {
    pub fn new(reconciler: Arc<dyn Reconciler>, config: HealthGateConfig) -> Self {
        Self { reconciler, config }
    }

    pub fn config(&self) -> &HealthGateConfig {
        &self.config
    }

    /// Effective timeout for a unit.
    pub fn timeout_for(&self, unit: &ServiceUnit) -> Duration {
        unit.health_timeout.unwrap_or(self.config.default_timeout)
    }

    /// Single status read. Has no side effects on the cluster.
    pub async fn observe(
        &self,
        ctx: &ResolvedContext,
        unit: &ServiceUnit,
    ) -> Result<ReconcileStatus, ClusterError> {
        self.reconciler.status(ctx, unit).await
    }

    /// Polls until converged, timed out, or a non-transient read error.
    ///
    /// A unit that is already converged returns after a single read.
    #[instrument(skip(self, ctx, unit), fields(unit = %unit.name, cluster = %ctx.cluster))]
    pub async fn wait_until_healthy(&self, ctx: &ResolvedContext, unit: &ServiceUnit) -> GateOutcome {
        let timeout = self.timeout_for(unit);
        let started = Instant::now();
        let deadline = started + timeout;
        let mut last: Option<ReconcileStatus> = None;
        let mut polls = 0u32;

        loop {
            polls += 1;
            let observed = match tokio::time::timeout_at(deadline, self.observe(ctx, unit)).await {
                Ok(observed) => observed,
                Err(_) => {
                    warn!(unit = %unit.name, "Status read outlived the health gate");
                    return timed_out(unit, started, last, polls);
                }
            };
            match observed {
                Ok(status) if status.is_converged() => {
                    info!(unit = %unit.name, polls, "Unit healthy");
                    return GateOutcome::Healthy { status, polls };
                }
                Ok(status) => {
                    debug!(unit = %unit.name, status = %status, "Unit not yet converged");
                    last = Some(status);
                }
                Err(err) if err.class() == ErrorClass::Transient => {
                    warn!(unit = %unit.name, error = %err, "Transient status read failure");
                }
                Err(err) => {
                    warn!(unit = %unit.name, error = %err, "Status read failed");
                    return GateOutcome::Failed(err);
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return timed_out(unit, started, last, polls);
            }
            tokio::time::sleep(self.config.poll_interval.min(deadline - now)).await;
        }
    }
}

fn timed_out(
    unit: &ServiceUnit,
    started: Instant,
    last: Option<ReconcileStatus>,
    polls: u32,
) -> GateOutcome {
    let waited = started.elapsed();
    warn!(
        unit = %unit.name,
        waited_secs = waited.as_secs(),
        "Health gate timed out"
    );
    GateOutcome::TimedOut {
        waited,
        last,
        polls,
    }
}
