//! Rollback Coordinator.
//!
//! Captures the live revision of every unit immediately before its wave is
//! applied, and restores exactly those revisions when the wave fails. A unit
//! that did not exist before the wave is removed. Restores use bounded
//! transient retry; a restore that still fails is reported, never retried
//! further.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use tracing::{error, info, instrument, warn};
use wavegate_cluster::{ClusterApi, ClusterError, ResolvedContext};
use wavegate_health::RetryController;
use wavegate_types::{ClusterId, RetryPolicy, RollbackSnapshot, ServiceUnit, UnitName};

use crate::error::RollbackError;

/// Snapshots taken for a wave.
#[derive(Debug, Clone, Default)]
pub struct CaptureReport {
    pub snapshots: Vec<RollbackSnapshot>,
    /// Units whose live state could not be read; they must not be applied.
    pub failures: Vec<(UnitName, ClusterError)>,
}

/// A unit restored to its snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoredUnit {
    pub unit: UnitName,
    pub restored_to: String,
}

/// A unit whose snapshot could not be restored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreFailure {
    pub unit: UnitName,
    pub reason: String,
}

/// Result of restoring one wave.
#[derive(Debug, Clone, Default)]
pub struct RollbackReport {
    pub wave: u32,
    pub restored: Vec<RestoredUnit>,
    pub failures: Vec<RestoreFailure>,
}

impl RollbackReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn into_result(self) -> Result<Self, RollbackError> {
        if self.is_clean() {
            return Ok(self);
        }
        Err(RollbackError {
            wave: self.wave,
            failures: self
                .failures
                .into_iter()
                .map(|f| (f.unit, f.reason))
                .collect(),
        })
    }
}

/// Captures and restores per-wave snapshots.
pub struct RollbackCoordinator {
    api: Arc<dyn ClusterApi>,
    retry: RetryController,
    policy: RetryPolicy,
}

impl RollbackCoordinator {
    pub fn new(api: Arc<dyn ClusterApi>, policy: RetryPolicy) -> Self {
        Self {
            api,
            retry: RetryController::new(policy.clone()),
            policy,
        }
    }

    /// Reads the live revision of every unit that has a verified context.
    #[instrument(skip(self, units, contexts), fields(units = units.len()))]
    pub async fn capture(
        &self,
        wave: u32,
        units: &[ServiceUnit],
        contexts: &BTreeMap<ClusterId, ResolvedContext>,
    ) -> CaptureReport {
        let reads = units.iter().filter_map(|unit| {
            let ctx = contexts.get(&unit.cluster)?;
            Some(async move {
                let result = self
                    .retry
                    .run(&self.policy, "capture_snapshot", |_| {
                        self.api.live_revision(ctx, unit)
                    })
                    .await;
                (unit, result)
            })
        });

        let mut report = CaptureReport::default();
        for (unit, result) in join_all(reads).await {
            match result {
                Ok(previous) => report.snapshots.push(RollbackSnapshot {
                    unit: unit.name.clone(),
                    cluster: unit.cluster.clone(),
                    wave,
                    previous,
                    captured_at: Utc::now(),
                }),
                Err(failure) => {
                    warn!(unit = %unit.name, error = %failure, "Snapshot capture failed");
                    report.failures.push((unit.name.clone(), failure.error));
                }
            }
        }
        info!(wave, captured = report.snapshots.len(), "Captured rollback snapshots");
        report
    }

    /// Restores the snapshots of `units`. Every unit is attempted; failures
    /// are collected rather than stopping the rollback.
    #[instrument(skip(self, units, snapshots, contexts), fields(units = units.len()))]
    pub async fn restore(
        &self,
        wave: u32,
        units: &[ServiceUnit],
        snapshots: &[RollbackSnapshot],
        contexts: &BTreeMap<ClusterId, ResolvedContext>,
    ) -> RollbackReport {
        let restores = units.iter().map(|unit| {
            let snapshot = snapshots.iter().find(|s| s.unit == unit.name);
            let ctx = contexts.get(&unit.cluster);
            async move { (unit, self.restore_unit(unit, snapshot, ctx).await) }
        });

        let mut report = RollbackReport {
            wave,
            ..RollbackReport::default()
        };
        for (unit, result) in join_all(restores).await {
            match result {
                Ok(restored_to) => {
                    info!(unit = %unit.name, restored_to = %restored_to, "Unit restored");
                    report.restored.push(RestoredUnit {
                        unit: unit.name.clone(),
                        restored_to,
                    });
                }
                Err(reason) => {
                    error!(unit = %unit.name, reason = %reason, "Unit restore failed");
                    report.failures.push(RestoreFailure {
                        unit: unit.name.clone(),
                        reason,
                    });
                }
            }
        }
        report
    }

    async fn restore_unit(
        &self,
        unit: &ServiceUnit,
        snapshot: Option<&RollbackSnapshot>,
        ctx: Option<&ResolvedContext>,
    ) -> Result<String, String> {
        let snapshot = snapshot.ok_or_else(|| format!("no snapshot captured for {}", unit.name))?;
        let ctx = ctx.ok_or_else(|| format!("cluster context {} unavailable", unit.cluster))?;

        match &snapshot.previous {
            Some(revision) => self
                .retry
                .run(&self.policy, "restore_revision", |_| {
                    self.api.reapply(ctx, unit, revision)
                })
                .await
                .map(|_| revision.reference.clone())
                .map_err(|f| f.to_string()),
            // Removal is driven by the manifest; without one there is no safe target
            None if unit.manifest.is_empty() => Err(format!(
                "no manifest recorded for {}; remove it by hand",
                unit.name
            )),
            None => self
                .retry
                .run(&self.policy, "remove_unit", |_| self.api.remove(ctx, unit))
                .await
                .map(|_| snapshot.describe_previous())
                .map_err(|f| f.to_string()),
        }
    }
}
