//! In-memory cluster
//!
//! A scripted stand-in for the Cluster API, reconciler and credential store.
//! Apply, status and credential behavior can be scripted per unit or cluster,
//! and every mutating call is recorded for assertions.

use crate::api::{ApplyOutcome, ClusterApi, Reconciler};
use crate::context::{ClusterSpec, ResolvedContext};
use crate::credentials::{CredentialProvider, Credentials};
use crate::error::{ClusterError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;
use wavegate_types::{ClusterId, ReconcileStatus, Revision, ServiceUnit, UnitName};

/// A recorded mutating call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterCall {
    Apply(UnitName),
    Reapply(UnitName, String),
    Remove(UnitName),
    RequestSync(UnitName),
}

#[derive(Default)]
struct State {
    live: HashMap<UnitName, Revision>,
    next_revision: u64,
    calls: Vec<ClusterCall>,
    access_checks: HashMap<ClusterId, u32>,
    status_reads: HashMap<UnitName, u32>,
    unreachable: HashSet<ClusterId>,
    denied: HashSet<ClusterId>,
    apply_failures: HashMap<UnitName, VecDeque<ClusterError>>,
    status_failures: HashMap<UnitName, VecDeque<ClusterError>>,
    health_scripts: HashMap<UnitName, VecDeque<ReconcileStatus>>,
    reapply_failures: HashMap<UnitName, ClusterError>,
    apply_delay: Option<Duration>,
    credential_ttl: Option<Duration>,
    credentials_issued: HashMap<ClusterId, u32>,
}

/// Scripted in-process cluster
#[derive(Default)]
pub struct InMemoryCluster {
    state: Mutex<State>,
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    // ── scripting ─────────────────────────────────────────────────────────

    /// Pre-existing live revision for a unit
    pub fn seed(&self, unit: impl Into<UnitName>, revision: Revision) {
        self.state.lock().live.insert(unit.into(), revision);
    }

    pub fn set_unreachable(&self, cluster: impl Into<ClusterId>) {
        self.state.lock().unreachable.insert(cluster.into());
    }

    pub fn deny_credentials(&self, cluster: impl Into<ClusterId>) {
        self.state.lock().denied.insert(cluster.into());
    }

    /// Next applies of `unit` fail with these errors, in order.
    pub fn fail_applies(&self, unit: impl Into<UnitName>, errors: Vec<ClusterError>) {
        self.state
            .lock()
            .apply_failures
            .entry(unit.into())
            .or_default()
            .extend(errors);
    }

    /// Next status reads of `unit` fail with these errors, in order.
    pub fn fail_status_reads(&self, unit: impl Into<UnitName>, errors: Vec<ClusterError>) {
        self.state
            .lock()
            .status_failures
            .entry(unit.into())
            .or_default()
            .extend(errors);
    }

    /// Status reads of `unit` return these observations in order; the last
    /// one repeats.
    pub fn script_health(&self, unit: impl Into<UnitName>, statuses: Vec<ReconcileStatus>) {
        self.state
            .lock()
            .health_scripts
            .insert(unit.into(), statuses.into());
    }

    /// `unit` stays synced but never becomes healthy.
    pub fn never_healthy(&self, unit: impl Into<UnitName>) {
        self.script_health(
            unit,
            vec![ReconcileStatus::new(
                wavegate_types::SyncStatus::Synced,
                wavegate_types::HealthState::Progressing,
            )],
        );
    }

    /// Every re-apply of `unit` fails with `error`.
    pub fn fail_reapplies(&self, unit: impl Into<UnitName>, error: ClusterError) {
        self.state
            .lock()
            .reapply_failures
            .insert(unit.into(), error);
    }

    /// Issued credentials lapse after `ttl`.
    pub fn set_credential_ttl(&self, ttl: Duration) {
        self.state.lock().credential_ttl = Some(ttl);
    }

    /// Each apply takes this long.
    pub fn set_apply_delay(&self, delay: Duration) {
        self.state.lock().apply_delay = Some(delay);
    }

    // ── inspection ────────────────────────────────────────────────────────

    pub fn live(&self, unit: &UnitName) -> Option<Revision> {
        self.state.lock().live.get(unit).cloned()
    }

    pub fn calls(&self) -> Vec<ClusterCall> {
        self.state.lock().calls.clone()
    }

    pub fn apply_count(&self, unit: &UnitName) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| matches!(c, ClusterCall::Apply(u) if u == unit))
            .count()
    }

    pub fn access_checks(&self, cluster: &ClusterId) -> u32 {
        self.state.lock().access_checks.get(cluster).copied().unwrap_or(0)
    }

    pub fn credentials_issued(&self, cluster: &ClusterId) -> u32 {
        self.state
            .lock()
            .credentials_issued
            .get(cluster)
            .copied()
            .unwrap_or(0)
    }

    pub fn status_reads(&self, unit: &UnitName) -> u32 {
        self.state
            .lock()
            .status_reads
            .get(unit)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl ClusterApi for InMemoryCluster {
    async fn check_access(&self, ctx: &ResolvedContext) -> Result<()> {
        let mut state = self.state.lock();
        *state.access_checks.entry(ctx.cluster.clone()).or_insert(0) += 1;
        if state.unreachable.contains(&ctx.cluster) {
            return Err(ClusterError::Unreachable {
                cluster: ctx.cluster.clone(),
                reason: "connection refused".into(),
            });
        }
        Ok(())
    }

    async fn apply(&self, _ctx: &ResolvedContext, unit: &ServiceUnit) -> Result<ApplyOutcome> {
        let delay = {
            let mut state = self.state.lock();
            state.calls.push(ClusterCall::Apply(unit.name.clone()));
            state.apply_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        if let Some(err) = state
            .apply_failures
            .get_mut(&unit.name)
            .and_then(VecDeque::pop_front)
        {
            return Err(err);
        }

        let document = unit.manifest.as_str().to_string();
        if let Some(live) = state.live.get(&unit.name) {
            if live.document.as_deref() == Some(document.as_str()) {
                return Ok(ApplyOutcome::Unchanged);
            }
        }

        state.next_revision += 1;
        let revision = Revision::new(format!("{}@r{}", unit.name, state.next_revision))
            .with_document(document);
        let outcome = if state.live.contains_key(&unit.name) {
            ApplyOutcome::Configured
        } else {
            ApplyOutcome::Created
        };
        state.live.insert(unit.name.clone(), revision);
        Ok(outcome)
    }

    async fn reapply(
        &self,
        _ctx: &ResolvedContext,
        unit: &ServiceUnit,
        revision: &Revision,
    ) -> Result<ApplyOutcome> {
        let mut state = self.state.lock();
        state.calls.push(ClusterCall::Reapply(
            unit.name.clone(),
            revision.reference.clone(),
        ));
        if let Some(err) = state.reapply_failures.get(&unit.name) {
            return Err(err.clone());
        }
        if state.live.get(&unit.name) == Some(revision) {
            return Ok(ApplyOutcome::Unchanged);
        }
        state.live.insert(unit.name.clone(), revision.clone());
        Ok(ApplyOutcome::Configured)
    }

    async fn live_revision(
        &self,
        _ctx: &ResolvedContext,
        unit: &ServiceUnit,
    ) -> Result<Option<Revision>> {
        Ok(self.state.lock().live.get(&unit.name).cloned())
    }

    async fn remove(&self, _ctx: &ResolvedContext, unit: &ServiceUnit) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(ClusterCall::Remove(unit.name.clone()));
        if let Some(err) = state.reapply_failures.get(&unit.name) {
            return Err(err.clone());
        }
        state.live.remove(&unit.name);
        Ok(())
    }

    fn name(&self) -> &str {
        "in-memory"
    }
}

#[async_trait]
impl Reconciler for InMemoryCluster {
    async fn status(&self, _ctx: &ResolvedContext, unit: &ServiceUnit) -> Result<ReconcileStatus> {
        let mut state = self.state.lock();
        *state.status_reads.entry(unit.name.clone()).or_insert(0) += 1;

        if let Some(err) = state
            .status_failures
            .get_mut(&unit.name)
            .and_then(VecDeque::pop_front)
        {
            return Err(err);
        }

        let revision = state.live.get(&unit.name).map(|r| r.reference.clone());
        if let Some(script) = state.health_scripts.get_mut(&unit.name) {
            let observed = if script.len() > 1 {
                script.pop_front()
            } else {
                script.front().cloned()
            };
            if let Some(mut observed) = observed {
                observed.revision = revision;
                return Ok(observed);
            }
        }

        Ok(match revision {
            Some(rev) => ReconcileStatus {
                revision: Some(rev),
                ..ReconcileStatus::converged()
            },
            None => ReconcileStatus::new(
                wavegate_types::SyncStatus::OutOfSync,
                wavegate_types::HealthState::Missing,
            ),
        })
    }

    async fn request_sync(&self, _ctx: &ResolvedContext, unit: &ServiceUnit) -> Result<()> {
        self.state
            .lock()
            .calls
            .push(ClusterCall::RequestSync(unit.name.clone()));
        Ok(())
    }
}

#[async_trait]
impl CredentialProvider for InMemoryCluster {
    async fn credentials(&self, spec: &ClusterSpec) -> Result<Credentials> {
        let mut state = self.state.lock();
        if state.denied.contains(&spec.id) {
            return Err(ClusterError::Credentials {
                cluster: spec.id.clone(),
                reason: "secret store denied the request".into(),
            });
        }
        *state.credentials_issued.entry(spec.id.clone()).or_default() += 1;
        Ok(Credentials::bearer(
            format!("token-{}", spec.id),
            state.credential_ttl,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ResolvedContext {
        ResolvedContext::from_spec(&ClusterSpec::new("primary"), Credentials::ambient())
    }

    #[tokio::test]
    async fn apply_is_idempotent() {
        let cluster = InMemoryCluster::new();
        let unit = ServiceUnit::new("ingest", "primary", "apps/ingest.yaml");

        assert_eq!(
            cluster.apply(&ctx(), &unit).await.unwrap(),
            ApplyOutcome::Created
        );
        let first = cluster.live(&unit.name).unwrap();
        assert_eq!(
            cluster.apply(&ctx(), &unit).await.unwrap(),
            ApplyOutcome::Unchanged
        );
        assert_eq!(cluster.live(&unit.name).unwrap(), first);
    }

    #[tokio::test]
    async fn scripted_health_repeats_last() {
        let cluster = InMemoryCluster::new();
        let unit = ServiceUnit::new("ingest", "primary", "apps/ingest.yaml");
        cluster.script_health(
            "ingest",
            vec![
                ReconcileStatus::new(
                    wavegate_types::SyncStatus::OutOfSync,
                    wavegate_types::HealthState::Progressing,
                ),
                ReconcileStatus::converged(),
            ],
        );

        assert!(!cluster.status(&ctx(), &unit).await.unwrap().is_converged());
        assert!(cluster.status(&ctx(), &unit).await.unwrap().is_converged());
        assert!(cluster.status(&ctx(), &unit).await.unwrap().is_converged());
        assert_eq!(cluster.status_reads(&unit.name), 3);
    }

    #[tokio::test]
    async fn scripted_apply_failures_drain() {
        let cluster = InMemoryCluster::new();
        let unit = ServiceUnit::new("ingest", "primary", "apps/ingest.yaml");
        cluster.fail_applies("ingest", vec![ClusterError::Throttled("429".into())]);

        assert!(cluster.apply(&ctx(), &unit).await.is_err());
        assert!(cluster.apply(&ctx(), &unit).await.is_ok());
        assert_eq!(cluster.apply_count(&unit.name), 2);
    }
}
