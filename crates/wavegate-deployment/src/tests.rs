//! Run-level scenarios against the in-memory cluster.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use wavegate_cluster::{ClusterCall, ClusterError, ClusterSpec, InMemoryCluster};
use wavegate_health::HealthGateConfig;
use wavegate_observability::{AuditAction, IntegrityVerifier, MemoryAuditSink};
use wavegate_planner::WaveResolver;
use wavegate_state::{InMemoryRunHistory, InMemoryRunLock, RunHistory, RunLock, StateError};
use wavegate_types::{
    ClusterId, DeploymentRun, Revision, RunEvent, RunId, RunStatus, ServiceUnit, UnitError, UnitName,
    UnitStatus, ValidationError, WavePlan, WaveSelection,
};

use crate::{Backends, CancelHandle, DeployRequest, DeploymentError, Orchestrator, OrchestratorConfig};

struct Harness {
    cluster: Arc<InMemoryCluster>,
    history: Arc<InMemoryRunHistory>,
    lock: Arc<InMemoryRunLock>,
    audit: Arc<MemoryAuditSink>,
}

impl Harness {
    fn new() -> Self {
        Self {
            cluster: Arc::new(InMemoryCluster::new()),
            history: Arc::new(InMemoryRunHistory::new()),
            lock: Arc::new(InMemoryRunLock::new()),
            audit: Arc::new(MemoryAuditSink::new()),
        }
    }

    fn orchestrator(&self, config: OrchestratorConfig) -> Orchestrator {
        Orchestrator::new(
            config,
            vec![ClusterSpec::new("primary"), ClusterSpec::new("secondary")],
            Backends {
                api: self.cluster.clone(),
                reconciler: self.cluster.clone(),
                credentials: self.cluster.clone(),
                history: self.history.clone(),
                lock: self.lock.clone(),
                audit: self.audit.clone(),
            },
        )
    }

    fn live(&self, unit: &str) -> Option<Revision> {
        self.cluster.live(&UnitName::new(unit))
    }

    fn applies(&self, unit: &str) -> usize {
        self.cluster.apply_count(&UnitName::new(unit))
    }
}

fn config() -> OrchestratorConfig {
    OrchestratorConfig {
        health: HealthGateConfig {
            poll_interval: Duration::from_secs(15),
            default_timeout: Duration::from_secs(60),
        },
        ..OrchestratorConfig::new("staging")
    }
}

fn resolve(units: Vec<ServiceUnit>) -> WavePlan {
    WaveResolver::new().resolve(units).unwrap()
}

/// Wave 1: ingest. Wave 2: transform (primary) and data-quality
/// (secondary). Wave 3: publish.
fn pipeline() -> WavePlan {
    resolve(vec![
        ServiceUnit::new("ingest", "primary", "apps/ingest-v2.yaml"),
        ServiceUnit::new("transform", "primary", "apps/transform-v2.yaml").requires("ingest"),
        ServiceUnit::new("data-quality", "secondary", "apps/data-quality-v2.yaml")
            .requires("ingest"),
        ServiceUnit::new("publish", "primary", "apps/publish-v2.yaml")
            .requires("transform")
            .requires("data-quality"),
    ])
}

fn status_of(outcome: &crate::RunOutcome, unit: &str) -> UnitStatus {
    outcome.run.unit(&UnitName::new(unit)).unwrap().status
}

async fn deploy(orchestrator: &Orchestrator, plan: &WavePlan) -> crate::RunOutcome {
    orchestrator
        .deploy(plan, DeployRequest::default(), &CancelHandle::new())
        .await
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn healthy_pipeline_succeeds_in_wave_order() {
    let h = Harness::new();
    let orchestrator = h.orchestrator(config());
    let mut events = orchestrator.subscribe();

    let outcome = deploy(&orchestrator, &pipeline()).await;

    assert_eq!(outcome.status(), RunStatus::Succeeded);
    assert!(outcome.run.units().all(|u| u.status == UnitStatus::Healthy));
    assert_eq!(outcome.run.completed_waves(), &[1, 2, 3]);

    let applied: Vec<UnitName> = h
        .cluster
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            ClusterCall::Apply(unit) => Some(unit),
            _ => None,
        })
        .collect();
    assert_eq!(applied.first(), Some(&UnitName::new("ingest")));
    assert_eq!(applied.last(), Some(&UnitName::new("publish")));

    let mut kinds = Vec::new();
    while let Ok(envelope) = events.try_recv() {
        kinds.push(envelope.event.kind());
    }
    assert_eq!(kinds.first(), Some(&"run_started"));
    assert_eq!(kinds.last(), Some(&"run_finished"));
    assert_eq!(h.history.record_count(), 1);
}

#[test]
fn cyclic_plan_is_rejected_before_any_apply() {
    let cluster = InMemoryCluster::new();
    let err = WaveResolver::new()
        .resolve(vec![
            ServiceUnit::new("a", "primary", "a.yaml").requires("b"),
            ServiceUnit::new("b", "primary", "b.yaml").requires("a"),
        ])
        .unwrap_err();

    assert_eq!(
        err,
        ValidationError::CyclicDependency {
            units: vec!["a".into(), "b".into()]
        }
    );
    assert!(cluster.calls().is_empty());
}

#[test]
fn pinned_wave_before_dependency_is_rejected() {
    let err = WaveResolver::new()
        .resolve(vec![
            ServiceUnit::new("y", "primary", "y.yaml").in_wave(2),
            ServiceUnit::new("x", "primary", "x.yaml").in_wave(1).requires("y"),
        ])
        .unwrap_err();

    assert_eq!(
        err,
        ValidationError::WaveOrderingViolation {
            unit: "x".into(),
            unit_wave: 1,
            dependency: "y".into(),
            dependency_wave: 2,
        }
    );
}

#[tokio::test(start_paused = true)]
async fn transient_failures_below_the_limit_end_healthy() {
    let h = Harness::new();
    h.cluster.fail_applies(
        "transform",
        vec![
            ClusterError::Throttled("429".into()),
            ClusterError::Network("connection reset".into()),
        ],
    );

    let outcome = deploy(&h.orchestrator(config()), &pipeline()).await;

    assert_eq!(outcome.status(), RunStatus::Succeeded);
    let transform = outcome.run.unit(&"transform".into()).unwrap();
    assert_eq!(transform.status, UnitStatus::Healthy);
    assert_eq!(transform.attempts, 3);
    assert_eq!(h.applies("publish"), 1);
}

#[tokio::test(start_paused = true)]
async fn transient_failures_at_the_limit_fail_and_halt() {
    let h = Harness::new();
    h.cluster.fail_applies(
        "transform",
        vec![ClusterError::Throttled("429".into()); 3],
    );
    let orchestrator = h.orchestrator(OrchestratorConfig {
        rollback_on_failure: false,
        ..config()
    });

    let outcome = deploy(&orchestrator, &pipeline()).await;

    assert_eq!(outcome.status(), RunStatus::Failed);
    assert_eq!(status_of(&outcome, "transform"), UnitStatus::Failed);
    assert!(matches!(
        outcome.run.unit(&"transform".into()).unwrap().last_error,
        Some(UnitError::TransientApply(_))
    ));
    assert_eq!(status_of(&outcome, "publish"), UnitStatus::Pending);
    assert_eq!(h.applies("publish"), 0);
    assert_eq!(outcome.run.completed_waves(), &[1]);
}

#[tokio::test(start_paused = true)]
async fn redeploy_changes_nothing() {
    let h = Harness::new();
    let orchestrator = h.orchestrator(config());
    deploy(&orchestrator, &pipeline()).await;
    let before = h.live("transform");

    let outcome = deploy(&orchestrator, &pipeline()).await;

    assert_eq!(outcome.status(), RunStatus::Succeeded);
    assert_eq!(h.live("transform"), before);
}

#[tokio::test(start_paused = true)]
async fn data_quality_timeout_rolls_back_wave_two_only() {
    let h = Harness::new();
    let ingest_v1 = Revision::new("ingest@v1").with_document("apps/ingest-v1.yaml");
    let transform_v1 = Revision::new("transform@v1").with_document("apps/transform-v1.yaml");
    h.cluster.seed("ingest", ingest_v1.clone());
    h.cluster.seed("transform", transform_v1.clone());
    h.cluster.never_healthy("data-quality");

    let outcome = deploy(&h.orchestrator(config()), &pipeline()).await;

    assert_eq!(outcome.status(), RunStatus::RolledBack);
    assert!(outcome.manual_intervention.is_empty());

    // data-quality gave up after three health timeouts
    assert_eq!(h.applies("data-quality"), 3);
    assert!(matches!(
        outcome.run.unit(&"data-quality".into()).unwrap().last_error,
        Some(UnitError::HealthTimeout { .. })
    ));

    // Wave 2 restored to its snapshot: transform back to v1, data-quality removed
    assert_eq!(h.live("transform"), Some(transform_v1));
    assert_eq!(h.live("data-quality"), None);
    assert_eq!(status_of(&outcome, "transform"), UnitStatus::RolledBack);
    assert_eq!(status_of(&outcome, "data-quality"), UnitStatus::RolledBack);

    // Wave 1 is left on the new revision
    assert_ne!(h.live("ingest"), Some(ingest_v1));
    assert_eq!(status_of(&outcome, "ingest"), UnitStatus::Healthy);

    // Wave 3 never attempted
    assert_eq!(h.applies("publish"), 0);
    assert_eq!(status_of(&outcome, "publish"), UnitStatus::Pending);

    let restored = outcome.restored();
    assert!(restored.contains(&("transform".into(), "transform@v1".into())));
    assert!(restored.contains(&("data-quality".into(), "<absent>".into())));

    let audit = h.audit.entries();
    assert!(audit
        .iter()
        .any(|e| e.action == AuditAction::WaveRolledBack { wave: 2 }));
}

#[tokio::test(start_paused = true)]
async fn failed_restore_requires_manual_intervention() {
    let h = Harness::new();
    h.cluster
        .seed("transform", Revision::new("transform@v1").with_document("v1"));
    h.cluster.never_healthy("data-quality");
    h.cluster
        .fail_reapplies("transform", ClusterError::PolicyRejected("frozen".into()));

    let outcome = deploy(&h.orchestrator(config()), &pipeline()).await;

    assert_eq!(outcome.status(), RunStatus::FailedNoRollback);
    assert_eq!(outcome.manual_intervention.len(), 1);
    assert_eq!(outcome.manual_intervention[0].unit, UnitName::new("transform"));
    assert_eq!(outcome.manual_intervention[0].wave, 2);
    // The restore was attempted once; permanent errors are not retried
    let reapplies = h
        .cluster
        .calls()
        .into_iter()
        .filter(|c| matches!(c, ClusterCall::Reapply(u, _) if u.as_str() == "transform"))
        .count();
    assert_eq!(reapplies, 1);
    assert_eq!(status_of(&outcome, "transform"), UnitStatus::Healthy);
}

#[tokio::test(start_paused = true)]
async fn best_effort_failure_does_not_block_the_wave() {
    let h = Harness::new();
    h.cluster.fail_applies(
        "metrics",
        vec![ClusterError::SchemaValidation("unknown field".into())],
    );
    let plan = resolve(vec![
        ServiceUnit::new("ingest", "primary", "apps/ingest.yaml"),
        ServiceUnit::new("metrics", "primary", "apps/metrics.yaml").best_effort(),
        ServiceUnit::new("publish", "primary", "apps/publish.yaml").requires("ingest"),
    ]);

    let outcome = deploy(&h.orchestrator(config()), &plan).await;

    assert_eq!(outcome.status(), RunStatus::Succeeded);
    assert_eq!(status_of(&outcome, "metrics"), UnitStatus::Failed);
    assert_eq!(status_of(&outcome, "publish"), UnitStatus::Healthy);
    assert_eq!(outcome.failed_units().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn unreachable_cluster_fails_its_units_without_applying() {
    let h = Harness::new();
    h.cluster.set_unreachable("secondary");

    let outcome = deploy(&h.orchestrator(config()), &pipeline()).await;

    assert_eq!(outcome.status(), RunStatus::RolledBack);
    let quality = outcome.run.unit(&"data-quality".into()).unwrap();
    assert_eq!(quality.status, UnitStatus::Failed);
    assert_eq!(quality.attempts, 0);
    assert!(matches!(quality.last_error, Some(UnitError::Precondition(_))));
    assert_eq!(h.applies("data-quality"), 0);
    // Its healthy sibling was restored with the wave
    assert_eq!(status_of(&outcome, "transform"), UnitStatus::RolledBack);
    assert_eq!(h.live("transform"), None);
}

#[tokio::test(start_paused = true)]
async fn cancel_mid_wave_leaves_unstarted_units_cancelled() {
    let h = Harness::new();
    h.cluster.set_apply_delay(Duration::from_secs(10));
    let orchestrator = h.orchestrator(OrchestratorConfig {
        concurrency_per_cluster: 1,
        ..config()
    });
    let plan = resolve(vec![
        ServiceUnit::new("a", "primary", "apps/a.yaml"),
        ServiceUnit::new("b", "primary", "apps/b.yaml"),
        ServiceUnit::new("c", "primary", "apps/c.yaml"),
        ServiceUnit::new("d", "primary", "apps/d.yaml").requires("a"),
    ]);
    let cancel = CancelHandle::new();

    let (outcome, _) = tokio::join!(
        orchestrator.deploy(&plan, DeployRequest::default(), &cancel),
        async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            cancel.cancel();
        }
    );
    let outcome = outcome.unwrap();

    assert_eq!(outcome.status(), RunStatus::Cancelled);
    // The in-flight apply was allowed to finish; its siblings never started
    let started: Vec<&str> = ["a", "b", "c"]
        .into_iter()
        .filter(|u| h.applies(u) > 0)
        .collect();
    assert_eq!(started.len(), 1);
    assert_eq!(status_of(&outcome, started[0]), UnitStatus::Healthy);
    for unit in ["a", "b", "c"].into_iter().filter(|u| *u != started[0]) {
        assert_eq!(status_of(&outcome, unit), UnitStatus::Cancelled);
    }
    assert_eq!(status_of(&outcome, "d"), UnitStatus::Cancelled);
    assert_eq!(h.applies("d"), 0);
    // No rollback unless asked for
    assert!(h.live(started[0]).is_some());
}

#[tokio::test(start_paused = true)]
async fn cancel_with_rollback_restores_the_wave() {
    let h = Harness::new();
    h.cluster.set_apply_delay(Duration::from_secs(10));
    let orchestrator = h.orchestrator(config());
    let plan = resolve(vec![ServiceUnit::new("a", "primary", "apps/a.yaml")]);
    let cancel = CancelHandle::new();

    let (outcome, _) = tokio::join!(
        orchestrator.deploy(&plan, DeployRequest::default(), &cancel),
        async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            cancel.cancel_with_rollback();
        }
    );
    let outcome = outcome.unwrap();

    assert_eq!(outcome.status(), RunStatus::Cancelled);
    assert_eq!(status_of(&outcome, "a"), UnitStatus::RolledBack);
    assert_eq!(h.live("a"), None);
}

#[tokio::test(start_paused = true)]
async fn overlapping_run_is_refused() {
    let h = Harness::new();
    let other = RunId::generate();
    h.lock
        .acquire(&other, &BTreeSet::from([ClusterId::new("secondary")]))
        .unwrap();

    let err = h
        .orchestrator(config())
        .deploy(&pipeline(), DeployRequest::default(), &CancelHandle::new())
        .await
        .unwrap_err();

    assert!(err.is_lock_conflict());
    assert!(h.cluster.calls().is_empty());
    assert_eq!(h.history.record_count(), 0);
    assert_eq!(h.audit.entries()[0].action, AuditAction::LockRejected);

    // The refused run took no locks of its own
    assert_eq!(h.lock.holder(&ClusterId::new("primary")), None);
}

#[tokio::test(start_paused = true)]
async fn lock_is_released_after_the_run() {
    let h = Harness::new();
    let orchestrator = h.orchestrator(config());
    deploy(&orchestrator, &pipeline()).await;

    assert_eq!(h.lock.holder(&ClusterId::new("primary")), None);
    assert_eq!(h.lock.holder(&ClusterId::new("secondary")), None);
}

#[tokio::test(start_paused = true)]
async fn audit_chain_of_a_finished_run_verifies() {
    let h = Harness::new();
    h.cluster.never_healthy("data-quality");
    deploy(&h.orchestrator(config()), &pipeline()).await;

    let entries = h.audit.entries();
    let actions: Vec<_> = entries.iter().map(|e| e.action.clone()).collect();
    assert_eq!(actions.first(), Some(&AuditAction::DeployStarted));
    assert_eq!(actions.last(), Some(&AuditAction::DeployFinished));
    assert!(IntegrityVerifier::verify_chain(&entries).valid);
}

#[tokio::test(start_paused = true)]
async fn component_selection_runs_only_chosen_waves() {
    let h = Harness::new();
    let request = DeployRequest {
        selection: "2".parse::<WaveSelection>().unwrap(),
        force_sync: false,
    };

    let outcome = h
        .orchestrator(config())
        .deploy(&pipeline(), request, &CancelHandle::new())
        .await
        .unwrap();

    assert_eq!(outcome.run.waves(), &[2]);
    assert_eq!(h.applies("ingest"), 0);
    assert_eq!(h.applies("transform"), 1);
    assert!(outcome.run.unit(&"publish".into()).is_none());
}

#[tokio::test(start_paused = true)]
async fn empty_selection_is_an_error() {
    let h = Harness::new();
    let request = DeployRequest {
        selection: "9".parse().unwrap(),
        force_sync: false,
    };
    let err = h
        .orchestrator(config())
        .deploy(&pipeline(), request, &CancelHandle::new())
        .await
        .unwrap_err();
    assert!(matches!(err, DeploymentError::EmptySelection(_)));
}

#[tokio::test(start_paused = true)]
async fn manual_rollback_walks_back_one_wave_at_a_time() {
    let h = Harness::new();
    let ingest_v1 = Revision::new("ingest@v1").with_document("apps/ingest-v1.yaml");
    h.cluster.seed("ingest", ingest_v1.clone());
    let plan = resolve(vec![
        ServiceUnit::new("ingest", "primary", "apps/ingest-v2.yaml"),
        ServiceUnit::new("transform", "primary", "apps/transform.yaml").requires("ingest"),
    ]);
    let orchestrator = h.orchestrator(config());
    deploy(&orchestrator, &plan).await;

    let last = orchestrator.rollback(&plan, None).await.unwrap();
    assert_eq!(last.status(), RunStatus::RolledBack);
    assert_eq!(h.live("transform"), None);
    assert_ne!(h.live("ingest"), Some(ingest_v1.clone()));

    let all = orchestrator.rollback(&plan, Some(1)).await.unwrap();
    assert_eq!(all.status(), RunStatus::RolledBack);
    assert_eq!(h.live("ingest"), Some(ingest_v1));
    assert_eq!(status_of(&all, "ingest"), UnitStatus::RolledBack);

    // Latest history record reflects the rollback
    let latest = orchestrator.status(None).await.unwrap();
    assert_eq!(latest.id(), all.run.id());
    assert_eq!(latest.status(), RunStatus::RolledBack);

    let err = orchestrator.rollback(&plan, Some(1)).await.unwrap_err();
    assert!(matches!(
        err,
        DeploymentError::State(StateError::NothingToRollBack { wave: 1 })
    ));
    assert!(h
        .audit
        .entries()
        .iter()
        .any(|e| e.action == AuditAction::ManualRollback { from_wave: 1 }));
}

#[tokio::test]
async fn rollback_without_history_is_an_error() {
    let h = Harness::new();
    let err = h
        .orchestrator(config())
        .rollback(&pipeline(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, DeploymentError::State(StateError::NoRunsRecorded)));
}

#[tokio::test(start_paused = true)]
async fn rollback_of_undeclared_unit_uses_recorded_manifest() {
    let h = Harness::new();
    let plan = resolve(vec![ServiceUnit::new("ghost", "primary", "apps/ghost.yaml")]);
    let orchestrator = h.orchestrator(config());
    deploy(&orchestrator, &plan).await;
    assert!(h.live("ghost").is_some());

    // The unit is no longer declared anywhere
    let outcome = orchestrator
        .rollback(&WavePlan::new(Vec::new()), None)
        .await
        .unwrap();

    assert_eq!(outcome.status(), RunStatus::RolledBack);
    assert_eq!(h.live("ghost"), None);
    assert_eq!(
        outcome.run.unit(&UnitName::new("ghost")).unwrap().manifest.as_str(),
        "apps/ghost.yaml"
    );
}

#[tokio::test(start_paused = true)]
async fn rollback_without_recorded_manifest_needs_an_operator() {
    let h = Harness::new();
    let plan = resolve(vec![ServiceUnit::new("ghost", "primary", "apps/ghost.yaml")]);
    let orchestrator = h.orchestrator(config());
    let deployed = deploy(&orchestrator, &plan).await;

    // A record archived before manifests were kept
    let mut value = serde_json::to_value(&deployed.run).unwrap();
    for unit in value["units"].as_object_mut().unwrap().values_mut() {
        unit.as_object_mut().unwrap().remove("manifest");
    }
    let legacy: DeploymentRun = serde_json::from_value(value).unwrap();
    h.history.append(&legacy).await.unwrap();

    let outcome = orchestrator
        .rollback(&WavePlan::new(Vec::new()), None)
        .await
        .unwrap();

    assert_eq!(outcome.status(), RunStatus::FailedNoRollback);
    assert_eq!(outcome.manual_intervention.len(), 1);
    assert_eq!(outcome.manual_intervention[0].unit, UnitName::new("ghost"));
    assert!(h.live("ghost").is_some());
    assert!(!h
        .cluster
        .calls()
        .iter()
        .any(|c| matches!(c, ClusterCall::Remove(_))));
}

#[tokio::test(start_paused = true)]
async fn dry_run_touches_nothing() {
    let h = Harness::new();
    h.cluster
        .seed("ingest", Revision::new("ingest@v1").with_document("v1"));
    h.cluster.set_unreachable("secondary");

    let report = h
        .orchestrator(config())
        .dry_run(&pipeline(), &WaveSelection::All)
        .await
        .unwrap();

    assert_eq!(report.waves.len(), 3);
    let ingest = &report.waves[0].units[0];
    assert_eq!(ingest.current.as_deref(), Some("ingest@v1"));
    let problems: Vec<_> = report.problems().map(|u| u.name.clone()).collect();
    assert_eq!(problems, vec![UnitName::new("data-quality")]);

    assert!(h.cluster.calls().is_empty());
    assert_eq!(h.history.record_count(), 0);
    assert!(h.audit.entries().is_empty());
}

#[tokio::test(start_paused = true)]
async fn unit_events_follow_the_state_machine() {
    let h = Harness::new();
    h.cluster.fail_applies("ingest", vec![ClusterError::NotReady("webhook".into())]);
    let orchestrator = h.orchestrator(config());
    let mut events = orchestrator.subscribe();

    deploy(&orchestrator, &pipeline()).await;

    let mut ingest = Vec::new();
    while let Ok(envelope) = events.try_recv() {
        if let RunEvent::UnitTransitioned { unit, to, .. } = envelope.event {
            if unit.as_str() == "ingest" {
                ingest.push(to);
            }
        }
    }
    assert_eq!(
        ingest,
        vec![
            UnitStatus::Applying,
            UnitStatus::Degraded,
            UnitStatus::Applying,
            UnitStatus::Progressing,
            UnitStatus::Healthy
        ]
    );
}
