//! Orchestrator configuration

use wavegate_health::HealthGateConfig;
use wavegate_types::RetryPolicy;

/// Settings for one orchestrator instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Environment the runs target
    pub environment: String,

    /// Who is running the deployment, recorded in the audit trail
    pub actor: String,

    /// Concurrent unit workers per cluster
    pub concurrency_per_cluster: usize,

    pub health: HealthGateConfig,

    /// Default retry policy for units without their own
    pub retry: RetryPolicy,

    /// Restore the failing wave automatically
    pub rollback_on_failure: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            environment: "default".to_string(),
            actor: "wavegate".to_string(),
            concurrency_per_cluster: 10,
            health: HealthGateConfig::default(),
            retry: RetryPolicy::default(),
            rollback_on_failure: true,
        }
    }
}

impl OrchestratorConfig {
    pub fn new(environment: impl Into<String>) -> Self {
        Self {
            environment: environment.into(),
            ..Self::default()
        }
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }
}
