//! Configuration for the wavegate CLI
//!
//! Layered the usual way: serialized defaults, then the config file, then
//! `WAVEGATE_*` environment variables (`__` separates nested keys, so
//! `WAVEGATE_ORCHESTRATOR__CONCURRENCY_PER_CLUSTER=4`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use wavegate_cluster::{ClusterSpec, VaultConfig};
use wavegate_deployment::OrchestratorConfig;
use wavegate_health::HealthGateConfig;
use wavegate_observability::LoggingConfig;
use wavegate_planner::{load_units, PlanError, UnitDeclaration, WaveResolver};
use wavegate_types::{RetryPolicy, WavePlan};

use crate::error::CliResult;

/// Main CLI configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WavegateConfig {
    /// Environment name recorded on every run
    pub environment: String,

    /// Directory holding run history, audit log and locks
    pub state_dir: PathBuf,

    /// Relative manifest references resolve against this directory
    pub manifest_root: PathBuf,

    /// kubectl binary
    pub kubectl: String,

    /// Upper bound for a single kubectl invocation
    pub kubectl_timeout_secs: u64,

    pub orchestrator: OrchestratorSection,

    /// Default retry policy for applies, health gates and restores
    pub retry: RetryPolicy,

    pub clusters: Vec<ClusterSpec>,

    /// Inline unit declarations
    pub units: Vec<UnitDeclaration>,

    /// Additional declarations in a separate YAML or JSON file
    pub units_file: Option<PathBuf>,

    pub vault: Option<VaultConfig>,

    pub logging: LoggingConfig,
}

impl Default for WavegateConfig {
    fn default() -> Self {
        Self {
            environment: "default".to_string(),
            state_dir: PathBuf::from(".wavegate"),
            manifest_root: PathBuf::from("."),
            kubectl: "kubectl".to_string(),
            kubectl_timeout_secs: 60,
            orchestrator: OrchestratorSection::default(),
            retry: RetryPolicy::default(),
            clusters: Vec::new(),
            units: Vec::new(),
            units_file: None,
            vault: None,
            logging: LoggingConfig::default(),
        }
    }
}

/// Orchestrator tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorSection {
    /// Units applied at once on one cluster
    pub concurrency_per_cluster: usize,

    /// Interval between health polls
    pub poll_interval_secs: u64,

    /// Health gate timeout for units without their own
    pub health_timeout_secs: u64,

    /// Restore a failed wave automatically
    pub rollback_on_failure: bool,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            concurrency_per_cluster: 10,
            poll_interval_secs: 15,
            health_timeout_secs: 600,
            rollback_on_failure: true,
        }
    }
}

impl WavegateConfig {
    /// Load configuration from defaults, an optional file and the environment.
    ///
    /// A missing file is not an error; relative paths in a file that exists
    /// are taken relative to that file.
    pub fn load(path: &Path) -> CliResult<Self> {
        let mut builder = ::config::Config::builder();

        builder = builder.add_source(::config::Config::try_from(&WavegateConfig::default())?);
        builder = builder.add_source(::config::File::from(path).required(false));
        builder = builder.add_source(
            ::config::Environment::with_prefix("WAVEGATE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let mut loaded: WavegateConfig = builder.build()?.try_deserialize()?;
        if path.exists() {
            if let Some(base) = path.parent() {
                loaded.anchor(base);
            }
        }
        Ok(loaded)
    }

    fn anchor(&mut self, base: &Path) {
        let rebase = |p: &Path| {
            if p.is_relative() {
                base.join(p)
            } else {
                p.to_path_buf()
            }
        };
        self.state_dir = rebase(&self.state_dir);
        self.manifest_root = rebase(&self.manifest_root);
        self.units_file = self.units_file.as_deref().map(rebase);
    }

    pub fn history_path(&self) -> PathBuf {
        self.state_dir.join("history.jsonl")
    }

    pub fn audit_path(&self) -> PathBuf {
        self.state_dir.join("audit.jsonl")
    }

    pub fn locks_dir(&self) -> PathBuf {
        self.state_dir.join("locks")
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            concurrency_per_cluster: self.orchestrator.concurrency_per_cluster.max(1),
            health: HealthGateConfig {
                poll_interval: Duration::from_secs(self.orchestrator.poll_interval_secs),
                default_timeout: Duration::from_secs(self.orchestrator.health_timeout_secs),
            },
            retry: self.retry.clone(),
            rollback_on_failure: self.orchestrator.rollback_on_failure,
            ..OrchestratorConfig::new(&self.environment)
        }
    }

    /// Inline declarations followed by those of `units_file`.
    pub fn declarations(&self) -> CliResult<Vec<UnitDeclaration>> {
        let mut declarations = self.units.clone();
        if let Some(file) = &self.units_file {
            declarations.extend(load_units(file)?);
        }
        Ok(declarations)
    }

    /// Resolves the declared units into a wave plan against the declared clusters.
    pub fn plan(&self) -> CliResult<WavePlan> {
        let units = self
            .declarations()?
            .into_iter()
            .map(|d| d.into_unit(&self.retry))
            .collect();
        let plan = WaveResolver::new()
            .with_known_clusters(self.clusters.iter().map(|c| c.id.clone()))
            .resolve(units)
            .map_err(PlanError::from)?;
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CliError;
    use wavegate_types::ValidationError;

    const CONFIG_YAML: &str = r#"
environment: staging
orchestrator:
  concurrency_per_cluster: 4
  health_timeout_secs: 900
retry:
  max_attempts: 5
  base_delay: 2
  factor: 3
  max_delay: 30
clusters:
  - id: primary
    kube_context: prod-eu-1
  - id: secondary
    credentials:
      type: vault
      role: deployer
units_file: units.yaml
units:
  - name: data-ingestion
    cluster: primary
    manifest: apps/data-ingestion.yaml
"#;

    const UNITS_YAML: &str = r#"
units:
  - name: data-quality
    cluster: secondary
    manifest: apps/data-quality.yaml
    depends_on: [data-ingestion]
"#;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_default_config() {
        let config = WavegateConfig::default();
        assert_eq!(config.state_dir, PathBuf::from(".wavegate"));
        assert_eq!(config.orchestrator.concurrency_per_cluster, 10);
        assert!(config.orchestrator.rollback_on_failure);
        assert_eq!(config.retry, RetryPolicy::default());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = WavegateConfig::load(&dir.path().join("absent.yaml")).unwrap();
        assert!(config.clusters.is_empty());
        assert_eq!(config.state_dir, PathBuf::from(".wavegate"));
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "wavegate.yaml", CONFIG_YAML);
        write(dir.path(), "units.yaml", UNITS_YAML);

        let config = WavegateConfig::load(&path).unwrap();
        assert_eq!(config.environment, "staging");
        assert_eq!(config.clusters.len(), 2);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay, Duration::from_secs(2));
        assert_eq!(config.state_dir, dir.path().join(".wavegate"));

        let orchestrator = config.orchestrator_config();
        assert_eq!(orchestrator.environment, "staging");
        assert_eq!(orchestrator.concurrency_per_cluster, 4);
        assert_eq!(orchestrator.health.default_timeout, Duration::from_secs(900));
        assert_eq!(orchestrator.health.poll_interval, Duration::from_secs(15));
    }

    #[test]
    fn plan_merges_inline_and_file_units() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "wavegate.yaml", CONFIG_YAML);
        write(dir.path(), "units.yaml", UNITS_YAML);

        let plan = WavegateConfig::load(&path).unwrap().plan().unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.wave_of(&"data-ingestion".into()), Some(1));
        assert_eq!(plan.wave_of(&"data-quality".into()), Some(2));
        // No override, so the run default applies
        assert_eq!(plan.unit(&"data-quality".into()).unwrap().retry, None);
    }

    #[test]
    fn unknown_cluster_is_a_validation_error() {
        let config = WavegateConfig {
            clusters: vec![ClusterSpec::new("primary")],
            units: vec![UnitDeclaration {
                name: "edge".into(),
                cluster: "tertiary".into(),
                manifest: "apps/edge.yaml".into(),
                wave: None,
                requires: Vec::new(),
                health_timeout_secs: None,
                retry: None,
                best_effort: false,
            }],
            ..WavegateConfig::default()
        };

        let err = config.plan().unwrap_err();
        assert!(matches!(
            err,
            CliError::Plan(PlanError::Validation(ValidationError::UnknownTarget { .. }))
        ));
    }
}
