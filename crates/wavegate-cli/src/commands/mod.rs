//! CLI command implementations

pub mod deploy;
pub mod plan;
pub mod rollback;
pub mod status;
pub mod unlock;

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tabled::Tabled;
use wavegate_cluster::{ClusterCredentialProvider, KubectlClient};
use wavegate_deployment::{Backends, Orchestrator, RunOutcome};
use wavegate_observability::FileAuditSink;
use wavegate_state::{FileRunHistory, FileRunLock};
use wavegate_types::{RunStatus, UnitRecord};

use crate::config::WavegateConfig;
use crate::error::CliResult;
use crate::output::{self, format_run_status, format_unit_status, truncate, OutputFormat};

/// An orchestrator wired to kubectl and the on-disk state directory.
pub struct Session {
    pub config: WavegateConfig,
    pub orchestrator: Orchestrator,
}

impl Session {
    pub async fn open(config: WavegateConfig) -> CliResult<Self> {
        let kubectl = Arc::new(
            KubectlClient::new()
                .with_binary(config.kubectl.clone())
                .with_manifest_root(config.manifest_root.clone())
                .with_command_timeout(Duration::from_secs(config.kubectl_timeout_secs)),
        );
        let audit = FileAuditSink::new(config.audit_path()).await?;

        let backends = Backends {
            api: kubectl.clone(),
            reconciler: kubectl,
            credentials: Arc::new(ClusterCredentialProvider::new(config.vault.clone())),
            history: Arc::new(FileRunHistory::new(config.history_path())),
            lock: Arc::new(FileRunLock::new(config.locks_dir())),
            audit: Arc::new(audit),
        };
        let orchestrator = Orchestrator::new(
            config.orchestrator_config().with_actor(operator()),
            config.clusters.clone(),
            backends,
        );

        Ok(Self {
            config,
            orchestrator,
        })
    }
}

/// Name recorded as the actor of audit entries.
fn operator() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "wavegate".to_string())
}

/// Process exit code for the final status of a deploy.
pub fn deploy_exit_code(status: RunStatus) -> u8 {
    match status {
        RunStatus::Succeeded => 0,
        RunStatus::RolledBack => 2,
        RunStatus::FailedNoRollback => 3,
        RunStatus::Failed => 4,
        RunStatus::Cancelled => 5,
        RunStatus::Pending | RunStatus::Running => 1,
    }
}

/// Table row for unit display
#[derive(Debug, Serialize, Tabled)]
pub struct UnitRow {
    wave: u32,
    unit: String,
    cluster: String,
    status: String,
    attempts: u32,
    detail: String,
}

impl From<&UnitRecord> for UnitRow {
    fn from(record: &UnitRecord) -> Self {
        let detail = match (&record.restored_to, &record.last_error) {
            (Some(restored), _) => format!("restored to {restored}"),
            (None, Some(err)) => truncate(&err.to_string(), 60),
            (None, None) => String::new(),
        };
        Self {
            wave: record.wave,
            unit: record.name.to_string(),
            cluster: record.cluster.to_string(),
            status: format_unit_status(record.status),
            attempts: record.attempts,
            detail,
        }
    }
}

/// Prints a finished deploy or rollback.
pub fn print_outcome(outcome: &RunOutcome, format: OutputFormat) -> CliResult<()> {
    if format != OutputFormat::Table {
        return output::print_single(outcome, format);
    }

    let run = &outcome.run;
    println!(
        "Run {} ({}) finished: {}",
        run.id(),
        run.environment(),
        format_run_status(run.status())
    );
    let rows: Vec<UnitRow> = run.units().map(UnitRow::from).collect();
    output::print_output(rows, outcome, format)?;

    for failed in outcome.failed_units() {
        output::print_warning(&format!(
            "{} (wave {}) {}: {}",
            failed.name, failed.wave, failed.status, failed.error
        ));
    }
    if !outcome.manual_intervention.is_empty() {
        output::print_error("Rollback incomplete; these units need manual intervention:");
        for unit in &outcome.manual_intervention {
            output::print_error(&format!("  {} (wave {}): {}", unit.unit, unit.wave, unit.reason));
        }
    }
    Ok(())
}
