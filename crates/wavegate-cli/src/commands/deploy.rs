//! Deploy command

use std::sync::Arc;

use clap::Args;
use serde::Serialize;
use tabled::Tabled;
use tokio::task::JoinHandle;
use tracing::warn;
use wavegate_deployment::{CancelHandle, DeployRequest, DryRunReport};
use wavegate_observability::StatusReporter;
use wavegate_types::WaveSelection;

use super::{deploy_exit_code, print_outcome, Session};
use crate::error::CliResult;
use crate::output::{self, print_info, print_warning, truncate, OutputFormat};

#[derive(Debug, Args)]
pub struct DeployArgs {
    /// Waves to deploy: `all`, `2`, `1,3` or `2-4`
    #[arg(long, default_value = "all")]
    pub components: WaveSelection,

    /// Verify contexts and show what would change without applying
    #[arg(long)]
    pub dry_run: bool,

    /// Ask the reconciler to sync each unit right after applying it
    #[arg(long)]
    pub force_sync: bool,
}

/// Table row for dry-run display
#[derive(Debug, Serialize, Tabled)]
struct PlannedRow {
    wave: u32,
    unit: String,
    cluster: String,
    manifest: String,
    current: String,
    problem: String,
}

pub async fn execute(args: DeployArgs, session: Session, format: OutputFormat) -> CliResult<u8> {
    let plan = session.config.plan()?;

    if args.dry_run {
        let report = session.orchestrator.dry_run(&plan, &args.components).await?;
        return print_dry_run(&report, format);
    }

    let Session { orchestrator, .. } = session;
    let reporter = Arc::new(StatusReporter::new());
    let listener = reporter.clone().attach(orchestrator.subscribe());
    let cancel = CancelHandle::new();
    let interrupts = watch_interrupts(cancel.clone());

    let request = DeployRequest {
        selection: args.components,
        force_sync: args.force_sync,
    };
    let outcome = orchestrator.deploy(&plan, request, &cancel).await;
    interrupts.abort();

    // Closing the event stream lets the reporter drain and stop
    drop(orchestrator);
    if let Err(err) = listener.await {
        warn!(error = %err, "Status reporter stopped abnormally");
    }

    let outcome = outcome?;
    print_outcome(&outcome, format)?;
    Ok(deploy_exit_code(outcome.status()))
}

/// First Ctrl-C stops new applies; a second one also restores the current wave.
fn watch_interrupts(cancel: CancelHandle) -> JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        warn!("Cancelling run; in-flight units will finish. Press Ctrl-C again to roll back the current wave");
        cancel.cancel();

        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Current wave will be rolled back once in-flight units settle");
            cancel.cancel_with_rollback();
        }
    })
}

fn print_dry_run(report: &DryRunReport, format: OutputFormat) -> CliResult<u8> {
    let rows: Vec<PlannedRow> = report
        .waves
        .iter()
        .flat_map(|wave| {
            wave.units.iter().map(|unit| PlannedRow {
                wave: wave.number,
                unit: unit.name.to_string(),
                cluster: unit.cluster.to_string(),
                manifest: unit.manifest.clone(),
                current: unit.current.clone().unwrap_or_else(|| "<absent>".to_string()),
                problem: unit
                    .problem
                    .as_deref()
                    .map(|p| truncate(p, 50))
                    .unwrap_or_default(),
            })
        })
        .collect();

    if format == OutputFormat::Table {
        print_info(&format!(
            "Dry run for {}: nothing will be applied",
            report.environment
        ));
    }
    output::print_output(rows, report, format)?;

    let problems = report.problems().count();
    if problems > 0 {
        if format == OutputFormat::Table {
            print_warning(&format!("{problems} unit(s) cannot be deployed as things stand"));
        }
        return Ok(1);
    }
    Ok(0)
}
