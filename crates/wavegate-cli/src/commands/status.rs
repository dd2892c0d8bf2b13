//! Status command

use clap::Args;
use serde::Serialize;
use tabled::Tabled;
use wavegate_observability::RunView;
use wavegate_types::{DeploymentRun, RunId, UnitStatus};

use super::{Session, UnitRow};
use crate::error::CliResult;
use crate::output::{self, format_run_status, OutputFormat};

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Run ID (defaults to the most recent run)
    #[arg(long)]
    pub run: Option<RunId>,

    /// List the most recent runs instead of showing one
    #[arg(long, value_name = "N", conflicts_with = "run")]
    pub history: Option<usize>,
}

/// Table row for run history display
#[derive(Debug, Serialize, Tabled)]
struct RunRow {
    run: String,
    environment: String,
    status: String,
    started: String,
    waves: String,
}

impl From<&DeploymentRun> for RunRow {
    fn from(run: &DeploymentRun) -> Self {
        let waves = format!(
            "{}/{}",
            run.completed_waves().len(),
            run.waves().len()
        );
        Self {
            run: run.id().to_string(),
            environment: run.environment().to_string(),
            status: format_run_status(run.status()),
            started: run.started_at().format("%Y-%m-%d %H:%M:%S").to_string(),
            waves,
        }
    }
}

pub async fn execute(args: StatusArgs, session: Session, format: OutputFormat) -> CliResult<u8> {
    if let Some(limit) = args.history {
        let runs = session.orchestrator.history(limit).await?;
        let rows: Vec<RunRow> = runs.iter().map(RunRow::from).collect();
        output::print_output(rows, &runs, format)?;
        return Ok(0);
    }

    let run = session.orchestrator.status(args.run.as_ref()).await?;
    let view = RunView::from_run(&run);
    if format != OutputFormat::Table {
        output::print_single(&view, format)?;
        return Ok(0);
    }

    println!("Run:         {}", view.run_id);
    println!("Environment: {}", view.environment);
    println!("Status:      {}", format_run_status(view.status));
    match view.current_wave {
        Some(wave) => println!(
            "Waves:       {} of {} completed (last active: {wave})",
            view.completed_waves.len(),
            view.waves.len()
        ),
        None => println!("Waves:       none started"),
    }
    println!(
        "Units:       {} healthy, {} failed, {} rolled back, {} cancelled",
        view.count(UnitStatus::Healthy),
        view.count(UnitStatus::Failed),
        view.count(UnitStatus::RolledBack),
        view.count(UnitStatus::Cancelled)
    );

    let rows: Vec<UnitRow> = run.units().map(UnitRow::from).collect();
    output::print_output(rows, &view, format)?;
    Ok(0)
}
