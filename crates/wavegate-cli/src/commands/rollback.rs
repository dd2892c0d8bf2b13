//! Rollback command

use clap::Args;
use tracing::warn;
use wavegate_types::{RunStatus, WavePlan};

use super::{print_outcome, Session};
use crate::error::{CliError, CliResult};
use crate::output::{print_success, OutputFormat};

#[derive(Debug, Args)]
pub struct RollbackArgs {
    /// Restore every applied wave from N onward, last first
    /// (omit to restore only the last applied wave)
    #[arg(long, value_name = "N")]
    pub to_wave: Option<u32>,
}

pub async fn execute(args: RollbackArgs, session: Session, format: OutputFormat) -> CliResult<u8> {
    if args.to_wave == Some(0) {
        return Err(CliError::InvalidArgument(
            "waves are numbered from 1".to_string(),
        ));
    }

    // Units are restored from the run record; the plan supplies their remaining settings
    let plan = match session.config.plan() {
        Ok(plan) => plan,
        Err(err) => {
            warn!(error = %err, "Declared units do not resolve; restoring from the run record alone");
            WavePlan::new(Vec::new())
        }
    };

    let outcome = session.orchestrator.rollback(&plan, args.to_wave).await?;
    print_outcome(&outcome, format)?;

    Ok(match outcome.status() {
        RunStatus::RolledBack => {
            if format == OutputFormat::Table {
                print_success("Rollback complete");
            }
            0
        }
        RunStatus::FailedNoRollback => 3,
        _ => 1,
    })
}
