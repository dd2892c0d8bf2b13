//! Unlock command: inspect and break cluster locks
//!
//! Locks of a crashed process on this host are reclaimed by the next run on
//! their own. Locks from other hosts, or from processes whose liveness can't
//! be checked, need this command.

use std::collections::BTreeSet;

use clap::Args;
use serde::Serialize;
use tabled::Tabled;
use wavegate_state::FileRunLock;
use wavegate_types::ClusterId;

use crate::config::WavegateConfig;
use crate::error::{CliError, CliResult};
use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct UnlockArgs {
    /// Clusters to unlock (defaults to every configured cluster)
    #[arg(long = "cluster", value_name = "ID")]
    pub clusters: Vec<String>,

    /// Remove the locks; without this the holders are only listed
    #[arg(long)]
    pub force: bool,
}

/// Table row for lock display
#[derive(Debug, Serialize, Tabled)]
struct LockRow {
    cluster: String,
    holder: String,
}

fn targets(args: &UnlockArgs, config: &WavegateConfig) -> CliResult<BTreeSet<ClusterId>> {
    if args.clusters.is_empty() {
        return Ok(config.clusters.iter().map(|c| c.id.clone()).collect());
    }
    let known: BTreeSet<&ClusterId> = config.clusters.iter().map(|c| &c.id).collect();
    let requested: BTreeSet<ClusterId> =
        args.clusters.iter().map(|c| ClusterId::new(c.as_str())).collect();
    if let Some(unknown) = requested.iter().find(|c| !known.contains(c)) {
        return Err(CliError::InvalidArgument(format!(
            "cluster {unknown} is not configured"
        )));
    }
    Ok(requested)
}

pub fn execute(args: UnlockArgs, config: &WavegateConfig, format: OutputFormat) -> CliResult<u8> {
    let clusters = targets(&args, config)?;
    let lock = FileRunLock::new(config.locks_dir());

    let held = if args.force {
        lock.force_release(&clusters)?
    } else {
        lock.holders(&clusters)?
    };

    if held.is_empty() {
        output::print_info("No cluster is locked");
        return Ok(0);
    }

    let rows: Vec<LockRow> = held
        .iter()
        .map(|(cluster, holder)| LockRow {
            cluster: cluster.to_string(),
            holder: holder.clone(),
        })
        .collect();
    output::print_output(rows, &held, format)?;
    if args.force {
        output::print_success(&format!("Released {} lock(s)", held.len()));
    } else {
        output::print_warning("Rerun with --force to remove these locks");
    }
    Ok(0)
}
