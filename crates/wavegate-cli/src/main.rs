//! Wavegate CLI - wave-based, dependency-gated deployments
//!
//! This CLI gives operators a terminal interface to:
//! - Resolve declared units into dependency-ordered waves
//! - Deploy waves across cluster contexts behind health gates
//! - Inspect the status and history of runs
//! - Roll back applied waves from their recorded snapshots

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use wavegate_observability::init_tracing;

mod commands;
mod config;
mod error;
mod output;

use commands::{deploy, plan, rollback, status, unlock, Session};
use crate::config::WavegateConfig;

/// Wavegate CLI application
#[derive(Parser)]
#[command(name = "wavegate")]
#[command(about = "Wavegate - wave-based multi-cluster deployment orchestrator", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "WAVEGATE_CONFIG", default_value = "wavegate.yaml")]
    config: PathBuf,

    /// Environment name (overrides the config file)
    #[arg(short, long, env = "WAVEGATE_ENVIRONMENT")]
    environment: Option<String>,

    /// Output format (table, json, yaml)
    #[arg(short, long, default_value = "table")]
    output: output::OutputFormat,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Log as JSON lines
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands
#[derive(Subcommand)]
enum Commands {
    /// Deploy the declared units wave by wave
    Deploy(deploy::DeployArgs),

    /// Show a run, or recent runs
    Status(status::StatusArgs),

    /// Restore applied waves of the latest run
    Rollback(rollback::RollbackArgs),

    /// Print the resolved wave plan
    Plan,

    /// Show or forcibly remove cluster locks left by another run
    Unlock(unlock::UnlockArgs),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            output::print_error(&format!("{err:#}"));
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<u8> {
    let mut config = WavegateConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(environment) = cli.environment {
        config.environment = environment;
    }

    let mut logging = config.logging.clone();
    if cli.verbose {
        logging = logging.with_level("debug");
    }
    if cli.log_json {
        logging = logging.with_json(true);
    }
    init_tracing(&logging)?;

    let code = match cli.command {
        Commands::Plan => plan::execute(&config, cli.output)?,
        Commands::Unlock(args) => unlock::execute(args, &config, cli.output)?,
        Commands::Deploy(args) => {
            let session = Session::open(config).await?;
            deploy::execute(args, session, cli.output).await?
        }
        Commands::Status(args) => {
            let session = Session::open(config).await?;
            status::execute(args, session, cli.output).await?
        }
        Commands::Rollback(args) => {
            let session = Session::open(config).await?;
            rollback::execute(args, session, cli.output).await?
        }
    };
    Ok(code)
}
