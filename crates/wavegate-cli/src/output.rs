//! Output formatting utilities

use colored::*;
use serde::Serialize;
use tabled::{Table, Tabled};
use wavegate_types::{RunStatus, UnitStatus};

use crate::error::CliResult;

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Pretty-printed table format
    #[default]
    Table,
    /// JSON format
    Json,
    /// YAML format
    Yaml,
}

/// Print rows as a table, or the structured value in JSON/YAML.
pub fn print_output<T: Serialize + Tabled, S: Serialize + ?Sized>(
    rows: Vec<T>,
    structured: &S,
    format: OutputFormat,
) -> CliResult<()> {
    match format {
        OutputFormat::Table => {
            if rows.is_empty() {
                println!("{}", "No results".dimmed());
            } else {
                println!("{}", Table::new(rows));
            }
            Ok(())
        }
        _ => print_single(structured, format),
    }
}

/// Print a single item in the specified format
pub fn print_single<T: Serialize + ?Sized>(data: &T, format: OutputFormat) -> CliResult<()> {
    match format {
        OutputFormat::Table | OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(data)?);
        }
        OutputFormat::Yaml => {
            print!("{}", serde_yaml::to_string(data)?);
        }
    }
    Ok(())
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green(), message);
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue(), message);
}

pub fn format_run_status(status: RunStatus) -> String {
    let text = status.to_string();
    match status {
        RunStatus::Succeeded => text.green().to_string(),
        RunStatus::Running | RunStatus::Pending => text.blue().to_string(),
        RunStatus::RolledBack | RunStatus::Cancelled => text.yellow().to_string(),
        RunStatus::Failed | RunStatus::FailedNoRollback => text.red().bold().to_string(),
    }
}

pub fn format_unit_status(status: UnitStatus) -> String {
    let text = status.to_string();
    match status {
        UnitStatus::Healthy => text.green().to_string(),
        UnitStatus::Applying | UnitStatus::Progressing => text.blue().to_string(),
        UnitStatus::Degraded | UnitStatus::RolledBack | UnitStatus::Cancelled => {
            text.yellow().to_string()
        }
        UnitStatus::Failed => text.red().to_string(),
        UnitStatus::Pending => text.dimmed().to_string(),
    }
}

/// Shortens long cell text for tables.
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let kept: String = text.chars().take(max.saturating_sub(3)).collect();
    format!("{kept}...")
}
