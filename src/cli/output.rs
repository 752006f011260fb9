//! Run summaries in human or JSON form

use crate::phases::dedupe::DedupeReport;
use crate::phases::PhaseReport;
use crate::verify::TableReport;
use serde::Serialize;
use std::fmt::Write as _;
use std::str::FromStr;
use tracing::error;

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// JSON output
    Json,
    /// Human-readable output
    Human,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "human" => Ok(OutputFormat::Human),
            _ => Err(format!("Invalid output format: {s}")),
        }
    }
}

fn output_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(e) => error!(error = %e, "Failed to serialize summary"),
    }
}

/// Human summary of a phase run
pub fn render_phase(report: &PhaseReport) -> String {
    let mut out = String::new();
    let mode = if report.dry_run { " (dry run)" } else { "" };
    let _ = writeln!(out, "Phase {}{mode}", report.phase);
    for stage in &report.stages {
        let state = if stage.completed { "completed" } else { "interrupted" };
        let _ = write!(
            out,
            "  {}: {}/{} {state}",
            stage.phase,
            stage.stats.processed(),
            stage.total
        );
        if stage.resumed_from > 0 {
            let _ = write!(out, " (resumed at {})", stage.resumed_from);
        }
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "    created {}, updated {}, skipped {}, errors {}",
            stage.stats.created, stage.stats.updated, stage.stats.skipped, stage.stats.errors
        );
        if !stage.identifiers.is_empty() {
            let _ = writeln!(out, "    new row ids: {}", stage.identifiers.len());
        }
    }
    if report.unmatched > 0 {
        let _ = writeln!(out, "  unmatched inputs: {}", report.unmatched);
    }
    if !report.completed() {
        let _ = writeln!(out, "Checkpoint kept; rerun the same command to resume.");
    }
    out
}

/// Human summary of a dedupe run
pub fn render_dedupe(report: &DedupeReport) -> String {
    let mut out = String::new();
    let mode = if report.executed { "executed" } else { "plan only" };
    let _ = writeln!(out, "Deduplication ({mode})");
    for table in &report.tables {
        let _ = writeln!(
            out,
            "  {}: {} rows, {} duplicate groups, {} to delete",
            table.table, table.rows, table.groups, table.to_delete
        );
        if report.executed {
            let _ = writeln!(out, "    deleted {}, failed {}", table.deleted, table.failed);
        }
        if table.interrupted {
            let _ = writeln!(out, "    interrupted");
        }
    }
    out
}

/// Print a phase summary
pub fn print_phase(report: &PhaseReport, format: OutputFormat) {
    match format {
        OutputFormat::Json => output_json(report),
        OutputFormat::Human => print!("{}", render_phase(report)),
    }
}

/// Print a dedupe summary
pub fn print_dedupe(report: &DedupeReport, format: OutputFormat) {
    match format {
        OutputFormat::Json => output_json(report),
        OutputFormat::Human => print!("{}", render_dedupe(report)),
    }
}

/// Print a reconciliation report
pub fn print_verify(report: &TableReport, format: OutputFormat) {
    match format {
        OutputFormat::Json => output_json(report),
        OutputFormat::Human => print!("{}", report.render()),
    }
}
