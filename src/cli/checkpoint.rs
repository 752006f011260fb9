//! Checkpoint subcommand

use super::output::OutputFormat;
use super::CliError;
use crate::checkpoint::{Checkpoint, RowSnapshot, RunLock};
use crate::phases::DEFAULT_CHECKPOINT_DIR;
use chrono::{TimeZone, Utc};
use clap::Parser;
use std::path::{Path, PathBuf};

/// Inspect or clear checkpoints
#[derive(Parser, Debug)]
pub struct CheckpointCommand {
    /// What to do
    #[command(subcommand)]
    pub action: CheckpointAction,
}

/// Checkpoint actions
#[derive(clap::Subcommand, Debug)]
pub enum CheckpointAction {
    /// Print a checkpoint's progress
    Show {
        /// Checkpoint file
        #[arg(long)]
        path: PathBuf,
    },
    /// Delete a checkpoint together with its lock and snapshot files
    Clear {
        /// Checkpoint file
        #[arg(long)]
        path: PathBuf,
    },
    /// Check every checkpoint in a directory
    List {
        /// Checkpoint directory
        #[arg(long, default_value = DEFAULT_CHECKPOINT_DIR)]
        dir: PathBuf,
    },
}

fn format_millis(millis: i64) -> String {
    Utc.timestamp_millis_opt(millis)
        .single()
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| millis.to_string())
}

/// One-line description of a checkpoint
pub fn describe(checkpoint: &Checkpoint) -> String {
    let stats = checkpoint.stats();
    let state = if checkpoint.is_complete() { "complete" } else { "in progress" };
    format!(
        "{}: {}/{} {state} (created {}, updated {}, skipped {}, errors {}; saved {})",
        checkpoint.phase(),
        checkpoint.cursor(),
        checkpoint.total(),
        stats.created,
        stats.updated,
        stats.skipped,
        stats.errors,
        format_millis(checkpoint.updated_at()),
    )
}

impl CheckpointCommand {
    /// Execute the checkpoint command
    pub fn execute(&self, format: OutputFormat) -> Result<(), CliError> {
        match &self.action {
            CheckpointAction::Show { path } => self.show(path, format),
            CheckpointAction::Clear { path } => self.clear(path),
            CheckpointAction::List { dir } => self.list(dir),
        }
    }

    fn show(&self, path: &Path, format: OutputFormat) -> Result<(), CliError> {
        let Some(checkpoint) = Checkpoint::load_if_present(path)? else {
            println!("No checkpoint at {}", path.display());
            return Ok(());
        };
        match format {
            OutputFormat::Json => match serde_json::to_string_pretty(&checkpoint) {
                Ok(json) => println!("{json}"),
                Err(e) => return Err(CliError::InvalidArgument(e.to_string())),
            },
            OutputFormat::Human => {
                println!("{}", describe(&checkpoint));
                let identifiers = checkpoint.new_identifier_map().len();
                if identifiers > 0 {
                    println!("  new row ids recorded: {identifiers}");
                }
            }
        }
        Ok(())
    }

    fn clear(&self, path: &Path) -> Result<(), CliError> {
        // Refuse while a run is driving this checkpoint
        let lock = RunLock::try_acquire(path)?;
        let existed = Checkpoint::remove(path)?;
        RowSnapshot::remove(&RowSnapshot::path_for(path))?;
        drop(lock);
        if existed {
            println!("Cleared {}", path.display());
        } else {
            println!("No checkpoint at {}", path.display());
        }
        Ok(())
    }

    fn list(&self, dir: &Path) -> Result<(), CliError> {
        if !dir.exists() {
            println!("No checkpoint directory at {}", dir.display());
            return Ok(());
        }
        let entries = std::fs::read_dir(dir).map_err(|e| {
            CliError::InvalidArgument(format!("Cannot read {}: {e}", dir.display()))
        })?;
        let mut files: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .filter(|p| !p.to_string_lossy().ends_with(".rows.json"))
            .collect();
        files.sort();

        if files.is_empty() {
            println!("No checkpoints in {}", dir.display());
            return Ok(());
        }

        let mut invalid = 0;
        for path in &files {
            match Checkpoint::load(path) {
                Ok(checkpoint) => println!("  {}", describe(&checkpoint)),
                Err(e) => {
                    println!("  {} (invalid: {e})", path.display());
                    invalid += 1;
                }
            }
        }
        if invalid > 0 {
            return Err(CliError::InvalidArgument(format!(
                "Found {invalid} invalid checkpoint file(s)"
            )));
        }
        Ok(())
    }
}
