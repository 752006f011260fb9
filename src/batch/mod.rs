//! Checkpointed batch processing
//!
//! [`BatchProcessor::run`] drives a work list through a [`BatchStep`] one
//! unit at a time. After every unit, whatever its outcome, the cursor is
//! advanced and the checkpoint saved, so a crash loses at most the unit in
//! flight. Failed units are logged and counted, never fatal: a multi-hour
//! run cannot restart from zero over one malformed record.

use crate::checkpoint::{Checkpoint, CheckpointError, RunLock, Stats};
use crate::gateway::GatewayError;
use crate::metrics;
use crate::pacing::Pacer;
use crate::shutdown::{self, SharedShutdown};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// How a unit ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    /// A new row was written
    Created,
    /// An existing row was relinked
    Updated,
    /// Nothing to do for this unit
    Skipped,
}

impl OutcomeKind {
    fn as_str(&self) -> &'static str {
        match self {
            OutcomeKind::Created => "created",
            OutcomeKind::Updated => "updated",
            OutcomeKind::Skipped => "skipped",
        }
    }
}

/// Successful result of one unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    /// Outcome class
    pub kind: OutcomeKind,
    /// Short human-readable detail for the progress line
    pub detail: String,
}

impl StepOutcome {
    /// A row was created
    pub fn created(detail: impl Into<String>) -> Self {
        Self {
            kind: OutcomeKind::Created,
            detail: detail.into(),
        }
    }

    /// A row was relinked
    pub fn updated(detail: impl Into<String>) -> Self {
        Self {
            kind: OutcomeKind::Updated,
            detail: detail.into(),
        }
    }

    /// Nothing was written
    pub fn skipped(detail: impl Into<String>) -> Self {
        Self {
            kind: OutcomeKind::Skipped,
            detail: detail.into(),
        }
    }
}

/// Transform-and-write step applied to each unit.
///
/// `identifiers` is the phase's natural-key to new-row-id map; it is saved
/// with the checkpoint, so entries survive a restart.
#[async_trait]
pub trait BatchStep<T: Sync>: Send {
    /// Identity of a unit for progress and error lines
    fn label(&self, item: &T) -> String;

    /// Process one unit
    async fn apply(
        &mut self,
        item: &T,
        identifiers: &mut BTreeMap<String, String>,
    ) -> Result<StepOutcome, GatewayError>;
}

/// Result of a batch run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchRun {
    /// Phase name
    pub phase: String,
    /// Counters, including units processed by earlier interrupted runs
    pub stats: Stats,
    /// Units in the work list
    pub total: usize,
    /// Cursor the run started from
    pub resumed_from: usize,
    /// Whether the whole work list was processed
    pub completed: bool,
    /// Natural key to new row id
    #[serde(skip)]
    pub identifiers: BTreeMap<String, String>,
}

/// Fatal batch errors (per-unit failures are counted, not returned)
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    /// Checkpoint could not be read, written or locked
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

/// Sequential, checkpointed driver for a work list
#[derive(Debug, Clone)]
pub struct BatchProcessor {
    phase: String,
    checkpoint_path: Option<PathBuf>,
    pacer: Pacer,
    shutdown: Option<SharedShutdown>,
    retain_on_completion: bool,
    seed_identifiers: BTreeMap<String, String>,
}

impl BatchProcessor {
    /// Processor for a phase; without a checkpoint path nothing is persisted
    pub fn new(phase: impl Into<String>, checkpoint_path: Option<PathBuf>) -> Self {
        Self {
            phase: phase.into(),
            checkpoint_path,
            pacer: Pacer::default(),
            shutdown: None,
            retain_on_completion: false,
            seed_identifiers: BTreeMap::new(),
        }
    }

    /// Pause between units
    pub fn with_pacer(mut self, pacer: Pacer) -> Self {
        self.pacer = pacer;
        self
    }

    /// Stop before the next unit once shutdown is requested
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Keep the completed checkpoint on disk.
    ///
    /// Multi-stage phases keep earlier stages' checkpoints until the last
    /// stage finishes, so a crash in stage two does not rerun stage one.
    pub fn retain_on_completion(mut self, retain: bool) -> Self {
        self.retain_on_completion = retain;
        self
    }

    /// Identifier entries a fresh checkpoint starts with
    pub fn with_identifiers(mut self, identifiers: BTreeMap<String, String>) -> Self {
        self.seed_identifiers = identifiers;
        self
    }

    /// Checkpoint file, if persistence is on
    pub fn checkpoint_path(&self) -> Option<&Path> {
        self.checkpoint_path.as_deref()
    }

    /// Process `items` from the checkpointed cursor to the end
    pub async fn run<T, S>(&self, items: &[T], step: &mut S) -> Result<BatchRun, BatchError>
    where
        T: Sync,
        S: BatchStep<T>,
    {
        let total = items.len();
        let _lock = match &self.checkpoint_path {
            Some(path) => Some(RunLock::try_acquire(path)?),
            None => None,
        };

        let mut checkpoint = self.open_checkpoint(total)?;
        let resumed_from = checkpoint.cursor();
        if resumed_from > 0 {
            info!(
                phase = %self.phase,
                cursor = resumed_from,
                total,
                "Resuming from checkpoint"
            );
        } else {
            info!(phase = %self.phase, total, "Starting batch");
        }

        while checkpoint.cursor() < total {
            if shutdown::is_requested(self.shutdown.as_ref()) {
                return self.interrupted(checkpoint, resumed_from);
            }

            let index = checkpoint.cursor();
            let item = &items[index];
            let label = step.label(item);
            let position = format!("[{}/{}]", index + 1, total);

            let result = step.apply(item, checkpoint.new_identifier_map_mut()).await;
            match result {
                Ok(outcome) => {
                    let stats = checkpoint.stats_mut();
                    match outcome.kind {
                        OutcomeKind::Created => stats.created += 1,
                        OutcomeKind::Updated => stats.updated += 1,
                        OutcomeKind::Skipped => stats.skipped += 1,
                    }
                    metrics::record_item(outcome.kind.as_str());
                    info!("✓ {} {}: {}", position, label, outcome.detail);
                }
                Err(GatewayError::Interrupted(what))
                    if shutdown::is_requested(self.shutdown.as_ref()) =>
                {
                    // The unit did not complete; leave the cursor on it
                    warn!("{} {} interrupted during {}", position, label, what);
                    return self.interrupted(checkpoint, resumed_from);
                }
                Err(e) => {
                    checkpoint.stats_mut().errors += 1;
                    metrics::record_item("error");
                    error!(kind = e.kind(), "✗ {} {}: {}", position, label, e);
                }
            }

            checkpoint.advance();
            self.persist(&checkpoint)?;

            if checkpoint.cursor() < total {
                self.pacer.between_requests().await;
            }
        }

        let stats = *checkpoint.stats();
        match &self.checkpoint_path {
            Some(path) if self.retain_on_completion => checkpoint.save(path)?,
            Some(path) => {
                Checkpoint::remove(path)?;
            }
            None => {}
        }

        info!(
            phase = %self.phase,
            created = stats.created,
            updated = stats.updated,
            skipped = stats.skipped,
            errors = stats.errors,
            "Batch complete"
        );

        Ok(BatchRun {
            phase: self.phase.clone(),
            stats,
            total,
            resumed_from,
            completed: true,
            identifiers: checkpoint.new_identifier_map().clone(),
        })
    }

    fn open_checkpoint(&self, total: usize) -> Result<Checkpoint, BatchError> {
        let existing = match &self.checkpoint_path {
            Some(path) => Checkpoint::load_if_present(path)?,
            None => None,
        };
        match existing {
            Some(checkpoint) => {
                checkpoint.ensure_matches(&self.phase, total)?;
                Ok(checkpoint)
            }
            None => {
                let mut checkpoint = Checkpoint::new(self.phase.clone(), total);
                checkpoint
                    .new_identifier_map_mut()
                    .extend(self.seed_identifiers.clone());
                Ok(checkpoint)
            }
        }
    }

    fn persist(&self, checkpoint: &Checkpoint) -> Result<(), BatchError> {
        if let Some(path) = &self.checkpoint_path {
            checkpoint.save(path)?;
        }
        Ok(())
    }

    fn interrupted(
        &self,
        checkpoint: Checkpoint,
        resumed_from: usize,
    ) -> Result<BatchRun, BatchError> {
        self.persist(&checkpoint)?;
        warn!(
            phase = %self.phase,
            cursor = checkpoint.cursor(),
            total = checkpoint.total(),
            "Shutdown requested - checkpoint saved, rerun the same command to resume"
        );
        Ok(BatchRun {
            phase: self.phase.clone(),
            stats: *checkpoint.stats(),
            total: checkpoint.total(),
            resumed_from,
            completed: false,
            identifiers: checkpoint.new_identifier_map().clone(),
        })
    }
}
