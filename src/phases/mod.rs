//! Migration phases
//!
//! Each phase is a thin configuration over the generic pieces: which tables
//! to list, how to key and resolve them, and which fields to carry into a
//! recreated row. All of them run through [`BatchProcessor`] and
//! [`LinkWriter`], so pacing, retry, checkpointing and shutdown behave the
//! same everywhere.

pub mod dedupe;
pub mod link_companies;
pub mod link_contacts;
pub mod link_interactions;
pub mod migrate;
pub mod recover;

use crate::associations::AssociationsError;
use crate::batch::{BatchError, BatchProcessor, BatchRun, BatchStep, StepOutcome};
use crate::checkpoint::{CheckpointError, RowSnapshot, Stats};
use crate::config::MigrationConfig;
use crate::gateway::{list_all, GatewayError, RowStore};
use crate::link_writer::{LinkWriter, SingleLinkMode};
use crate::model::{FieldMap, SourceError, TargetRow};
use crate::pacing::Pacer;
use crate::retry::RetryController;
use crate::shutdown::SharedShutdown;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Default directory for checkpoint and snapshot files
pub const DEFAULT_CHECKPOINT_DIR: &str = ".checkpoints";

/// Deal columns carried into a recreated opportunity
pub const DEAL_FIELDS: &[&str] = &[
    "Deal Name",
    "Stage",
    "Total Value",
    "Close Date",
    "Status",
    "Priority",
    "Owner",
    "Users",
    "Price/User",
    "Label",
];

/// Contact columns carried into a recreated contact
pub const CONTACT_FIELDS: &[&str] = &["Full Name", "Title", "Email", "Phone", "Website"];

/// Fatal phase errors
#[derive(Debug, Error)]
pub enum PhaseError {
    /// Listing or another unrecoverable destination call failed
    #[error("destination error: {0}")]
    Gateway(#[from] GatewayError),

    /// Checkpoint could not be used
    #[error(transparent)]
    Batch(#[from] BatchError),

    /// Snapshot or checkpoint file problem outside a batch
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    /// Source export could not be read
    #[error(transparent)]
    Source(#[from] SourceError),

    /// Associations dump could not be read
    #[error(transparent)]
    Associations(#[from] AssociationsError),
}

/// What a phase did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseReport {
    /// Phase name
    pub phase: String,
    /// Whether writes were only planned
    pub dry_run: bool,
    /// One entry per checkpointed stage that ran
    pub stages: Vec<BatchRun>,
    /// Inputs left out of the work list because they did not match anything
    pub unmatched: usize,
}

impl PhaseReport {
    /// Report for a phase
    pub fn new(phase: impl Into<String>, dry_run: bool) -> Self {
        Self {
            phase: phase.into(),
            dry_run,
            stages: Vec::new(),
            unmatched: 0,
        }
    }

    /// Whether every stage reached the end of its work list
    pub fn completed(&self) -> bool {
        self.stages.iter().all(|s| s.completed)
    }

    /// Counters summed over stages
    pub fn totals(&self) -> Stats {
        self.stages.iter().fold(Stats::default(), |mut acc, run| {
            acc.created += run.stats.created;
            acc.updated += run.stats.updated;
            acc.skipped += run.stats.skipped;
            acc.errors += run.stats.errors;
            acc
        })
    }
}

/// Shared wiring for a phase run
pub struct PhaseContext<'a> {
    /// Run configuration
    pub config: &'a MigrationConfig,
    store: &'a dyn RowStore,
    retry: RetryController,
    pacer: Pacer,
    shutdown: Option<SharedShutdown>,
    dry_run: bool,
    checkpoint_dir: PathBuf,
}

impl<'a> PhaseContext<'a> {
    /// Context with default retry policy, pacing and checkpoint directory
    pub fn new(config: &'a MigrationConfig, store: &'a dyn RowStore) -> Self {
        Self {
            config,
            store,
            retry: RetryController::default(),
            pacer: Pacer::default(),
            shutdown: None,
            dry_run: false,
            checkpoint_dir: PathBuf::from(DEFAULT_CHECKPOINT_DIR),
        }
    }

    /// Replace the retry controller
    pub fn with_retry(mut self, retry: RetryController) -> Self {
        self.retry = retry;
        self
    }

    /// Replace the pacer
    pub fn with_pacer(mut self, pacer: Pacer) -> Self {
        self.pacer = pacer;
        self
    }

    /// Make backoffs, pauses and batches stop on shutdown
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Plan and log only
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Directory for checkpoints and snapshots
    pub fn with_checkpoint_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.checkpoint_dir = dir.into();
        self
    }

    /// Whether writes are only planned
    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Destination store
    pub fn store(&self) -> &'a dyn RowStore {
        self.store
    }

    /// Retry controller honouring shutdown
    pub fn retry(&self) -> RetryController {
        match &self.shutdown {
            Some(shutdown) => self.retry.clone().with_shutdown(shutdown.clone()),
            None => self.retry.clone(),
        }
    }

    /// Pacer honouring shutdown
    pub fn pacer(&self) -> Pacer {
        match &self.shutdown {
            Some(shutdown) => self.pacer.clone().with_shutdown(shutdown.clone()),
            None => self.pacer.clone(),
        }
    }

    /// Checkpoint file for a named stage
    pub fn checkpoint_path(&self, name: &str) -> PathBuf {
        self.checkpoint_dir.join(format!("{name}.json"))
    }

    /// Batch processor for a named stage; dry runs persist nothing and
    /// skip the pause between units
    pub fn processor(&self, name: &str) -> BatchProcessor {
        let processor = if self.dry_run {
            BatchProcessor::new(name, None).with_pacer(Pacer::immediate())
        } else {
            BatchProcessor::new(name, Some(self.checkpoint_path(name))).with_pacer(self.pacer())
        };
        match &self.shutdown {
            Some(shutdown) => processor.with_shutdown(shutdown.clone()),
            None => processor,
        }
    }

    /// Link writer over the store
    pub fn writer(&self) -> LinkWriter<'a> {
        LinkWriter::new(self.store, self.retry(), self.pacer())
            .with_mode(SingleLinkMode::from_flag(self.config.duplicate_single_links))
    }

    /// List every row of a table
    pub async fn list(&self, table_id: &str) -> Result<Vec<TargetRow>, PhaseError> {
        Ok(list_all(self.store, &self.retry(), &self.pacer(), table_id).await?)
    }

    /// Rows of `table_ids` as listed by the first run of stage `name`.
    ///
    /// A snapshot left by an interrupted run is reused; otherwise the tables
    /// are listed and, outside dry runs, the snapshot is persisted.
    pub async fn snapshot(
        &self,
        name: &str,
        table_ids: &[&str],
    ) -> Result<RowSnapshot, PhaseError> {
        let path = RowSnapshot::path_for(&self.checkpoint_path(name));
        if !self.dry_run {
            if let Some(snapshot) = RowSnapshot::load_if_present(&path, name)? {
                if table_ids.iter().all(|t| snapshot.rows(t).is_some()) {
                    return Ok(snapshot);
                }
                debug!(path = %path.display(), "Snapshot lacks tables, listing again");
            }
        }

        let mut snapshot = RowSnapshot::new(name);
        for (index, table_id) in table_ids.iter().enumerate() {
            if index > 0 && !self.pacer().between_pages().await {
                return Err(GatewayError::Interrupted(format!("snapshot {name}")).into());
            }
            let rows = self.list(table_id).await?;
            snapshot.insert(*table_id, rows);
        }
        if !self.dry_run {
            snapshot.save(&path)?;
        }
        Ok(snapshot)
    }

    /// Remove the snapshot and the retained checkpoints of a finished phase
    pub fn cleanup(&self, snapshot_name: &str, retained: &[&str]) -> Result<(), PhaseError> {
        if self.dry_run {
            return Ok(());
        }
        for name in retained {
            crate::checkpoint::Checkpoint::remove(&self.checkpoint_path(name))?;
        }
        RowSnapshot::remove(&RowSnapshot::path_for(&self.checkpoint_path(snapshot_name)))?;
        Ok(())
    }

    /// Checkpoint directory
    pub fn checkpoint_dir(&self) -> &Path {
        &self.checkpoint_dir
    }
}

/// One row to delete and recreate with new links
#[derive(Debug, Clone, PartialEq)]
pub struct RelinkItem {
    /// Natural key, recorded against the new row id
    pub key: String,
    /// Row being replaced
    pub row_id: String,
    /// Scalar fields to carry over
    pub scalar: FieldMap,
    /// Link field to resolved row ids
    pub links: BTreeMap<String, Vec<String>>,
}

/// Relinks each [`RelinkItem`] of one table
pub struct RelinkStep<'a> {
    writer: LinkWriter<'a>,
    table_id: String,
    dry_run: bool,
}

impl<'a> RelinkStep<'a> {
    /// Step writing into `table_id`
    pub fn new(writer: LinkWriter<'a>, table_id: impl Into<String>, dry_run: bool) -> Self {
        Self {
            writer,
            table_id: table_id.into(),
            dry_run,
        }
    }
}

fn link_summary(links: &BTreeMap<String, Vec<String>>) -> String {
    links
        .iter()
        .filter(|(_, ids)| !ids.is_empty())
        .map(|(field, ids)| format!("{field}({})", ids.len()))
        .collect::<Vec<_>>()
        .join(", ")
}

#[async_trait]
impl<'a> BatchStep<RelinkItem> for RelinkStep<'a> {
    fn label(&self, item: &RelinkItem) -> String {
        item.key.clone()
    }

    async fn apply(
        &mut self,
        item: &RelinkItem,
        identifiers: &mut BTreeMap<String, String>,
    ) -> Result<StepOutcome, GatewayError> {
        let summary = link_summary(&item.links);
        if self.dry_run {
            let payload = Value::Object(self.writer.payload(&item.scalar, &item.links));
            info!(row_id = %item.row_id, payload = %payload, "Planned relink");
            return Ok(StepOutcome::skipped(format!("dry-run: would relink {summary}")));
        }

        let new_id = self
            .writer
            .relink(&self.table_id, &item.row_id, &item.scalar, &item.links)
            .await?;
        identifiers.insert(item.key.clone(), new_id.clone());
        Ok(StepOutcome::updated(format!("{summary} -> {new_id}")))
    }
}

/// Distinct string ids held by a link field, in stored order
pub fn link_ids(row: &TargetRow, field: &str) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    if let Some(Value::Array(items)) = row.fields.get(field) {
        for id in items.iter().filter_map(Value::as_str) {
            if !crate::model::is_blank_str(id) && !ids.iter().any(|seen| seen == id) {
                ids.push(id.to_string());
            }
        }
    }
    ids
}
