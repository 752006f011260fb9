//! Row snapshots for resumable relink phases
//!
//! A relink changes row ids, so listing the destination again after a crash
//! would produce a different work list than the one the checkpoint cursor
//! points into. The first run of a phase stores its listing here and every
//! resumed run reuses it.

use super::state::{read_locked, write_atomic, CheckpointError};
use crate::model::TargetRow;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

/// Listed rows per table id
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RowSnapshot {
    phase: String,
    taken_at: i64,
    tables: BTreeMap<String, Vec<TargetRow>>,
}

impl RowSnapshot {
    /// Empty snapshot for a phase
    pub fn new(phase: impl Into<String>) -> Self {
        Self {
            phase: phase.into(),
            taken_at: chrono::Utc::now().timestamp_millis(),
            tables: BTreeMap::new(),
        }
    }

    /// Snapshot file belonging to a checkpoint
    pub fn path_for(checkpoint: &Path) -> PathBuf {
        checkpoint.with_extension("rows.json")
    }

    /// Phase name
    pub fn phase(&self) -> &str {
        &self.phase
    }

    /// Store the rows of a table
    pub fn insert(&mut self, table_id: impl Into<String>, rows: Vec<TargetRow>) {
        self.tables.insert(table_id.into(), rows);
    }

    /// Rows of a table, if captured
    pub fn rows(&self, table_id: &str) -> Option<&[TargetRow]> {
        self.tables.get(table_id).map(Vec::as_slice)
    }

    /// Persist atomically
    pub fn save(&self, path: &Path) -> Result<(), CheckpointError> {
        let json = serde_json::to_string(self)
            .map_err(|e| CheckpointError::Serialization(e.to_string()))?;
        write_atomic(path, json.as_bytes())?;
        info!(
            path = %path.display(),
            tables = self.tables.len(),
            rows = self.tables.values().map(Vec::len).sum::<usize>(),
            "Row snapshot saved"
        );
        Ok(())
    }

    /// Load a snapshot written for `phase`, if one exists
    pub fn load_if_present(path: &Path, phase: &str) -> Result<Option<Self>, CheckpointError> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = read_locked(path)?;
        let snapshot: RowSnapshot = serde_json::from_str(&contents)
            .map_err(|e| CheckpointError::Corrupt(format!("{}: {e}", path.display())))?;
        if snapshot.phase != phase {
            return Err(CheckpointError::PhaseMismatch {
                expected: phase.to_string(),
                found: snapshot.phase,
            });
        }
        info!(path = %path.display(), "Reusing row snapshot from interrupted run");
        Ok(Some(snapshot))
    }

    /// Delete the snapshot file if present
    pub fn remove(path: &Path) -> Result<(), CheckpointError> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CheckpointError::Io(format!("{}: {e}", path.display()))),
        }?;
        let _ = std::fs::remove_file(path.with_extension("lock"));
        Ok(())
    }
}
