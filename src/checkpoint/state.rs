//! Checkpoint persistence
//!
//! Atomic file writes (temp file + rename + directory fsync) under an
//! advisory fd-lock, and schema versioning.

use fd_lock::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Current checkpoint schema version
const SCHEMA_VERSION: &str = "1.0.0";

/// Maximum allowed checkpoint file size (10 MB) to prevent memory exhaustion
pub const MAX_CHECKPOINT_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Per-run counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    /// Rows created
    pub created: u64,
    /// Rows relinked (deleted and recreated)
    pub updated: u64,
    /// Units that needed no write
    #[serde(default)]
    pub skipped: u64,
    /// Units that failed
    pub errors: u64,
}

impl Stats {
    /// Units that completed without error
    pub fn succeeded(&self) -> u64 {
        self.created + self.updated + self.skipped
    }

    /// All units accounted for
    pub fn processed(&self) -> u64 {
        self.succeeded() + self.errors
    }
}

/// Persisted progress of one batch phase.
///
/// `cursor` is the index of the next unit to process; everything before it
/// is done and accounted for in `stats`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    schema_version: String,
    phase: String,
    cursor: usize,
    total: usize,
    stats: Stats,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    new_identifier_map: BTreeMap<String, String>,
    created_at: i64,
    updated_at: i64,
}

impl Checkpoint {
    /// Fresh checkpoint at cursor 0
    pub fn new(phase: impl Into<String>, total: usize) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            phase: phase.into(),
            cursor: 0,
            total,
            stats: Stats::default(),
            new_identifier_map: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Phase name
    pub fn phase(&self) -> &str {
        &self.phase
    }

    /// Index of the next unit
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Number of units in the work list
    pub fn total(&self) -> usize {
        self.total
    }

    /// Counters so far
    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// Mutable counters
    pub fn stats_mut(&mut self) -> &mut Stats {
        &mut self.stats
    }

    /// Natural key to new row id, for rows recreated by this phase
    pub fn new_identifier_map(&self) -> &BTreeMap<String, String> {
        &self.new_identifier_map
    }

    /// Mutable identifier map
    pub fn new_identifier_map_mut(&mut self) -> &mut BTreeMap<String, String> {
        &mut self.new_identifier_map
    }

    /// Creation time (Unix millis)
    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    /// Last update time (Unix millis)
    pub fn updated_at(&self) -> i64 {
        self.updated_at
    }

    /// Whether every unit has been processed
    pub fn is_complete(&self) -> bool {
        self.cursor >= self.total
    }

    /// Move past the current unit
    pub fn advance(&mut self) {
        self.cursor += 1;
        self.updated_at = chrono::Utc::now().timestamp_millis();
    }

    /// Refuse to resume a checkpoint written for a different work list
    pub fn ensure_matches(&self, phase: &str, total: usize) -> Result<(), CheckpointError> {
        if self.phase != phase {
            return Err(CheckpointError::PhaseMismatch {
                expected: phase.to_string(),
                found: self.phase.clone(),
            });
        }
        if self.total != total {
            return Err(CheckpointError::TotalMismatch {
                expected: total,
                found: self.total,
            });
        }
        if self.cursor > self.total {
            return Err(CheckpointError::Corrupt(format!(
                "cursor {} beyond total {}",
                self.cursor, self.total
            )));
        }
        Ok(())
    }

    /// Validate schema version (accepts current version only)
    pub fn validate_schema_version(&self) -> Result<(), CheckpointError> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(CheckpointError::SchemaVersionMismatch {
                expected: SCHEMA_VERSION.to_string(),
                found: self.schema_version.clone(),
            });
        }
        Ok(())
    }

    /// Save to `path` atomically under a file lock
    pub fn save(&self, path: &Path) -> Result<(), CheckpointError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| CheckpointError::Serialization(e.to_string()))?;
        write_atomic(path, json.as_bytes())?;
        debug!(
            path = %path.display(),
            phase = %self.phase,
            cursor = self.cursor,
            total = self.total,
            "Checkpoint saved"
        );
        Ok(())
    }

    /// Load from `path`, validating size and schema version
    pub fn load(path: &Path) -> Result<Self, CheckpointError> {
        let contents = read_locked(path)?;
        let checkpoint: Checkpoint = serde_json::from_str(&contents).map_err(|e| {
            warn!(path = %path.display(), error = %e, "Failed to deserialize checkpoint");
            CheckpointError::Corrupt(format!("{}: {e}", path.display()))
        })?;
        checkpoint.validate_schema_version()?;

        info!(
            path = %path.display(),
            phase = %checkpoint.phase,
            cursor = checkpoint.cursor,
            total = checkpoint.total,
            "Checkpoint loaded"
        );
        Ok(checkpoint)
    }

    /// Load if the file exists
    pub fn load_if_present(path: &Path) -> Result<Option<Self>, CheckpointError> {
        if !path.exists() {
            return Ok(None);
        }
        Self::load(path).map(Some)
    }

    /// Delete the checkpoint and its lock file. Returns whether a file existed.
    pub fn remove(path: &Path) -> Result<bool, CheckpointError> {
        let existed = remove_if_exists(path)?;
        remove_if_exists(&save_lock_path(path))?;
        if existed {
            info!(path = %path.display(), "Checkpoint removed");
        }
        Ok(existed)
    }
}

fn remove_if_exists(path: &Path) -> Result<bool, CheckpointError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(CheckpointError::Io(format!("{}: {e}", path.display()))),
    }
}

/// `<stem>.lock`, held only for the duration of one save or load
fn save_lock_path(path: &Path) -> PathBuf {
    path.with_extension("lock")
}

/// Write `bytes` to `path` atomically while holding the save lock
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), CheckpointError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| CheckpointError::Io(e.to_string()))?;
    }

    let lock_file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(save_lock_path(path))
        .map_err(|e| CheckpointError::Lock(format!("Failed to create lock file: {e}")))?;
    let mut lock = RwLock::new(lock_file);
    let _guard = lock
        .write()
        .map_err(|e| CheckpointError::Lock(format!("Failed to acquire write lock: {e}")))?;

    let parent_dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut temp_file = tempfile::NamedTempFile::new_in(parent_dir)
        .map_err(|e| CheckpointError::Io(format!("Failed to create temp file: {e}")))?;
    temp_file
        .write_all(bytes)
        .map_err(|e| CheckpointError::Io(format!("Failed to write temp file: {e}")))?;
    temp_file
        .flush()
        .map_err(|e| CheckpointError::Io(format!("Failed to flush temp file: {e}")))?;
    temp_file
        .as_file()
        .sync_all()
        .map_err(|e| CheckpointError::Io(format!("Failed to sync temp file: {e}")))?;
    temp_file
        .persist(path)
        .map_err(|e| CheckpointError::Io(format!("Failed to persist temp file: {e}")))?;

    // Make the rename durable
    if let Ok(dir) = std::fs::File::open(parent_dir) {
        let _ = dir.sync_all();
    }
    Ok(())
}

/// Read `path` under a shared save lock, refusing oversized files
pub(crate) fn read_locked(path: &Path) -> Result<String, CheckpointError> {
    let lock_file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(save_lock_path(path))
        .map_err(|e| CheckpointError::Lock(format!("Failed to create lock file: {e}")))?;
    let lock = RwLock::new(lock_file);
    let _guard = lock
        .read()
        .map_err(|e| CheckpointError::Lock(format!("Failed to acquire read lock: {e}")))?;

    let metadata = std::fs::metadata(path)
        .map_err(|e| CheckpointError::Io(format!("{}: {e}", path.display())))?;
    if metadata.len() > MAX_CHECKPOINT_FILE_SIZE {
        return Err(CheckpointError::TooLarge {
            size: metadata.len(),
            max: MAX_CHECKPOINT_FILE_SIZE,
        });
    }
    std::fs::read_to_string(path)
        .map_err(|e| CheckpointError::Io(format!("{}: {e}", path.display())))
}

/// Checkpoint errors. All of them are fatal for a run.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// Schema version mismatch
    #[error("checkpoint schema version mismatch: expected {expected}, found {found}")]
    SchemaVersionMismatch {
        /// Expected schema version
        expected: String,
        /// Found schema version
        found: String,
    },

    /// Checkpoint belongs to another phase
    #[error(
        "checkpoint belongs to phase '{found}', not '{expected}'; \
         clear it or pick another --checkpoint-dir"
    )]
    PhaseMismatch {
        /// Phase being run
        expected: String,
        /// Phase recorded in the file
        found: String,
    },

    /// Work list size changed since the checkpoint was written
    #[error(
        "checkpoint was written for {found} units but this run has {expected}; \
         the inputs changed, clear the checkpoint to start over"
    )]
    TotalMismatch {
        /// Units in this run
        expected: usize,
        /// Units recorded in the file
        found: usize,
    },

    /// File too large
    #[error("checkpoint file too large: {size} bytes (max: {max} bytes)")]
    TooLarge {
        /// Actual file size
        size: u64,
        /// Maximum allowed size
        max: u64,
    },

    /// Unreadable content
    #[error("corrupt checkpoint: {0}")]
    Corrupt(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Lock error
    #[error("lock error: {0}")]
    Lock(String),
}
