//! Run lock: one process per checkpoint
//!
//! Advisory locking via fd-lock. The lock lives as long as the open file
//! handle, so a crashed run never leaves a stale lock behind.

use super::state::CheckpointError;
use fd_lock::RwLock;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Exclusive lock on `<checkpoint stem>.run.lock`, released on drop
#[derive(Debug)]
pub struct RunLock {
    _lock: RwLock<File>,
    path: PathBuf,
}

impl RunLock {
    /// Lock file guarding a checkpoint
    pub fn lock_path(checkpoint: &Path) -> PathBuf {
        checkpoint.with_extension("run.lock")
    }

    /// Take the lock without blocking.
    ///
    /// Fails immediately if another process is driving the same checkpoint.
    pub fn try_acquire(checkpoint: &Path) -> Result<Self, CheckpointError> {
        if let Some(parent) = checkpoint.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| CheckpointError::Io(e.to_string()))?;
        }

        let path = Self::lock_path(checkpoint);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| CheckpointError::Lock(format!("Failed to open lock file: {e}")))?;

        let mut lock = RwLock::new(file);
        let guard = lock.try_write().map_err(|e| {
            CheckpointError::Lock(format!(
                "{} is held by another run ({e})",
                path.display()
            ))
        })?;
        // The flock stays held until the file handle closes
        std::mem::forget(guard);

        debug!(path = %path.display(), "Run lock acquired");
        Ok(Self { _lock: lock, path })
    }

    /// Path of the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}
