//! Checkpointing for resumable batch phases
//!
//! Persistent progress with atomic writes and file locking.

pub mod lock;
pub mod snapshot;
pub mod state;

pub use lock::RunLock;
pub use snapshot::RowSnapshot;
pub use state::{Checkpoint, CheckpointError, Stats};
