//! CLI error types and conversions

use crate::checkpoint::CheckpointError;
use crate::config::ConfigError;
use crate::gateway::GatewayError;
use crate::phases::PhaseError;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Destination error outside a phase
    #[error("destination error: {0}")]
    Gateway(#[source] GatewayError),

    /// Checkpoint error
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// Phase error
    #[error("phase error: {0}")]
    Phase(#[source] PhaseError),

    /// Invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Reconciliation found a mismatch
    #[error("verification failed: {0}")]
    VerificationFailed(String),

    /// Stopped by Ctrl+C; the checkpoint was kept
    #[error("interrupted; rerun the same command to resume")]
    Interrupted,
}

impl CliError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Interrupted => 130,
            _ => 1,
        }
    }
}

// A Ctrl+C that lands in a listing or a backoff surfaces as
// `GatewayError::Interrupted`; it exits like any other interrupted run.
impl From<GatewayError> for CliError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Interrupted(_) => CliError::Interrupted,
            other => CliError::Gateway(other),
        }
    }
}

impl From<PhaseError> for CliError {
    fn from(err: PhaseError) -> Self {
        match err {
            PhaseError::Gateway(GatewayError::Interrupted(_)) => CliError::Interrupted,
            other => CliError::Phase(other),
        }
    }
}
