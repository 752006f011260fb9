//! CLI command implementations

pub mod checkpoint;
pub mod commands;
pub mod error;
pub mod output;

pub use checkpoint::CheckpointCommand;
pub use commands::{Cli, Commands};
pub use error::CliError;
pub use output::OutputFormat;
