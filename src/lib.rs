//! # CRM Migrator Library
//!
//! Moves CRM records from a HubSpot export into Stackby and repairs the
//! relationships between them, under a strict rate limit.
//!
//! ## Features
//!
//! - **Rate-limited gateway**: every destination call goes through one
//!   client that classifies responses, including HTML throttle pages served
//!   with a success status
//! - **Patient retry**: exponential backoff in the quarter-hour range, cut
//!   short by Ctrl+C
//! - **Resumable phases**: each batch persists a checkpoint after every unit
//!   and resumes at the first unfinished one
//! - **Relinking**: link columns cannot be patched in place, so rows are
//!   deleted and recreated with their links set
//! - **Dry runs**: every phase can plan and log its writes without making them
//!
//! ## Quick Start
//!
//! ```no_run
//! use crm_migrator::config::MigrationConfig;
//! use crm_migrator::gateway::StackbyClient;
//! use crm_migrator::phases::{link_companies, PhaseContext};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = MigrationConfig::from_env()?;
//! let client = StackbyClient::new(&config)?;
//! let ctx = PhaseContext::new(&config, &client).dry_run(true);
//!
//! let report = link_companies::run(&ctx, "associations.json".as_ref()).await?;
//! println!("{} deals planned", report.totals().processed());
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`gateway`] - destination API access and response classification
//! - [`retry`] - backoff and retry around gateway calls
//! - [`checkpoint`] - persisted progress, run locks and row snapshots
//! - [`batch`] - sequential checkpointed driver for a work list
//! - [`resolver`] - natural-key indexes for link resolution
//! - [`link_writer`] - delete-and-recreate relinking
//! - [`dedupe`] - duplicate detection and chunked deletion
//! - [`phases`] - the migration, relink, recovery and dedupe phases
//! - [`verify`] - post-run reconciliation

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Associations dump parsing
pub mod associations;

/// Checkpointed batch processing
pub mod batch;

/// Persisted progress for resumable phases
pub mod checkpoint;

/// CLI command implementations
pub mod cli;

/// Run configuration and rate-limit constants
pub mod config;

/// Duplicate detection
pub mod dedupe;

/// Destination API access
pub mod gateway;

/// Delete-and-recreate relinking
pub mod link_writer;

/// Prometheus metrics
pub mod metrics;

/// Source and destination record types
pub mod model;

/// Pauses between destination calls
pub mod pacing;

/// Migration phases
pub mod phases;

/// Natural-key resolution
pub mod resolver;

/// Retry with exponential backoff
pub mod retry;

/// Graceful shutdown coordination shared across modules
pub mod shutdown;

/// Post-run reconciliation
pub mod verify;

pub use config::MigrationConfig;
pub use gateway::{GatewayError, RowStore, StackbyClient};
pub use model::{SourceRecord, TableKind, TargetRow};
