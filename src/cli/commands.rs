//! Command-line definition and dispatch

use super::checkpoint::CheckpointCommand;
use super::output::{self, OutputFormat};
use super::CliError;
use crate::config::{
    MigrationConfig, INITIAL_BACKOFF_MS, MAX_ATTEMPTS, MAX_BACKOFF_MS, REQUEST_DELAY_MS,
};
use crate::gateway::StackbyClient;
use crate::metrics::PhaseMetrics;
use crate::model::TableKind;
use crate::pacing::Pacer;
use crate::phases::{self, PhaseContext, PhaseError, PhaseReport, DEFAULT_CHECKPOINT_DIR};
use crate::retry::{RetryController, RetryPolicy};
use crate::shutdown::SharedShutdown;
use crate::verify::{default_fields, TableReport};
use clap::{Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

/// CRM migration toolkit
#[derive(Parser, Debug)]
#[command(name = "crm-migrator")]
#[command(about = "Migrate CRM records into Stackby and repair their links", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Output format (json or human)
    #[arg(long, global = true, default_value = "human")]
    pub output_format: OutputFormat,

    /// Plan and log every write without performing it
    #[arg(long, global = true, default_value_t = false)]
    pub dry_run: bool,

    /// Directory for checkpoints and row snapshots
    #[arg(long, global = true, default_value = DEFAULT_CHECKPOINT_DIR)]
    pub checkpoint_dir: PathBuf,

    /// Log file, appended to on every run
    #[arg(long, global = true, default_value = "migration.log")]
    pub log_file: PathBuf,

    /// Serve Prometheus metrics on this address
    #[arg(long, global = true)]
    pub metrics_addr: Option<SocketAddr>,

    /// Attempts per request, first one included (range: 1-20)
    #[arg(
        long,
        global = true,
        default_value_t = MAX_ATTEMPTS,
        value_parser = clap::value_parser!(u32).range(1..=20)
    )]
    pub max_attempts: u32,

    /// Sleep before the first retry, in seconds
    #[arg(long, global = true, default_value_t = INITIAL_BACKOFF_MS / 1000)]
    pub initial_backoff_secs: u64,

    /// Ceiling for the doubled backoff, in seconds
    #[arg(long, global = true, default_value_t = MAX_BACKOFF_MS / 1000)]
    pub max_backoff_secs: u64,

    /// Pause between units, in milliseconds
    #[arg(long, global = true, default_value_t = REQUEST_DELAY_MS)]
    pub request_delay_ms: u64,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create destination rows from a CSV export, skipping keys already present
    Migrate(MigrateArgs),
    /// Relink contacts to companies, then deals to contacts
    LinkContacts(AssociationsArgs),
    /// Relink deals to companies, keeping their contacts
    LinkCompanies(AssociationsArgs),
    /// Relink interactions to their companies, opportunities and contacts
    LinkInteractions(InteractionsArgs),
    /// Recreate deals that exist in the export but not in the destination
    Recover(RecoverArgs),
    /// Find duplicate rows and optionally delete them
    Dedupe(DedupeArgs),
    /// Reconcile a table's row count and field coverage
    Verify(VerifyArgs),
    /// Inspect or clear checkpoints
    Checkpoint(CheckpointCommand),
}

/// Arguments for `migrate`
#[derive(Args, Debug)]
pub struct MigrateArgs {
    /// Destination table
    #[arg(long, value_enum)]
    pub table: TableKind,

    /// CSV export to read; interactions also take the JSON engagements export
    #[arg(long)]
    pub source: PathBuf,
}

/// Arguments for the relink phases
#[derive(Args, Debug)]
pub struct AssociationsArgs {
    /// Associations dump (JSON)
    #[arg(long, default_value = "associations.json")]
    pub associations: PathBuf,
}

/// Arguments for `link-interactions`
#[derive(Args, Debug)]
pub struct InteractionsArgs {
    /// Engagements export (JSON) with associated legacy ids
    #[arg(long, default_value = "hubspot-interactions.json")]
    pub interactions: PathBuf,

    /// Associations dump (JSON)
    #[arg(long, default_value = "associations.json")]
    pub associations: PathBuf,
}

/// Arguments for `recover`
#[derive(Args, Debug)]
pub struct RecoverArgs {
    /// Deals CSV export
    #[arg(long)]
    pub source: PathBuf,

    /// Associations dump (JSON)
    #[arg(long, default_value = "associations.json")]
    pub associations: PathBuf,

    /// Write stage codes as exported instead of translating them
    #[arg(long, default_value_t = false)]
    pub keep_stage_codes: bool,
}

/// Arguments for `dedupe`
#[derive(Args, Debug)]
pub struct DedupeArgs {
    /// Table to deduplicate (repeatable; default: contacts, companies, opportunities)
    #[arg(long = "table", value_enum)]
    pub tables: Vec<TableKind>,

    /// Delete duplicates instead of only reporting them
    #[arg(long, default_value_t = false)]
    pub execute: bool,
}

/// Arguments for `verify`
#[derive(Args, Debug)]
pub struct VerifyArgs {
    /// Table to check
    #[arg(long, value_enum)]
    pub table: TableKind,

    /// Expected row count
    #[arg(long)]
    pub expected: Option<usize>,

    /// Field to report coverage for (repeatable)
    #[arg(long = "field")]
    pub fields: Vec<String>,

    /// Fail when the row count differs from --expected
    #[arg(long, default_value_t = false)]
    pub strict: bool,
}

impl Cli {
    /// Retry policy from the command-line limits
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_backoff: Duration::from_secs(self.initial_backoff_secs),
            max_backoff: Duration::from_secs(self.max_backoff_secs.max(self.initial_backoff_secs)),
        }
    }

    /// Pacer from the command-line delay
    pub fn pacer(&self) -> Pacer {
        Pacer::new(Duration::from_millis(self.request_delay_ms))
    }

    /// Phase context over `store`
    pub fn context<'a>(
        &self,
        config: &'a MigrationConfig,
        store: &'a StackbyClient,
        shutdown: SharedShutdown,
    ) -> PhaseContext<'a> {
        PhaseContext::new(config, store)
            .with_retry(RetryController::new(self.retry_policy()))
            .with_pacer(self.pacer())
            .with_shutdown(shutdown)
            .dry_run(self.dry_run)
            .with_checkpoint_dir(&self.checkpoint_dir)
    }

    /// Run the selected command
    pub async fn execute(&self, shutdown: SharedShutdown) -> Result<(), CliError> {
        if let Commands::Checkpoint(cmd) = &self.command {
            return cmd.execute(self.output_format);
        }
        for path in self.input_files() {
            if !path.exists() {
                return Err(CliError::InvalidArgument(format!(
                    "input file not found: {}",
                    path.display()
                )));
            }
        }

        let config = MigrationConfig::from_env()?;
        let client = StackbyClient::new(&config)?;
        let ctx = self.context(&config, &client, shutdown.clone());
        if self.dry_run {
            info!("Dry run: no rows will be created or deleted");
        }

        match &self.command {
            Commands::Migrate(args) => {
                let name = format!("migrate-{}", args.table);
                self.run_phase(&name, phases::migrate::run(&ctx, args.table, &args.source))
                    .await
            }
            Commands::LinkContacts(args) => {
                self.run_phase(
                    phases::link_contacts::PHASE,
                    phases::link_contacts::run(&ctx, &args.associations),
                )
                .await
            }
            Commands::LinkCompanies(args) => {
                self.run_phase(
                    phases::link_companies::PHASE,
                    phases::link_companies::run(&ctx, &args.associations),
                )
                .await
            }
            Commands::LinkInteractions(args) => {
                self.run_phase(
                    phases::link_interactions::PHASE,
                    phases::link_interactions::run(&ctx, &args.interactions, &args.associations),
                )
                .await
            }
            Commands::Recover(args) => {
                self.run_phase(
                    phases::recover::PHASE,
                    phases::recover::run(
                        &ctx,
                        &args.source,
                        &args.associations,
                        args.keep_stage_codes,
                    ),
                )
                .await
            }
            Commands::Dedupe(args) => {
                let metrics = PhaseMetrics::start("dedupe");
                let report = match phases::dedupe::run(&ctx, &args.tables, args.execute).await {
                    Ok(report) => report,
                    Err(e) => return Err(Self::phase_failed(&metrics, e.into())),
                };
                output::print_dedupe(&report, self.output_format);
                if report.tables.iter().any(|t| t.interrupted) {
                    metrics.record_interrupted();
                    return Err(CliError::Interrupted);
                }
                metrics.record_success(report.tables.iter().map(|t| t.deleted as u64).sum());
                Ok(())
            }
            Commands::Verify(args) => self.verify(&ctx, args).await,
            Commands::Checkpoint(_) => Ok(()),
        }
    }

    fn input_files(&self) -> Vec<&PathBuf> {
        match &self.command {
            Commands::Migrate(args) => vec![&args.source],
            Commands::LinkContacts(args) | Commands::LinkCompanies(args) => {
                vec![&args.associations]
            }
            Commands::LinkInteractions(args) => vec![&args.interactions, &args.associations],
            Commands::Recover(args) => vec![&args.source, &args.associations],
            _ => Vec::new(),
        }
    }

    async fn run_phase<F>(&self, name: &str, phase: F) -> Result<(), CliError>
    where
        F: std::future::Future<Output = Result<PhaseReport, PhaseError>>,
    {
        let metrics = PhaseMetrics::start(name);
        let report = match phase.await {
            Ok(report) => report,
            Err(e) => return Err(Self::phase_failed(&metrics, e.into())),
        };
        output::print_phase(&report, self.output_format);
        if report.completed() {
            metrics.record_success(report.totals().processed());
            Ok(())
        } else {
            metrics.record_interrupted();
            Err(CliError::Interrupted)
        }
    }

    fn phase_failed(metrics: &PhaseMetrics, err: CliError) -> CliError {
        if matches!(err, CliError::Interrupted) {
            metrics.record_interrupted();
        } else {
            metrics.record_failure(&err.to_string());
        }
        err
    }

    async fn verify(&self, ctx: &PhaseContext<'_>, args: &VerifyArgs) -> Result<(), CliError> {
        let rows = ctx.list(args.table.table_id(&ctx.config.tables)).await?;
        let report = if args.fields.is_empty() {
            TableReport::build(args.table, &rows, args.expected, default_fields(args.table))
        } else {
            TableReport::build(args.table, &rows, args.expected, &args.fields)
        };
        output::print_verify(&report, self.output_format);
        if args.strict && !report.count_matches() {
            return Err(CliError::VerificationFailed(format!(
                "{} has {} rows, expected {}",
                report.table,
                report.rows,
                args.expected.unwrap_or_default()
            )));
        }
        Ok(())
    }
}
