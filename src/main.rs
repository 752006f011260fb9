//! Main entry point for the crm-migrator CLI

use clap::Parser;
use crm_migrator::cli::{Cli, CliError};
use crm_migrator::metrics;
use crm_migrator::shutdown::{self, ShutdownCoordinator};
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing::{error, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialize tracing to stderr (JSON when LOG_FORMAT=json) and to the
/// append-only run log. Stdout is left to command summaries.
fn init_tracing(log_file: &Path) {
    let json_format = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("crm_migrator=info"));

    let (json_layer, text_layer) = if json_format {
        (Some(fmt::layer().json().with_writer(std::io::stderr)), None)
    } else {
        (None, Some(fmt::layer().with_writer(std::io::stderr)))
    };

    let opened = OpenOptions::new().create(true).append(true).open(log_file);
    let (file_layer, file_error) = match opened {
        Ok(f) => (Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(f))), None),
        Err(e) => (None, Some(e)),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .with(file_layer)
        .init();

    if let Some(e) = file_error {
        warn!(
            path = %log_file.display(),
            error = %e,
            "Log file unavailable; logging to stderr only"
        );
    }
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(&cli.log_file);

    if let Some(addr) = cli.metrics_addr {
        if let Err(e) = metrics::init_metrics(addr).await {
            warn!(error = %e, "Metrics exporter not started");
        }
    }

    let shutdown = ShutdownCoordinator::shared();
    shutdown::set_global_shutdown(shutdown.clone());
    shutdown::install_ctrl_c_handler(shutdown.clone());

    if let Err(e) = cli.execute(shutdown).await {
        match e {
            CliError::Interrupted => warn!("{}", e),
            _ => error!("Command failed: {}", e),
        }
        std::process::exit(e.exit_code());
    }
}
