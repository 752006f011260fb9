//! Run metrics for the migration toolkit
//!
//! Counters and histograms go through the `metrics` facade. Without an
//! installed recorder the macros are no-ops, so the helpers below are safe
//! to call from library code and tests.
//!
//! ## Exported series
//!
//! - `stackby_requests_total{method,status}` and
//!   `stackby_request_duration_seconds{method}`
//! - `stackby_rate_limited_total`
//! - `retry_attempts_total`, `retry_backoff_seconds`
//! - `batch_items_total{outcome}`
//! - `phase_runs_total{phase,result}`

use crate::gateway::Method;
use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::Lazy;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, error, info};

static METRICS_INITIALIZED: Lazy<Arc<RwLock<bool>>> = Lazy::new(|| Arc::new(RwLock::new(false)));

/// Install the Prometheus exporter on `addr`.
///
/// Idempotent: later calls are ignored once an exporter is running.
pub async fn init_metrics(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error>> {
    let mut initialized = METRICS_INITIALIZED.write().await;
    if *initialized {
        debug!("Metrics already initialized, skipping");
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        "stackby_requests_total",
        Unit::Count,
        "Requests sent to the destination API"
    );
    describe_histogram!(
        "stackby_request_duration_seconds",
        Unit::Seconds,
        "Destination API request duration"
    );
    describe_counter!(
        "stackby_rate_limited_total",
        Unit::Count,
        "Responses classified as rate limited"
    );
    describe_counter!(
        "retry_attempts_total",
        Unit::Count,
        "Retries scheduled after a transient failure"
    );
    describe_histogram!(
        "retry_backoff_seconds",
        Unit::Seconds,
        "Backoff slept before a retry"
    );
    describe_counter!(
        "batch_items_total",
        Unit::Count,
        "Units processed by outcome"
    );
    describe_counter!(
        "phase_runs_total",
        Unit::Count,
        "Phase runs by result"
    );

    *initialized = true;
    info!("Metrics exporter listening on {}", addr);
    Ok(())
}

/// Whether the exporter has been installed
pub async fn is_initialized() -> bool {
    *METRICS_INITIALIZED.read().await
}

/// Count one request; `status` is `None` when no response arrived
pub fn record_request(method: Method, status: Option<u16>, elapsed: Duration) {
    let status = status.map_or_else(|| "network_error".to_string(), |s| s.to_string());
    counter!(
        "stackby_requests_total",
        "method" => method.as_str(),
        "status" => status,
    )
    .increment(1);
    histogram!(
        "stackby_request_duration_seconds",
        "method" => method.as_str(),
    )
    .record(elapsed.as_secs_f64());
}

/// Count a rate-limited response
pub fn record_rate_limited() {
    counter!("stackby_rate_limited_total").increment(1);
}

/// Count a scheduled retry and its backoff
pub fn record_retry(backoff: Duration) {
    counter!("retry_attempts_total").increment(1);
    histogram!("retry_backoff_seconds").record(backoff.as_secs_f64());
}

/// Count a processed unit
pub fn record_item(outcome: &str) {
    counter!("batch_items_total", "outcome" => outcome.to_string()).increment(1);
}

/// Tracks one phase run from start to finish
pub struct PhaseMetrics {
    phase: String,
    start_time: Instant,
}

impl PhaseMetrics {
    /// Start tracking a phase
    pub fn start(phase: impl Into<String>) -> Self {
        let phase = phase.into();
        info!(phase = %phase, "Phase started");
        Self {
            phase,
            start_time: Instant::now(),
        }
    }

    /// Record a phase that ran to the end (per-unit errors included)
    pub fn record_success(&self, processed: u64) {
        counter!(
            "phase_runs_total",
            "phase" => self.phase.clone(),
            "result" => "completed",
        )
        .increment(1);
        info!(
            phase = %self.phase,
            processed,
            duration_secs = self.start_time.elapsed().as_secs(),
            "Phase completed"
        );
    }

    /// Record a phase stopped by shutdown
    pub fn record_interrupted(&self) {
        counter!(
            "phase_runs_total",
            "phase" => self.phase.clone(),
            "result" => "interrupted",
        )
        .increment(1);
        info!(
            phase = %self.phase,
            duration_secs = self.start_time.elapsed().as_secs(),
            "Phase interrupted"
        );
    }

    /// Record a fatal phase failure
    pub fn record_failure(&self, error: &str) {
        counter!(
            "phase_runs_total",
            "phase" => self.phase.clone(),
            "result" => "failed",
        )
        .increment(1);
        error!(
            phase = %self.phase,
            error = %error,
            duration_secs = self.start_time.elapsed().as_secs(),
            "Phase failed"
        );
    }
}
