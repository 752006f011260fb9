//! Retry message formatting
//!
//! Keeps retry, recovery and give-up log lines consistent across every
//! destination call, with actionable suggestions on final failure.

use crate::gateway::GatewayError;
use std::time::Duration;

/// User-facing description of an error kind
pub fn describe(err: &GatewayError) -> &'static str {
    match err {
        GatewayError::RateLimited { status: 429 } => "rate limit exceeded",
        GatewayError::RateLimited { .. } => "rate limit page served instead of JSON",
        GatewayError::ServerError { .. } => "internal server error",
        GatewayError::ClientError { status: 401 | 403, .. } => "authentication failed",
        GatewayError::ClientError { status: 404, .. } => "table or row not found",
        GatewayError::ClientError { .. } => "request rejected",
        GatewayError::NetworkError(_) => "network error",
        GatewayError::ParseError(_) => "unparseable response",
        GatewayError::InvalidRequest(_) => "invalid request",
        GatewayError::RetriesExhausted { .. } => "retries exhausted",
        GatewayError::Interrupted(_) => "interrupted",
    }
}

/// Suggested remediation for an error kind
pub fn suggestion(err: &GatewayError) -> &'static str {
    match err {
        GatewayError::RateLimited { .. } => {
            "Wait for the rate-limit window to pass or raise --initial-backoff-secs"
        }
        GatewayError::ServerError { .. } => {
            "Check link fields in the payload; single-element link arrays trigger HTTP 500"
        }
        GatewayError::ClientError { status: 401 | 403, .. } => {
            "Verify STACKBY_API_KEY and its access to the stack"
        }
        GatewayError::ClientError { .. } | GatewayError::InvalidRequest(_) => {
            "Check table ids and field names against the destination schema"
        }
        GatewayError::NetworkError(_) => "Check network connectivity and try again",
        GatewayError::ParseError(_) => "The destination may be degraded; retry later",
        GatewayError::RetriesExhausted { last, .. } => suggestion(last),
        GatewayError::Interrupted(_) => "Rerun the same command to resume from the checkpoint",
    }
}

/// Context for one retry log line
#[derive(Debug, Clone)]
pub struct RetryContext {
    /// What is being attempted (e.g. "delete rw123")
    pub description: String,
    /// Current attempt number (1-based)
    pub attempt: u32,
    /// Maximum number of attempts configured
    pub max_attempts: u32,
    /// Error that triggered the retry, if any
    pub error: Option<GatewayError>,
    /// Sleep before the next attempt
    pub backoff: Duration,
}

impl RetryContext {
    /// Context without error or backoff
    pub fn new(description: impl Into<String>, attempt: u32, max_attempts: u32) -> Self {
        Self {
            description: description.into(),
            attempt,
            max_attempts,
            error: None,
            backoff: Duration::ZERO,
        }
    }

    /// Attach the triggering error
    pub fn with_error(mut self, err: &GatewayError) -> Self {
        self.error = Some(err.clone());
        self
    }

    /// Attach the upcoming backoff
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// "Retrying ..." line
    pub fn format_retry(&self) -> String {
        let reason = self.error.as_ref().map(describe).unwrap_or("error");
        format!(
            "Retrying {} (attempt {}/{}) after {} - waiting {}...",
            self.description,
            self.attempt,
            self.max_attempts,
            reason,
            format_wait(self.backoff)
        )
    }

    /// Recovery line after an earlier failure
    pub fn format_success(&self) -> String {
        format!(
            "{} succeeded on attempt {}/{}",
            self.description, self.attempt, self.max_attempts
        )
    }

    /// Multi-line give-up summary with suggestions
    pub fn format_failure(&self) -> String {
        let mut lines = vec![format!(
            "[FAILED] {} failed after {} attempts",
            self.description, self.attempt
        )];
        if let Some(err) = &self.error {
            lines.push(format!("  Last error: {err}"));
            lines.push("  Suggestions:".to_string());
            lines.push(format!("    - {}", suggestion(err)));
        }
        lines.push(format!(
            "    - Try increasing --max-attempts (current: {})",
            self.max_attempts
        ));
        lines.join("\n")
    }
}

/// Human form of a wait: "45s", "15m", "1h 30m"
pub fn format_wait(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs == 0 {
        return format!("{}ms", duration.as_millis());
    }
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    match (h, m, s) {
        (0, 0, s) => format!("{s}s"),
        (0, m, 0) => format!("{m}m"),
        (0, m, s) => format!("{m}m {s}s"),
        (h, 0, _) => format!("{h}h"),
        (h, m, _) => format!("{h}h {m}m"),
    }
}
