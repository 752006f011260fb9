//! Retry with exponential backoff around destination calls
//!
//! Only transient failures ([`GatewayError::is_transient`]) are retried.
//! Everything else is handed straight back to the caller, which for batch
//! runs means the unit is logged and counted as an error.

pub mod formatter;

use crate::config::{calculate_backoff, INITIAL_BACKOFF_MS, MAX_ATTEMPTS, MAX_BACKOFF_MS};
use crate::gateway::{GatewayError, GatewayResult};
use crate::metrics;
use crate::shutdown::SharedShutdown;
use formatter::RetryContext;
use std::future::Future;
use std::time::Duration;
use tracing::{error, info, warn};

/// Attempt and backoff limits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Sleep before the second attempt
    pub initial_backoff: Duration,
    /// Ceiling for the doubled backoff
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
            max_backoff: Duration::from_millis(MAX_BACKOFF_MS),
        }
    }
}

impl RetryPolicy {
    /// Sleep after the given failed attempt (1-based)
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        calculate_backoff(
            self.initial_backoff,
            self.max_backoff,
            attempt.saturating_sub(1),
        )
    }
}

/// Per-call retry bookkeeping. Not persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryState {
    /// Attempts made so far
    pub attempt: u32,
    /// Backoff that will be used after the next transient failure
    pub backoff: Duration,
    /// Every backoff slept, in order
    pub sleeps: Vec<Duration>,
}

impl RetryState {
    /// Fresh state for a policy
    pub fn new(policy: &RetryPolicy) -> Self {
        Self {
            attempt: 0,
            backoff: policy.initial_backoff,
            sleeps: Vec::new(),
        }
    }
}

/// Runs fallible destination calls under a [`RetryPolicy`].
///
/// Backoff sleeps end early when shutdown is requested; the call then fails
/// with [`GatewayError::Interrupted`].
#[derive(Debug, Clone, Default)]
pub struct RetryController {
    policy: RetryPolicy,
    shutdown: Option<SharedShutdown>,
}

impl RetryController {
    /// Create a controller for the given policy
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            shutdown: None,
        }
    }

    /// Interrupt backoff sleeps on shutdown
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Copy of this controller whose sleeps ignore shutdown.
    ///
    /// Used for the create half of a relink: once the old row is gone the
    /// new one has to be written even if Ctrl+C arrives meanwhile.
    pub fn detached(&self) -> Self {
        Self {
            policy: self.policy.clone(),
            shutdown: None,
        }
    }

    /// The policy in use
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `f` until it succeeds, fails non-transiently, or attempts run out
    pub async fn run<T, F, Fut>(&self, description: &str, f: F) -> GatewayResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = GatewayResult<T>>,
    {
        let mut state = RetryState::new(&self.policy);
        self.run_with_state(description, &mut state, f).await
    }

    /// Like [`run`](Self::run), exposing the attempt and sleep history
    pub async fn run_with_state<T, F, Fut>(
        &self,
        description: &str,
        state: &mut RetryState,
        mut f: F,
    ) -> GatewayResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = GatewayResult<T>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);

        loop {
            state.attempt += 1;
            let err = match f().await {
                Ok(value) => {
                    if state.attempt > 1 {
                        let ctx = RetryContext::new(description, state.attempt, max_attempts);
                        info!("{}", ctx.format_success());
                    }
                    return Ok(value);
                }
                Err(e) if e.is_transient() => e,
                Err(e) => return Err(e),
            };

            if state.attempt >= max_attempts {
                let ctx = RetryContext::new(description, state.attempt, max_attempts)
                    .with_error(&err);
                error!("{}", ctx.format_failure());
                return Err(GatewayError::RetriesExhausted {
                    description: description.to_string(),
                    attempts: state.attempt,
                    last: Box::new(err),
                });
            }

            let backoff = self.policy.backoff_after(state.attempt);
            let ctx = RetryContext::new(description, state.attempt, max_attempts)
                .with_error(&err)
                .with_backoff(backoff);
            warn!(
                attempt = state.attempt,
                max_attempts,
                backoff_ms = backoff.as_millis() as u64,
                "{}",
                ctx.format_retry()
            );
            metrics::record_retry(backoff);

            state.sleeps.push(backoff);
            if !self.sleep(backoff).await {
                warn!(description, "Shutdown requested during backoff");
                return Err(GatewayError::Interrupted(description.to_string()));
            }
            state.backoff = self.policy.backoff_after(state.attempt + 1);
        }
    }

    /// Sleep unless shutdown is requested first. Returns false on shutdown.
    async fn sleep(&self, duration: Duration) -> bool {
        match &self.shutdown {
            Some(shutdown) => {
                if shutdown.is_shutdown_requested() {
                    return false;
                }
                tokio::select! {
                    _ = tokio::time::sleep(duration) => true,
                    _ = shutdown.wait_for_shutdown() => false,
                }
            }
            None => {
                tokio::time::sleep(duration).await;
                true
            }
        }
    }
}
