//! Fixed pacing between destination requests
//!
//! The destination has no documented rate limit and even modest bursts
//! trigger its rate-limit page, so the run is strictly sequential with a
//! fixed pause between units, between listing pages and between deletion
//! chunks.

use crate::config::{DEDUPE_BATCH_DELAY_MS, PAGE_DELAY_MS, REQUEST_DELAY_MS};
use crate::shutdown::SharedShutdown;
use std::time::Duration;
use tokio::time::sleep;

/// Pauses between requests, interruptible by shutdown
#[derive(Debug, Clone)]
pub struct Pacer {
    request_delay: Duration,
    page_delay: Duration,
    batch_delay: Duration,
    shutdown: Option<SharedShutdown>,
}

impl Default for Pacer {
    fn default() -> Self {
        Self {
            request_delay: Duration::from_millis(REQUEST_DELAY_MS),
            page_delay: Duration::from_millis(PAGE_DELAY_MS),
            batch_delay: Duration::from_millis(DEDUPE_BATCH_DELAY_MS),
            shutdown: None,
        }
    }
}

impl Pacer {
    /// Default page and batch delays with a custom per-unit delay
    pub fn new(request_delay: Duration) -> Self {
        Self {
            request_delay,
            ..Self::default()
        }
    }

    /// No delays at all
    pub fn immediate() -> Self {
        Self {
            request_delay: Duration::ZERO,
            page_delay: Duration::ZERO,
            batch_delay: Duration::ZERO,
            shutdown: None,
        }
    }

    /// Override the delay between deletion chunks
    pub fn with_batch_delay(mut self, delay: Duration) -> Self {
        self.batch_delay = delay;
        self
    }

    /// Cut pauses short when shutdown is requested
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Delay between processed units
    pub fn request_delay(&self) -> Duration {
        self.request_delay
    }

    /// Pause between units. Returns false if shutdown was requested.
    pub async fn between_requests(&self) -> bool {
        self.pause(self.request_delay).await
    }

    /// Pause between listing pages. Returns false if shutdown was requested.
    pub async fn between_pages(&self) -> bool {
        self.pause(self.page_delay).await
    }

    /// Pause between deletion chunks. Returns false if shutdown was requested.
    pub async fn between_batches(&self) -> bool {
        self.pause(self.batch_delay).await
    }

    /// Pause between the delete and create of a relink; never interrupted.
    pub async fn within_unit(&self) {
        if !self.request_delay.is_zero() {
            sleep(self.request_delay).await;
        }
    }

    async fn pause(&self, duration: Duration) -> bool {
        let Some(shutdown) = &self.shutdown else {
            if !duration.is_zero() {
                sleep(duration).await;
            }
            return true;
        };
        if shutdown.is_shutdown_requested() {
            return false;
        }
        if duration.is_zero() {
            return true;
        }
        tokio::select! {
            _ = sleep(duration) => true,
            _ = shutdown.wait_for_shutdown() => false,
        }
    }
}
