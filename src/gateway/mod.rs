//! Destination API gateway
//!
//! Every response from the destination goes through [`classify`], which maps
//! the raw status and body onto [`GatewayError`]. The destination does not
//! signal rate limiting reliably: under load it serves an HTML page where a
//! JSON document was expected, so the classification is heuristic and kept
//! in one function that can be tested against captured responses.
//!
//! No retrying happens here; see [`crate::retry`].

pub mod stackby;

use crate::config::PAGE_SIZE;
use crate::model::{FieldMap, TargetRow};
use crate::pacing::Pacer;
use crate::retry::RetryController;
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

pub use stackby::StackbyClient;

/// Result type for gateway calls
pub type GatewayResult<T> = Result<T, GatewayError>;

/// One listing page as returned by the destination
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowPage {
    /// Rows that carried a row id
    pub rows: Vec<TargetRow>,
    /// Entries in the response, counting ones dropped for lacking an id
    pub fetched: usize,
}

impl RowPage {
    /// Entries of the response that could not be read as rows
    pub fn unreadable(&self) -> usize {
        self.fetched.saturating_sub(self.rows.len())
    }
}

impl From<Vec<TargetRow>> for RowPage {
    fn from(rows: Vec<TargetRow>) -> Self {
        Self {
            fetched: rows.len(),
            rows,
        }
    }
}

/// Characters of a response body kept in error messages
const BODY_SNIPPET_CHARS: usize = 200;

/// HTTP methods used against the destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// Listing
    Get,
    /// Row creation
    Post,
    /// Row deletion
    Delete,
}

impl Method {
    /// Upper-case method name
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Delete => "DELETE",
        }
    }
}

/// Classified failure of a destination call
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GatewayError {
    /// HTTP 429 or an HTML page instead of JSON (transient)
    #[error("rate limited (HTTP {status})")]
    RateLimited {
        /// HTTP status of the response
        status: u16,
    },

    /// HTTP 500, not retried
    #[error("server error (HTTP {status}): {body}")]
    ServerError {
        /// HTTP status
        status: u16,
        /// Leading part of the body
        body: String,
    },

    /// Other 4xx/5xx or an error object in the body, not retried
    #[error("client error (HTTP {status}): {body}")]
    ClientError {
        /// HTTP status
        status: u16,
        /// Leading part of the body or the reported error
        body: String,
    },

    /// Connection reset, timeout or similar (transient)
    #[error("network error: {0}")]
    NetworkError(String),

    /// Body could not be parsed as JSON
    #[error("unparseable response: {0}")]
    ParseError(String),

    /// Request rejected before being sent
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Transient failures persisted through every attempt
    #[error("{description}: gave up after {attempts} attempts (last error: {last})")]
    RetriesExhausted {
        /// What was being attempted
        description: String,
        /// Attempts made
        attempts: u32,
        /// Error of the final attempt
        last: Box<GatewayError>,
    },

    /// Shutdown requested while waiting to retry
    #[error("{0}: interrupted by shutdown")]
    Interrupted(String),
}

impl GatewayError {
    /// Whether the retry controller should try again
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GatewayError::RateLimited { .. } | GatewayError::NetworkError(_)
        )
    }

    /// Short stable name for logs and metrics labels
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::RateLimited { .. } => "rate_limited",
            GatewayError::ServerError { .. } => "server_error",
            GatewayError::ClientError { .. } => "client_error",
            GatewayError::NetworkError(_) => "network_error",
            GatewayError::ParseError(_) => "parse_error",
            GatewayError::InvalidRequest(_) => "invalid_request",
            GatewayError::RetriesExhausted { .. } => "retries_exhausted",
            GatewayError::Interrupted(_) => "interrupted",
        }
    }
}

fn snippet(body: &str) -> String {
    body.trim().chars().take(BODY_SNIPPET_CHARS).collect()
}

fn looks_like_html(body: &str) -> bool {
    let head: String = body
        .trim_start()
        .chars()
        .take(16)
        .collect::<String>()
        .to_ascii_lowercase();
    head.starts_with("<!doctype") || head.starts_with("<html")
}

/// Classify a raw destination response.
///
/// - 429 is `RateLimited`.
/// - 500 is `ServerError`, with or without an HTML body.
/// - Any other HTML body is `RateLimited`, whatever the status.
/// - Any other status >= 400 is `ClientError`.
/// - Otherwise the body must be JSON (`ParseError` if not); a JSON object
///   carrying an `error` member is a `ClientError`.
pub fn classify(status: u16, body: &str) -> GatewayResult<Value> {
    if status == 429 {
        return Err(GatewayError::RateLimited { status });
    }
    if status == 500 {
        return Err(GatewayError::ServerError {
            status,
            body: snippet(body),
        });
    }
    if looks_like_html(body) {
        return Err(GatewayError::RateLimited { status });
    }
    if status >= 400 {
        return Err(GatewayError::ClientError {
            status,
            body: snippet(body),
        });
    }

    let value: Value = serde_json::from_str(body)
        .map_err(|e| GatewayError::ParseError(format!("{e}: {}", snippet(body))))?;

    if let Some(error) = value.get("error").filter(|e| !e.is_null()) {
        let message = match error {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        return Err(GatewayError::ClientError {
            status,
            body: snippet(&message),
        });
    }

    Ok(value)
}

/// Row-level operations the migration needs from the destination.
///
/// Implemented by [`StackbyClient`] for the live API and by in-memory fakes
/// in tests. Implementations perform exactly one request per call.
#[async_trait]
pub trait RowStore: Send + Sync {
    /// One page of rows starting at `offset`
    async fn list_page(
        &self,
        table_id: &str,
        max_records: usize,
        offset: usize,
    ) -> GatewayResult<RowPage>;

    /// Create rows, returning them as stored by the destination
    async fn create(&self, table_id: &str, records: &[FieldMap]) -> GatewayResult<Vec<TargetRow>>;

    /// Delete rows by id (at most [`crate::config::DELETE_CHUNK`] per call)
    async fn delete(&self, table_id: &str, row_ids: &[String]) -> GatewayResult<()>;
}

/// List every row of a table.
///
/// Pages of [`PAGE_SIZE`] are requested until a short or empty page comes
/// back; a page counts as full by its raw entry count, so entries dropped
/// for lacking a row id do not end the listing early. Each page goes
/// through the retry controller; the pacer spaces consecutive pages.
pub async fn list_all(
    store: &dyn RowStore,
    retry: &RetryController,
    pacer: &Pacer,
    table_id: &str,
) -> GatewayResult<Vec<TargetRow>> {
    let mut rows = Vec::new();
    let mut offset = 0;

    loop {
        let description = format!("list {table_id} offset {offset}");
        let page = retry
            .run(&description, || store.list_page(table_id, PAGE_SIZE, offset))
            .await?;
        let page_len = page.fetched;
        debug!(table = table_id, offset, rows = page_len, "Fetched page");
        if page.unreadable() > 0 {
            warn!(
                table = table_id,
                offset,
                unreadable = page.unreadable(),
                "Page entries without a row id were left out"
            );
        }
        rows.extend(page.rows);

        if page_len < PAGE_SIZE {
            break;
        }
        offset += page_len;
        if !pacer.between_pages().await {
            return Err(GatewayError::Interrupted(description));
        }
    }

    info!(table = table_id, rows = rows.len(), "Listed table");
    Ok(rows)
}
