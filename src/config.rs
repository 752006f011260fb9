//! Run configuration and tuning constants

use std::time::Duration;

/// Maximum number of attempts for a single destination call.
/// 6 attempts with a 15 minute floor covers a multi-hour rate-limit window
/// before the unit is given up and counted as an error.
pub const MAX_ATTEMPTS: u32 = 6;

/// Initial backoff delay in milliseconds.
/// The destination's rate-limit window is observed to last minutes, so the
/// first retry already waits 15 minutes.
pub const INITIAL_BACKOFF_MS: u64 = 15 * 60 * 1000;

/// Maximum backoff delay in milliseconds (1 hour).
pub const MAX_BACKOFF_MS: u64 = 60 * 60 * 1000;

/// Fixed pause between processed units, keeps the sustained request rate
/// below the destination's ceiling.
pub const REQUEST_DELAY_MS: u64 = 3_000;

/// Pause between listing pages.
pub const PAGE_DELAY_MS: u64 = 1_000;

/// Pause between deletion chunks during deduplication.
pub const DEDUPE_BATCH_DELAY_MS: u64 = 5_000;

/// Rows per listing page (destination ceiling).
pub const PAGE_SIZE: usize = 100;

/// Row ids per delete call (query-string limit observed on the destination).
pub const DELETE_CHUNK: usize = 10;

/// Default API base URL
pub const DEFAULT_BASE_URL: &str = "https://stackby.com/api/betav1";

/// HTTP timeout for a single destination request
pub const REQUEST_TIMEOUT_SECS: u64 = 60;

const DEFAULT_STACK_ID: &str = "stBBsLQwR69x3Vgs49";
const DEFAULT_TABLE_CONTACTS: &str = "tbl1770077025864393853";
const DEFAULT_TABLE_COMPANIES: &str = "tbl17700770258657e9b69";
const DEFAULT_TABLE_OPPORTUNITIES: &str = "tbl17700770258658046c6";
const DEFAULT_TABLE_INTERACTIONS: &str = "tbl1770077025865d62b5f";

/// Calculate exponential backoff delay for the given retry number (0-based),
/// doubling from `initial` and capped at `max`.
pub fn calculate_backoff(initial: Duration, max: Duration, retry_count: u32) -> Duration {
    let factor = 2u32.saturating_pow(retry_count);
    initial.saturating_mul(factor).min(max)
}

/// Destination table identifiers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableIds {
    /// Contacts table
    pub contacts: String,
    /// Companies table
    pub companies: String,
    /// Opportunities (deals) table
    pub opportunities: String,
    /// Interactions table
    pub interactions: String,
}

/// Configuration for one migration run, built once at startup and passed by
/// reference into the components that need it.
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    /// API key sent in the `api-key` header
    pub api_key: String,
    /// Stack (database) id
    pub stack_id: String,
    /// API base URL without trailing slash
    pub base_url: String,
    /// Table ids
    pub tables: TableIds,
    /// Write single-element link lists as `[id, id]`.
    ///
    /// The destination rejected one-element link arrays on create with HTTP
    /// 500 when this was last checked. Turn off once a live create shows the
    /// plain form is accepted.
    pub duplicate_single_links: bool,
}

impl MigrationConfig {
    /// Build configuration from the process environment.
    ///
    /// `.env` is expected to have been loaded by the caller.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build configuration from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let api_key = get("STACKBY_API_KEY").ok_or(ConfigError::Missing("STACKBY_API_KEY"))?;
        let base_url = get("STACKBY_BASE_URL")
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::Invalid {
                name: "STACKBY_BASE_URL",
                reason: format!("'{base_url}' is not an http(s) URL"),
            });
        }

        let duplicate_single_links = match get("STACKBY_DUPLICATE_SINGLE_LINKS") {
            None => true,
            Some(v) => parse_bool(&v).ok_or_else(|| ConfigError::Invalid {
                name: "STACKBY_DUPLICATE_SINGLE_LINKS",
                reason: format!("'{v}' is not a boolean"),
            })?,
        };

        Ok(Self {
            api_key,
            stack_id: get("STACKBY_STACK_ID").unwrap_or_else(|| DEFAULT_STACK_ID.to_string()),
            base_url,
            tables: TableIds {
                contacts: get("STACKBY_TABLE_CONTACTS")
                    .unwrap_or_else(|| DEFAULT_TABLE_CONTACTS.to_string()),
                companies: get("STACKBY_TABLE_COMPANIES")
                    .unwrap_or_else(|| DEFAULT_TABLE_COMPANIES.to_string()),
                opportunities: get("STACKBY_TABLE_OPPORTUNITIES")
                    .unwrap_or_else(|| DEFAULT_TABLE_OPPORTUNITIES.to_string()),
                interactions: get("STACKBY_TABLE_INTERACTIONS")
                    .unwrap_or_else(|| DEFAULT_TABLE_INTERACTIONS.to_string()),
            },
            duplicate_single_links,
        })
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required variable not set
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    /// Variable set to an unusable value
    #[error("invalid value for {name}: {reason}")]
    Invalid {
        /// Variable name
        name: &'static str,
        /// Why it was rejected
        reason: String,
    },
}
