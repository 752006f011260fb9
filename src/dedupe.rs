//! Duplicate detection and chunked deletion
//!
//! Rows are grouped by a normalized natural key. Within a group of more
//! than one row the highest-ranked row is kept and the rest are deleted.
//! Rows whose key is empty or a placeholder are never grouped.

use crate::config::DELETE_CHUNK;
use crate::gateway::{GatewayError, RowStore};
use crate::metrics;
use crate::model::TargetRow;
use crate::pacing::Pacer;
use crate::resolver::usable_key;
use crate::retry::RetryController;
use chrono::DateTime;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{error, info, warn};

/// Rows sharing one normalized key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateGroup {
    /// Normalized key
    pub key: String,
    /// Row kept
    pub keeper: String,
    /// Rows to delete, in rank order
    pub removed: Vec<String>,
}

/// Outcome of planning a deduplication
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DedupePlan {
    /// Rows that stay, in input order
    pub keepers: Vec<TargetRow>,
    /// Row ids to delete, grouped in first-appearance order of their key
    pub to_delete: Vec<String>,
    /// Groups with more than one row
    pub groups: Vec<DuplicateGroup>,
}

impl DedupePlan {
    /// Whether nothing needs deleting
    pub fn is_clean(&self) -> bool {
        self.to_delete.is_empty()
    }
}

/// Plan a deduplication.
///
/// `rank_fn` orders rows within a group; the highest rank is kept and ties
/// keep the row listed first.
pub fn dedupe<K, R, Rank>(rows: &[TargetRow], key_fn: K, rank_fn: Rank) -> DedupePlan
where
    K: Fn(&TargetRow) -> Option<String>,
    R: Ord,
    Rank: Fn(&TargetRow) -> R,
{
    let mut order: Vec<String> = Vec::new();
    let mut by_key: BTreeMap<String, Vec<&TargetRow>> = BTreeMap::new();

    for row in rows {
        let Some(key) = key_fn(row).as_deref().and_then(usable_key) else {
            continue;
        };
        let members = by_key.entry(key.clone()).or_default();
        if members.is_empty() {
            order.push(key);
        }
        members.push(row);
    }

    let mut plan = DedupePlan::default();
    for key in order {
        let Some(mut members) = by_key.remove(&key) else {
            continue;
        };
        if members.len() < 2 {
            continue;
        }
        members.sort_by(|a, b| rank_fn(b).cmp(&rank_fn(a)));
        let keeper = members[0].row_id.clone();
        let removed: Vec<String> = members[1..].iter().map(|r| r.row_id.clone()).collect();
        info!(
            key = %key,
            rows = members.len(),
            keeper = %keeper,
            "Duplicate group"
        );
        plan.to_delete.extend(removed.iter().cloned());
        plan.groups.push(DuplicateGroup {
            key,
            keeper,
            removed,
        });
    }

    let doomed: BTreeSet<&str> = plan.to_delete.iter().map(String::as_str).collect();
    plan.keepers = rows
        .iter()
        .filter(|row| !doomed.contains(row.row_id.as_str()))
        .cloned()
        .collect();
    plan
}

/// Timestamp of a row in milliseconds: `updatedAt`, else `createdAt`, else 0.
///
/// Accepts RFC 3339 strings and epoch-millisecond numbers.
pub fn by_recency(row: &TargetRow) -> i64 {
    ["updatedAt", "createdAt"]
        .iter()
        .find_map(|name| row.fields.get(*name).and_then(timestamp_millis))
        .unwrap_or(0)
}

/// Number of non-empty, non-system fields
pub fn by_completeness(row: &TargetRow) -> usize {
    row.completeness()
}

fn timestamp_millis(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
            .map(|dt| dt.timestamp_millis())
            .ok()
            .or_else(|| s.trim().parse().ok()),
        _ => None,
    }
}

/// Result of [`delete_in_chunks`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteReport {
    /// Rows deleted
    pub deleted: usize,
    /// Rows whose chunk failed
    pub failed: Vec<String>,
    /// Whether shutdown stopped the run early
    pub interrupted: bool,
}

/// Delete rows in chunks of at most [`DELETE_CHUNK`] ids.
///
/// Each chunk goes through the retry controller; a chunk that still fails is
/// recorded and the next chunk is attempted.
pub async fn delete_in_chunks(
    store: &dyn RowStore,
    retry: &RetryController,
    pacer: &Pacer,
    table_id: &str,
    row_ids: &[String],
) -> DeleteReport {
    let mut report = DeleteReport::default();
    let chunks: Vec<&[String]> = row_ids.chunks(DELETE_CHUNK).collect();

    for (index, chunk) in chunks.iter().enumerate() {
        let description = format!("delete chunk {}/{} in {table_id}", index + 1, chunks.len());
        match retry.run(&description, || store.delete(table_id, chunk)).await {
            Ok(()) => {
                report.deleted += chunk.len();
                metrics::record_item("deleted");
                info!("✓ Deleted {}/{}", report.deleted, row_ids.len());
            }
            Err(GatewayError::Interrupted(_)) => {
                report.interrupted = true;
                break;
            }
            Err(e) => {
                metrics::record_item("error");
                error!("✗ {}: {}", description, e);
                report.failed.extend(chunk.iter().cloned());
            }
        }

        if index + 1 < chunks.len() && !pacer.between_batches().await {
            report.interrupted = true;
            break;
        }
    }

    if report.interrupted {
        warn!(
            deleted = report.deleted,
            remaining = row_ids.len() - report.deleted - report.failed.len(),
            "Deletion stopped by shutdown"
        );
    }
    report
}
