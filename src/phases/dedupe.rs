//! `dedupe`: remove duplicate rows per table
//!
//! Contacts keep the most recently updated row per email, companies the most
//! complete row per name, and opportunities the row with contacts linked,
//! then the most complete. Deletion only happens with `execute`.

use super::{PhaseContext, PhaseError};
use crate::dedupe::{
    by_completeness, by_recency, dedupe, delete_in_chunks, DedupePlan, DeleteReport,
};
use crate::model::{TableKind, TargetRow};
use serde::Serialize;
use tracing::info;

/// Outcome for one table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableDedupe {
    /// Table
    pub table: TableKind,
    /// Rows listed
    pub rows: usize,
    /// Duplicate groups found
    pub groups: usize,
    /// Rows planned for deletion
    pub to_delete: usize,
    /// Rows actually deleted
    pub deleted: usize,
    /// Rows whose deletion failed
    pub failed: usize,
    /// Whether shutdown stopped deletion
    pub interrupted: bool,
}

/// Outcome for all tables
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DedupeReport {
    /// Whether deletions were performed
    pub executed: bool,
    /// Per-table results
    pub tables: Vec<TableDedupe>,
}

/// Tables deduplicated when none are named
pub const DEFAULT_TABLES: &[TableKind] = &[
    TableKind::Contacts,
    TableKind::Companies,
    TableKind::Opportunities,
];

/// Plan deduplication for one table with its ranking rule
pub fn plan_for(kind: TableKind, rows: &[TargetRow]) -> DedupePlan {
    let key = |row: &TargetRow| kind.natural_key(&row.fields);
    match kind {
        TableKind::Contacts | TableKind::Interactions => dedupe(rows, key, by_recency),
        TableKind::Companies => dedupe(rows, key, by_completeness),
        TableKind::Opportunities => dedupe(rows, key, |row| {
            (row.has_link("Main Contacts"), by_completeness(row))
        }),
    }
}

/// Run the phase over `tables`
pub async fn run(
    ctx: &PhaseContext<'_>,
    tables: &[TableKind],
    execute: bool,
) -> Result<DedupeReport, PhaseError> {
    let execute = execute && !ctx.is_dry_run();
    let tables = if tables.is_empty() { DEFAULT_TABLES } else { tables };
    let mut report = DedupeReport {
        executed: execute,
        tables: Vec::new(),
    };

    for kind in tables {
        let table_id = kind.table_id(&ctx.config.tables);
        let rows = ctx.list(table_id).await?;
        let plan = plan_for(*kind, &rows);
        info!(
            table = %kind,
            rows = rows.len(),
            groups = plan.groups.len(),
            to_delete = plan.to_delete.len(),
            "Deduplication plan"
        );

        let deletion = if execute && !plan.is_clean() {
            let (retry, pacer) = (ctx.retry(), ctx.pacer());
            delete_in_chunks(ctx.store(), &retry, &pacer, table_id, &plan.to_delete).await
        } else {
            DeleteReport::default()
        };

        report.tables.push(TableDedupe {
            table: *kind,
            rows: rows.len(),
            groups: plan.groups.len(),
            to_delete: plan.to_delete.len(),
            deleted: deletion.deleted,
            failed: deletion.failed.len(),
            interrupted: deletion.interrupted,
        });
        if deletion.interrupted {
            break;
        }
    }

    if !execute {
        info!("Plan only; pass --execute to delete duplicates");
    }
    Ok(report)
}
