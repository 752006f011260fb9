//! Post-run reconciliation
//!
//! Compares a table's row count against the expected count and reports how
//! many rows have each named field filled. A lost row (deleted by a relink
//! whose create failed) shows up here as a count below the expectation.

use crate::model::{TableKind, TargetRow};
use serde::Serialize;
use std::fmt::Write as _;

/// Rows with a field filled
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldCoverage {
    /// Column name
    pub field: String,
    /// Rows where the column is not blank
    pub filled: usize,
}

/// Reconciliation report for one table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableReport {
    /// Table
    pub table: TableKind,
    /// Rows listed
    pub rows: usize,
    /// Expected row count, if known
    pub expected: Option<usize>,
    /// Coverage per requested field
    pub coverage: Vec<FieldCoverage>,
}

/// Fields reported when none are requested
pub fn default_fields(kind: TableKind) -> &'static [&'static str] {
    match kind {
        TableKind::Contacts => &["Email", "Company"],
        TableKind::Companies => &["Company Name", "Industry"],
        TableKind::Opportunities => &["Stage", "Company", "Main Contacts", "Label"],
        TableKind::Interactions => &["Type", "Date"],
    }
}

impl TableReport {
    /// Build a report from listed rows. A field holding `Untitle` counts
    /// as empty.
    pub fn build<S: AsRef<str>>(
        table: TableKind,
        rows: &[TargetRow],
        expected: Option<usize>,
        fields: &[S],
    ) -> Self {
        let coverage = fields
            .iter()
            .map(|field| {
                let field = field.as_ref();
                FieldCoverage {
                    field: field.to_string(),
                    filled: rows.iter().filter(|r| r.has_link(field)).count(),
                }
            })
            .collect();
        Self {
            table,
            rows: rows.len(),
            expected,
            coverage,
        }
    }

    /// Whether the count matches the expectation (or none was given)
    pub fn count_matches(&self) -> bool {
        self.expected.map_or(true, |expected| expected == self.rows)
    }

    /// Rows missing relative to the expectation (negative when over)
    pub fn shortfall(&self) -> i64 {
        self.expected.map_or(0, |expected| expected as i64 - self.rows as i64)
    }

    /// Human-readable report
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Table {}: {} rows", self.table, self.rows);
        if let Some(expected) = self.expected {
            let status = if self.count_matches() { "OK" } else { "MISMATCH" };
            let _ = writeln!(
                out,
                "  expected {expected} ({status}, shortfall {})",
                self.shortfall()
            );
        }
        for coverage in &self.coverage {
            let percent = if self.rows == 0 {
                0.0
            } else {
                coverage.filled as f64 * 100.0 / self.rows as f64
            };
            let _ = writeln!(
                out,
                "  {:<16} {:>6}/{:<6} {:>5.1}%",
                coverage.field, coverage.filled, self.rows, percent
            );
        }
        out
    }
}
