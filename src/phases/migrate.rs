//! `migrate`: create destination rows from a legacy CSV export
//!
//! Records whose natural key is already present in the destination are
//! skipped, so rerunning after a crash between a create and the checkpoint
//! save does not duplicate the row.

use super::{PhaseContext, PhaseError, PhaseReport};
use crate::batch::{BatchStep, StepOutcome};
use crate::gateway::GatewayError;
use crate::link_writer::LinkWriter;
use crate::model::{load_csv, load_interactions, SourceRecord, TableKind};
use crate::resolver::{build_index, normalize, KeyIndex};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

/// Creates one row per source record
pub struct MigrateStep<'a> {
    writer: LinkWriter<'a>,
    table_id: String,
    existing: KeyIndex,
    dry_run: bool,
}

impl<'a> MigrateStep<'a> {
    /// Step writing into `table_id`, skipping keys already in `existing`
    pub fn new(
        writer: LinkWriter<'a>,
        table_id: impl Into<String>,
        existing: KeyIndex,
        dry_run: bool,
    ) -> Self {
        Self {
            writer,
            table_id: table_id.into(),
            existing,
            dry_run,
        }
    }
}

#[async_trait]
impl<'a> BatchStep<SourceRecord> for MigrateStep<'a> {
    fn label(&self, item: &SourceRecord) -> String {
        item.natural_key.clone()
    }

    async fn apply(
        &mut self,
        item: &SourceRecord,
        identifiers: &mut BTreeMap<String, String>,
    ) -> Result<StepOutcome, GatewayError> {
        if self.existing.contains(&item.natural_key) {
            return Ok(StepOutcome::skipped("already present"));
        }

        let record = self.writer.payload(&item.fields, &item.references);
        if self.dry_run {
            let payload = Value::Object(record.clone());
            info!(payload = %payload, "Planned create");
            self.existing.insert(&item.natural_key, "planned");
            return Ok(StepOutcome::skipped(format!(
                "dry-run: would create with {} fields",
                record.len()
            )));
        }

        let row_id = self.writer.create(&self.table_id, &record).await?;
        self.existing.insert(&item.natural_key, row_id.clone());
        identifiers.insert(normalize(&item.natural_key), row_id.clone());
        Ok(StepOutcome::created(format!("row {row_id}")))
    }
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

/// Records to create, and the number of source entries without a key
fn source_records(
    kind: TableKind,
    source: &Path,
) -> Result<(Vec<SourceRecord>, usize), PhaseError> {
    let json_export = kind == TableKind::Interactions && is_json(source);
    let mapped: Vec<Option<SourceRecord>> = if json_export {
        load_interactions(source)?.iter().map(|i| i.to_record()).collect()
    } else {
        load_csv(source)?.iter().map(|row| row.to_record(kind)).collect()
    };
    let total = mapped.len();
    let records: Vec<SourceRecord> = mapped.into_iter().flatten().collect();
    let unmatched = total - records.len();
    Ok((records, unmatched))
}

/// Run the phase for one table
pub async fn run(
    ctx: &PhaseContext<'_>,
    kind: TableKind,
    source: &Path,
) -> Result<PhaseReport, PhaseError> {
    let name = format!("migrate-{kind}");
    let mut report = PhaseReport::new(&name, ctx.is_dry_run());

    let (records, unmatched) = source_records(kind, source)?;
    report.unmatched = unmatched;
    if report.unmatched > 0 {
        warn!(
            table = %kind,
            count = report.unmatched,
            "Source rows without a {} were left out",
            kind.key_field()
        );
    }

    let table_id = kind.table_id(&ctx.config.tables).to_string();
    let existing = build_index(&ctx.list(&table_id).await?, |row| {
        kind.natural_key(&row.fields)
    });
    info!(
        table = %kind,
        records = records.len(),
        existing = existing.len(),
        "Prepared migration"
    );

    let mut step = MigrateStep::new(ctx.writer(), table_id, existing, ctx.is_dry_run());
    let run = ctx.processor(&name).run(&records, &mut step).await?;
    report.stages.push(run);
    Ok(report)
}
