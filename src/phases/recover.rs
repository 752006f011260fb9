//! `recover`: recreate deals lost during relinking
//!
//! A deal present in the source export but missing from the destination
//! (by normalized name) is created again with its stage translated to the
//! destination's pipeline and its contacts resolved from the associations.

use super::link_contacts::MAIN_CONTACTS_FIELD;
use super::{PhaseContext, PhaseError, PhaseReport};
use crate::associations::AssociationsDump;
use crate::batch::{BatchStep, StepOutcome};
use crate::gateway::GatewayError;
use crate::link_writer::LinkWriter;
use crate::model::{load_csv, SourceRecord, TableKind};
use crate::resolver::{index_by_field, normalize, resolve_links, KeyIndex};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

/// Phase and checkpoint name
pub const PHASE: &str = "recover";

/// Legacy pipeline stage codes and their destination names
pub const STAGE_MAP: &[(&str, &str)] = &[
    ("closedwon", "Ganada"),
    ("closedlost", "Perdida"),
    ("appointmentscheduled", "Contacto Inicial"),
    ("qualifiedtobuy", "Calificada"),
    ("presentationscheduled", "Propuesta"),
    ("decisionmakerboughtin", "Negociacion"),
    ("contractsent", "Contrato Enviado"),
];

/// Destination stage for a legacy stage code; unknown codes pass through
pub fn translate_stage(code: &str) -> String {
    let wanted = code.trim().to_lowercase();
    STAGE_MAP
        .iter()
        .find(|(legacy, _)| *legacy == wanted)
        .map(|(_, stage)| stage.to_string())
        .unwrap_or_else(|| code.trim().to_string())
}

/// Creates each source deal that the destination lacks
pub struct RecoverStep<'a> {
    writer: LinkWriter<'a>,
    table_id: String,
    existing: KeyIndex,
    contacts: KeyIndex,
    contacts_by_deal: BTreeMap<String, Vec<String>>,
    translate_stages: bool,
    dry_run: bool,
}

impl<'a> RecoverStep<'a> {
    /// Step writing into `table_id`
    pub fn new(
        writer: LinkWriter<'a>,
        table_id: impl Into<String>,
        existing: KeyIndex,
        contacts: KeyIndex,
        contacts_by_deal: BTreeMap<String, Vec<String>>,
    ) -> Self {
        Self {
            writer,
            table_id: table_id.into(),
            existing,
            contacts,
            contacts_by_deal,
            translate_stages: true,
            dry_run: false,
        }
    }

    /// Keep legacy stage codes as exported
    pub fn keep_stage_codes(mut self, keep: bool) -> Self {
        self.translate_stages = !keep;
        self
    }

    /// Plan and log only
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Scalar fields and links the recreated deal gets
    pub fn plan(
        &self,
        item: &SourceRecord,
    ) -> (crate::model::FieldMap, BTreeMap<String, Vec<String>>) {
        let mut fields = item.fields.clone();
        if self.translate_stages {
            if let Some(Value::String(code)) = fields.get("Stage") {
                let stage = translate_stage(code);
                fields.insert("Stage".to_string(), Value::String(stage));
            }
        }
        let emails = self
            .contacts_by_deal
            .get(&normalize(&item.natural_key))
            .map(Vec::as_slice)
            .unwrap_or_default();
        let links = BTreeMap::from([(
            MAIN_CONTACTS_FIELD.to_string(),
            resolve_links(emails, &self.contacts),
        )]);
        (fields, links)
    }
}

#[async_trait]
impl<'a> BatchStep<SourceRecord> for RecoverStep<'a> {
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

        let (fields, links) = self.plan(item);
        let contacts = links.get(MAIN_CONTACTS_FIELD).map_or(0, Vec::len);
        let record = self.writer.payload(&fields, &links);
        let stage = record.get("Stage").and_then(Value::as_str).unwrap_or("-").to_string();

        if self.dry_run {
            let payload = Value::Object(record);
            info!(payload = %payload, "Planned recovery");
            self.existing.insert(&item.natural_key, "planned");
            return Ok(StepOutcome::skipped(format!("dry-run: would recreate (stage: {stage})")));
        }

        let row_id = self.writer.create(&self.table_id, &record).await?;
        self.existing.insert(&item.natural_key, row_id.clone());
        identifiers.insert(normalize(&item.natural_key), row_id);
        Ok(StepOutcome::created(format!("stage: {stage}, {contacts} contact(s)")))
    }
}

/// Run the phase
pub async fn run(
    ctx: &PhaseContext<'_>,
    source: &Path,
    associations: &Path,
    keep_stage_codes: bool,
) -> Result<PhaseReport, PhaseError> {
    let mut report = PhaseReport::new(PHASE, ctx.is_dry_run());

    let rows = load_csv(source)?;
    let mut records = Vec::with_capacity(rows.len());
    for row in &rows {
        match row.to_record(TableKind::Opportunities) {
            Some(record) => records.push(record),
            None => report.unmatched += 1,
        }
    }
    if report.unmatched > 0 {
        warn!(count = report.unmatched, "Source deals without a name were left out");
    }
    let dump = AssociationsDump::load(associations)?;

    let tables = &ctx.config.tables;
    let contacts = index_by_field(&ctx.list(&tables.contacts).await?, "Email");
    let existing = index_by_field(&ctx.list(&tables.opportunities).await?, "Deal Name");
    let missing = records.iter().filter(|r| !existing.contains(&r.natural_key)).count();
    info!(
        source = records.len(),
        existing = existing.len(),
        missing,
        "Prepared recovery"
    );

    let mut step = RecoverStep::new(
        ctx.writer(),
        tables.opportunities.as_str(),
        existing,
        contacts,
        dump.contacts_by_deal(),
    )
    .keep_stage_codes(keep_stage_codes)
    .dry_run(ctx.is_dry_run());
    let run = ctx.processor(PHASE).run(&records, &mut step).await?;
    report.stages.push(run);
    Ok(report)
}
