//! `link-interactions`: interaction→company/opportunity/contact relink
//!
//! The engagements export names associated records by legacy id only. Ids
//! are translated to company names, deal names and contact emails through
//! the associations dump, then resolved against the destination tables.
//! Destination interactions are matched on their title; when several share
//! one, the row with the same date is taken first and every row is used at
//! most once.

use super::{PhaseContext, PhaseError, PhaseReport, RelinkItem, RelinkStep};
use crate::associations::AssociationsDump;
use crate::model::interactions::{
    iso_date, DATE_FIELD, DONE_FIELD, NOTES_FIELD, TASK_NAME_FIELD, TYPE_FIELD,
};
use crate::model::{load_interactions, Interaction, TableKind, TargetRow};
use crate::resolver::{index_by_field, resolve_links, usable_key, KeyIndex};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, warn};

/// Phase and checkpoint name
pub const PHASE: &str = "link-interactions";

/// Link to companies
pub const COMPANIES_FIELD: &str = "Companies";
/// Link to opportunities
pub const OPPORTUNITIES_FIELD: &str = "Opportunities";
/// Link to contacts
pub const CONTACTS_FIELD: &str = "Contacts";

/// Interaction columns carried into a recreated row
pub const INTERACTION_FIELDS: &[&str] =
    &[TASK_NAME_FIELD, TYPE_FIELD, NOTES_FIELD, DATE_FIELD, DONE_FIELD];

/// Destination row ids for the records behind `legacy_ids`
fn resolve_legacy(
    legacy_ids: &[String],
    keys_by_id: &BTreeMap<String, String>,
    index: &KeyIndex,
) -> Vec<String> {
    let keys: Vec<&String> = legacy_ids.iter().filter_map(|id| keys_by_id.get(id)).collect();
    let mut ids: Vec<String> = Vec::new();
    for id in resolve_links(&keys, index) {
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    ids
}

/// Interactions to relink.
///
/// Returns the work list and the number of associated engagements left
/// out, either because nothing they reference resolves or because no
/// destination row carries their title.
pub fn interaction_items(
    interactions: &[Interaction],
    dump: &AssociationsDump,
    rows: &[TargetRow],
    companies: &KeyIndex,
    deals: &KeyIndex,
    contacts: &KeyIndex,
) -> (Vec<RelinkItem>, usize) {
    let company_names = dump.company_names_by_id();
    let deal_names = dump.deal_names_by_id();
    let contact_emails = dump.contact_emails_by_id();

    let mut by_title: BTreeMap<String, Vec<&TargetRow>> = BTreeMap::new();
    for row in rows {
        if let Some(title) = row.text(TASK_NAME_FIELD).and_then(|t| usable_key(&t)) {
            by_title.entry(title).or_default().push(row);
        }
    }

    let mut items = Vec::new();
    let mut unmatched = 0;
    for interaction in interactions.iter().filter(|i| i.has_associations()) {
        let Some(title) = interaction.task_name().and_then(|t| usable_key(&t)) else {
            unmatched += 1;
            continue;
        };

        let links = BTreeMap::from([
            (
                COMPANIES_FIELD.to_string(),
                resolve_legacy(&interaction.associated_companies, &company_names, companies),
            ),
            (
                OPPORTUNITIES_FIELD.to_string(),
                resolve_legacy(&interaction.associated_deals, &deal_names, deals),
            ),
            (
                CONTACTS_FIELD.to_string(),
                resolve_legacy(&interaction.associated_contacts, &contact_emails, contacts),
            ),
        ]);
        if links.values().all(Vec::is_empty) {
            debug!(interaction = %title, "No associated record resolves");
            unmatched += 1;
            continue;
        }

        let Some(candidates) = by_title.get_mut(&title).filter(|c| !c.is_empty()) else {
            warn!(interaction = %title, "Interaction not found in destination");
            unmatched += 1;
            continue;
        };
        let date = interaction.date.as_deref().and_then(iso_date);
        let position = date
            .and_then(|date| {
                candidates
                    .iter()
                    .position(|row| row.text(DATE_FIELD).is_some_and(|d| d.starts_with(&date)))
            })
            .unwrap_or(0);
        let row = candidates.remove(position);

        let key = match &interaction.hubspot_id {
            Some(id) => format!("{title}#{id}"),
            None => title,
        };
        items.push(RelinkItem {
            key,
            row_id: row.row_id.clone(),
            scalar: row.pick(INTERACTION_FIELDS),
            links,
        });
    }
    (items, unmatched)
}

/// Run the phase
pub async fn run(
    ctx: &PhaseContext<'_>,
    interactions: &Path,
    associations: &Path,
) -> Result<PhaseReport, PhaseError> {
    let interactions = load_interactions(interactions)?;
    let dump = AssociationsDump::load(associations)?;
    let tables = &ctx.config.tables;
    let snapshot = ctx
        .snapshot(
            PHASE,
            &[
                tables.interactions.as_str(),
                tables.companies.as_str(),
                tables.opportunities.as_str(),
                tables.contacts.as_str(),
            ],
        )
        .await?;
    let rows = snapshot.rows(&tables.interactions).unwrap_or_default();
    let companies = index_by_field(
        snapshot.rows(&tables.companies).unwrap_or_default(),
        TableKind::Companies.key_field(),
    );
    let deals = index_by_field(
        snapshot.rows(&tables.opportunities).unwrap_or_default(),
        TableKind::Opportunities.key_field(),
    );
    let contacts = index_by_field(
        snapshot.rows(&tables.contacts).unwrap_or_default(),
        TableKind::Contacts.key_field(),
    );

    let mut report = PhaseReport::new(PHASE, ctx.is_dry_run());
    let (items, unmatched) =
        interaction_items(&interactions, &dump, rows, &companies, &deals, &contacts);
    report.unmatched = unmatched;
    info!(interactions = items.len(), unmatched, "Interactions to link");

    let mut step = RelinkStep::new(ctx.writer(), tables.interactions.as_str(), ctx.is_dry_run());
    let run = ctx.processor(PHASE).run(&items, &mut step).await?;
    let completed = run.completed;
    report.stages.push(run);
    if completed {
        ctx.cleanup(PHASE, &[])?;
    }
    Ok(report)
}
