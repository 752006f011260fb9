//! `link-contacts`: contact→company, then deal→contacts
//!
//! Stage one relinks every contact that has a company association and
//! records its new row id by email. Stage two relinks every deal with
//! associated contacts, preferring those new ids over the listed ones.
//! Stage one's checkpoint is kept until stage two finishes so a crash in
//! stage two does not redo stage one.

use super::{
    link_ids, PhaseContext, PhaseError, PhaseReport, RelinkItem, RelinkStep, CONTACT_FIELDS,
    DEAL_FIELDS,
};
use crate::associations::AssociationsDump;
use crate::checkpoint::RowSnapshot;
use crate::model::TargetRow;
use crate::resolver::{index_by_field, normalize, KeyIndex};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use tracing::{debug, info};

/// Phase name, also the snapshot name
pub const PHASE: &str = "link-contacts";
/// Stage one checkpoint name
pub const COMPANY_STAGE: &str = "link-contacts-company";
/// Stage two checkpoint name
pub const DEALS_STAGE: &str = "link-contacts-deals";

/// Contact link column
pub const COMPANY_FIELD: &str = "Company";
/// Deal link column
pub const MAIN_CONTACTS_FIELD: &str = "Main Contacts";

fn rows_by_id(rows: &[TargetRow]) -> HashMap<&str, &TargetRow> {
    rows.iter().map(|r| (r.row_id.as_str(), r)).collect()
}

/// Contacts to relink to their company, one per email
pub fn contact_company_items(
    dump: &AssociationsDump,
    contacts: &[TargetRow],
    companies: &KeyIndex,
) -> (Vec<RelinkItem>, usize) {
    let contact_index = index_by_field(contacts, "Email");
    let by_id = rows_by_id(contacts);
    let mut seen = BTreeSet::new();
    let mut items = Vec::new();
    let mut unmatched = 0;

    for edge in dump.contact_company_edges() {
        if !seen.insert(edge.from_key.clone()) {
            continue;
        }
        let contact = contact_index.get(&edge.from_key).and_then(|id| by_id.get(id));
        let company_id = companies.get_fuzzy(&edge.to_key);
        match (contact, company_id) {
            (Some(contact), Some(company_id)) => items.push(RelinkItem {
                key: edge.from_key.clone(),
                row_id: contact.row_id.clone(),
                scalar: contact.pick(CONTACT_FIELDS),
                links: BTreeMap::from([(COMPANY_FIELD.to_string(), vec![company_id.to_string()])]),
            }),
            _ => {
                debug!(
                    contact = %edge.from_key,
                    company = %edge.to_key,
                    "No match for association"
                );
                unmatched += 1;
            }
        }
    }
    (items, unmatched)
}

/// Deals to relink to their contacts.
///
/// Contact ids come from `new_ids` (email to row id written by stage one)
/// first, then from the listed contacts. Deals with no resolvable contact
/// are left out. An existing company link is carried over.
pub fn deal_contact_items(
    dump: &AssociationsDump,
    deals: &[TargetRow],
    contacts: &KeyIndex,
    new_ids: &BTreeMap<String, String>,
) -> (Vec<RelinkItem>, usize) {
    let deal_index = index_by_field(deals, "Deal Name");
    let by_id = rows_by_id(deals);
    let mut items = Vec::new();
    let mut unmatched = 0;

    for group in dump.deal_contact_groups() {
        let Some(deal) = deal_index.get(&group.key).and_then(|id| by_id.get(id)) else {
            unmatched += 1;
            continue;
        };
        let contact_ids: Vec<String> = group
            .members
            .iter()
            .filter_map(|email| {
                new_ids
                    .get(&normalize(email))
                    .map(String::as_str)
                    .or_else(|| contacts.get(email))
                    .map(str::to_string)
            })
            .collect();
        if contact_ids.is_empty() {
            unmatched += 1;
            continue;
        }

        let mut links = BTreeMap::from([(MAIN_CONTACTS_FIELD.to_string(), contact_ids)]);
        let companies = link_ids(deal, COMPANY_FIELD);
        if !companies.is_empty() {
            links.insert(COMPANY_FIELD.to_string(), companies);
        }
        items.push(RelinkItem {
            key: normalize(&group.key),
            row_id: deal.row_id.clone(),
            scalar: deal.pick(DEAL_FIELDS),
            links,
        });
    }
    (items, unmatched)
}

/// Run both stages
pub async fn run(ctx: &PhaseContext<'_>, associations: &Path) -> Result<PhaseReport, PhaseError> {
    let dump = AssociationsDump::load(associations)?;
    let tables = &ctx.config.tables;
    let snapshot: RowSnapshot = ctx
        .snapshot(
            PHASE,
            &[
                tables.contacts.as_str(),
                tables.companies.as_str(),
                tables.opportunities.as_str(),
            ],
        )
        .await?;
    let contacts = snapshot.rows(&tables.contacts).unwrap_or_default();
    let companies = snapshot.rows(&tables.companies).unwrap_or_default();
    let deals = snapshot.rows(&tables.opportunities).unwrap_or_default();

    let mut report = PhaseReport::new(PHASE, ctx.is_dry_run());

    let company_index = index_by_field(companies, "Company Name");
    let (items, unmatched) = contact_company_items(&dump, contacts, &company_index);
    report.unmatched += unmatched;
    info!(contacts = items.len(), unmatched, "Contacts to link to their company");

    let mut step = RelinkStep::new(ctx.writer(), tables.contacts.as_str(), ctx.is_dry_run());
    let first = ctx
        .processor(COMPANY_STAGE)
        .retain_on_completion(true)
        .run(&items, &mut step)
        .await?;
    let new_ids = first.identifiers.clone();
    let first_completed = first.completed;
    report.stages.push(first);
    if !first_completed {
        return Ok(report);
    }

    let contact_index = index_by_field(contacts, "Email");
    let (items, unmatched) = deal_contact_items(&dump, deals, &contact_index, &new_ids);
    report.unmatched += unmatched;
    info!(deals = items.len(), unmatched, "Deals to link to their contacts");

    let mut step = RelinkStep::new(ctx.writer(), tables.opportunities.as_str(), ctx.is_dry_run());
    let second = ctx
        .processor(DEALS_STAGE)
        .with_identifiers(new_ids)
        .run(&items, &mut step)
        .await?;
    let second_completed = second.completed;
    report.stages.push(second);

    if second_completed {
        ctx.cleanup(PHASE, &[COMPANY_STAGE])?;
    }
    Ok(report)
}
