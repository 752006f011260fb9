//! `link-companies`: deal→company relink
//!
//! Every deal with a company association is recreated with its company
//! link, its scalar columns and its contacts. Contacts are resolved again
//! from the associations because an earlier contact relink may have changed
//! their ids; the deal's stored contact links are kept only when nothing
//! resolves.

use super::link_contacts::{COMPANY_FIELD, MAIN_CONTACTS_FIELD};
use super::{link_ids, PhaseContext, PhaseError, PhaseReport, RelinkItem, RelinkStep, DEAL_FIELDS};
use crate::associations::AssociationsDump;
use crate::model::TargetRow;
use crate::resolver::{index_by_field, normalize, resolve_links, KeyIndex};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

/// Phase and checkpoint name
pub const PHASE: &str = "link-companies";

/// Deals to relink to their company
pub fn deal_company_items(
    dump: &AssociationsDump,
    deals: &[TargetRow],
    companies: &KeyIndex,
    contacts: &KeyIndex,
) -> (Vec<RelinkItem>, usize) {
    let company_by_deal = dump.company_by_deal();
    let contacts_by_deal = dump.contacts_by_deal();
    let mut items = Vec::new();
    let mut unmatched = 0;

    for deal in deals {
        let Some(name) = deal.text("Deal Name") else {
            unmatched += 1;
            continue;
        };
        let key = normalize(&name);
        let Some(company_name) = company_by_deal.get(&key) else {
            unmatched += 1;
            continue;
        };
        let Some(company_id) = companies.get(company_name) else {
            warn!(deal = %name, company = %company_name, "Company not found in destination");
            unmatched += 1;
            continue;
        };

        let emails = contacts_by_deal.get(&key).map(Vec::as_slice).unwrap_or_default();
        let mut contact_ids = resolve_links(emails, contacts);
        if contact_ids.is_empty() {
            contact_ids = link_ids(deal, MAIN_CONTACTS_FIELD);
        }

        items.push(RelinkItem {
            key,
            row_id: deal.row_id.clone(),
            scalar: deal.pick(DEAL_FIELDS),
            links: BTreeMap::from([
                (COMPANY_FIELD.to_string(), vec![company_id.to_string()]),
                (MAIN_CONTACTS_FIELD.to_string(), contact_ids),
            ]),
        });
    }
    (items, unmatched)
}

/// Run the phase
pub async fn run(ctx: &PhaseContext<'_>, associations: &Path) -> Result<PhaseReport, PhaseError> {
    let dump = AssociationsDump::load(associations)?;
    let tables = &ctx.config.tables;
    let snapshot = ctx
        .snapshot(
            PHASE,
            &[
                tables.opportunities.as_str(),
                tables.companies.as_str(),
                tables.contacts.as_str(),
            ],
        )
        .await?;
    let deals = snapshot.rows(&tables.opportunities).unwrap_or_default();
    let companies = index_by_field(
        snapshot.rows(&tables.companies).unwrap_or_default(),
        "Company Name",
    );
    let contacts = index_by_field(snapshot.rows(&tables.contacts).unwrap_or_default(), "Email");

    let mut report = PhaseReport::new(PHASE, ctx.is_dry_run());
    let (items, unmatched) = deal_company_items(&dump, deals, &companies, &contacts);
    report.unmatched = unmatched;
    info!(deals = items.len(), unmatched, "Deals to link to their company");

    let mut step = RelinkStep::new(ctx.writer(), tables.opportunities.as_str(), ctx.is_dry_run());
    let run = ctx.processor(PHASE).run(&items, &mut step).await?;
    let completed = run.completed;
    report.stages.push(run);
    if completed {
        ctx.cleanup(PHASE, &[])?;
    }
    Ok(report)
}
