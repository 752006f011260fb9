//! Delete-and-recreate relinking through the link phases

use crate::support::{self, Call, FakeStore, Op, COMPANIES, CONTACTS, DEALS, INTERACTIONS};
use crm_migrator::checkpoint::RowSnapshot;
use crm_migrator::link_writer::LinkWriter;
use crm_migrator::model::{FieldMap, TableKind};
use crm_migrator::pacing::Pacer;
use crm_migrator::phases::{link_companies, link_contacts, link_interactions, recover};
use crm_migrator::shutdown::ShutdownCoordinator;
use crm_migrator::verify::TableReport;
use crm_migrator::GatewayError;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn write_associations(dir: &Path, value: Value) -> PathBuf {
    let path = dir.join("associations.json");
    std::fs::write(&path, value.to_string()).unwrap();
    path
}

#[tokio::test]
async fn test_single_contact_relink_writes_id_twice() {
    let store = FakeStore::new();
    store.seed(DEALS, vec![json!({"rowId": "rwOld", "Deal Name": "Alpha"})]);
    let writer = LinkWriter::new(&store, support::fast_retry(), Pacer::immediate());

    let mut scalar = FieldMap::new();
    scalar.insert("Deal Name".into(), json!("Alpha"));
    let links = BTreeMap::from([("Main Contacts".to_string(), vec!["rw123".to_string()])]);
    let new_id = writer.relink(DEALS, "rwOld", &scalar, &links).await.unwrap();

    let writes = store.writes();
    assert_eq!(writes.len(), 2);
    assert_eq!(
        writes[0],
        Call::Delete {
            table: DEALS.into(),
            ids: vec!["rwOld".into()],
        }
    );
    match &writes[1] {
        Call::Create { table, records } => {
            assert_eq!(table, DEALS);
            assert_eq!(records[0]["Main Contacts"], json!(["rw123", "rw123"]));
            assert_eq!(records[0]["Deal Name"], json!("Alpha"));
        }
        other => panic!("expected a create, got {other:?}"),
    }
    let rows = store.rows(DEALS);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].row_id, new_id);
}

#[tokio::test]
async fn test_link_companies_omits_unresolvable_contacts() {
    let dir = TempDir::new().unwrap();
    let config = support::config();
    let store = FakeStore::new();
    store.seed(COMPANIES, vec![json!({"rowId": "rwAcme", "Company Name": "Acme"})]);
    store.seed(
        DEALS,
        vec![json!({
            "rowId": "rwAlpha",
            "Deal Name": "Alpha",
            "Stage": "Ganada",
            "Total Value": "$0"
        })],
    );
    let associations = write_associations(
        dir.path(),
        json!({
            "companyToDeal": [{"companyName": "ACME", "dealName": "alpha"}],
            "contactToDeal": [{"contactEmail": "ghost@example.com", "dealName": "Alpha"}]
        }),
    );

    let ctx = support::context(&config, &store, dir.path());
    let report = link_companies::run(&ctx, &associations).await.unwrap();
    assert!(report.completed());
    assert_eq!(report.totals().updated, 1);

    let created = store.created_records(DEALS);
    assert_eq!(created.len(), 1);
    let record = &created[0];
    assert_eq!(record["Company"], json!(["rwAcme", "rwAcme"]));
    assert_eq!(record["Stage"], json!("Ganada"));
    assert!(!record.contains_key("Main Contacts"));
    assert!(!record.contains_key("Total Value"));

    let deals = store.rows(DEALS);
    assert_eq!(deals.len(), 1);
    assert_ne!(deals[0].row_id, "rwAlpha");
    let snapshot = RowSnapshot::path_for(&ctx.checkpoint_path(link_companies::PHASE));
    assert!(!snapshot.exists());
}

#[tokio::test]
async fn test_failed_recreate_loses_row_and_shows_in_verify() {
    let dir = TempDir::new().unwrap();
    let config = support::config();
    let store = FakeStore::new();
    store.seed(COMPANIES, vec![json!({"rowId": "rwAcme", "Company Name": "Acme"})]);
    store.seed(DEALS, vec![json!({"rowId": "rwAlpha", "Deal Name": "Alpha"})]);
    store.fail_next(
        Op::Create,
        GatewayError::ClientError {
            status: 422,
            body: "invalid link".into(),
        },
    );
    let associations = write_associations(
        dir.path(),
        json!({"companyToDeal": [{"companyName": "Acme", "dealName": "Alpha"}]}),
    );

    let ctx = support::context(&config, &store, dir.path());
    let report = link_companies::run(&ctx, &associations).await.unwrap();
    assert!(report.completed());
    assert_eq!(report.totals().errors, 1);

    let rows = store.rows(DEALS);
    assert!(rows.is_empty());
    let verify = TableReport::build(TableKind::Opportunities, &rows, Some(1), &["Company"]);
    assert!(!verify.count_matches());
    assert_eq!(verify.shortfall(), 1);
}

fn seed_contact_graph(store: &FakeStore) -> Value {
    store.seed(
        CONTACTS,
        vec![json!({"rowId": "rwAna", "Email": "ana@example.com", "Full Name": "Ana Ruiz"})],
    );
    store.seed(COMPANIES, vec![json!({"rowId": "rwAcme", "Company Name": "Acme Consulting"})]);
    store.seed(
        DEALS,
        vec![
            json!({"rowId": "rwAlpha", "Deal Name": "Alpha", "Company": ["rwAcme", "rwAcme"]}),
            json!({"rowId": "rwBeta", "Deal Name": "Beta"}),
        ],
    );
    json!({
        "contactToCompany": [{"contactEmail": "ana@example.com", "companyName": "Acme"}],
        "contactToDeal": [
            {"contactEmail": "ana@example.com", "dealName": "Alpha"},
            {"contactEmail": "ana@example.com", "dealName": "Beta"}
        ]
    })
}

#[tokio::test]
async fn test_link_contacts_uses_new_contact_ids_in_deals() {
    let dir = TempDir::new().unwrap();
    let config = support::config();
    let store = FakeStore::new();
    let associations = write_associations(dir.path(), seed_contact_graph(&store));

    let ctx = support::context(&config, &store, dir.path());
    let report = link_contacts::run(&ctx, &associations).await.unwrap();
    assert!(report.completed());
    assert_eq!(report.stages.len(), 2);
    assert_eq!(report.totals().updated, 3);

    let contacts = store.rows(CONTACTS);
    assert_eq!(contacts.len(), 1);
    let new_contact = contacts[0].row_id.clone();
    assert_ne!(new_contact, "rwAna");
    assert_eq!(contacts[0].fields["Company"], json!(["rwAcme", "rwAcme"]));

    let deals = store.created_records(DEALS);
    assert_eq!(deals.len(), 2);
    assert_eq!(deals[0]["Main Contacts"], json!([new_contact, new_contact]));
    assert_eq!(deals[0]["Company"], json!(["rwAcme", "rwAcme"]));
    assert!(!deals[1].contains_key("Company"));

    for name in [link_contacts::COMPANY_STAGE, link_contacts::DEALS_STAGE] {
        assert!(!ctx.checkpoint_path(name).exists(), "{name} left behind");
    }
    assert!(!RowSnapshot::path_for(&ctx.checkpoint_path(link_contacts::PHASE)).exists());
}

#[tokio::test]
async fn test_link_contacts_resume_does_not_repeat_finished_units() {
    let dir = TempDir::new().unwrap();
    let config = support::config();
    let store = FakeStore::new();
    let associations = write_associations(dir.path(), seed_contact_graph(&store));

    // Contact relink is create 1, first deal relink is create 2
    let shutdown = ShutdownCoordinator::shared();
    store.shutdown_after_creates(2, shutdown.clone());
    let ctx = support::context(&config, &store, dir.path()).with_shutdown(shutdown);
    let first = link_contacts::run(&ctx, &associations).await.unwrap();
    assert!(!first.completed());
    assert!(ctx.checkpoint_path(link_contacts::COMPANY_STAGE).exists());
    assert!(ctx.checkpoint_path(link_contacts::DEALS_STAGE).exists());
    assert!(RowSnapshot::path_for(&ctx.checkpoint_path(link_contacts::PHASE)).exists());

    let ctx = support::context(&config, &store, dir.path());
    let second = link_contacts::run(&ctx, &associations).await.unwrap();
    assert!(second.completed());
    assert_eq!(second.stages[0].resumed_from, 1);
    assert_eq!(second.stages[1].resumed_from, 1);

    let creates = store
        .writes()
        .into_iter()
        .filter(|c| matches!(c, Call::Create { .. }))
        .count();
    assert_eq!(creates, 3);
    assert_eq!(store.rows(CONTACTS).len(), 1);
    assert_eq!(store.rows(DEALS).len(), 2);
    let new_contact = store.rows(CONTACTS)[0].row_id.clone();
    for record in store.created_records(DEALS) {
        assert_eq!(record["Main Contacts"], json!([new_contact, new_contact]));
    }
}

#[tokio::test]
async fn test_link_contacts_dry_run_plans_without_writing() {
    let dir = TempDir::new().unwrap();
    let config = support::config();
    let store = FakeStore::new();
    let associations = write_associations(dir.path(), seed_contact_graph(&store));

    let ctx = support::context(&config, &store, dir.path()).dry_run(true);
    let report = link_contacts::run(&ctx, &associations).await.unwrap();
    assert!(report.dry_run);
    assert_eq!(report.totals().updated, 0);
    assert_eq!(report.totals().skipped, 3);
    assert!(store.writes().is_empty());
    assert!(!RowSnapshot::path_for(&ctx.checkpoint_path(link_contacts::PHASE)).exists());
}

fn seed_interaction_graph(store: &FakeStore, dir: &Path) -> (PathBuf, PathBuf) {
    store.seed(
        CONTACTS,
        vec![json!({"rowId": "rwAna", "Email": "ana@example.com", "Full Name": "Ana Ruiz"})],
    );
    store.seed(COMPANIES, vec![json!({"rowId": "rwAcme", "Company Name": "Acme"})]);
    store.seed(DEALS, vec![json!({"rowId": "rwAlpha", "Deal Name": "Alpha"})]);
    store.seed(
        INTERACTIONS,
        vec![
            json!({
                "rowId": "rwCall", "Task Name": "Llamada", "Type": "Call", "Date": "2024-03-05"
            }),
            json!({"rowId": "rwNote", "Task Name": "Nota suelta", "Type": "Note"}),
        ],
    );

    let associations = write_associations(
        dir,
        json!({
            "contactToCompany": [
                {"contactId": 1, "contactEmail": "ana@example.com",
                 "companyId": 9, "companyName": "Acme"}
            ],
            "companyToDeal": [
                {"companyId": 9, "companyName": "Acme", "dealId": 50, "dealName": "Alpha"}
            ]
        }),
    );
    let interactions = dir.join("hubspot-interactions.json");
    let export = json!([
        {
            "type": "Call",
            "title": "Llamada",
            "date": "2024-03-05T10:00:00Z",
            "hubspotId": 700,
            "associatedCompanies": [9],
            "associatedDeals": [50],
            "associatedContacts": [1]
        },
        {"type": "Note", "title": "Nota suelta", "associatedContacts": [404]}
    ]);
    std::fs::write(&interactions, export.to_string()).unwrap();
    (interactions, associations)
}

#[tokio::test]
async fn test_link_interactions_recreates_with_resolved_links() {
    let dir = TempDir::new().unwrap();
    let config = support::config();
    let store = FakeStore::new();
    let (interactions, associations) = seed_interaction_graph(&store, dir.path());

    let ctx = support::context(&config, &store, dir.path());
    let report = link_interactions::run(&ctx, &interactions, &associations).await.unwrap();
    assert!(report.completed());
    assert_eq!(report.unmatched, 1);
    assert_eq!(report.totals().updated, 1);

    let writes = store.writes();
    assert_eq!(writes.len(), 2);
    assert_eq!(
        writes[0],
        Call::Delete {
            table: INTERACTIONS.into(),
            ids: vec!["rwCall".into()],
        }
    );
    let created = store.created_records(INTERACTIONS);
    assert_eq!(created.len(), 1);
    let record = &created[0];
    assert_eq!(record["Companies"], json!(["rwAcme", "rwAcme"]));
    assert_eq!(record["Opportunities"], json!(["rwAlpha", "rwAlpha"]));
    assert_eq!(record["Contacts"], json!(["rwAna", "rwAna"]));
    assert_eq!(record["Task Name"], json!("Llamada"));
    assert_eq!(record["Date"], json!("2024-03-05"));

    let rows = store.rows(INTERACTIONS);
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().any(|r| r.row_id == "rwNote"));
    assert!(!rows.iter().any(|r| r.row_id == "rwCall"));
    assert!(!RowSnapshot::path_for(&ctx.checkpoint_path(link_interactions::PHASE)).exists());
}

#[tokio::test]
async fn test_link_interactions_dry_run_plans_without_writing() {
    let dir = TempDir::new().unwrap();
    let config = support::config();
    let store = FakeStore::new();
    let (interactions, associations) = seed_interaction_graph(&store, dir.path());

    let ctx = support::context(&config, &store, dir.path()).dry_run(true);
    let report = link_interactions::run(&ctx, &interactions, &associations).await.unwrap();
    assert!(report.dry_run);
    assert_eq!(report.totals().skipped, 1);
    assert!(store.writes().is_empty());
}

fn seed_recovery(store: &FakeStore, dir: &Path) -> (PathBuf, PathBuf) {
    store.seed(CONTACTS, vec![json!({"rowId": "rwAna", "Email": "ana@example.com"})]);
    store.seed(DEALS, vec![json!({"rowId": "rwAlpha", "Deal Name": "Alpha"})]);
    let source = dir.join("deals.csv");
    std::fs::write(
        &source,
        "Deal Name,Deal Stage,Amount\nAlpha,closedwon,100\nBeta,contractsent,250\n",
    )
    .unwrap();
    let associations = write_associations(
        dir,
        json!({"contactToDeal": [{"contactEmail": "ana@example.com", "dealName": "Beta"}]}),
    );
    (source, associations)
}

#[tokio::test]
async fn test_recover_dry_run_plans_missing_deals_only() {
    let dir = TempDir::new().unwrap();
    let config = support::config();
    let store = FakeStore::new();
    let (source, associations) = seed_recovery(&store, dir.path());

    let ctx = support::context(&config, &store, dir.path()).dry_run(true);
    let report = recover::run(&ctx, &source, &associations, false).await.unwrap();
    assert!(report.dry_run);
    assert_eq!(report.totals().skipped, 2);
    assert!(store.writes().is_empty());
    assert!(!ctx.checkpoint_path(recover::PHASE).exists());
}

#[tokio::test]
async fn test_recover_recreates_missing_deal_with_contacts() {
    let dir = TempDir::new().unwrap();
    let config = support::config();
    let store = FakeStore::new();
    let (source, associations) = seed_recovery(&store, dir.path());

    let ctx = support::context(&config, &store, dir.path());
    let report = recover::run(&ctx, &source, &associations, false).await.unwrap();
    assert!(report.completed());
    assert_eq!(report.totals().created, 1);

    let created = store.created_records(DEALS);
    assert_eq!(created.len(), 1);
    assert_eq!(created[0]["Deal Name"], json!("Beta"));
    assert_eq!(created[0]["Stage"], json!("Contrato Enviado"));
    assert_eq!(created[0]["Main Contacts"], json!(["rwAna", "rwAna"]));
}
