//! Deduplication against the in-memory destination

use crate::support::{self, Call, FakeStore, Op, COMPANIES, CONTACTS};
use crm_migrator::model::TableKind;
use crm_migrator::phases::dedupe;
use crm_migrator::GatewayError;
use serde_json::json;
use tempfile::TempDir;

fn seed_duplicates(store: &FakeStore) {
    store.seed(
        CONTACTS,
        vec![
            json!({"rowId": "c1", "Email": "ana@example.com", "updatedAt": "2024-01-01T00:00:00Z"}),
            json!({
                "rowId": "c2", "Email": " ANA@example.com", "updatedAt": "2024-06-01T00:00:00Z"
            }),
            json!({"rowId": "c3", "Email": "luis@example.com"}),
            json!({"rowId": "c4", "Email": ""}),
            json!({"rowId": "c5", "Email": ""}),
        ],
    );
    store.seed(
        COMPANIES,
        vec![
            json!({"rowId": "k1", "Company Name": "Acme"}),
            json!({"rowId": "k2", "Company Name": "acme", "Industry": "IT", "Website": "acme.io"}),
            json!({"rowId": "k3", "Company Name": "Untitle"}),
            json!({"rowId": "k4", "Company Name": "Untitle"}),
        ],
    );
}

#[tokio::test]
async fn test_dedupe_converges() {
    let dir = TempDir::new().unwrap();
    let config = support::config();
    let store = FakeStore::new();
    seed_duplicates(&store);
    let ctx = support::context(&config, &store, dir.path());

    let report = dedupe::run(&ctx, &[TableKind::Contacts, TableKind::Companies], true)
        .await
        .unwrap();
    assert!(report.executed);
    assert_eq!(report.tables[0].to_delete, 1);
    assert_eq!(report.tables[0].deleted, 1);
    assert_eq!(report.tables[1].deleted, 1);

    let contacts: Vec<String> = store.rows(CONTACTS).into_iter().map(|r| r.row_id).collect();
    assert_eq!(contacts, vec!["c2", "c3", "c4", "c5"]);
    let companies: Vec<String> = store.rows(COMPANIES).into_iter().map(|r| r.row_id).collect();
    assert_eq!(companies, vec!["k2", "k3", "k4"]);

    let again = dedupe::run(&ctx, &[TableKind::Contacts, TableKind::Companies], true)
        .await
        .unwrap();
    assert!(again.tables.iter().all(|t| t.to_delete == 0 && t.deleted == 0));
}

#[tokio::test]
async fn test_dedupe_without_execute_only_plans() {
    let dir = TempDir::new().unwrap();
    let config = support::config();
    let store = FakeStore::new();
    seed_duplicates(&store);

    let ctx = support::context(&config, &store, dir.path());
    let report = dedupe::run(&ctx, &[TableKind::Contacts], false).await.unwrap();
    assert!(!report.executed);
    assert_eq!(report.tables[0].to_delete, 1);
    assert_eq!(report.tables[0].deleted, 0);

    let ctx = support::context(&config, &store, dir.path()).dry_run(true);
    let report = dedupe::run(&ctx, &[TableKind::Contacts], true).await.unwrap();
    assert!(!report.executed);
    assert!(store.writes().is_empty());
}

#[tokio::test]
async fn test_dedupe_deletes_in_chunks_of_ten() {
    let dir = TempDir::new().unwrap();
    let config = support::config();
    let store = FakeStore::new();
    let rows = (0..25)
        .map(|i| json!({"rowId": format!("c{i:02}"), "Email": "same@example.com", "updatedAt": i}))
        .collect();
    store.seed(CONTACTS, rows);
    store.fail_next(
        Op::Delete,
        GatewayError::ClientError {
            status: 400,
            body: "bad id".into(),
        },
    );

    let ctx = support::context(&config, &store, dir.path());
    let report = dedupe::run(&ctx, &[TableKind::Contacts], true).await.unwrap();
    let table = &report.tables[0];
    assert_eq!(table.to_delete, 24);
    assert_eq!(table.failed, 10);
    assert_eq!(table.deleted, 14);

    let chunk_sizes: Vec<usize> = store
        .writes()
        .into_iter()
        .filter_map(|c| match c {
            Call::Delete { ids, .. } => Some(ids.len()),
            _ => None,
        })
        .collect();
    assert_eq!(chunk_sizes, vec![10, 10, 4]);
    // newest row survives
    assert!(store.rows(CONTACTS).iter().any(|r| r.row_id == "c24"));
}
