//! Crash and resume behaviour of checkpointed phases

use crate::support::{self, Call, FakeStore, Op, CONTACTS, INTERACTIONS};
use crm_migrator::batch::BatchError;
use crm_migrator::checkpoint::{Checkpoint, CheckpointError};
use crm_migrator::model::TableKind;
use crm_migrator::phases::{migrate, PhaseError};
use crm_migrator::shutdown::ShutdownCoordinator;
use crm_migrator::GatewayError;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const CONTACT_COUNT: usize = 10;

fn write_contacts_csv(dir: &Path) -> PathBuf {
    let mut csv = String::from("Email,First Name,Last Name,Job Title\n");
    for i in 0..CONTACT_COUNT {
        csv.push_str(&format!("person{i}@example.com,Person,{i},Engineer\n"));
    }
    let path = dir.join("contacts.csv");
    std::fs::write(&path, csv).unwrap();
    path
}

fn emails(store: &FakeStore) -> Vec<String> {
    store
        .rows(CONTACTS)
        .iter()
        .filter_map(|r| r.text("Email"))
        .collect()
}

#[tokio::test]
async fn test_interrupted_migration_resumes_at_next_unit() {
    let dir = TempDir::new().unwrap();
    let source = write_contacts_csv(dir.path());
    let config = support::config();
    let store = FakeStore::new();

    let shutdown = ShutdownCoordinator::shared();
    store.shutdown_after_creates(6, shutdown.clone());
    let ctx = support::context(&config, &store, dir.path()).with_shutdown(shutdown);
    let report = migrate::run(&ctx, TableKind::Contacts, &source).await.unwrap();

    assert!(!report.completed());
    assert_eq!(report.stages[0].stats.created, 6);
    let checkpoint_path = ctx.checkpoint_path("migrate-contacts");
    let checkpoint = Checkpoint::load(&checkpoint_path).unwrap();
    assert_eq!(checkpoint.cursor(), 6);
    assert_eq!(checkpoint.total(), CONTACT_COUNT);
    assert_eq!(checkpoint.new_identifier_map().len(), 6);

    let ctx = support::context(&config, &store, dir.path())
        .with_shutdown(ShutdownCoordinator::shared());
    let report = migrate::run(&ctx, TableKind::Contacts, &source).await.unwrap();
    assert!(report.completed());
    let stage = &report.stages[0];
    assert_eq!(stage.resumed_from, 6);
    assert_eq!(stage.stats.created, CONTACT_COUNT as u64);
    assert_eq!(stage.stats.errors, 0);
    assert!(!checkpoint_path.exists());

    let mut all = emails(&store);
    all.sort();
    all.dedup();
    assert_eq!(all.len(), CONTACT_COUNT);
    assert_eq!(store.rows(CONTACTS).len(), CONTACT_COUNT);
}

#[tokio::test]
async fn test_resume_after_any_interruption_point_creates_each_row_once() {
    for k in 1..CONTACT_COUNT {
        let dir = TempDir::new().unwrap();
        let source = write_contacts_csv(dir.path());
        let config = support::config();
        let store = FakeStore::new();

        let shutdown = ShutdownCoordinator::shared();
        store.shutdown_after_creates(k, shutdown.clone());
        let ctx = support::context(&config, &store, dir.path()).with_shutdown(shutdown);
        let first = migrate::run(&ctx, TableKind::Contacts, &source).await.unwrap();
        assert!(!first.completed(), "k = {k}");

        let ctx = support::context(&config, &store, dir.path());
        let second = migrate::run(&ctx, TableKind::Contacts, &source).await.unwrap();
        assert!(second.completed(), "k = {k}");
        assert_eq!(second.stages[0].resumed_from, k, "k = {k}");

        let unique: BTreeSet<String> = emails(&store).into_iter().collect();
        assert_eq!(store.rows(CONTACTS).len(), CONTACT_COUNT, "k = {k}");
        assert_eq!(unique.len(), CONTACT_COUNT, "k = {k}");
    }
}

#[tokio::test]
async fn test_rerun_after_completion_skips_existing_rows() {
    let dir = TempDir::new().unwrap();
    let source = write_contacts_csv(dir.path());
    let config = support::config();
    let store = FakeStore::new();

    let ctx = support::context(&config, &store, dir.path());
    migrate::run(&ctx, TableKind::Contacts, &source).await.unwrap();
    let writes_after_first = store.writes().len();

    let report = migrate::run(&ctx, TableKind::Contacts, &source).await.unwrap();
    let stage = &report.stages[0];
    assert_eq!(stage.stats.created, 0);
    assert_eq!(stage.stats.skipped, CONTACT_COUNT as u64);
    assert_eq!(store.writes().len(), writes_after_first);
}

#[tokio::test]
async fn test_failed_unit_is_counted_and_run_continues() {
    let dir = TempDir::new().unwrap();
    let source = write_contacts_csv(dir.path());
    let config = support::config();
    let store = FakeStore::new();
    store.fail_next(
        Op::Create,
        GatewayError::ServerError {
            status: 500,
            body: "boom".into(),
        },
    );

    let ctx = support::context(&config, &store, dir.path());
    let report = migrate::run(&ctx, TableKind::Contacts, &source).await.unwrap();
    assert!(report.completed());
    let stats = report.stages[0].stats;
    assert_eq!(stats.errors, 1);
    assert_eq!(stats.created, CONTACT_COUNT as u64 - 1);
    // a server error is not retried
    assert_eq!(store.created_records(CONTACTS).len(), CONTACT_COUNT);
}

#[tokio::test]
async fn test_rate_limited_create_is_retried() {
    let dir = TempDir::new().unwrap();
    let source = write_contacts_csv(dir.path());
    let config = support::config();
    let store = FakeStore::new();
    store.fail_next(Op::Create, GatewayError::RateLimited { status: 200 });
    store.fail_next(Op::Create, GatewayError::RateLimited { status: 429 });

    let ctx = support::context(&config, &store, dir.path());
    let report = migrate::run(&ctx, TableKind::Contacts, &source).await.unwrap();
    let stats = report.stages[0].stats;
    assert_eq!(stats.errors, 0);
    assert_eq!(stats.created, CONTACT_COUNT as u64);
    assert_eq!(store.created_records(CONTACTS).len(), CONTACT_COUNT + 2);
}

#[tokio::test]
async fn test_checkpoint_of_another_phase_is_rejected() {
    let dir = TempDir::new().unwrap();
    let source = write_contacts_csv(dir.path());
    let config = support::config();
    let store = FakeStore::new();
    let ctx = support::context(&config, &store, dir.path());
    Checkpoint::new("recover", CONTACT_COUNT)
        .save(&ctx.checkpoint_path("migrate-contacts"))
        .unwrap();

    let result = migrate::run(&ctx, TableKind::Contacts, &source).await;
    assert!(matches!(
        result,
        Err(PhaseError::Batch(BatchError::Checkpoint(CheckpointError::PhaseMismatch { .. })))
    ));
    assert!(store.writes().is_empty());
}

#[tokio::test]
async fn test_dry_run_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let source = write_contacts_csv(dir.path());
    let config = support::config();
    let store = FakeStore::new();

    let ctx = support::context(&config, &store, dir.path()).dry_run(true);
    let report = migrate::run(&ctx, TableKind::Contacts, &source).await.unwrap();
    assert!(report.dry_run);
    assert_eq!(report.stages[0].stats.skipped, CONTACT_COUNT as u64);
    assert!(store.writes().is_empty());
    assert!(store.calls().iter().all(|c| matches!(c, Call::List { .. })));
    assert!(!ctx.checkpoint_path("migrate-contacts").exists());
}

#[tokio::test]
async fn test_interactions_migrate_from_engagements_export() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("hubspot-interactions.json");
    let export = serde_json::json!([
        {"type": "Call", "title": "Llamada", "date": "2024-03-05T10:00:00Z"},
        {"type": "Call", "title": "Llamada", "date": "2024-04-01T09:00:00Z", "status": "COMPLETED"},
        {"type": "Note", "notes": "<p>Cliente&nbsp;interesado</p>", "date": 1709632800000i64},
        {"date": "2024-05-01"}
    ]);
    std::fs::write(&source, export.to_string()).unwrap();
    let config = support::config();
    let store = FakeStore::new();
    store.seed(
        INTERACTIONS,
        vec![serde_json::json!({
            "rowId": "rwOld", "Task Name": "Llamada", "Type": "Call", "Date": "2024-03-05"
        })],
    );

    let ctx = support::context(&config, &store, dir.path());
    let report = migrate::run(&ctx, TableKind::Interactions, &source).await.unwrap();
    assert!(report.completed());
    assert_eq!(report.unmatched, 1);
    let stage = &report.stages[0];
    assert_eq!(stage.stats.created, 2);
    assert_eq!(stage.stats.skipped, 1);

    let created = store.created_records(INTERACTIONS);
    assert_eq!(created[0]["Task Name"], serde_json::json!("Llamada"));
    assert_eq!(created[0]["Date"], serde_json::json!("2024-04-01"));
    assert_eq!(created[0]["Done?"], serde_json::json!(true));
    assert_eq!(created[1]["Task Name"], serde_json::json!("Note - Sin título"));
    assert_eq!(created[1]["Notes"], serde_json::json!("Cliente interesado"));
    assert!(!created[1].contains_key("Name"));
}
