//! Ctrl+C handling around waits and relinks

use crate::support::{self, FakeStore, Op, DEALS};
use crm_migrator::link_writer::LinkWriter;
use crm_migrator::model::FieldMap;
use crm_migrator::pacing::Pacer;
use crm_migrator::shutdown::ShutdownCoordinator;
use crm_migrator::GatewayError;
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;

#[tokio::test]
async fn shutdown_notifies_waiters() {
    let shutdown = ShutdownCoordinator::shared();
    let waiter = {
        let handle = shutdown.clone();
        tokio::spawn(async move {
            handle.wait_for_shutdown().await;
            true
        })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown.request_shutdown();

    let result = tokio::time::timeout(Duration::from_secs(1), waiter).await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn shutdown_concurrent_waiters_all_notified() {
    let shutdown = ShutdownCoordinator::shared();
    let waiters: Vec<_> = (0..5)
        .map(|_| {
            let handle = shutdown.clone();
            tokio::spawn(async move { handle.wait_for_shutdown().await })
        })
        .collect();

    tokio::time::sleep(Duration::from_millis(20)).await;
    shutdown.request_shutdown();

    for waiter in waiters {
        assert!(tokio::time::timeout(Duration::from_secs(1), waiter).await.is_ok());
    }
}

#[tokio::test(start_paused = true)]
async fn shutdown_cuts_long_pause_short() {
    let shutdown = ShutdownCoordinator::shared();
    let pacer = Pacer::new(Duration::from_secs(3600)).with_shutdown(shutdown.clone());
    let trigger = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            shutdown.request_shutdown();
        })
    };

    let started = tokio::time::Instant::now();
    assert!(!pacer.between_requests().await);
    assert!(started.elapsed() < Duration::from_secs(3600));
    trigger.await.unwrap();
}

fn deal() -> (FieldMap, BTreeMap<String, Vec<String>>) {
    let mut scalar = FieldMap::new();
    scalar.insert("Deal Name".into(), json!("Alpha"));
    let links = BTreeMap::from([("Company".to_string(), vec!["rwAcme".to_string()])]);
    (scalar, links)
}

#[tokio::test]
async fn relink_finishes_create_after_shutdown() {
    let store = FakeStore::new();
    store.seed(DEALS, vec![json!({"rowId": "rwOld", "Deal Name": "Alpha"})]);
    store.fail_next(Op::Create, GatewayError::RateLimited { status: 429 });

    let shutdown = ShutdownCoordinator::shared();
    shutdown.request_shutdown();
    let retry = support::fast_retry().with_shutdown(shutdown.clone());
    let writer = LinkWriter::new(&store, retry, Pacer::immediate().with_shutdown(shutdown));

    let (scalar, links) = deal();
    let new_id = writer.relink(DEALS, "rwOld", &scalar, &links).await.unwrap();
    let rows = store.rows(DEALS);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].row_id, new_id);
}

#[tokio::test]
async fn relink_interrupted_before_delete_keeps_row() {
    let store = FakeStore::new();
    store.seed(DEALS, vec![json!({"rowId": "rwOld", "Deal Name": "Alpha"})]);
    store.fail_next(Op::Delete, GatewayError::RateLimited { status: 429 });

    let shutdown = ShutdownCoordinator::shared();
    shutdown.request_shutdown();
    let retry = support::fast_retry().with_shutdown(shutdown);
    let writer = LinkWriter::new(&store, retry, Pacer::immediate());

    let (scalar, links) = deal();
    let result = writer.relink(DEALS, "rwOld", &scalar, &links).await;
    assert!(matches!(result, Err(GatewayError::Interrupted(_))));
    assert_eq!(store.rows(DEALS)[0].row_id, "rwOld");
    assert!(store.created_records(DEALS).is_empty());
}
