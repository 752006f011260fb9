//! In-memory destination used by the integration tests

use async_trait::async_trait;
use crm_migrator::config::MigrationConfig;
use crm_migrator::gateway::{GatewayResult, RowPage, RowStore};
use crm_migrator::model::{FieldMap, TargetRow};
use crm_migrator::pacing::Pacer;
use crm_migrator::phases::PhaseContext;
use crm_migrator::retry::{RetryController, RetryPolicy};
use crm_migrator::shutdown::SharedShutdown;
use crm_migrator::GatewayError;
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

/// Table ids used by [`config`]
pub const CONTACTS: &str = "tblContacts";
pub const COMPANIES: &str = "tblCompanies";
pub const DEALS: &str = "tblDeals";
pub const INTERACTIONS: &str = "tblInteractions";

/// Operation kinds a failure can be scripted for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    List,
    Create,
    Delete,
}

/// One recorded call
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    List { table: String, offset: usize },
    Create {
        table: String,
        records: Vec<FieldMap>,
    },
    Delete { table: String, ids: Vec<String> },
}

#[derive(Default)]
struct State {
    tables: BTreeMap<String, Vec<TargetRow>>,
    next_id: u64,
    calls: Vec<Call>,
    failures: VecDeque<(Op, GatewayError)>,
    creates: usize,
    shutdown_after: Option<(usize, SharedShutdown)>,
}

/// Destination backed by a map of tables
#[derive(Default)]
pub struct FakeStore {
    state: Mutex<State>,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a table with rows given as field objects (each with a `rowId`)
    pub fn seed(&self, table: &str, rows: Vec<Value>) {
        let rows = rows
            .iter()
            .map(|fields| {
                TargetRow::from_value(&serde_json::json!({ "field": fields }))
                    .expect("seed rows need a rowId")
            })
            .collect();
        self.state.lock().unwrap().tables.insert(table.to_string(), rows);
    }

    /// Fail the next call of `op` with `error` (queued in order)
    pub fn fail_next(&self, op: Op, error: GatewayError) {
        self.state.lock().unwrap().failures.push_back((op, error));
    }

    /// Request shutdown right after the `n`th successful create
    pub fn shutdown_after_creates(&self, n: usize, shutdown: SharedShutdown) {
        self.state.lock().unwrap().shutdown_after = Some((n, shutdown));
    }

    pub fn rows(&self, table: &str) -> Vec<TargetRow> {
        self.state.lock().unwrap().tables.get(table).cloned().unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Recorded creates and deletes, listing calls left out
    pub fn writes(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| !matches!(c, Call::List { .. }))
            .collect()
    }

    pub fn created_records(&self, table: &str) -> Vec<FieldMap> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Create { table: t, records } if t == table => Some(records),
                _ => None,
            })
            .flatten()
            .collect()
    }

    fn take_failure(state: &mut State, op: Op) -> Option<GatewayError> {
        let index = state.failures.iter().position(|(o, _)| *o == op)?;
        state.failures.remove(index).map(|(_, e)| e)
    }
}

#[async_trait]
impl RowStore for FakeStore {
    async fn list_page(
        &self,
        table_id: &str,
        max_records: usize,
        offset: usize,
    ) -> GatewayResult<RowPage> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::List {
            table: table_id.to_string(),
            offset,
        });
        if let Some(e) = Self::take_failure(&mut state, Op::List) {
            return Err(e);
        }
        let rows = state.tables.get(table_id).cloned().unwrap_or_default();
        let page: Vec<TargetRow> = rows.into_iter().skip(offset).take(max_records).collect();
        Ok(RowPage::from(page))
    }

    async fn create(&self, table_id: &str, records: &[FieldMap]) -> GatewayResult<Vec<TargetRow>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Create {
            table: table_id.to_string(),
            records: records.to_vec(),
        });
        if let Some(e) = Self::take_failure(&mut state, Op::Create) {
            return Err(e);
        }
        let mut created = Vec::new();
        for record in records {
            state.next_id += 1;
            let row = TargetRow::new(format!("rwNew{}", state.next_id), record.clone());
            state.tables.entry(table_id.to_string()).or_default().push(row.clone());
            created.push(row);
        }
        state.creates += 1;
        if let Some((n, shutdown)) = &state.shutdown_after {
            if state.creates == *n {
                shutdown.request_shutdown();
            }
        }
        Ok(created)
    }

    async fn delete(&self, table_id: &str, row_ids: &[String]) -> GatewayResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Delete {
            table: table_id.to_string(),
            ids: row_ids.to_vec(),
        });
        if let Some(e) = Self::take_failure(&mut state, Op::Delete) {
            return Err(e);
        }
        if let Some(rows) = state.tables.get_mut(table_id) {
            rows.retain(|r| !row_ids.contains(&r.row_id));
        }
        Ok(())
    }
}

/// Configuration pointing at the fake table ids
pub fn config() -> MigrationConfig {
    MigrationConfig::from_lookup(|name| match name {
        "STACKBY_API_KEY" => Some("test-key".to_string()),
        "STACKBY_TABLE_CONTACTS" => Some(CONTACTS.to_string()),
        "STACKBY_TABLE_COMPANIES" => Some(COMPANIES.to_string()),
        "STACKBY_TABLE_OPPORTUNITIES" => Some(DEALS.to_string()),
        "STACKBY_TABLE_INTERACTIONS" => Some(INTERACTIONS.to_string()),
        _ => None,
    })
    .expect("test configuration")
}

/// Retry policy with millisecond backoffs
pub fn fast_retry() -> RetryController {
    RetryController::new(RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(4),
    })
}

/// Context with no pauses and checkpoints under `dir`
pub fn context<'a>(
    config: &'a MigrationConfig,
    store: &'a FakeStore,
    dir: &Path,
) -> PhaseContext<'a> {
    PhaseContext::new(config, store)
        .with_retry(fast_retry())
        .with_pacer(Pacer::immediate())
        .with_checkpoint_dir(dir)
}
