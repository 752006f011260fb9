//! Delete-and-recreate link writer
//!
//! The destination's update endpoint fails with HTTP 500 on link fields, so
//! a row whose links change is deleted and created again with the new
//! links. The two steps are not atomic: when the delete succeeds and the
//! create does not, the row is gone. The full record is then logged at
//! error level so a recovery pass (or a person) can restore it.
//!
//! The destination also rejects a single-element link array on create.
//! Writing the id twice (`["rw1", "rw1"]`) is accepted and stores one link.
//! That behaviour was found by trial against one stack and may not hold for
//! every table, so it is a [`SingleLinkMode`] rather than a hard rule.

use crate::gateway::{GatewayError, GatewayResult, RowStore};
use crate::model::{is_blank, FieldMap};
use crate::pacing::Pacer;
use crate::retry::RetryController;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, error, info, warn};

/// Zero-amount placeholder the destination renders for empty currency cells
const ZERO_CURRENCY: &str = "$0";

/// How a link field holding exactly one id is written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SingleLinkMode {
    /// Write `[id, id]`
    #[default]
    Duplicate,
    /// Write `[id]`
    AsIs,
}

impl SingleLinkMode {
    /// Mode for the `duplicate_single_links` setting
    pub fn from_flag(duplicate: bool) -> Self {
        if duplicate {
            SingleLinkMode::Duplicate
        } else {
            SingleLinkMode::AsIs
        }
    }
}

/// Payload value for a resolved link list; `None` means omit the field
pub fn link_value(ids: &[String], mode: SingleLinkMode) -> Option<Value> {
    match (ids, mode) {
        ([], _) => None,
        ([id], SingleLinkMode::Duplicate) => Some(Value::from(vec![id.clone(), id.clone()])),
        (ids, _) => Some(Value::from(ids.to_vec())),
    }
}

/// Drop values the destination would store as junk: blanks, the `Untitle`
/// placeholder and a `$0` total.
pub fn clean_fields(fields: &FieldMap) -> FieldMap {
    fields
        .iter()
        .filter(|(name, value)| {
            if is_blank(value) {
                return false;
            }
            let zero_total = value.as_str().map(str::trim) == Some(ZERO_CURRENCY);
            !(name.as_str() == "Total Value" && zero_total)
        })
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

/// Combine scalar fields with resolved link lists into one write payload.
///
/// Link fields with no resolved ids are left out, including any stale value
/// of the same name among the scalars.
pub fn build_record(
    scalar: &FieldMap,
    links: &BTreeMap<String, Vec<String>>,
    mode: SingleLinkMode,
) -> FieldMap {
    let mut record = clean_fields(scalar);
    for (field, ids) in links {
        match link_value(ids, mode) {
            Some(value) => {
                record.insert(field.clone(), value);
            }
            None => {
                record.remove(field);
                debug!(field = %field, "No resolved links, omitting field");
            }
        }
    }
    record
}

/// Writes rows through the gateway with retry and pacing
pub struct LinkWriter<'a> {
    store: &'a dyn RowStore,
    retry: RetryController,
    pacer: Pacer,
    mode: SingleLinkMode,
}

impl<'a> LinkWriter<'a> {
    /// Writer over a store
    pub fn new(store: &'a dyn RowStore, retry: RetryController, pacer: Pacer) -> Self {
        Self {
            store,
            retry,
            pacer,
            mode: SingleLinkMode::default(),
        }
    }

    /// Set how single-id link lists are written
    pub fn with_mode(mut self, mode: SingleLinkMode) -> Self {
        self.mode = mode;
        self
    }

    /// Single-link mode in use
    pub fn mode(&self) -> SingleLinkMode {
        self.mode
    }

    /// Payload a write of these fields and links would send
    pub fn payload(&self, scalar: &FieldMap, links: &BTreeMap<String, Vec<String>>) -> FieldMap {
        build_record(scalar, links, self.mode)
    }

    /// Create one row and return its new id
    pub async fn create(&self, table_id: &str, record: &FieldMap) -> GatewayResult<String> {
        create_with(&self.retry, self.store, table_id, record)
            .await?
            .ok_or_else(missing_row_id)
    }

    /// Replace `existing_row_id` by a new row carrying `scalar` plus `links`.
    ///
    /// Returns the new row id. Once the delete has gone through, Ctrl+C no
    /// longer interrupts the unit: the create retries to completion.
    pub async fn relink(
        &self,
        table_id: &str,
        existing_row_id: &str,
        scalar: &FieldMap,
        links: &BTreeMap<String, Vec<String>>,
    ) -> GatewayResult<String> {
        let record = self.payload(scalar, links);
        let ids = [existing_row_id.to_string()];

        self.retry
            .run(&format!("delete {existing_row_id}"), || self.store.delete(table_id, &ids))
            .await?;
        debug!(table = table_id, row_id = existing_row_id, "Deleted row for relink");

        self.pacer.within_unit().await;

        match create_with(&self.retry.detached(), self.store, table_id, &record).await {
            Ok(Some(new_id)) => {
                info!(
                    table = table_id,
                    old_row_id = existing_row_id,
                    row_id = %new_id,
                    "Relinked row"
                );
                Ok(new_id)
            }
            Ok(None) => {
                let payload = serde_json::to_string(&record).unwrap_or_default();
                warn!(
                    table = table_id,
                    old_row_id = existing_row_id,
                    record = %payload,
                    "Create call succeeded but the response carried no row id; \
                     the row was recreated under an unknown id"
                );
                Err(missing_row_id())
            }
            Err(e) => {
                let payload = serde_json::to_string(&record).unwrap_or_default();
                error!(
                    table = table_id,
                    old_row_id = existing_row_id,
                    record = %payload,
                    "Row deleted but not recreated: {}",
                    e
                );
                Err(e)
            }
        }
    }
}

fn missing_row_id() -> GatewayError {
    GatewayError::ParseError("create succeeded but the response carried no row id".to_string())
}

/// Create one row; `None` when the call succeeded without naming the row
async fn create_with(
    retry: &RetryController,
    store: &dyn RowStore,
    table_id: &str,
    record: &FieldMap,
) -> GatewayResult<Option<String>> {
    let records = std::slice::from_ref(record);
    let created = retry
        .run(&format!("create in {table_id}"), || store.create(table_id, records))
        .await?;
    Ok(created.into_iter().next().map(|row| row.row_id))
}
