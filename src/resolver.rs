//! Natural-key resolution across the two systems
//!
//! Legacy records and destination rows share no primary key. They are
//! matched on normalized emails and names: lowercase, trimmed, internal
//! whitespace collapsed to one space.

use crate::model::TargetRow;
use std::collections::BTreeMap;
use tracing::debug;

/// Keys that mean "no value" once normalized
pub const PLACEHOLDER_KEYS: &[&str] = &["untitle", "sin nombre"];

/// Lowercase, trim, and collapse internal whitespace runs to a single space
pub fn normalize(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Normalized key, or `None` for empty and placeholder keys
pub fn usable_key(value: &str) -> Option<String> {
    let key = normalize(value);
    if key.is_empty() || PLACEHOLDER_KEYS.contains(&key.as_str()) {
        None
    } else {
        Some(key)
    }
}

/// Normalized natural key to row id
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyIndex {
    entries: BTreeMap<String, String>,
    duplicates: usize,
}

impl KeyIndex {
    /// Empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a key unless it is unusable or already present (first wins).
    /// Returns whether it was added.
    pub fn insert(&mut self, key: &str, row_id: impl Into<String>) -> bool {
        let Some(key) = usable_key(key) else {
            return false;
        };
        if self.entries.contains_key(&key) {
            self.duplicates += 1;
            return false;
        }
        self.entries.insert(key, row_id.into());
        true
    }

    /// Set a key, replacing any previous id
    pub fn set(&mut self, key: &str, row_id: impl Into<String>) {
        if let Some(key) = usable_key(key) {
            self.entries.insert(key, row_id.into());
        }
    }

    /// Exact lookup after normalization
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(&normalize(key)).map(String::as_str)
    }

    /// Whether a key resolves
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Exact lookup, then the first indexed key (in sorted order) that
    /// contains the query or is contained by it.
    pub fn get_fuzzy(&self, key: &str) -> Option<&str> {
        let wanted = usable_key(key)?;
        if let Some(id) = self.entries.get(&wanted) {
            return Some(id);
        }
        self.entries
            .iter()
            .find(|(candidate, _)| {
                candidate.contains(&wanted) || wanted.contains(candidate.as_str())
            })
            .map(|(candidate, id)| {
                debug!(query = %wanted, matched = %candidate, "Fuzzy key match");
                id.as_str()
            })
    }

    /// Copy with `overrides` replacing existing entries
    pub fn with_overrides(&self, overrides: &BTreeMap<String, String>) -> Self {
        let mut index = self.clone();
        for (key, row_id) in overrides {
            index.set(key, row_id.clone());
        }
        index
    }

    /// Number of indexed keys
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is indexed
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys skipped because an earlier row already claimed them
    pub fn duplicates(&self) -> usize {
        self.duplicates
    }
}

/// Index rows by the key `key_fn` extracts.
///
/// Rows with no key, an empty key or a placeholder key are not indexed; on
/// duplicate keys the first row seen wins.
pub fn build_index<'a, I, F>(rows: I, key_fn: F) -> KeyIndex
where
    I: IntoIterator<Item = &'a TargetRow>,
    F: Fn(&TargetRow) -> Option<String>,
{
    let mut index = KeyIndex::new();
    for row in rows {
        if let Some(key) = key_fn(row) {
            index.insert(&key, row.row_id.clone());
        }
    }
    debug!(keys = index.len(), duplicates = index.duplicates(), "Built key index");
    index
}

/// Index rows by the text of one field
pub fn index_by_field<'a, I>(rows: I, field: &str) -> KeyIndex
where
    I: IntoIterator<Item = &'a TargetRow>,
{
    build_index(rows, |row| row.text(field))
}

/// Resolve natural keys to row ids, preserving input order.
///
/// Unresolved keys are logged and dropped; the result may be empty.
pub fn resolve_links<S: AsRef<str>>(keys: &[S], index: &KeyIndex) -> Vec<String> {
    keys.iter()
        .filter_map(|key| {
            let key = key.as_ref();
            let resolved = index.get(key);
            if resolved.is_none() {
                debug!(key, "No destination row for key");
            }
            resolved.map(str::to_string)
        })
        .collect()
}
