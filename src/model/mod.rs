//! Row types shared by the gateway, resolver, link writer and deduplicator
//!
//! Destination rows are kept as loosely-typed JSON field maps: the
//! destination tables are edited by hand and carry more columns than the
//! migration touches, and every column must survive a delete-and-recreate.

pub mod interactions;
pub mod source;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

pub use interactions::{load_interactions, Interaction};
pub use source::{load_csv, SourceError, SourceRow};

/// Field name to JSON value map, as sent to and received from the destination
pub type FieldMap = serde_json::Map<String, Value>;

/// Placeholder the destination shows for an unset primary or link field
pub const PLACEHOLDER: &str = "Untitle";

/// Destination system columns that are never copied into a recreated row
/// and never count towards completeness.
pub const SYSTEM_FIELDS: &[&str] = &[
    "sequence",
    "isConfigure",
    "favourite",
    "totalItems",
    "completedItems",
    "dueDateTimestamp",
    "checklistId",
    "remainderId",
    "updatedAt",
    "createdAt",
];

/// Whether a field name belongs to the destination's own bookkeeping
pub fn is_system_field(name: &str) -> bool {
    name.starts_with("row") || SYSTEM_FIELDS.contains(&name)
}

/// Whether a value carries no information: null, empty or whitespace
/// string, the `Untitle` placeholder, or an empty array/object.
pub fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => is_blank_str(s),
        Value::Array(items) => items.iter().all(is_blank),
        Value::Object(map) => map.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

/// String form of [`is_blank`]
pub fn is_blank_str(value: &str) -> bool {
    let value = value.trim();
    value.is_empty() || value == PLACEHOLDER
}

/// Text value of a field in a map; see [`TargetRow::text`]
pub fn field_text(fields: &FieldMap, name: &str) -> Option<String> {
    match fields.get(name)? {
        Value::String(s) if !is_blank_str(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .find(|s| !is_blank_str(s))
            .map(str::to_string),
        _ => None,
    }
}

fn id_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Deserialize a legacy id or timestamp exported as either a string or a
/// number
pub(crate) fn text_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Value>::deserialize(deserializer)?
        .as_ref()
        .and_then(id_text))
}

/// Deserialize a list of legacy ids; a bare id counts as a one-element list
pub(crate) fn text_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Array(items)) => items.iter().filter_map(id_text).collect(),
        Some(other) => id_text(&other).into_iter().collect(),
        None => Vec::new(),
    })
}

/// A row in the destination system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetRow {
    /// Opaque row identifier assigned by the destination
    pub row_id: String,
    /// All fields as returned by the destination
    pub fields: FieldMap,
}

impl TargetRow {
    /// Create a row from an id and field map
    pub fn new(row_id: impl Into<String>, fields: FieldMap) -> Self {
        Self {
            row_id: row_id.into(),
            fields,
        }
    }

    /// Parse a destination row: `{"id"?: .., "field": {"rowId": .., ...}}`.
    ///
    /// Returns `None` when no row id can be found.
    pub fn from_value(value: &Value) -> Option<Self> {
        let fields = value
            .get("field")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let row_id = fields
            .get("rowId")
            .and_then(Value::as_str)
            .or_else(|| value.get("id").and_then(Value::as_str))
            .filter(|id| !id.is_empty())?
            .to_string();
        Some(Self { row_id, fields })
    }

    /// Text value of a field; numbers are rendered, blanks give `None`
    pub fn text(&self, name: &str) -> Option<String> {
        field_text(&self.fields, name)
    }

    /// Whether a link field holds anything other than the placeholder
    pub fn has_link(&self, name: &str) -> bool {
        self.fields.get(name).is_some_and(|v| !is_blank(v))
    }

    /// Scalar fields worth copying into a recreated row
    pub fn user_fields(&self) -> FieldMap {
        self.fields
            .iter()
            .filter(|(k, v)| !is_system_field(k) && !is_blank(v))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Copy the named fields, skipping missing and blank ones
    pub fn pick(&self, names: &[&str]) -> FieldMap {
        names
            .iter()
            .filter_map(|name| {
                self.fields
                    .get(*name)
                    .filter(|v| !is_blank(v))
                    .map(|v| (name.to_string(), v.clone()))
            })
            .collect()
    }

    /// Number of non-empty, non-system fields
    pub fn completeness(&self) -> usize {
        self.fields
            .iter()
            .filter(|(k, v)| !is_system_field(k) && !is_blank(v))
            .count()
    }
}

/// A record from the legacy system, keyed by its natural key
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SourceRecord {
    /// Business identifier (email or name)
    pub natural_key: String,
    /// Scalar fields already mapped to destination column names
    pub fields: FieldMap,
    /// Link column name to natural keys of referenced records
    pub references: BTreeMap<String, Vec<String>>,
}

impl SourceRecord {
    /// Create a record without references
    pub fn new(natural_key: impl Into<String>, fields: FieldMap) -> Self {
        Self {
            natural_key: natural_key.into(),
            fields,
            references: BTreeMap::new(),
        }
    }
}

/// Destination tables handled by the toolkit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TableKind {
    /// People
    Contacts,
    /// Organisations
    Companies,
    /// Deals
    Opportunities,
    /// Calls, meetings, notes
    Interactions,
}

impl TableKind {
    /// Column that holds the natural key
    pub fn key_field(&self) -> &'static str {
        match self {
            TableKind::Contacts => "Email",
            TableKind::Companies => "Company Name",
            TableKind::Opportunities => "Deal Name",
            TableKind::Interactions => interactions::TASK_NAME_FIELD,
        }
    }

    /// Natural key of a record of this kind.
    ///
    /// Interactions reuse a handful of titles ("Llamada", "Nota"), so their
    /// key also carries the type and date.
    pub fn natural_key(&self, fields: &FieldMap) -> Option<String> {
        let key = field_text(fields, self.key_field())?;
        match self {
            TableKind::Interactions => {
                let mut parts = vec![key];
                parts.extend(field_text(fields, interactions::TYPE_FIELD));
                parts.extend(
                    field_text(fields, interactions::DATE_FIELD)
                        .map(|date| interactions::iso_date(&date).unwrap_or(date)),
                );
                Some(parts.join(" | "))
            }
            _ => Some(key),
        }
    }

    /// Stable lowercase name used in logs and file names
    pub fn as_str(&self) -> &'static str {
        match self {
            TableKind::Contacts => "contacts",
            TableKind::Companies => "companies",
            TableKind::Opportunities => "opportunities",
            TableKind::Interactions => "interactions",
        }
    }

    /// Destination table id for this kind
    pub fn table_id<'a>(&self, tables: &'a crate::config::TableIds) -> &'a str {
        match self {
            TableKind::Contacts => &tables.contacts,
            TableKind::Companies => &tables.companies,
            TableKind::Opportunities => &tables.opportunities,
            TableKind::Interactions => &tables.interactions,
        }
    }
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
