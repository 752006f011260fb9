//! Legacy CRM engagements (calls, emails, notes, meetings, tasks)
//!
//! The engagements export is a JSON array; each entry carries the legacy
//! ids of the contacts, companies and deals it was associated with. A CSV
//! export of the same records has no associations and maps through
//! [`Interaction::from_row`].

use super::{
    text_list, text_or_number, FieldMap, SourceError, SourceRecord, SourceRow, TableKind,
};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use tracing::info;

/// Title column of the interactions table
pub const TASK_NAME_FIELD: &str = "Task Name";
/// Engagement type column
pub const TYPE_FIELD: &str = "Type";
/// Plain-text notes column
pub const NOTES_FIELD: &str = "Notes";
/// Date column (`YYYY-MM-DD`)
pub const DATE_FIELD: &str = "Date";
/// Completion checkbox, only written for tasks
pub const DONE_FIELD: &str = "Done?";

/// Longest notes value written, in characters
pub const NOTES_MAX_CHARS: usize = 5000;

/// Status the legacy CRM gives a finished task
const COMPLETED_STATUS: &str = "COMPLETED";

/// One exported engagement
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Interaction {
    /// Call, Email, Note, Meeting or Task
    #[serde(rename = "type")]
    pub kind: Option<String>,
    /// Timestamp as exported
    #[serde(deserialize_with = "text_or_number")]
    pub date: Option<String>,
    /// Subject or title
    pub title: Option<String>,
    /// Body, possibly HTML
    pub notes: Option<String>,
    /// Task status
    pub status: Option<String>,
    /// Legacy engagement id
    #[serde(deserialize_with = "text_or_number")]
    pub hubspot_id: Option<String>,
    /// Legacy ids of associated contacts
    #[serde(deserialize_with = "text_list")]
    pub associated_contacts: Vec<String>,
    /// Legacy ids of associated companies
    #[serde(deserialize_with = "text_list")]
    pub associated_companies: Vec<String>,
    /// Legacy ids of associated deals
    #[serde(deserialize_with = "text_list")]
    pub associated_deals: Vec<String>,
}

impl Interaction {
    /// Engagement from a CSV export row (no associations)
    pub fn from_row(row: &SourceRow) -> Self {
        let text = |candidates: &[&str]| row.get(candidates).map(str::to_string);
        Self {
            kind: text(&["type", "activity type"]),
            date: text(&["date", "activity date", "timestamp"]),
            title: text(&["title", "subject", "task name", "name"]),
            notes: text(&["notes", "body", "description"]),
            status: text(&["status", "task status"]),
            hubspot_id: text(&["hubspot id", "id"]),
            ..Self::default()
        }
    }

    /// Title written to the destination; untitled engagements are named
    /// after their type
    pub fn task_name(&self) -> Option<String> {
        let present = |value: &Option<String>| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        present(&self.title)
            .or_else(|| present(&self.kind).map(|kind| format!("{kind} - Sin título")))
    }

    /// Whether any contact, company or deal is associated
    pub fn has_associations(&self) -> bool {
        !(self.associated_contacts.is_empty()
            && self.associated_companies.is_empty()
            && self.associated_deals.is_empty())
    }

    /// Destination columns for this engagement
    pub fn fields(&self) -> Option<FieldMap> {
        let mut fields = FieldMap::new();
        fields.insert(TASK_NAME_FIELD.to_string(), Value::String(self.task_name()?));
        if let Some(kind) = self.kind.as_deref().filter(|k| !k.trim().is_empty()) {
            fields.insert(TYPE_FIELD.to_string(), Value::String(kind.trim().to_string()));
        }
        let notes = self.notes.as_deref().map(plain_notes).unwrap_or_default();
        if !notes.is_empty() {
            fields.insert(NOTES_FIELD.to_string(), Value::String(notes));
        }
        if let Some(date) = self.date.as_deref().and_then(iso_date) {
            fields.insert(DATE_FIELD.to_string(), Value::String(date));
        }
        if let Some(status) = self.status.as_deref().filter(|s| !s.trim().is_empty()) {
            fields.insert(DONE_FIELD.to_string(), Value::Bool(status.trim() == COMPLETED_STATUS));
        }
        Some(fields)
    }

    /// Record to create, keyed by title, type and date
    pub fn to_record(&self) -> Option<SourceRecord> {
        let fields = self.fields()?;
        let key = TableKind::Interactions.natural_key(&fields)?;
        Some(SourceRecord::new(key, fields))
    }
}

/// Remove tags, decode the common entities and collapse whitespace
pub fn strip_html(html: &str) -> String {
    let mut text = String::with_capacity(html.len());
    let mut rest = html;
    while let Some(start) = rest.find('<') {
        let Some(end) = rest[start..].find('>') else {
            break;
        };
        text.push_str(&rest[..start]);
        rest = &rest[start + end + 1..];
    }
    text.push_str(rest);

    let text = text
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"");
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Notes as written: plain text cut to [`NOTES_MAX_CHARS`]
pub fn plain_notes(notes: &str) -> String {
    strip_html(notes).chars().take(NOTES_MAX_CHARS).collect()
}

/// UTC calendar date of an exported timestamp.
///
/// Accepts RFC 3339 timestamps, epoch milliseconds and plain dates;
/// anything else gives `None`.
pub fn iso_date(value: &str) -> Option<String> {
    let value = value.trim();
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(value) {
        return Some(timestamp.with_timezone(&Utc).date_naive().to_string());
    }
    if let Ok(millis) = value.parse::<i64>() {
        return DateTime::from_timestamp_millis(millis).map(|t| t.date_naive().to_string());
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Some(date.to_string());
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|t| t.date().to_string())
}

/// Read the engagements export
pub fn load_interactions(path: &Path) -> Result<Vec<Interaction>, SourceError> {
    if !path.exists() {
        return Err(SourceError::NotFound(path.display().to_string()));
    }
    let contents = std::fs::read_to_string(path)
        .map_err(|e| SourceError::Json(format!("{}: {e}", path.display())))?;
    let interactions: Vec<Interaction> = serde_json::from_str(&contents)
        .map_err(|e| SourceError::Json(format!("{}: {e}", path.display())))?;
    info!(
        path = %path.display(),
        interactions = interactions.len(),
        associated = interactions.iter().filter(|i| i.has_associations()).count(),
        "Loaded engagements export"
    );
    Ok(interactions)
}
