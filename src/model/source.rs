//! Legacy CRM exports (HubSpot CSV) and their mapping onto destination columns

use super::{FieldMap, Interaction, SourceRecord, TableKind};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

/// Fallback display name for records exported without a name
pub const UNNAMED: &str = "Sin nombre";

/// One CSV row, addressable by header name.
///
/// Header lookups ignore case, spaces and punctuation so that both the
/// HubSpot UI export (`First Name`) and the API property names
/// (`firstname`) resolve to the same column.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceRow {
    values: HashMap<String, String>,
}

fn header_key(header: &str) -> String {
    header
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

impl SourceRow {
    /// Build a row from header/value pairs
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (header_key(k.as_ref()), v.into()))
                .collect(),
        }
    }

    /// First non-empty trimmed value among the candidate headers
    pub fn get(&self, candidates: &[&str]) -> Option<&str> {
        candidates.iter().find_map(|c| {
            self.values
                .get(&header_key(c))
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
        })
    }

    /// Map this row to a destination record for the given table.
    ///
    /// Returns `None` when the row has no natural key (empty email for a
    /// contact, no name for a company or deal, neither title nor type for
    /// an interaction).
    pub fn to_record(&self, kind: TableKind) -> Option<SourceRecord> {
        let mut fields = FieldMap::new();
        let mut put = |name: &str, value: Option<&str>| {
            if let Some(v) = value {
                fields.insert(name.to_string(), Value::String(v.to_string()));
            }
        };

        let key = match kind {
            TableKind::Contacts => {
                let email = self.get(&["email", "email address"])?;
                let full_name = [
                    self.get(&["firstname", "first name"]),
                    self.get(&["lastname", "last name"]),
                ]
                .into_iter()
                .flatten()
                .collect::<Vec<_>>()
                .join(" ");
                put(
                    "Full Name",
                    Some(if full_name.is_empty() { UNNAMED } else { full_name.as_str() }),
                );
                put("Title", self.get(&["jobtitle", "job title"]));
                put("Email", Some(email));
                put("Phone", self.get(&["phone", "phone number", "mobile phone number"]));
                put("Website", self.get(&["website", "website url"]));
                email.to_string()
            }
            TableKind::Companies => {
                let name = self.get(&["name", "company name"])?;
                put("Company Name", Some(name));
                put("Industry", self.get(&["industry"]));
                put(
                    "Employees",
                    self.get(&["numberofemployees", "number of employees"]),
                );
                put(
                    "Website",
                    self.get(&["domain", "company domain name", "website url"]),
                );
                name.to_string()
            }
            TableKind::Opportunities => {
                let name = self.get(&["dealname", "deal name", "name"])?;
                put("Deal Name", Some(name));
                put("Stage", self.get(&["dealstage", "deal stage", "stage"]));
                put("Total Value", self.get(&["amount", "total value"]));
                put("Close Date", self.get(&["closedate", "close date"]));
                name.to_string()
            }
            TableKind::Interactions => return Interaction::from_row(self).to_record(),
        };

        Some(SourceRecord::new(key, fields))
    }
}

/// Read every row of a CSV export with a header line
pub fn load_csv(path: &Path) -> Result<Vec<SourceRow>, SourceError> {
    if !path.exists() {
        return Err(SourceError::NotFound(path.display().to_string()));
    }

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| SourceError::Csv(format!("{}: {e}", path.display())))?;

    let headers = reader
        .headers()
        .map_err(|e| SourceError::Csv(format!("{}: {e}", path.display())))?
        .clone();

    let mut rows = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record.map_err(|e| SourceError::Csv(format!("line {}: {e}", line + 2)))?;
        rows.push(SourceRow::from_pairs(
            headers.iter().zip(record.iter().map(str::to_string)),
        ));
    }

    debug!(path = %path.display(), columns = headers.len(), "Parsed CSV headers");
    info!(path = %path.display(), rows = rows.len(), "Loaded source export");
    Ok(rows)
}

/// Source loading errors
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// Input file missing
    #[error("source file not found: {0}")]
    NotFound(String),

    /// Malformed CSV
    #[error("CSV error: {0}")]
    Csv(String),

    /// Malformed or unreadable JSON export
    #[error("JSON export error: {0}")]
    Json(String),
}
