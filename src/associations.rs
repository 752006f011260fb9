//! Associations dump: foreign-key edges exported from the legacy CRM
//!
//! The dump is a JSON document with three edge lists keyed by natural keys
//! (contact email, company name, deal name). Edges are matched on those
//! keys. Legacy ids are only used to translate the engagements export,
//! which references records by id alone.

use crate::model::text_or_number;
use crate::resolver::{normalize, usable_key};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// Errors reading the associations dump
#[derive(Debug, Error)]
pub enum AssociationsError {
    /// The dump does not exist
    #[error("Associations file not found: {0}")]
    NotFound(PathBuf),

    /// The dump could not be read
    #[error("Failed to read associations file {path}: {reason}")]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying error
        reason: String,
    },

    /// The dump is not valid JSON of the expected shape
    #[error("Invalid associations file {path}: {reason}")]
    Parse {
        /// File path
        path: PathBuf,
        /// Underlying error
        reason: String,
    },
}

/// Contact belongs to company
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContactCompany {
    /// Legacy contact id
    #[serde(deserialize_with = "text_or_number")]
    pub contact_id: Option<String>,
    /// Contact email (natural key)
    pub contact_email: Option<String>,
    /// Contact display name
    pub contact_name: Option<String>,
    /// Legacy company id
    #[serde(deserialize_with = "text_or_number")]
    pub company_id: Option<String>,
    /// Company name (natural key)
    pub company_name: Option<String>,
}

/// Contact participates in deal
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContactDeal {
    /// Legacy contact id
    #[serde(deserialize_with = "text_or_number")]
    pub contact_id: Option<String>,
    /// Contact email (natural key)
    pub contact_email: Option<String>,
    /// Contact display name
    pub contact_name: Option<String>,
    /// Legacy deal id
    #[serde(deserialize_with = "text_or_number")]
    pub deal_id: Option<String>,
    /// Deal name (natural key)
    pub deal_name: Option<String>,
}

/// Company owns deal
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompanyDeal {
    /// Legacy company id
    #[serde(deserialize_with = "text_or_number")]
    pub company_id: Option<String>,
    /// Company name (natural key)
    pub company_name: Option<String>,
    /// Legacy deal id
    #[serde(deserialize_with = "text_or_number")]
    pub deal_id: Option<String>,
    /// Deal name (natural key)
    pub deal_name: Option<String>,
}

/// One normalized edge between two natural keys
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssociationRecord {
    /// Normalized key of the referencing record
    pub from_key: String,
    /// Key of the referenced record, as exported
    pub to_key: String,
}

/// Record plus the keys it references, in first-appearance order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyGroup {
    /// Key of the grouping record, as first exported
    pub key: String,
    /// Referenced keys, as exported, without normalized duplicates
    pub members: Vec<String>,
}

/// The whole dump
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AssociationsDump {
    /// Contact to company edges
    pub contact_to_company: Vec<ContactCompany>,
    /// Contact to deal edges
    pub contact_to_deal: Vec<ContactDeal>,
    /// Company to deal edges
    pub company_to_deal: Vec<CompanyDeal>,
}

impl AssociationsDump {
    /// Read and parse a dump file
    pub fn load(path: &Path) -> Result<Self, AssociationsError> {
        if !path.exists() {
            return Err(AssociationsError::NotFound(path.to_path_buf()));
        }
        let contents = std::fs::read_to_string(path).map_err(|e| AssociationsError::Io {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let dump = Self::parse(&contents).map_err(|e| AssociationsError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        info!(
            path = %path.display(),
            contact_to_company = dump.contact_to_company.len(),
            contact_to_deal = dump.contact_to_deal.len(),
            company_to_deal = dump.company_to_deal.len(),
            "Loaded associations"
        );
        Ok(dump)
    }

    /// Parse a dump from a JSON string
    pub fn parse(contents: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(contents)
    }

    /// Contact email to company name edges with both keys usable
    pub fn contact_company_edges(&self) -> Vec<AssociationRecord> {
        edges(self.contact_to_company.iter().map(|a| (&a.contact_email, &a.company_name)))
    }

    /// Contact emails grouped by deal, deals in first-appearance order
    pub fn deal_contact_groups(&self) -> Vec<KeyGroup> {
        group(self.contact_to_deal.iter().map(|a| (&a.deal_name, &a.contact_email)))
    }

    /// Normalized deal name to contact emails
    pub fn contacts_by_deal(&self) -> BTreeMap<String, Vec<String>> {
        self.deal_contact_groups()
            .into_iter()
            .map(|g| (normalize(&g.key), g.members))
            .collect()
    }

    /// Legacy company id to company name
    pub fn company_names_by_id(&self) -> BTreeMap<String, String> {
        id_map(
            self.company_to_deal
                .iter()
                .map(|a| (&a.company_id, &a.company_name))
                .chain(self.contact_to_company.iter().map(|a| (&a.company_id, &a.company_name))),
        )
    }

    /// Legacy deal id to deal name
    pub fn deal_names_by_id(&self) -> BTreeMap<String, String> {
        id_map(
            self.company_to_deal
                .iter()
                .map(|a| (&a.deal_id, &a.deal_name))
                .chain(self.contact_to_deal.iter().map(|a| (&a.deal_id, &a.deal_name))),
        )
    }

    /// Legacy contact id to contact email
    pub fn contact_emails_by_id(&self) -> BTreeMap<String, String> {
        id_map(
            self.contact_to_deal
                .iter()
                .map(|a| (&a.contact_id, &a.contact_email))
                .chain(self.contact_to_company.iter().map(|a| (&a.contact_id, &a.contact_email))),
        )
    }

    /// Normalized deal name to the first company exported for it
    pub fn company_by_deal(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        for edge in edges(self.company_to_deal.iter().map(|a| (&a.deal_name, &a.company_name))) {
            map.entry(edge.from_key).or_insert(edge.to_key);
        }
        map
    }
}

// Later edges overwrite earlier ones for the same id
fn id_map<'a, I>(pairs: I) -> BTreeMap<String, String>
where
    I: Iterator<Item = (&'a Option<String>, &'a Option<String>)>,
{
    pairs
        .filter_map(|(id, key)| {
            let key = key.as_deref()?.trim();
            usable_key(key)?;
            Some((id.clone()?, key.to_string()))
        })
        .collect()
}

fn edges<'a, I>(pairs: I) -> Vec<AssociationRecord>
where
    I: Iterator<Item = (&'a Option<String>, &'a Option<String>)>,
{
    pairs
        .filter_map(|(from, to)| {
            let from_key = usable_key(from.as_deref()?)?;
            let to = to.as_deref()?;
            usable_key(to)?;
            Some(AssociationRecord {
                from_key,
                to_key: to.trim().to_string(),
            })
        })
        .collect()
}

fn group<'a, I>(pairs: I) -> Vec<KeyGroup>
where
    I: Iterator<Item = (&'a Option<String>, &'a Option<String>)>,
{
    let mut groups: Vec<KeyGroup> = Vec::new();
    let mut positions: BTreeMap<String, usize> = BTreeMap::new();

    for (key, member) in pairs {
        let (Some(key), Some(member)) = (key.as_deref(), member.as_deref()) else {
            continue;
        };
        let (Some(norm_key), Some(norm_member)) = (usable_key(key), usable_key(member)) else {
            continue;
        };
        let index = *positions.entry(norm_key).or_insert_with(|| {
            groups.push(KeyGroup {
                key: key.trim().to_string(),
                members: Vec::new(),
            });
            groups.len() - 1
        });
        let members = &mut groups[index].members;
        if !members.iter().any(|m| normalize(m) == norm_member) {
            members.push(member.trim().to_string());
        }
    }
    groups
}
