//! Partner record types.
//!
//! A [`PartnerDraft`] is a validated submission that has not been assigned an
//! id yet. The orchestrator turns it into a [`PartnerRecord`] once it knows the
//! next free id in the store snapshot it is about to extend.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// A validated, normalized partner submission.
///
/// All text is trimmed. Optional fields that were blank are `None` and
/// `phones` never contains empty entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartnerDraft {
    pub name: String,
    pub category: String,
    pub address: String,
    pub description: String,
    pub website: Option<String>,
    pub phones: Vec<String>,
    pub logo: Option<String>,
    pub extra_label: Option<String>,
}

impl PartnerDraft {
    /// Checks the invariants a draft must hold before it is written: the four
    /// required fields and every phone entry are non-blank.
    ///
    /// Drafts built by hand rather than parsed from a submission are checked
    /// here too, so a blank entry never reaches the store.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("name", &self.name),
            ("category", &self.category),
            ("address", &self.address),
            ("description", &self.description),
        ];
        let blank: Vec<&str> = required
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(field, _)| *field)
            .collect();
        if !blank.is_empty() {
            return Err(Error::Validation {
                reason: format!("blank required fields: {}", blank.join(", ")),
            });
        }
        if self.phones.iter().any(|phone| phone.trim().is_empty()) {
            return Err(Error::Validation {
                reason: "phones contains a blank entry".to_string(),
            });
        }
        Ok(())
    }

    /// Assigns `id`, producing the record that will be written.
    pub fn into_record(self, id: u64) -> PartnerRecord {
        PartnerRecord {
            id,
            name: self.name,
            category: self.category,
            address: self.address,
            website: self.website,
            phones: self.phones,
            description: self.description,
            logo: self.logo,
            extra_label: self.extra_label,
        }
    }
}

/// A partner entry as it exists in the record store.
///
/// Field order follows the order in which blocks are rendered into the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartnerRecord {
    pub id: u64,
    pub name: String,
    pub category: String,
    pub address: String,
    pub website: Option<String>,
    pub phones: Vec<String>,
    pub description: String,
    pub logo: Option<String>,
    pub extra_label: Option<String>,
}

impl PartnerRecord {
    /// Commit message used when this record is appended.
    pub fn commit_message(&self) -> String {
        format!("Add partner: {}", self.name)
    }
}
