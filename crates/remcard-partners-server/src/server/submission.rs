//! Turning a raw request body into a [`PartnerDraft`].
//!
//! Nothing here touches the network: a submission that fails validation never
//! reaches the record store.

use remcard_partners::PartnerDraft;
use serde_json::{Map, Value};

/// Fields every submission must carry, in the order they are reported.
pub const REQUIRED_FIELDS: [&str; 4] = ["name", "category", "address", "description"];

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmissionError {
    #[error("body is not valid JSON: {reason}")]
    InvalidJson { reason: String },

    #[error("body must be a JSON object")]
    NotAnObject,

    #[error("missing required fields: {}", .fields.join(", "))]
    MissingFields { fields: Vec<&'static str> },

    #[error("field `{field}` must be text")]
    NotText { field: &'static str },
}

/// Parses and normalizes a submission body.
///
/// An empty body counts as `{}` and therefore fails on the required fields.
pub fn parse_submission(body: &[u8]) -> Result<PartnerDraft, SubmissionError> {
    let value: Value = if body.iter().all(u8::is_ascii_whitespace) {
        Value::Object(Map::new())
    } else {
        serde_json::from_slice(body).map_err(|e| SubmissionError::InvalidJson {
            reason: e.to_string(),
        })?
    };

    let Value::Object(fields) = value else {
        return Err(SubmissionError::NotAnObject);
    };
    draft_from_fields(&fields)
}

fn draft_from_fields(fields: &Map<String, Value>) -> Result<PartnerDraft, SubmissionError> {
    let required = (
        text(fields, "name")?,
        text(fields, "category")?,
        text(fields, "address")?,
        text(fields, "description")?,
    );

    match required {
        (Some(name), Some(category), Some(address), Some(description)) => Ok(PartnerDraft {
            name,
            category,
            address,
            description,
            website: text(fields, "website")?,
            phones: phones(fields.get("phones")),
            logo: text(fields, "logo")?,
            extra_label: text(fields, "extraLabel")?,
        }),
        (name, category, address, description) => {
            let present = [
                name.is_some(),
                category.is_some(),
                address.is_some(),
                description.is_some(),
            ];
            let fields = REQUIRED_FIELDS
                .into_iter()
                .zip(present)
                .filter_map(|(field, present)| (!present).then_some(field))
                .collect();
            Err(SubmissionError::MissingFields { fields })
        }
    }
}

/// A trimmed, non-blank text field. Numbers and booleans are accepted in
/// their JSON spelling.
fn text(fields: &Map<String, Value>, field: &'static str) -> Result<Option<String>, SubmissionError> {
    let value = match fields.get(field) {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Array(_) | Value::Object(_)) => {
            return Err(SubmissionError::NotText { field });
        }
    };
    Ok(Some(value).filter(|v| !v.is_empty()))
}

/// Normalizes the `phones` field.
///
/// - list: non-empty strings (trimmed) and numbers, in order
/// - string: split on `,` or `;`
/// - anything else: no phones
pub fn phones(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect(),
        Some(Value::String(s)) => s
            .split([',', ';'])
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect(),
        _ => Vec::new(),
    }
}
