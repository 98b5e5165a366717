use super::fields::{field_spec, FieldGroup};
use super::normalize::{is_strict_timestamp, normalize_timestamp};
use super::{is_present, Metadata};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const TIMESTAMP_FIELDS: &[&str] = &["session_start_time", "date_of_birth"];

/// Metadata split into the groups a conversion library expects.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructuredMetadata {
    pub file: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub subject: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("metadata field `{field}` is malformed: {explanation}")]
pub struct MetadataError {
    pub field: String,
    pub explanation: String,
    pub suggestion: Option<String>,
}

/// Splits flat metadata into file-level and subject-level groups.
///
/// Unknown keys stay at file level. Timestamps must already be RFC 3339; a
/// lenient parse only produces the suggestion attached to the error.
pub fn structure_metadata(metadata: &Metadata) -> Result<StructuredMetadata, MetadataError> {
    let mut structured = StructuredMetadata::default();
    for (key, value) in metadata {
        if !is_present(value) {
            continue;
        }
        if TIMESTAMP_FIELDS.contains(&key.as_str()) {
            check_timestamp(key, value)?;
        }
        match field_spec(key) {
            Some(spec) if spec.group == FieldGroup::Subject => {
                structured
                    .subject
                    .insert(spec.structured_key.to_string(), value.clone());
            }
            Some(spec) => {
                structured
                    .file
                    .insert(spec.structured_key.to_string(), value.clone());
            }
            None => {
                structured.file.insert(key.clone(), value.clone());
            }
        }
    }
    Ok(structured)
}

fn check_timestamp(field: &str, value: &Value) -> Result<(), MetadataError> {
    let Value::String(raw) = value else {
        return Err(MetadataError {
            field: field.to_string(),
            explanation: "expected an RFC 3339 timestamp string".to_string(),
            suggestion: None,
        });
    };
    if is_strict_timestamp(raw) {
        return Ok(());
    }
    let suggestion = normalize_timestamp(raw);
    let explanation = match &suggestion {
        Some(_) => format!(
            "`{raw}` is not an RFC 3339 timestamp with a timezone offset"
        ),
        None => format!("`{raw}` could not be parsed as a date or time"),
    };
    Err(MetadataError {
        field: field.to_string(),
        explanation,
        suggestion,
    })
}
