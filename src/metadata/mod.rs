//! Flat session metadata and the rules that shape it.
//!
//! The session keeps one flat `key -> scalar | list` map. It is split into
//! file-level and subject-level groups only when a conversion is requested.

pub mod fields;
pub mod normalize;
pub mod structured;

pub use fields::{field_spec, FieldGroup, FieldSpec, FIELD_CATALOG};
pub use normalize::{auto_fix, default_value, normalize_timestamp, parse_timestamp_lenient};
pub use structured::{structure_metadata, MetadataError, StructuredMetadata};

use serde_json::Value;
use std::collections::BTreeMap;

pub type Metadata = BTreeMap<String, Value>;

/// True when the value carries information. Empty strings and empty lists do not.
pub fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(raw) => !raw.trim().is_empty(),
        Value::Array(items) => !items.is_empty(),
        _ => true,
    }
}

pub fn missing_fields(required: &[String], metadata: &Metadata) -> Vec<String> {
    required
        .iter()
        .filter(|field| !metadata.get(field.as_str()).is_some_and(is_present))
        .cloned()
        .collect()
}

/// Rejects keys or values that do not fit the flat model.
pub fn validate_flat(metadata: &Metadata) -> Result<(), String> {
    for (key, value) in metadata {
        if key.trim().is_empty() {
            return Err("metadata keys must be non-empty".to_string());
        }
        let ok = match value {
            Value::Object(_) => false,
            Value::Array(items) => items
                .iter()
                .all(|item| !matches!(item, Value::Object(_) | Value::Array(_))),
            _ => true,
        };
        if !ok {
            return Err(format!(
                "metadata field `{key}` must be a scalar or a list of scalars"
            ));
        }
    }
    Ok(())
}

/// Applies `overlay` on top of `base`. Overlay wins on conflicting keys.
pub fn merge_into(base: &mut Metadata, overlay: &Metadata) {
    for (key, value) in overlay {
        base.insert(key.clone(), value.clone());
    }
}
