//! Sensitive-field redaction for captured headers and bodies

use serde_json::{json, Map, Value};
use std::collections::HashSet;

/// Replacement written over masked fields
pub const DEFAULT_MASK: &str = "*******";

/// Suffix appended to raw text bodies cut at the size cap
pub const TRUNCATION_SUFFIX: &str = "...[truncated]";

/// Removes (exclude) or obscures (mask) fields of nested key-value data.
///
/// Keys are compared case-insensitively and exclusion wins when a key is in
/// both sets. Only mapping values are descended into; lists are copied as-is.
#[derive(Debug, Clone, Default)]
pub struct Redactor {
    exclude: HashSet<String>,
    mask: HashSet<String>,
    mask_value: String,
}

impl Redactor {
    pub fn new<E, M>(exclude: E, mask: M) -> Self
    where
        E: IntoIterator,
        E::Item: AsRef<str>,
        M: IntoIterator,
        M::Item: AsRef<str>,
    {
        Self {
            exclude: exclude
                .into_iter()
                .map(|field| field.as_ref().to_lowercase())
                .collect(),
            mask: mask
                .into_iter()
                .map(|field| field.as_ref().to_lowercase())
                .collect(),
            mask_value: DEFAULT_MASK.to_string(),
        }
    }

    pub fn with_mask_value(mut self, mask_value: impl Into<String>) -> Self {
        self.mask_value = mask_value.into();
        self
    }

    /// Redactor that passes everything through
    pub fn passthrough() -> Self {
        Self::default()
    }

    /// Filter a mapping, returning a redacted copy
    pub fn filter(&self, data: &Map<String, Value>) -> Map<String, Value> {
        let mut filtered = Map::with_capacity(data.len());

        for (key, value) in data {
            let key_lower = key.to_lowercase();

            if self.exclude.contains(&key_lower) {
                continue;
            }

            if self.mask.contains(&key_lower) {
                filtered.insert(key.clone(), Value::String(self.mask_value.clone()));
                continue;
            }

            let value = match value {
                Value::Object(nested) => Value::Object(self.filter(nested)),
                other => other.clone(),
            };
            filtered.insert(key.clone(), value);
        }

        filtered
    }

    /// Filter any JSON value; only objects are redacted
    pub fn filter_value(&self, value: &Value) -> Value {
        match value {
            Value::Object(map) => Value::Object(self.filter(map)),
            other => other.clone(),
        }
    }
}

/// Marker that replaces a structured body larger than the size cap
pub fn truncation_marker() -> Value {
    json!({ "_truncated": "Body too large, truncated" })
}

/// Replace `value` with the truncation marker when its JSON encoding exceeds `max_size` bytes
pub fn cap_structured(value: Value, max_size: usize) -> Value {
    match serde_json::to_vec(&value) {
        Ok(encoded) if encoded.len() > max_size => truncation_marker(),
        Ok(_) => value,
        Err(_) => truncation_marker(),
    }
}

/// Cut raw text at `max_size` bytes (on a char boundary) and mark it truncated
pub fn cap_text(text: &str, max_size: usize) -> String {
    if text.len() <= max_size {
        return text.to_string();
    }

    let mut end = max_size;
    while !text.is_char_boundary(end) {
        end -= 1;
    }

    format!("{}{}", &text[..end], TRUNCATION_SUFFIX)
}
