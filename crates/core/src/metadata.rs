//! Scalar metadata values
//!
//! The backing stores only accept scalar metadata (string, number, boolean).
//! Document metadata arrives as arbitrary JSON from the ingestion side, so
//! this module owns the boundary conversion: nulls and empty strings are
//! dropped, and list/map values are serialized to a single JSON string.
//! Flattened lists and maps can no longer be filtered element-wise.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A scalar metadata value attached to a chunk.
///
/// Untagged so persisted collections read back naturally from plain JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Number(f64),
    String(String),
}

impl MetadataValue {
    /// String view of the value, used for display and lexical payloads.
    pub fn as_display(&self) -> String {
        match self {
            MetadataValue::Bool(b) => b.to_string(),
            MetadataValue::Number(n) => n.to_string(),
            MetadataValue::String(s) => s.clone(),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(s: &str) -> Self {
        MetadataValue::String(s.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(s: String) -> Self {
        MetadataValue::String(s)
    }
}

impl From<f64> for MetadataValue {
    fn from(n: f64) -> Self {
        MetadataValue::Number(n)
    }
}

impl From<i64> for MetadataValue {
    fn from(n: i64) -> Self {
        MetadataValue::Number(n as f64)
    }
}

impl From<bool> for MetadataValue {
    fn from(b: bool) -> Self {
        MetadataValue::Bool(b)
    }
}

/// Reduce a JSON metadata object to scalar values.
///
/// Rules, in order:
/// - `null` values are dropped
/// - empty strings are dropped
/// - non-finite numbers are dropped
/// - lists and nested maps are serialized to one JSON string (lossy)
pub fn sanitize_metadata(raw: &serde_json::Map<String, Value>) -> BTreeMap<String, MetadataValue> {
    let mut cleaned = BTreeMap::new();

    for (key, value) in raw {
        if let Some(scalar) = sanitize_value(value) {
            cleaned.insert(key.clone(), scalar);
        }
    }

    cleaned
}

fn sanitize_value(value: &Value) -> Option<MetadataValue> {
    match value {
        Value::Null => None,
        Value::Bool(b) => Some(MetadataValue::Bool(*b)),
        Value::Number(n) => {
            let f = n.as_f64()?;
            if f.is_finite() {
                Some(MetadataValue::Number(f))
            } else {
                None
            }
        }
        Value::String(s) => {
            if s.is_empty() {
                None
            } else {
                Some(MetadataValue::String(s.clone()))
            }
        }
        Value::Array(items) => {
            let kept: Vec<&Value> = items
                .iter()
                .filter(|v| !v.is_null() && v.as_str() != Some(""))
                .collect();
            if kept.is_empty() {
                return None;
            }
            // The store holds scalars only; lists flatten to one string.
            serde_json::to_string(&kept).ok().map(MetadataValue::String)
        }
        Value::Object(map) => {
            let nested = sanitize_metadata(map);
            if nested.is_empty() {
                return None;
            }
            serde_json::to_string(&nested)
                .ok()
                .map(MetadataValue::String)
        }
    }
}
