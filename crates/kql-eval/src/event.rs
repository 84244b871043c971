//! Event records: JSON conversion and field access.
//!
//! Events arrive as JSON objects and are converted once into a [`Record`] of
//! typed [`Value`]s. Field lookup supports dotted names with flat-key
//! precedence: a literal `"actor.id"` key wins over `{"actor": {"id": ...}}`.

use kql_parser::{Record, Value};

use crate::error::{EvalError, Result};

/// Convert a JSON object into a record.
pub fn record_from_json(json: serde_json::Value) -> Result<Record> {
    match Value::from_json(json) {
        Value::Record(record) => Ok(record),
        other => Err(EvalError::mismatch(format!(
            "event must be a JSON object, got {}",
            other.type_name()
        ))),
    }
}

/// Parse one JSON object (e.g. an NDJSON line) into a record.
pub fn record_from_str(text: &str) -> Result<Record> {
    let json: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| EvalError::InvalidArgument(format!("invalid JSON event: {e}")))?;
    record_from_json(json)
}

/// Convert a record back into a JSON object.
pub fn record_to_json(record: &Record) -> serde_json::Value {
    serde_json::Value::Object(
        record
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect(),
    )
}

/// Get a field by name, supporting dot-notation for nested records.
///
/// The flat key is checked first; otherwise the name is split on `.` and
/// followed through nested records. Lists are not traversed.
pub fn get_field<'a>(record: &'a Record, name: &str) -> Option<&'a Value> {
    if let Some(v) = record.get(name) {
        return Some(v);
    }
    if !name.contains('.') {
        return None;
    }

    let mut parts = name.split('.');
    let mut current = record.get(parts.next()?)?;
    for part in parts {
        current = current.as_record()?.get(part)?;
    }
    Some(current)
}

/// A field's value under the missing-field convention: absent fields read
/// as the empty string.
pub fn field_or_empty(record: &Record, name: &str) -> Value {
    get_field(record, name)
        .cloned()
        .unwrap_or_else(|| Value::Str(String::new()))
}
