//! Canonical byte representation of messages.
//!
//! A message's canonical bytes are its UTF-8 JSON serialization with keys
//! sorted lexicographically at every nesting level, no insignificant
//! whitespace, and numbers in their shortest round-trip form. Determinism
//! here is what makes small dictionaries effective — any instability in key
//! order or number formatting erodes the compression ratio.
//!
//! Key ordering comes for free: `serde_json`'s map type is backed by a
//! `BTreeMap` unless the `preserve_order` feature is enabled (it is not,
//! anywhere in this workspace). Shortest-form numbers are serde_json's own
//! itoa/ryu output.

use std::collections::BTreeSet;

use serde_json::Value;

use crate::ValidateError;

/// Separator between records in a joined batch.
pub const RECORD_SEPARATOR: u8 = 0x0A;

/// Produces the canonical bytes of a message.
///
/// Keys listed in `volatile` are removed at the top level before
/// serialization (trace ids and the like — fields that vary per message
/// and would poison dictionary training).
///
/// Fails with [`ValidateError::BadMessage`] if the value is not a JSON
/// object.
pub fn canonical_bytes(value: &Value, volatile: &BTreeSet<String>) -> Result<Vec<u8>, ValidateError> {
    let Value::Object(map) = value else {
        return Err(ValidateError::BadMessage(format!(
            "expected a JSON object, got {}",
            kind_name(value)
        )));
    };

    let bytes = if volatile.is_empty() || !map.keys().any(|k| volatile.contains(k)) {
        serde_json::to_vec(map)
    } else {
        let filtered: serde_json::Map<String, Value> = map
            .iter()
            .filter(|(k, _)| !volatile.contains(k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        serde_json::to_vec(&filtered)
    };

    bytes.map_err(|e| ValidateError::BadMessage(e.to_string()))
}

/// Joins canonical records with single separators (no trailing separator).
///
/// The result's length is exactly `sum(record lengths) + records.len() - 1`
/// for a non-empty input.
pub fn join_records<R: AsRef<[u8]>>(records: &[R]) -> Vec<u8> {
    let total: usize = records.iter().map(|r| r.as_ref().len()).sum();
    let mut joined = Vec::with_capacity(total + records.len().saturating_sub(1));
    for (i, record) in records.iter().enumerate() {
        if i > 0 {
            joined.push(RECORD_SEPARATOR);
        }
        joined.extend_from_slice(record.as_ref());
    }
    joined
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
