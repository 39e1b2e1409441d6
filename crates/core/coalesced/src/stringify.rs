use std::collections::BTreeMap;

use serde_json::Value;

/// Encode a JSON value deterministically.
///
/// Object keys are sorted at every depth, so two objects holding the same
/// entries in a different insertion order produce the same string.
pub fn stable_stringify(value: &Value) -> String {
    canonical(value).to_string()
}

fn canonical(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, Value> =
                map.iter().map(|(key, value)| (key, canonical(value))).collect();

            Value::Object(
                sorted
                    .into_iter()
                    .map(|(key, value)| (key.clone(), value))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(canonical).collect()),
        other => other.clone(),
    }
}
