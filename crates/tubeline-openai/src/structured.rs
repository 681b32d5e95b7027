//! Strict JSON-schema responses and their validation.
//!
//! The schema is sent as `response_format`, but the reply is still checked
//! here: a value outside the allowed set is a malformed answer that a second
//! attempt usually fixes, so it is reported as `Transient`.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use tubeline_core::ItemError;

/// `response_format` for a strict, named JSON schema.
pub fn response_format(name: &str, schema: Value) -> Value {
    json!({
        "type": "json_schema",
        "json_schema": {"name": name, "schema": schema, "strict": true},
    })
}

/// Object schema where every listed property is required and nothing else is allowed.
pub fn object_schema(properties: &[(&str, Value)]) -> Value {
    let props: Map<String, Value> = properties
        .iter()
        .map(|(name, schema)| (name.to_string(), schema.clone()))
        .collect();
    let required: Vec<&str> = properties.iter().map(|(name, _)| *name).collect();
    json!({
        "type": "object",
        "properties": props,
        "required": required,
        "additionalProperties": false,
    })
}

pub fn enum_schema(values: &[&str]) -> Value {
    json!({"type": "string", "enum": values})
}

/// Decode the reply text into `T`.
pub fn parse_reply<T: DeserializeOwned>(text: &str) -> Result<T, ItemError> {
    serde_json::from_str(text)
        .map_err(|e| ItemError::Transient(format!("malformed JSON reply: {e}")))
}

pub fn require_one_of(field: &str, value: &str, allowed: &[&str]) -> Result<(), ItemError> {
    if allowed.contains(&value) {
        Ok(())
    } else {
        Err(ItemError::Transient(format!("{field} {value:?} is not one of {allowed:?}")))
    }
}

pub fn require_unit_interval(field: &str, value: f64) -> Result<(), ItemError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ItemError::Transient(format!("{field} {value} is outside [0, 1]")))
    }
}
