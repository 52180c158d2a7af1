//! Job payload documents.
//!
//! Payloads are persisted as JSON text and handed to handlers verbatim.
//! They must decode as a JSON object; anything else is a serialization
//! failure that no retry can fix.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// Key/value document carried by a job.
pub type Payload = Map<String, Value>;

/// Encode a payload into the text stored in the `payload` column.
pub fn encode(payload: &Payload) -> Result<String, serde_json::Error> {
    serde_json::to_string(payload)
}

/// Decode stored payload text into a key/value document.
pub fn decode(text: &str) -> Result<Payload, serde_json::Error> {
    serde_json::from_str(text)
}

/// Decode stored payload text into a typed structure.
pub fn decode_as<T: DeserializeOwned>(text: &str) -> Result<T, serde_json::Error> {
    serde_json::from_str(text)
}

/// Turn any serializable value into a payload document.
///
/// Fails when `value` does not serialize to a JSON object.
pub fn to_payload<T: Serialize>(value: &T) -> Result<Payload, serde_json::Error> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(serde::de::Error::custom(format!(
            "payload must be a JSON object, got {}",
            type_name(&other)
        ))),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
