//! Conversion between `serde_json::Value` and Firestore typed values.
//!
//! Firestore integers ride as decimal strings and timestamps as RFC 3339
//! strings; both collapse to plain JSON numbers/strings on the way in, which
//! keeps the service layer's diffing and patch-merge logic on ordinary JSON.

use super::models::{ArrayValue, MapValue, Value, ValueType};
use super::FirestoreError;
use serde::ser::Error as SerError;
use serde::Serialize;
use serde_json::{json, Map, Value as JsonValue};
use std::collections::HashMap;

pub(crate) fn decode_fields(
    fields: HashMap<String, Value>,
) -> Result<JsonValue, FirestoreError> {
    let mut map = Map::new();
    for (key, value) in fields {
        map.insert(key, decode_value(value)?);
    }
    Ok(JsonValue::Object(map))
}

pub(crate) fn decode_value(value: Value) -> Result<JsonValue, FirestoreError> {
    Ok(match value.value_type {
        ValueType::StringValue(s) => JsonValue::String(s),
        ValueType::IntegerValue(s) => {
            let i: i64 = s.parse().map_err(|e| {
                FirestoreError::Serialization(serde_json::Error::custom(format!(
                    "bad integer literal '{}': {}",
                    s, e
                )))
            })?;
            JsonValue::Number(i.into())
        }
        ValueType::DoubleValue(d) => serde_json::Number::from_f64(d)
            .map(JsonValue::Number)
            .ok_or_else(|| {
                FirestoreError::Serialization(serde_json::Error::custom(format!(
                    "non-finite double: {}",
                    d
                )))
            })?,
        ValueType::BooleanValue(b) => JsonValue::Bool(b),
        ValueType::MapValue(m) => decode_fields(m.fields)?,
        ValueType::ArrayValue(a) => JsonValue::Array(
            a.values
                .into_iter()
                .map(decode_value)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        ValueType::NullValue(_) => JsonValue::Null,
        ValueType::TimestampValue(s) => JsonValue::String(s),
        ValueType::GeoPointValue(gp) => {
            json!({ "latitude": gp.latitude, "longitude": gp.longitude })
        }
        ValueType::BytesValue(s) => JsonValue::String(s),
        ValueType::ReferenceValue(s) => JsonValue::String(s),
    })
}

pub(crate) fn encode_value(value: &JsonValue) -> Result<Value, FirestoreError> {
    let value_type = match value {
        JsonValue::Null => ValueType::NullValue(()),
        JsonValue::Bool(b) => ValueType::BooleanValue(*b),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                ValueType::IntegerValue(i.to_string())
            } else if let Some(f) = n.as_f64() {
                ValueType::DoubleValue(f)
            } else {
                return Err(FirestoreError::Serialization(serde_json::Error::custom(
                    format!("unsupported number: {}", n),
                )));
            }
        }
        JsonValue::String(s) => ValueType::StringValue(s.clone()),
        JsonValue::Array(items) => ValueType::ArrayValue(ArrayValue {
            values: items
                .iter()
                .map(encode_value)
                .collect::<Result<Vec<_>, _>>()?,
        }),
        JsonValue::Object(map) => ValueType::MapValue(MapValue {
            fields: encode_object(map)?,
        }),
    };
    Ok(Value { value_type })
}

pub(crate) fn encode_object(
    map: &Map<String, JsonValue>,
) -> Result<HashMap<String, Value>, FirestoreError> {
    let mut fields = HashMap::new();
    for (k, v) in map {
        fields.insert(k.clone(), encode_value(v)?);
    }
    Ok(fields)
}

/// Serializes any value that serializes to a JSON object into Firestore
/// fields. Non-object payloads are rejected; documents are always maps.
pub(crate) fn encode_document<T: Serialize>(
    value: &T,
) -> Result<HashMap<String, Value>, FirestoreError> {
    match serde_json::to_value(value)? {
        JsonValue::Object(map) => encode_object(&map),
        _ => Err(FirestoreError::Serialization(serde_json::Error::custom(
            "only objects can be stored as documents",
        ))),
    }
}
