use super::convert::decode_fields;
use super::models::Document;
use super::FirestoreError;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

/// A decoded snapshot of one document: its resource name, its id (the last
/// path segment of the name) and its fields as plain JSON with the id
/// injected under `"id"`.
///
/// The id lives only in the document name on the wire; injecting it here is
/// what lets typed records carry an `id` field without ever persisting one.
#[derive(Debug, Clone)]
pub struct RawDocument {
    pub name: String,
    pub id: String,
    pub data: JsonValue,
}

impl RawDocument {
    pub(crate) fn from_document(doc: Document) -> Result<Self, FirestoreError> {
        let id = doc
            .name
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();
        let mut data = decode_fields(doc.fields)?;
        if let Some(obj) = data.as_object_mut() {
            obj.insert("id".to_string(), JsonValue::String(id.clone()));
        }
        Ok(Self {
            name: doc.name,
            id,
            data,
        })
    }

    /// Deserializes the document fields into a concrete type.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, FirestoreError> {
        Ok(serde_json::from_value(self.data.clone())?)
    }

    /// Looks up a field by path, traversing nested maps on `.`.
    pub fn field(&self, path: &str) -> Option<&JsonValue> {
        let mut current = &self.data;
        for segment in path.split('.') {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }
}
