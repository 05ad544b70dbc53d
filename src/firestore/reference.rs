use super::convert::{encode_document, encode_object};
use super::models::Document;
use super::snapshot::RawDocument;
use super::FirestoreError;
use crate::core::read_error_response;
use reqwest::header;
use reqwest_middleware::ClientWithMiddleware;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};

/// Reference to a single document, addressed by its full HTTP URL.
#[derive(Clone)]
pub struct DocumentReference<'a> {
    pub(crate) client: &'a ClientWithMiddleware,
    pub(crate) path: String,
}

impl<'a> DocumentReference<'a> {
    /// Fetches the document as a decoded [`RawDocument`], or `None` if it
    /// does not exist. This is the primitive every typed read builds on; the
    /// raw form is also what change auditing snapshots before an update.
    pub async fn get_raw(&self) -> Result<Option<RawDocument>, FirestoreError> {
        let response = self.client.get(&self.path).send().await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let (status, message) = read_error_response(response, "get document failed").await;
            return Err(FirestoreError::Api { status, message });
        }

        let doc: Document = response.json().await?;
        Ok(Some(RawDocument::from_document(doc)?))
    }

    pub async fn get<T: DeserializeOwned>(&self) -> Result<Option<T>, FirestoreError> {
        match self.get_raw().await? {
            Some(raw) => Ok(Some(raw.decode()?)),
            None => Ok(None),
        }
    }

    /// Writes the full document, replacing whatever was stored at this path.
    /// Creates the document if it does not exist.
    pub async fn set<T: Serialize>(&self, value: &T) -> Result<(), FirestoreError> {
        let fields = encode_document(value)?;
        let body = serde_json::to_vec(&serde_json::json!({ "fields": fields }))?;

        let response = self
            .client
            .patch(&self.path)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let (status, message) = read_error_response(response, "set document failed").await;
            return Err(FirestoreError::Api { status, message });
        }
        Ok(())
    }

    /// Merges the given top-level fields into the stored document via an
    /// update mask; fields not named in `fields` are left untouched.
    pub async fn patch(
        &self,
        fields: &Map<String, JsonValue>,
    ) -> Result<(), FirestoreError> {
        let encoded = encode_object(fields)?;
        let body = serde_json::to_vec(&serde_json::json!({ "fields": encoded }))?;

        let mask: Vec<(&str, &String)> = fields
            .keys()
            .map(|k| ("updateMask.fieldPaths", k))
            .collect();

        let response = self
            .client
            .patch(&self.path)
            .query(&mask)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let (status, message) = read_error_response(response, "patch document failed").await;
            return Err(FirestoreError::Api { status, message });
        }
        Ok(())
    }

    /// Deletes the document. Deleting a non-existent document succeeds.
    pub async fn delete(&self) -> Result<(), FirestoreError> {
        let response = self.client.delete(&self.path).send().await?;

        if !response.status().is_success() {
            let (status, message) = read_error_response(response, "delete document failed").await;
            return Err(FirestoreError::Api { status, message });
        }
        Ok(())
    }
}

/// Reference to a collection, addressed by its full HTTP URL.
#[derive(Clone)]
pub struct CollectionReference<'a> {
    pub(crate) client: &'a ClientWithMiddleware,
    pub(crate) path: String,
}

impl<'a> CollectionReference<'a> {
    pub fn doc(&self, document_id: &str) -> DocumentReference<'a> {
        DocumentReference {
            client: self.client,
            path: format!("{}/{}", self.path, document_id),
        }
    }

    /// Creates a document with a server-generated id; returns the new id.
    pub async fn add<T: Serialize>(&self, value: &T) -> Result<String, FirestoreError> {
        let fields = encode_document(value)?;
        let body = serde_json::to_vec(&serde_json::json!({ "fields": fields }))?;

        let response = self
            .client
            .post(&self.path)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let (status, message) = read_error_response(response, "add document failed").await;
            return Err(FirestoreError::Api { status, message });
        }

        let doc: Document = response.json().await?;
        Ok(doc
            .name
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string())
    }
}
