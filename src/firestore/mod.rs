//! Thin client for the Cloud Firestore REST v1 API.
//!
//! The service layer addresses documents through tenant-scoped slash paths
//! (`tenants/{tenantId}/incidencias/{id}`); this module resolves those paths
//! against the database URL and speaks the wire protocol: document reads and
//! writes, structured queries via `documents:runQuery`, and realtime
//! subscriptions via the streaming `documents:listen` endpoint.

pub mod convert;
pub mod listen;
pub mod models;
pub mod query;
pub mod reference;
pub mod snapshot;


use self::listen::{open_listen_stream, ListenStream};
use self::models::ListenRequest;
use self::query::{ExecutableQuery, Query};
use self::reference::{CollectionReference, DocumentReference};
use crate::core::middleware::AuthMiddleware;
use reqwest::Client;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use thiserror::Error;

const FIRESTORE_V1_API: &str =
    "https://firestore.googleapis.com/v1/projects/{project_id}/databases/(default)/documents";

/// Errors raised by the Firestore client layer.
#[derive(Error, Debug)]
pub enum FirestoreError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("middleware error: {0}")]
    Middleware(#[from] reqwest_middleware::Error),
    /// Non-success response from the API, with its HTTP status.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Handle to one Firestore database. Cheap to clone; clones share the HTTP
/// client and its cached credentials.
#[derive(Clone)]
pub struct Firestore {
    client: ClientWithMiddleware,
    base_url: String,
}

impl Firestore {
    pub fn new(middleware: AuthMiddleware) -> Self {
        let project_id = middleware.project_id().unwrap_or_default().to_string();
        let base_url = FIRESTORE_V1_API.replace("{project_id}", &project_id);
        Self::new_with_url(middleware, base_url)
    }

    /// Points the client at a custom base URL (emulator, tests). The URL must
    /// end at the database's `/documents` root.
    pub fn new_with_url(middleware: AuthMiddleware, base_url: String) -> Self {
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);
        let client = ClientBuilder::new(Client::new())
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .with(middleware)
            .build();

        Self { client, base_url }
    }

    #[cfg(test)]
    pub(crate) fn new_with_client(client: ClientWithMiddleware, base_url: String) -> Self {
        Self { client, base_url }
    }

    /// Reference to the collection at `collection_path` (slash-separated,
    /// e.g. `tenants/t1/incidencias`).
    pub fn collection(&self, collection_path: &str) -> CollectionReference<'_> {
        CollectionReference {
            client: &self.client,
            path: format!("{}/{}", self.base_url, collection_path),
        }
    }

    /// Reference to the document at `document_path` (slash-separated,
    /// e.g. `tenants/t1/incidencias/abc`).
    pub fn doc(&self, document_path: &str) -> DocumentReference<'_> {
        DocumentReference {
            client: &self.client,
            path: format!("{}/{}", self.base_url, document_path),
        }
    }

    /// Builds a query over the collection at `collection_path`. The last path
    /// segment becomes the queried collection id; everything before it is the
    /// parent document the query runs under.
    pub fn query(&self, collection_path: &str) -> ExecutableQuery<'_> {
        let (parent_url, collection_id) = match collection_path.rsplit_once('/') {
            Some((prefix, leaf)) => (format!("{}/{}", self.base_url, prefix), leaf),
            None => (self.base_url.clone(), collection_path),
        };
        ExecutableQuery::new(&self.client, parent_url, Query::collection(collection_id))
    }

    /// Opens the streaming listen endpoint with the given request.
    pub(crate) async fn listen(
        &self,
        request: &ListenRequest,
    ) -> Result<ListenStream, FirestoreError> {
        let url = format!("{}:listen", self.base_url);
        open_listen_stream(&self.client, &url, request).await
    }

    /// The database resource name (`projects/{p}/databases/{d}`), as required
    /// by the `database` field of listen requests.
    pub(crate) fn database_name(&self) -> String {
        self.documents_root()
            .trim_end_matches("/documents")
            .to_string()
    }

    /// Full resource name of the document at `document_path`.
    pub(crate) fn document_name(&self, document_path: &str) -> String {
        format!("{}/{}", self.documents_root(), document_path)
    }

    /// Resource name of the parent the collection at `collection_path` is
    /// queried under.
    pub(crate) fn parent_resource(&self, collection_path: &str) -> String {
        match collection_path.rsplit_once('/') {
            Some((prefix, _)) => format!("{}/{}", self.documents_root(), prefix),
            None => self.documents_root(),
        }
    }

    // Resource names start at "projects/..." regardless of which host the
    // HTTP URL points at.
    fn documents_root(&self) -> String {
        match self.base_url.find("projects/") {
            Some(idx) => self.base_url[idx..].to_string(),
            None => self.base_url.clone(),
        }
    }
}
