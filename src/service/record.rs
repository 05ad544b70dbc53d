use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A persistable domain entity: serializable to a document and carrying a
/// stable opaque id. The id is assigned at creation and never reassigned; it
/// lives in the document name on the wire and is injected into the record on
/// every read.
pub trait Record: Serialize + DeserializeOwned + Send + Sync + 'static {
    fn id(&self) -> &str;
}

/// Bookkeeping fields the service stamps on every record it writes. Embed
/// with `#[serde(flatten)]`:
///
/// ```
/// use flota_data::service::record::{Record, RecordMeta};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct Autobus {
///     id: String,
///     matricula: String,
///     #[serde(flatten)]
///     meta: RecordMeta,
/// }
///
/// impl Record for Autobus {
///     fn id(&self) -> &str {
///         &self.id
///     }
/// }
/// ```
///
/// Whatever the caller puts here is overwritten by the service on write;
/// reads return the stored values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordMeta {
    /// Soft-delete flag. Soft-deleted records stay stored but are invisible
    /// to reads unless explicitly requested.
    #[serde(default)]
    pub eliminado: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fecha_eliminacion: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creado_por: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actualizado_por: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eliminado_por: Option<String>,
    #[serde(rename = "createdAt", skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(rename = "updatedAt", skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}
