use super::context::{ActorContext, CollectionPathResolver, ServiceContext, TenantCollection};
use crate::firestore::Firestore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value as JsonValue};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Action kinds recorded in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Crear,
    Actualizar,
    Eliminar,
    CambioEstado,
}

/// One append-only audit record. Created only by [`AuditService`]; never
/// updated or deleted by this layer.
#[derive(Debug, Clone, Serialize)]
pub struct AuditLogEntry {
    pub accion: AuditAction,
    pub entidad: String,
    pub entidad_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usuario: Option<ActorContext>,
    pub fecha: DateTime<Utc>,
    /// Full new-state snapshot, for `crear` entries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub datos: Option<JsonValue>,
    /// Per-field before/after diff, for `actualizar` entries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cambios: Option<Map<String, JsonValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estado_anterior: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estado_nuevo: Option<String>,
}

impl AuditLogEntry {
    fn new(ctx: &ServiceContext, accion: AuditAction, entidad: &str, entidad_id: &str) -> Self {
        Self {
            accion,
            entidad: entidad.to_string(),
            entidad_id: entidad_id.to_string(),
            usuario: ctx.actor.clone(),
            fecha: Utc::now(),
            datos: None,
            cambios: None,
            estado_anterior: None,
            estado_nuevo: None,
        }
    }
}

/// Computes the before/after diff between two document snapshots: for every
/// key in the union of both objects, the entry `{antes, despues}` is included
/// only when the values differ. Equality is structural on the JSON values.
pub fn diff_fields(antes: &JsonValue, despues: &JsonValue) -> Map<String, JsonValue> {
    let empty = Map::new();
    let antes = antes.as_object().unwrap_or(&empty);
    let despues = despues.as_object().unwrap_or(&empty);

    let mut cambios = Map::new();
    for (key, new_value) in despues {
        let old_value = antes.get(key).unwrap_or(&JsonValue::Null);
        if old_value != new_value {
            cambios.insert(
                key.clone(),
                json!({ "antes": old_value, "despues": new_value }),
            );
        }
    }
    for (key, old_value) in antes {
        if !despues.contains_key(key) && !old_value.is_null() {
            cambios.insert(
                key.clone(),
                json!({ "antes": old_value, "despues": JsonValue::Null }),
            );
        }
    }
    cambios
}

/// Appends structured audit records to a dedicated collection
/// (`tenants/{tenantId}/audit_logs` by default).
///
/// Every operation is best-effort: auditing must never block the primary
/// business operation, so write failures are logged, counted and swallowed.
/// The counter makes audit-trail gaps visible to operators; there is no
/// retry or dead-letter path for lost entries.
#[derive(Clone)]
pub struct AuditService {
    firestore: Firestore,
    path: Arc<dyn CollectionPathResolver>,
    failed_writes: Arc<AtomicU64>,
}

impl AuditService {
    pub fn new(firestore: Firestore) -> Self {
        Self::with_resolver(firestore, TenantCollection::new("audit_logs"))
    }

    pub fn with_resolver(
        firestore: Firestore,
        resolver: impl CollectionPathResolver + 'static,
    ) -> Self {
        Self {
            firestore,
            path: Arc::new(resolver),
            failed_writes: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Records a `crear` entry with the full new-state snapshot.
    pub async fn log_creacion(
        &self,
        ctx: &ServiceContext,
        entidad: &str,
        entidad_id: &str,
        datos: &JsonValue,
    ) {
        let mut entry = AuditLogEntry::new(ctx, AuditAction::Crear, entidad, entidad_id);
        entry.datos = Some(datos.clone());
        self.append(ctx, entry).await;
    }

    /// Records an `actualizar` entry carrying the diff of changed fields.
    /// An empty diff still records the entry, so "touch" updates stay
    /// auditable.
    pub async fn log_actualizacion(
        &self,
        ctx: &ServiceContext,
        entidad: &str,
        entidad_id: &str,
        antes: &JsonValue,
        despues: &JsonValue,
    ) {
        let mut entry = AuditLogEntry::new(ctx, AuditAction::Actualizar, entidad, entidad_id);
        entry.cambios = Some(diff_fields(antes, despues));
        self.append(ctx, entry).await;
    }

    /// Records an `eliminar` entry with no payload beyond identity.
    pub async fn log_eliminacion(&self, ctx: &ServiceContext, entidad: &str, entidad_id: &str) {
        let entry = AuditLogEntry::new(ctx, AuditAction::Eliminar, entidad, entidad_id);
        self.append(ctx, entry).await;
    }

    /// Records a `cambio_estado` entry for workflow-state transitions
    /// (incident or work-order status changes).
    pub async fn log_cambio_estado(
        &self,
        ctx: &ServiceContext,
        entidad: &str,
        entidad_id: &str,
        estado_anterior: &str,
        estado_nuevo: &str,
    ) {
        let mut entry = AuditLogEntry::new(ctx, AuditAction::CambioEstado, entidad, entidad_id);
        entry.estado_anterior = Some(estado_anterior.to_string());
        entry.estado_nuevo = Some(estado_nuevo.to_string());
        self.append(ctx, entry).await;
    }

    /// Number of audit entries lost to write failures since construction.
    pub fn failed_writes(&self) -> u64 {
        self.failed_writes.load(Ordering::Relaxed)
    }

    async fn append(&self, ctx: &ServiceContext, entry: AuditLogEntry) {
        let path = match self.path.resolve(ctx) {
            Ok(path) => path,
            Err(e) => {
                self.swallow(&entry, &e.to_string());
                return;
            }
        };

        if let Err(e) = self.firestore.collection(&path).add(&entry).await {
            self.swallow(&entry, &e.to_string());
        }
    }

    fn swallow(&self, entry: &AuditLogEntry, error: &str) {
        self.failed_writes.fetch_add(1, Ordering::Relaxed);
        warn!(
            entidad = %entry.entidad,
            entidad_id = %entry.entidad_id,
            accion = ?entry.accion,
            error = %error,
            "audit write dropped"
        );
    }
}
