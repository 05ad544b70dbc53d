//! Tenant-scoped collection services.
//!
//! [`CollectionService<T>`] is the generic CRUD/list/search/listen engine
//! every entity service in the backend is an instance of. It layers soft
//! deletion, change auditing, cursor pagination and term search on top of
//! the Firestore client, and guards every operation behind the tenant
//! context before any I/O happens.

pub mod audit;
pub mod context;
pub mod error;
pub mod listener;
pub mod options;
pub mod outcome;
pub mod record;

#[cfg(test)]
mod tests;

pub use audit::{AuditAction, AuditLogEntry, AuditService};
pub use context::{
    build_service_context, ActorContext, AuthenticatedUser, CollectionPathResolver,
    RootCollection, ServiceContext, TenantCollection,
};
pub use error::{ErrorKind, ServiceError};
pub use listener::ListenerHandle;
pub use options::{
    FieldFilterSpec, FieldOp, ListOptions, ListPage, ListenOptions, OrderSpec, PageCursor,
    SearchOptions, SortDirection,
};
pub use outcome::{fail, ok, Outcome};
pub use record::{Record, RecordMeta};

use crate::firestore::convert::encode_value;
use crate::firestore::models::{
    self, Direction, DocumentsTarget, ListenRequest, QueryTarget, Target, TargetType, ValueType,
};
use crate::firestore::query::ExecutableQuery;
use crate::firestore::snapshot::RawDocument;
use crate::firestore::Firestore;
use chrono::{DateTime, SecondsFormat, Utc};
use listener::is_soft_deleted;
use options::{DEFAULT_LISTEN_PAGE_SIZE, DEFAULT_PAGE_SIZE, DEFAULT_SEARCH_LIMIT};
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use std::marker::PhantomData;
use std::sync::Arc;

/// Backend fan-out limit on `array-contains-any`; excess search terms are
/// silently dropped.
pub const MAX_SEARCH_TERMS: usize = 10;

const LISTEN_TARGET_ID: i32 = 1;
const SEARCH_TERMS_FIELD: &str = "searchTerms";

/// Enables change auditing for a service, tagging entries with the entity
/// type name.
#[derive(Debug, Clone)]
pub struct AuditConfig {
    pub enabled: bool,
    pub entidad: String,
}

impl AuditConfig {
    pub fn enabled(entidad: impl Into<String>) -> Self {
        Self {
            enabled: true,
            entidad: entidad.into(),
        }
    }
}

struct AuditBinding {
    service: AuditService,
    entidad: String,
}

/// Generic data-access service for one collection of records of type `T`.
///
/// Stateless per call: configuration (backend handle, path resolver, audit
/// binding, tenant requirement) is immutable after construction, and all
/// record state lives in the store. Instances are cheap to share across
/// tasks.
pub struct CollectionService<T: Record> {
    firestore: Firestore,
    path: Arc<dyn CollectionPathResolver>,
    audit: Option<AuditBinding>,
    requires_tenant: bool,
    _record: PhantomData<fn() -> T>,
}

/// Builder for [`CollectionService`].
pub struct CollectionServiceBuilder<T: Record> {
    firestore: Firestore,
    path: Arc<dyn CollectionPathResolver>,
    audit: Option<AuditConfig>,
    audit_service: Option<AuditService>,
    requires_tenant: bool,
    _record: PhantomData<fn() -> T>,
}

impl<T: Record> CollectionServiceBuilder<T> {
    pub fn audit(mut self, config: AuditConfig) -> Self {
        self.audit = Some(config);
        self
    }

    /// Shares an existing audit service (and its failure counter) instead of
    /// constructing a private one.
    pub fn audit_service(mut self, service: AuditService) -> Self {
        self.audit_service = Some(service);
        self
    }

    /// Whether operations demand a tenant id in the context. Defaults to
    /// `true`; only the handful of root-level collections turn this off.
    pub fn requires_tenant(mut self, requires_tenant: bool) -> Self {
        self.requires_tenant = requires_tenant;
        self
    }

    pub fn build(self) -> CollectionService<T> {
        let audit = match self.audit {
            Some(config) if config.enabled => Some(AuditBinding {
                service: self
                    .audit_service
                    .unwrap_or_else(|| AuditService::new(self.firestore.clone())),
                entidad: config.entidad,
            }),
            _ => None,
        };
        CollectionService {
            firestore: self.firestore,
            path: self.path,
            audit,
            requires_tenant: self.requires_tenant,
            _record: PhantomData,
        }
    }
}

impl<T: Record> CollectionService<T> {
    pub fn builder(
        firestore: Firestore,
        resolver: impl CollectionPathResolver + 'static,
    ) -> CollectionServiceBuilder<T> {
        CollectionServiceBuilder {
            firestore,
            path: Arc::new(resolver),
            audit: None,
            audit_service: None,
            requires_tenant: true,
            _record: PhantomData,
        }
    }

    /// The audit service backing this collection, if auditing is enabled.
    pub fn audit_service(&self) -> Option<&AuditService> {
        self.audit.as_ref().map(|b| &b.service)
    }

    // --- create ---

    /// Writes a new record under a backend-generated id and returns the id.
    /// Stamps `eliminado = false`, `creado_por` and the write timestamps;
    /// records a `crear` audit entry (best-effort).
    pub async fn create_auto_id(
        &self,
        ctx: &ServiceContext,
        data: &T,
    ) -> Result<String, ServiceError> {
        let path = self.collection_path(ctx)?;
        let payload = self.stamp_create(ctx, data)?;
        let id = self
            .firestore
            .collection(&path)
            .add(&payload)
            .await
            .map_err(ServiceError::from)?;
        self.audit_creacion(ctx, &id, &JsonValue::Object(payload))
            .await;
        Ok(id)
    }

    /// Writes a new record at a caller-chosen id, replacing any document
    /// already stored there (no merge). For records whose id mirrors an
    /// external key.
    pub async fn create_with_id(
        &self,
        ctx: &ServiceContext,
        id: &str,
        data: &T,
    ) -> Result<(), ServiceError> {
        let path = self.collection_path(ctx)?;
        let payload = self.stamp_create(ctx, data)?;
        self.firestore
            .doc(&format!("{}/{}", path, id))
            .set(&payload)
            .await
            .map_err(ServiceError::from)?;
        self.audit_creacion(ctx, id, &JsonValue::Object(payload))
            .await;
        Ok(())
    }

    // --- read ---

    /// Fetches a record by id. Returns `None` both when the document does
    /// not exist and when it is soft-deleted: callers cannot distinguish the
    /// two through this path.
    pub async fn get_by_id(
        &self,
        ctx: &ServiceContext,
        id: &str,
    ) -> Result<Option<T>, ServiceError> {
        let path = self.collection_path(ctx)?;
        let raw = self
            .firestore
            .doc(&format!("{}/{}", path, id))
            .get_raw()
            .await
            .map_err(ServiceError::from)?;
        match raw {
            Some(raw) if !is_soft_deleted(&raw.data) => {
                Ok(Some(raw.decode().map_err(ServiceError::from)?))
            }
            _ => Ok(None),
        }
    }

    pub async fn safe_get_by_id(&self, ctx: &ServiceContext, id: &str) -> Outcome<Option<T>> {
        self.get_by_id(ctx, id).await.into()
    }

    // --- update ---

    /// Merges `patch` into the stored document. The target must exist —
    /// soft-deleted or not; patching a soft-deleted record is how it gets
    /// restored. Refreshes `updatedAt`/`actualizado_por` and records an
    /// `actualizar` audit entry with the before/after snapshots.
    pub async fn update_partial(
        &self,
        ctx: &ServiceContext,
        id: &str,
        patch: Map<String, JsonValue>,
    ) -> Result<(), ServiceError> {
        let path = self.collection_path(ctx)?;
        let doc = self.firestore.doc(&format!("{}/{}", path, id));

        let before = doc
            .get_raw()
            .await
            .map_err(ServiceError::from)?
            .ok_or_else(|| ServiceError::not_found(format!("document {} does not exist", id)))?;

        let mut patch = patch;
        // The id is not a field; it can never be reassigned through a patch.
        patch.remove("id");

        let mut after = before.data.as_object().cloned().unwrap_or_default();
        for (key, value) in &patch {
            after.insert(key.clone(), value.clone());
        }

        let mut fields = patch;
        let now = timestamp(Utc::now());
        fields.insert("updatedAt".to_string(), now);
        if let Some(uid) = ctx.actor_uid() {
            fields.insert(
                "actualizado_por".to_string(),
                JsonValue::String(uid.to_string()),
            );
        }

        doc.patch(&fields).await.map_err(ServiceError::from)?;
        self.audit_actualizacion(ctx, id, &before.data, &JsonValue::Object(after))
            .await;
        Ok(())
    }

    // --- delete ---

    /// Marks a record deleted: sets `eliminado = true`, stamps the deletion
    /// actor and time. The document stays stored and remains listable under
    /// `include_deleted`. The target must exist.
    pub async fn soft_delete(&self, ctx: &ServiceContext, id: &str) -> Result<(), ServiceError> {
        let path = self.collection_path(ctx)?;
        let doc = self.firestore.doc(&format!("{}/{}", path, id));

        doc.get_raw()
            .await
            .map_err(ServiceError::from)?
            .ok_or_else(|| ServiceError::not_found(format!("document {} does not exist", id)))?;

        let now = Utc::now();
        let mut fields = Map::new();
        fields.insert("eliminado".to_string(), JsonValue::Bool(true));
        fields.insert("fecha_eliminacion".to_string(), timestamp(now));
        fields.insert("updatedAt".to_string(), timestamp(now));
        if let Some(uid) = ctx.actor_uid() {
            fields.insert(
                "eliminado_por".to_string(),
                JsonValue::String(uid.to_string()),
            );
        }

        doc.patch(&fields).await.map_err(ServiceError::from)?;
        self.audit_eliminacion(ctx, id).await;
        Ok(())
    }

    /// Physically removes the document. Irreversible, unaudited, no
    /// existence check (deleting a missing id is a no-op). Maintenance use
    /// only — everything user-facing goes through [`soft_delete`](Self::soft_delete).
    pub async fn hard_delete(&self, ctx: &ServiceContext, id: &str) -> Result<(), ServiceError> {
        let path = self.collection_path(ctx)?;
        self.firestore
            .doc(&format!("{}/{}", path, id))
            .delete()
            .await
            .map_err(ServiceError::from)
    }

    // --- list ---

    /// Runs a filtered, ordered, paged query. Soft-deleted records are
    /// excluded unless `include_deleted`. One extra record is requested to
    /// detect whether more pages remain without a count query.
    pub async fn list(
        &self,
        ctx: &ServiceContext,
        options: ListOptions,
    ) -> Result<ListPage<T>, ServiceError> {
        let path = self.collection_path(ctx)?;
        let page_size = options.page_size.unwrap_or(DEFAULT_PAGE_SIZE) as usize;

        let mut query = self.compose_query(
            &path,
            &options.filters,
            &options.order_by,
            options.include_deleted,
        )?;
        if let Some(cursor) = &options.start_after {
            query = query.start_after(models::Cursor {
                values: cursor.values.clone(),
                before: false,
            });
        }
        query = query.limit(page_size as i32 + 1);

        let mut docs = query.run().await.map_err(ServiceError::from)?;
        let has_more = docs.len() > page_size;
        docs.truncate(page_size);

        let last_doc = match docs.last() {
            Some(last) => Some(self.cursor_for(last, &options.order_by)?),
            None => None,
        };

        let mut items = Vec::with_capacity(docs.len());
        for doc in docs {
            items.push(doc.decode().map_err(ServiceError::from)?);
        }

        Ok(ListPage {
            items,
            last_doc,
            has_more,
        })
    }

    pub async fn safe_list(&self, ctx: &ServiceContext, options: ListOptions) -> Outcome<ListPage<T>> {
        self.list(ctx, options).await.into()
    }

    pub async fn safe_create(&self, ctx: &ServiceContext, data: &T) -> Outcome<String> {
        self.create_auto_id(ctx, data).await.into()
    }

    // --- search ---

    /// "Any of" match against the precomputed token array (field
    /// `searchTerms` unless overridden). Only the first
    /// [`MAX_SEARCH_TERMS`] terms are applied; callers supplying more must
    /// pre-rank them.
    pub async fn search_by_terms(
        &self,
        ctx: &ServiceContext,
        terms: &[String],
        options: SearchOptions,
    ) -> Result<Vec<T>, ServiceError> {
        let path = self.collection_path(ctx)?;
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let capped: Vec<JsonValue> = terms
            .iter()
            .take(MAX_SEARCH_TERMS)
            .map(|t| JsonValue::String(t.clone()))
            .collect();
        let field = options.field.as_deref().unwrap_or(SEARCH_TERMS_FIELD);
        let limit = options.limit.unwrap_or(DEFAULT_SEARCH_LIMIT);

        let mut query = self.firestore.query(&path);
        if !options.include_deleted {
            query = query
                .where_field("eliminado", models::FieldOperator::Equal, &JsonValue::Bool(false))
                .map_err(ServiceError::from)?;
        }
        query = query
            .where_field(
                field,
                models::FieldOperator::ArrayContainsAny,
                &JsonValue::Array(capped),
            )
            .map_err(ServiceError::from)?;
        query = query.limit(limit as i32);

        let docs = query.run().await.map_err(ServiceError::from)?;
        let mut items = Vec::with_capacity(docs.len());
        for doc in docs {
            items.push(doc.decode().map_err(ServiceError::from)?);
        }
        Ok(items)
    }

    // --- realtime ---

    /// Subscribes to one document. `on_data` receives `None` when the
    /// document is missing or soft-deleted (indistinguishable, as with
    /// [`get_by_id`](Self::get_by_id)); `on_error` receives
    /// subscription-level failures. The returned handle is caller-owned:
    /// nothing unsubscribes until the caller does.
    pub fn listen_by_id<F, E>(
        &self,
        ctx: &ServiceContext,
        id: &str,
        on_data: F,
        on_error: E,
    ) -> Result<ListenerHandle, ServiceError>
    where
        F: FnMut(Option<T>) + Send + 'static,
        E: FnMut(ServiceError) + Send + 'static,
    {
        let path = self.collection_path(ctx)?;
        let doc_name = self.firestore.document_name(&format!("{}/{}", path, id));

        let request = ListenRequest {
            database: self.firestore.database_name(),
            add_target: Some(Target {
                target_type: TargetType::Documents(DocumentsTarget {
                    documents: vec![doc_name.clone()],
                }),
                target_id: Some(LISTEN_TARGET_ID),
                once: None,
            }),
            remove_target: None,
        };

        Ok(listener::spawn_document_listener::<T, _, _>(
            self.firestore.clone(),
            request,
            doc_name,
            on_data,
            on_error,
        ))
    }

    /// Subscribes to a live query built with the same composition rules as
    /// [`list`](Self::list) (no cursor; the full current page is
    /// re-delivered on every change within the limit window).
    pub fn listen_list<F, E>(
        &self,
        ctx: &ServiceContext,
        options: ListenOptions,
        on_data: F,
        on_error: E,
    ) -> Result<ListenerHandle, ServiceError>
    where
        F: FnMut(Vec<T>) + Send + 'static,
        E: FnMut(ServiceError) + Send + 'static,
    {
        let path = self.collection_path(ctx)?;
        let page_size = options.page_size.unwrap_or(DEFAULT_LISTEN_PAGE_SIZE) as usize;

        let query = self
            .compose_query(
                &path,
                &options.filters,
                &options.order_by,
                options.include_deleted,
            )?
            .limit(page_size as i32);

        let request = ListenRequest {
            database: self.firestore.database_name(),
            add_target: Some(Target {
                target_type: TargetType::Query(QueryTarget {
                    parent: self.firestore.parent_resource(&path),
                    structured_query: Some(query.structured()),
                }),
                target_id: Some(LISTEN_TARGET_ID),
                once: None,
            }),
            remove_target: None,
        };

        Ok(listener::spawn_query_listener::<T, _, _>(
            self.firestore.clone(),
            request,
            options.order_by,
            page_size,
            on_data,
            on_error,
        ))
    }

    // --- internals ---

    fn guard(&self, ctx: &ServiceContext) -> Result<(), ServiceError> {
        if self.requires_tenant && ctx.tenant_id.is_none() {
            return Err(ServiceError::invalid_argument(
                "tenantId is required for this operation",
            ));
        }
        Ok(())
    }

    fn collection_path(&self, ctx: &ServiceContext) -> Result<String, ServiceError> {
        self.guard(ctx)?;
        self.path.resolve(ctx)
    }

    fn compose_query(
        &self,
        path: &str,
        filters: &[FieldFilterSpec],
        order_by: &[OrderSpec],
        include_deleted: bool,
    ) -> Result<ExecutableQuery<'_>, ServiceError> {
        let mut query = self.firestore.query(path);
        if !include_deleted {
            query = query
                .where_field("eliminado", models::FieldOperator::Equal, &JsonValue::Bool(false))
                .map_err(ServiceError::from)?;
        }
        for filter in filters {
            query = query
                .where_field(&filter.field_path, filter.op.wire(), &filter.value)
                .map_err(ServiceError::from)?;
        }
        for order in order_by {
            query = query.order_by(&order.field_path, order.direction.wire());
        }
        // Total tie-break so cursors never skip or repeat records.
        if !query.orders_on("__name__") {
            query = query.order_by("__name__", Direction::Ascending);
        }
        Ok(query)
    }

    fn cursor_for(
        &self,
        doc: &RawDocument,
        order_by: &[OrderSpec],
    ) -> Result<PageCursor, ServiceError> {
        let mut values = Vec::with_capacity(order_by.len() + 1);
        let mut named = false;
        for spec in order_by {
            if spec.field_path == "__name__" {
                named = true;
                values.push(models::Value {
                    value_type: ValueType::ReferenceValue(doc.name.clone()),
                });
            } else {
                let field = doc.field(&spec.field_path).cloned().unwrap_or(JsonValue::Null);
                values.push(encode_value(&field).map_err(ServiceError::from)?);
            }
        }
        if !named {
            values.push(models::Value {
                value_type: ValueType::ReferenceValue(doc.name.clone()),
            });
        }
        Ok(PageCursor { values })
    }

    fn stamp_create(
        &self,
        ctx: &ServiceContext,
        data: &T,
    ) -> Result<Map<String, JsonValue>, ServiceError> {
        let mut obj = to_object(data)?;
        obj.remove("id");
        obj.remove("fecha_eliminacion");
        obj.remove("eliminado_por");
        obj.remove("actualizado_por");
        obj.insert("eliminado".to_string(), JsonValue::Bool(false));
        match ctx.actor_uid() {
            Some(uid) => {
                obj.insert("creado_por".to_string(), JsonValue::String(uid.to_string()));
            }
            None => {
                obj.remove("creado_por");
            }
        }
        let now = timestamp(Utc::now());
        obj.insert("createdAt".to_string(), now.clone());
        obj.insert("updatedAt".to_string(), now);
        Ok(obj)
    }

    async fn audit_creacion(&self, ctx: &ServiceContext, id: &str, datos: &JsonValue) {
        if let Some(binding) = &self.audit {
            binding
                .service
                .log_creacion(ctx, &binding.entidad, id, datos)
                .await;
        }
    }

    async fn audit_actualizacion(
        &self,
        ctx: &ServiceContext,
        id: &str,
        antes: &JsonValue,
        despues: &JsonValue,
    ) {
        if let Some(binding) = &self.audit {
            binding
                .service
                .log_actualizacion(ctx, &binding.entidad, id, antes, despues)
                .await;
        }
    }

    async fn audit_eliminacion(&self, ctx: &ServiceContext, id: &str) {
        if let Some(binding) = &self.audit {
            binding
                .service
                .log_eliminacion(ctx, &binding.entidad, id)
                .await;
        }
    }
}

fn to_object<S: Serialize>(value: &S) -> Result<Map<String, JsonValue>, ServiceError> {
    match serde_json::to_value(value) {
        Ok(JsonValue::Object(map)) => Ok(map),
        Ok(_) => Err(ServiceError::invalid_argument(
            "record must serialize to an object",
        )),
        Err(e) => Err(ServiceError::unknown(e.to_string())),
    }
}

fn timestamp(at: DateTime<Utc>) -> JsonValue {
    JsonValue::String(at.to_rfc3339_opts(SecondsFormat::Micros, true))
}
