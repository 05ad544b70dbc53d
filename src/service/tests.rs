use crate::firestore::Firestore;
use crate::service::{
    ActorContext, AuditConfig, CollectionService, ErrorKind, FieldFilterSpec, FieldOp,
    ListOptions, ListenOptions, ListenerHandle, OrderSpec, Record, RecordMeta, RootCollection,
    SearchOptions, ServiceContext, TenantCollection,
};
use httpmock::Method::{DELETE, GET, PATCH, POST};
use httpmock::MockServer;
use reqwest::Client;
use reqwest_middleware::ClientBuilder;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as JsonValue};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const DOCS: &str = "/v1/projects/test-project/databases/(default)/documents";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct Incidencia {
    #[serde(default)]
    id: String,
    nombre: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    prioridad: Option<i32>,
    #[serde(flatten)]
    meta: RecordMeta,
}

impl Record for Incidencia {
    fn id(&self) -> &str {
        &self.id
    }
}

fn nueva(nombre: &str) -> Incidencia {
    Incidencia {
        id: String::new(),
        nombre: nombre.to_string(),
        prioridad: None,
        meta: RecordMeta::default(),
    }
}

fn test_firestore(server: &MockServer) -> Firestore {
    let client = ClientBuilder::new(Client::new()).build();
    Firestore::new_with_client(client, server.url(DOCS))
}

fn incidencias(server: &MockServer) -> CollectionService<Incidencia> {
    CollectionService::builder(test_firestore(server), TenantCollection::new("incidencias"))
        .audit(AuditConfig::enabled("incidencia"))
        .build()
}

fn ctx() -> ServiceContext {
    let mut actor = ActorContext::new("u1");
    actor.email = Some("tecnico@flota.example".into());
    ServiceContext::new(Some("t1".into()), Some(actor))
}

fn doc_fields(nombre: &str, prioridad: i64, eliminado: bool) -> JsonValue {
    json!({
        "nombre": { "stringValue": nombre },
        "prioridad": { "integerValue": prioridad.to_string() },
        "eliminado": { "booleanValue": eliminado },
        "creado_por": { "stringValue": "u1" },
        "createdAt": { "stringValue": "2026-03-01T10:00:00.000000Z" },
        "updatedAt": { "stringValue": "2026-03-01T10:00:00.000000Z" }
    })
}

fn doc_body(id: &str, fields: JsonValue) -> JsonValue {
    json!({
        "name": format!(
            "projects/test-project/databases/(default)/documents/tenants/t1/incidencias/{}",
            id
        ),
        "fields": fields,
        "createTime": "2026-03-01T10:00:00Z",
        "updateTime": "2026-03-01T10:00:00Z"
    })
}

async fn wait_closed(handle: &ListenerHandle) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !handle.is_closed() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("listener did not finish in time");
}

// --- tenant guard ---

#[tokio::test]
async fn tenant_guard_fails_before_any_backend_io() {
    let server = MockServer::start();
    let svc = incidencias(&server);
    let backend = server.mock(|when, then| {
        when.path_includes("/");
        then.status(200).json_body(json!({}));
    });

    let anon = ServiceContext::default();

    let err = svc.get_by_id(&anon, "abc").await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidArgument);
    let err = svc.create_auto_id(&anon, &nueva("Bus-1")).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidArgument);
    let err = svc.list(&anon, ListOptions::default()).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidArgument);
    let err = svc.soft_delete(&anon, "abc").await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidArgument);
    let err = svc
        .search_by_terms(&anon, &["bus".into()], SearchOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidArgument);
    assert!(svc
        .listen_by_id(&anon, "abc", |_: Option<Incidencia>| {}, |_| {})
        .is_err());

    let outcome = svc.safe_get_by_id(&anon, "abc").await;
    assert!(!outcome.is_ok());
    assert_eq!(
        outcome.into_result().unwrap_err().kind,
        ErrorKind::InvalidArgument
    );

    assert_eq!(backend.hits(), 0);
}

#[tokio::test]
async fn root_collections_work_without_a_tenant() {
    let server = MockServer::start();
    let svc: CollectionService<Incidencia> =
        CollectionService::builder(test_firestore(&server), RootCollection::new("avisos"))
            .requires_tenant(false)
            .build();

    server.mock(|when, then| {
        when.method(GET).path(format!("{}/avisos/a1", DOCS));
        then.status(200).json_body(json!({
            "name": "projects/test-project/databases/(default)/documents/avisos/a1",
            "fields": doc_fields("Corte general", 1, false),
            "createTime": "2026-03-01T10:00:00Z",
            "updateTime": "2026-03-01T10:00:00Z"
        }));
    });

    let aviso = svc.get_by_id(&ServiceContext::default(), "a1").await.unwrap();
    assert_eq!(aviso.unwrap().nombre, "Corte general");
}

// --- create ---

#[tokio::test]
async fn create_auto_id_stamps_and_audits() {
    let server = MockServer::start();
    let svc = incidencias(&server);

    // The id must never be persisted as a document field.
    let id_probe = server.mock(|when, then| {
        when.method(POST)
            .path(format!("{}/tenants/t1/incidencias", DOCS))
            .body_includes("\"id\"");
        then.status(500);
    });
    let add = server.mock(|when, then| {
        when.method(POST)
            .path(format!("{}/tenants/t1/incidencias", DOCS))
            .body_includes("\"creado_por\"")
            .body_includes("\"createdAt\"")
            .body_includes("\"updatedAt\"")
            .body_includes("\"eliminado\"");
        then.status(200)
            .json_body(doc_body("abc", json!({ "nombre": { "stringValue": "Bus-1" } })));
    });
    let audit = server.mock(|when, then| {
        when.method(POST)
            .path(format!("{}/tenants/t1/audit_logs", DOCS))
            .body_includes("\"stringValue\":\"crear\"")
            .body_includes("\"stringValue\":\"abc\"")
            .body_includes("\"stringValue\":\"u1\"");
        then.status(200)
            .json_body(doc_body("log1", json!({})));
    });

    let id = svc.create_auto_id(&ctx(), &nueva("Bus-1")).await.unwrap();
    assert_eq!(id, "abc");
    assert_eq!(id_probe.hits(), 0);
    add.assert();
    audit.assert();
}

#[tokio::test]
async fn create_with_id_writes_at_the_given_id() {
    let server = MockServer::start();
    let svc = incidencias(&server);

    let set = server.mock(|when, then| {
        when.method(PATCH)
            .path(format!("{}/tenants/t1/incidencias/ext-9", DOCS))
            .body_includes("Bus-9");
        then.status(200)
            .json_body(doc_body("ext-9", json!({})));
    });
    let audit = server.mock(|when, then| {
        when.method(POST)
            .path(format!("{}/tenants/t1/audit_logs", DOCS))
            .body_includes("\"stringValue\":\"ext-9\"");
        then.status(200).json_body(doc_body("log1", json!({})));
    });

    svc.create_with_id(&ctx(), "ext-9", &nueva("Bus-9")).await.unwrap();
    set.assert();
    audit.assert();
}

#[tokio::test]
async fn primary_write_survives_audit_backend_failure() {
    let server = MockServer::start();
    let svc = incidencias(&server);

    server.mock(|when, then| {
        when.method(POST).path(format!("{}/tenants/t1/incidencias", DOCS));
        then.status(200)
            .json_body(doc_body("abc", json!({})));
    });
    let audit = server.mock(|when, then| {
        when.method(POST).path(format!("{}/tenants/t1/audit_logs", DOCS));
        then.status(500).json_body(json!({
            "error": { "code": 500, "message": "backend exploded", "status": "INTERNAL" }
        }));
    });

    let id = svc.create_auto_id(&ctx(), &nueva("Bus-1")).await.unwrap();
    assert_eq!(id, "abc");
    assert_eq!(audit.hits(), 1);
    assert_eq!(svc.audit_service().unwrap().failed_writes(), 1);
}

// --- read ---

#[tokio::test]
async fn get_by_id_hides_missing_and_soft_deleted_alike() {
    let server = MockServer::start();
    let svc = incidencias(&server);

    server.mock(|when, then| {
        when.method(GET)
            .path(format!("{}/tenants/t1/incidencias/missing", DOCS));
        then.status(404).json_body(json!({
            "error": { "code": 404, "message": "not found", "status": "NOT_FOUND" }
        }));
    });
    server.mock(|when, then| {
        when.method(GET)
            .path(format!("{}/tenants/t1/incidencias/borrada", DOCS));
        then.status(200)
            .json_body(doc_body("borrada", doc_fields("Bus-2", 1, true)));
    });
    server.mock(|when, then| {
        when.method(GET)
            .path(format!("{}/tenants/t1/incidencias/abierta", DOCS));
        then.status(200)
            .json_body(doc_body("abierta", doc_fields("Bus-3", 2, false)));
    });

    assert!(svc.get_by_id(&ctx(), "missing").await.unwrap().is_none());
    assert!(svc.get_by_id(&ctx(), "borrada").await.unwrap().is_none());

    let abierta = svc.get_by_id(&ctx(), "abierta").await.unwrap().unwrap();
    assert_eq!(abierta.id, "abierta");
    assert_eq!(abierta.nombre, "Bus-3");
    assert_eq!(abierta.prioridad, Some(2));
    assert!(!abierta.meta.eliminado);
    assert_eq!(abierta.meta.creado_por.as_deref(), Some("u1"));
    assert!(abierta.meta.created_at.is_some());
}

// --- update ---

#[tokio::test]
async fn update_partial_requires_existence() {
    let server = MockServer::start();
    let svc = incidencias(&server);

    server.mock(|when, then| {
        when.method(GET)
            .path(format!("{}/tenants/t1/incidencias/missing", DOCS));
        then.status(404).json_body(json!({
            "error": { "code": 404, "message": "not found", "status": "NOT_FOUND" }
        }));
    });

    let mut patch = Map::new();
    patch.insert("prioridad".to_string(), json!(5));
    let err = svc.update_partial(&ctx(), "missing", patch).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
}

#[tokio::test]
async fn update_partial_merges_stamps_and_audits_the_diff() {
    let server = MockServer::start();
    let svc = incidencias(&server);

    server.mock(|when, then| {
        when.method(GET)
            .path(format!("{}/tenants/t1/incidencias/abc", DOCS));
        then.status(200)
            .json_body(doc_body("abc", doc_fields("Bus-1", 2, false)));
    });
    let patch_mock = server.mock(|when, then| {
        when.method(PATCH)
            .path(format!("{}/tenants/t1/incidencias/abc", DOCS))
            .body_includes("\"prioridad\"")
            .body_includes("\"updatedAt\"")
            .body_includes("\"actualizado_por\"");
        then.status(200).json_body(doc_body("abc", json!({})));
    });
    // The unchanged field must not appear in the audited diff.
    let diff_probe = server.mock(|when, then| {
        when.method(POST)
            .path(format!("{}/tenants/t1/audit_logs", DOCS))
            .body_includes("Bus-1");
        then.status(500);
    });
    let audit = server.mock(|when, then| {
        when.method(POST)
            .path(format!("{}/tenants/t1/audit_logs", DOCS))
            .body_includes("\"stringValue\":\"actualizar\"")
            .body_includes("\"cambios\"")
            .body_includes("\"prioridad\"");
        then.status(200).json_body(doc_body("log1", json!({})));
    });

    let mut patch = Map::new();
    patch.insert("prioridad".to_string(), json!(5));
    svc.update_partial(&ctx(), "abc", patch).await.unwrap();

    patch_mock.assert();
    audit.assert();
    assert_eq!(diff_probe.hits(), 0);
}

// --- delete ---

#[tokio::test]
async fn soft_delete_marks_and_audits() {
    let server = MockServer::start();
    let svc = incidencias(&server);

    server.mock(|when, then| {
        when.method(GET)
            .path(format!("{}/tenants/t1/incidencias/abc", DOCS));
        then.status(200)
            .json_body(doc_body("abc", doc_fields("Bus-1", 2, false)));
    });
    let patch_mock = server.mock(|when, then| {
        when.method(PATCH)
            .path(format!("{}/tenants/t1/incidencias/abc", DOCS))
            .body_includes("\"booleanValue\":true")
            .body_includes("\"fecha_eliminacion\"")
            .body_includes("\"eliminado_por\"");
        then.status(200).json_body(doc_body("abc", json!({})));
    });
    let audit = server.mock(|when, then| {
        when.method(POST)
            .path(format!("{}/tenants/t1/audit_logs", DOCS))
            .body_includes("\"stringValue\":\"eliminar\"");
        then.status(200).json_body(doc_body("log1", json!({})));
    });

    svc.soft_delete(&ctx(), "abc").await.unwrap();
    patch_mock.assert();
    audit.assert();
}

#[tokio::test]
async fn hard_delete_skips_precondition_and_audit() {
    let server = MockServer::start();
    let svc = incidencias(&server);

    let delete = server.mock(|when, then| {
        when.method(DELETE)
            .path(format!("{}/tenants/t1/incidencias/abc", DOCS));
        then.status(200).json_body(json!({}));
    });
    let audit_probe = server.mock(|when, then| {
        when.method(POST).path(format!("{}/tenants/t1/audit_logs", DOCS));
        then.status(200).json_body(doc_body("log1", json!({})));
    });

    svc.hard_delete(&ctx(), "abc").await.unwrap();
    delete.assert();
    assert_eq!(audit_probe.hits(), 0);
}

// --- list ---

#[tokio::test]
async fn list_paginates_with_a_probe_record_and_cursor() {
    let server = MockServer::start();
    let svc = incidencias(&server);

    // First page: page_size 2 means the query asks for 3.
    let page1 = server.mock(|when, then| {
        when.method(POST)
            .path(format!("{}/tenants/t1:runQuery", DOCS))
            .body_includes("\"limit\":3")
            .body_includes("\"eliminado\"")
            .body_includes("__name__");
        then.status(200).json_body(json!([
            { "document": doc_body("inc-1", doc_fields("Alfa", 1, false)) },
            { "document": doc_body("inc-2", doc_fields("Beta", 1, false)) },
            { "document": doc_body("inc-3", doc_fields("Caro", 1, false)) }
        ]));
    });
    // Continuation: distinguishable by its page size and the cursor.
    let page2 = server.mock(|when, then| {
        when.method(POST)
            .path(format!("{}/tenants/t1:runQuery", DOCS))
            .body_includes("\"limit\":6")
            .body_includes("\"startAt\"")
            .body_includes("inc-2");
        then.status(200).json_body(json!([
            { "document": doc_body("inc-3", doc_fields("Caro", 1, false)) }
        ]));
    });

    let first = svc
        .list(
            &ctx(),
            ListOptions {
                page_size: Some(2),
                order_by: vec![OrderSpec::asc("nombre")],
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(first.items.len(), 2);
    assert!(first.has_more);
    let cursor = first.last_doc.clone().expect("cursor for next page");

    let second = svc
        .list(
            &ctx(),
            ListOptions {
                page_size: Some(5),
                order_by: vec![OrderSpec::asc("nombre")],
                start_after: Some(cursor),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(second.items.len(), 1);
    assert!(!second.has_more);

    let nombres: Vec<&str> = first
        .items
        .iter()
        .chain(second.items.iter())
        .map(|i| i.nombre.as_str())
        .collect();
    assert_eq!(nombres, vec!["Alfa", "Beta", "Caro"]);
    page1.assert();
    page2.assert();
}

#[tokio::test]
async fn list_include_deleted_drops_the_soft_delete_filter() {
    let server = MockServer::start();
    let svc = incidencias(&server);

    let filter_probe = server.mock(|when, then| {
        when.method(POST)
            .path(format!("{}/tenants/t1:runQuery", DOCS))
            .body_includes("\"eliminado\"");
        then.status(500);
    });
    let query = server.mock(|when, then| {
        when.method(POST).path(format!("{}/tenants/t1:runQuery", DOCS));
        then.status(200).json_body(json!([
            { "document": doc_body("inc-9", doc_fields("Borrado", 1, true)) }
        ]));
    });

    let page = svc
        .list(
            &ctx(),
            ListOptions {
                include_deleted: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(page.items.len(), 1);
    assert!(page.items[0].meta.eliminado);
    assert_eq!(filter_probe.hits(), 0);
    query.assert();
}

#[tokio::test]
async fn list_composes_caller_filters() {
    let server = MockServer::start();
    let svc = incidencias(&server);

    let query = server.mock(|when, then| {
        when.method(POST)
            .path(format!("{}/tenants/t1:runQuery", DOCS))
            .body_includes("compositeFilter")
            .body_includes("\"estado\"")
            .body_includes("abierta")
            .body_includes("GREATER_THAN_OR_EQUAL");
        then.status(200).json_body(json!([]));
    });

    let page = svc
        .list(
            &ctx(),
            ListOptions {
                filters: vec![
                    FieldFilterSpec::new("estado", FieldOp::Eq, json!("abierta")),
                    FieldFilterSpec::new("prioridad", FieldOp::Ge, json!(2)),
                ],
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(page.items.is_empty());
    assert!(!page.has_more);
    assert!(page.last_doc.is_none());
    query.assert();
}

// --- search ---

#[tokio::test]
async fn search_caps_terms_at_the_backend_fanout_limit() {
    let server = MockServer::start();
    let svc = incidencias(&server);

    let overflow_probe = server.mock(|when, then| {
        when.method(POST)
            .path(format!("{}/tenants/t1:runQuery", DOCS))
            .body_includes("term10");
        then.status(500);
    });
    let query = server.mock(|when, then| {
        when.method(POST)
            .path(format!("{}/tenants/t1:runQuery", DOCS))
            .body_includes("ARRAY_CONTAINS_ANY")
            .body_includes("\"searchTerms\"")
            .body_includes("term0")
            .body_includes("term9")
            .body_includes("\"limit\":20");
        then.status(200).json_body(json!([
            { "document": doc_body("inc-1", doc_fields("Bus-1", 1, false)) }
        ]));
    });

    let terms: Vec<String> = (0..15).map(|i| format!("term{}", i)).collect();
    let hits = svc
        .search_by_terms(&ctx(), &terms, SearchOptions::default())
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(overflow_probe.hits(), 0);
    query.assert();
}

#[tokio::test]
async fn search_with_no_terms_skips_the_backend() {
    let server = MockServer::start();
    let svc = incidencias(&server);
    let backend = server.mock(|when, then| {
        when.path_includes("/");
        then.status(200).json_body(json!({}));
    });

    let hits = svc
        .search_by_terms(&ctx(), &[], SearchOptions::default())
        .await
        .unwrap();
    assert!(hits.is_empty());
    assert_eq!(backend.hits(), 0);
}

// --- realtime ---

fn listen_frame(value: JsonValue) -> String {
    value.to_string()
}

#[tokio::test]
async fn listen_by_id_reports_soft_and_hard_deletes_identically() {
    let server = MockServer::start();
    let svc = incidencias(&server);
    let doc_name =
        "projects/test-project/databases/(default)/documents/tenants/t1/incidencias/inc-1";

    let body = format!(
        "[{},{},{},{}]",
        listen_frame(json!({
            "documentChange": {
                "document": doc_body("inc-1", doc_fields("Bus-1", 1, false)),
                "targetIds": [1]
            }
        })),
        listen_frame(json!({
            "targetChange": { "targetChangeType": "CURRENT", "targetIds": [1] }
        })),
        listen_frame(json!({
            "documentChange": {
                "document": doc_body("inc-1", doc_fields("Bus-1", 1, true)),
                "targetIds": [1]
            }
        })),
        listen_frame(json!({ "documentDelete": { "document": doc_name } }))
    );

    let listen = server.mock(|when, then| {
        when.method(POST)
            .path(format!("{}:listen", DOCS))
            .body_includes("inc-1");
        then.status(200).body(body);
    });

    let events: Arc<Mutex<Vec<Option<String>>>> = Arc::new(Mutex::new(Vec::new()));
    let errors: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let error_sink = Arc::clone(&errors);

    let handle = svc
        .listen_by_id(
            &ctx(),
            "inc-1",
            move |item: Option<Incidencia>| {
                sink.lock().unwrap().push(item.map(|i| i.nombre));
            },
            move |e| error_sink.lock().unwrap().push(e.to_string()),
        )
        .unwrap();

    wait_closed(&handle).await;
    listen.assert();
    assert!(errors.lock().unwrap().is_empty());
    // One live snapshot, then two indistinguishable disappearances: the
    // soft delete and the hard delete produce the same callback.
    assert_eq!(
        *events.lock().unwrap(),
        vec![Some("Bus-1".to_string()), None, None]
    );
}

#[tokio::test]
async fn listen_by_id_reports_absent_on_initial_sync() {
    let server = MockServer::start();
    let svc = incidencias(&server);

    let body = format!(
        "[{}]",
        listen_frame(json!({
            "targetChange": { "targetChangeType": "CURRENT", "targetIds": [1] }
        }))
    );
    server.mock(|when, then| {
        when.method(POST).path(format!("{}:listen", DOCS));
        then.status(200).body(body);
    });

    let events: Arc<Mutex<Vec<Option<String>>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let handle = svc
        .listen_by_id(
            &ctx(),
            "inc-404",
            move |item: Option<Incidencia>| {
                sink.lock().unwrap().push(item.map(|i| i.nombre));
            },
            |_| {},
        )
        .unwrap();

    wait_closed(&handle).await;
    assert_eq!(*events.lock().unwrap(), vec![None]);
}

#[tokio::test]
async fn listen_list_re_emits_the_sorted_page_on_every_change() {
    let server = MockServer::start();
    let svc = incidencias(&server);
    let gone = "projects/test-project/databases/(default)/documents/tenants/t1/incidencias/inc-a";

    let body = format!(
        "[{},{},{},{}]",
        listen_frame(json!({
            "documentChange": {
                "document": doc_body("inc-b", doc_fields("Beta", 1, false)),
                "targetIds": [1]
            }
        })),
        listen_frame(json!({
            "documentChange": {
                "document": doc_body("inc-a", doc_fields("Alfa", 1, false)),
                "targetIds": [1]
            }
        })),
        listen_frame(json!({
            "targetChange": { "targetChangeType": "CURRENT", "targetIds": [1] }
        })),
        listen_frame(json!({ "documentDelete": { "document": gone } }))
    );

    let listen = server.mock(|when, then| {
        when.method(POST)
            .path(format!("{}:listen", DOCS))
            .body_includes("structuredQuery")
            .body_includes("\"parent\"")
            .body_includes("incidencias");
        then.status(200).body(body);
    });

    let pages: Arc<Mutex<Vec<Vec<String>>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&pages);
    let handle = svc
        .listen_list(
            &ctx(),
            ListenOptions {
                order_by: vec![OrderSpec::asc("nombre")],
                ..Default::default()
            },
            move |items: Vec<Incidencia>| {
                sink.lock()
                    .unwrap()
                    .push(items.into_iter().map(|i| i.nombre).collect());
            },
            |_| {},
        )
        .unwrap();

    wait_closed(&handle).await;
    listen.assert();
    assert_eq!(
        *pages.lock().unwrap(),
        vec![
            vec!["Alfa".to_string(), "Beta".to_string()],
            vec!["Beta".to_string()]
        ]
    );
}

#[tokio::test]
async fn unsubscribe_is_idempotent() {
    let server = MockServer::start();
    let svc = incidencias(&server);

    server.mock(|when, then| {
        when.method(POST).path(format!("{}:listen", DOCS));
        then.status(200).body("[]");
    });

    let handle = svc
        .listen_by_id(&ctx(), "inc-1", |_: Option<Incidencia>| {}, |_| {})
        .unwrap();
    wait_closed(&handle).await;
    handle.unsubscribe();
    handle.unsubscribe();
    assert!(handle.is_closed());
}

// --- end to end ---

#[tokio::test]
async fn lifecycle_creates_updates_soft_deletes_and_audits_in_order() {
    let server = MockServer::start();
    let svc = incidencias(&server);
    let ctx = ctx();

    let audit_crear = server.mock(|when, then| {
        when.method(POST)
            .path(format!("{}/tenants/t1/audit_logs", DOCS))
            .body_includes("\"stringValue\":\"crear\"");
        then.status(200).json_body(doc_body("log1", json!({})));
    });
    let audit_actualizar = server.mock(|when, then| {
        when.method(POST)
            .path(format!("{}/tenants/t1/audit_logs", DOCS))
            .body_includes("\"stringValue\":\"actualizar\"");
        then.status(200).json_body(doc_body("log2", json!({})));
    });
    let audit_eliminar = server.mock(|when, then| {
        when.method(POST)
            .path(format!("{}/tenants/t1/audit_logs", DOCS))
            .body_includes("\"stringValue\":\"eliminar\"");
        then.status(200).json_body(doc_body("log3", json!({})));
    });

    // create
    let mut add = server.mock(|when, then| {
        when.method(POST).path(format!("{}/tenants/t1/incidencias", DOCS));
        then.status(200).json_body(doc_body("abc", json!({})));
    });
    let id = svc.create_auto_id(&ctx, &nueva("Bus-1")).await.unwrap();
    assert_eq!(id, "abc");
    add.delete();

    // rename
    let mut get1 = server.mock(|when, then| {
        when.method(GET)
            .path(format!("{}/tenants/t1/incidencias/abc", DOCS));
        then.status(200)
            .json_body(doc_body("abc", doc_fields("Bus-1", 1, false)));
    });
    let mut patch1 = server.mock(|when, then| {
        when.method(PATCH)
            .path(format!("{}/tenants/t1/incidencias/abc", DOCS))
            .body_includes("Bus-1-renamed");
        then.status(200).json_body(doc_body("abc", json!({})));
    });
    let mut patch = Map::new();
    patch.insert("nombre".to_string(), json!("Bus-1-renamed"));
    svc.update_partial(&ctx, "abc", patch).await.unwrap();
    get1.delete();
    patch1.delete();

    // soft delete
    let mut get2 = server.mock(|when, then| {
        when.method(GET)
            .path(format!("{}/tenants/t1/incidencias/abc", DOCS));
        then.status(200)
            .json_body(doc_body("abc", doc_fields("Bus-1-renamed", 1, false)));
    });
    let mut patch2 = server.mock(|when, then| {
        when.method(PATCH)
            .path(format!("{}/tenants/t1/incidencias/abc", DOCS))
            .body_includes("\"booleanValue\":true");
        then.status(200).json_body(doc_body("abc", json!({})));
    });
    svc.soft_delete(&ctx, "abc").await.unwrap();
    get2.delete();
    patch2.delete();

    // invisible through get_by_id...
    server.mock(|when, then| {
        when.method(GET)
            .path(format!("{}/tenants/t1/incidencias/abc", DOCS));
        then.status(200)
            .json_body(doc_body("abc", doc_fields("Bus-1-renamed", 1, true)));
    });
    assert!(svc.get_by_id(&ctx, "abc").await.unwrap().is_none());

    // ...but listable when deleted records are requested.
    server.mock(|when, then| {
        when.method(POST).path(format!("{}/tenants/t1:runQuery", DOCS));
        then.status(200).json_body(json!([
            { "document": doc_body("abc", doc_fields("Bus-1-renamed", 1, true)) }
        ]));
    });
    let page = svc
        .list(
            &ctx,
            ListOptions {
                include_deleted: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].nombre, "Bus-1-renamed");
    assert!(page.items[0].meta.eliminado);

    // exactly one audit entry per mutation, in order
    assert_eq!(audit_crear.hits(), 1);
    assert_eq!(audit_actualizar.hits(), 1);
    assert_eq!(audit_eliminar.hits(), 1);
}

#[tokio::test]
async fn state_transitions_are_auditable() {
    let server = MockServer::start();
    let audit = crate::service::AuditService::new(test_firestore(&server));

    let entry = server.mock(|when, then| {
        when.method(POST)
            .path(format!("{}/tenants/t1/audit_logs", DOCS))
            .body_includes("\"stringValue\":\"cambio_estado\"")
            .body_includes("\"estado_anterior\"")
            .body_includes("abierta")
            .body_includes("en_curso");
        then.status(200).json_body(doc_body("log1", json!({})));
    });

    audit
        .log_cambio_estado(&ctx(), "orden_trabajo", "ot-1", "abierta", "en_curso")
        .await;
    entry.assert();
    assert_eq!(audit.failed_writes(), 0);
}

#[tokio::test]
async fn safe_variants_never_panic_on_failure() {
    let server = MockServer::start();
    let svc = incidencias(&server);

    server.mock(|when, then| {
        when.method(POST).path(format!("{}/tenants/t1/incidencias", DOCS));
        then.status(503).json_body(json!({
            "error": { "code": 503, "message": "backend unavailable", "status": "UNAVAILABLE" }
        }));
    });

    let outcome = svc.safe_create(&ctx(), &nueva("Bus-1")).await;
    assert!(!outcome.is_ok());
    assert_eq!(
        outcome.into_result().unwrap_err().kind,
        ErrorKind::Unavailable
    );
}
