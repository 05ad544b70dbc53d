use super::error::ServiceError;
use super::options::{OrderSpec, SortDirection};
use super::record::Record;
use crate::firestore::models::{ListenRequest, TargetChangeType};
use crate::firestore::snapshot::RawDocument;
use crate::firestore::Firestore;
use futures::StreamExt;
use serde_json::Value as JsonValue;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tokio::task::JoinHandle;
use tracing::debug;

/// Caller-owned handle to a live subscription.
///
/// The service keeps no registry of handles: lifetime management is entirely
/// the caller's. Dropping the handle does NOT cancel the subscription — the
/// underlying task keeps streaming (and paying for) updates until
/// [`unsubscribe`](Self::unsubscribe) is called or the process exits.
pub struct ListenerHandle {
    task: JoinHandle<()>,
}

impl ListenerHandle {
    /// Stops the subscription. Idempotent; safe to call from any thread.
    pub fn unsubscribe(&self) {
        self.task.abort();
    }

    /// True once the subscription has stopped, whether by `unsubscribe` or
    /// by a terminal stream error.
    pub fn is_closed(&self) -> bool {
        self.task.is_finished()
    }
}

pub(crate) fn is_soft_deleted(data: &JsonValue) -> bool {
    data.get("eliminado")
        .and_then(JsonValue::as_bool)
        .unwrap_or(false)
}

/// Subscribes to a single document. `on_data(None)` is delivered when the
/// document does not exist, is deleted, or is soft-deleted — the three are
/// indistinguishable from the callback, mirroring `get_by_id` visibility.
pub(crate) fn spawn_document_listener<T, F, E>(
    firestore: Firestore,
    request: ListenRequest,
    doc_name: String,
    mut on_data: F,
    mut on_error: E,
) -> ListenerHandle
where
    T: Record,
    F: FnMut(Option<T>) + Send + 'static,
    E: FnMut(ServiceError) + Send + 'static,
{
    let task = tokio::spawn(async move {
        let mut stream = match firestore.listen(&request).await {
            Ok(stream) => stream,
            Err(e) => {
                on_error(e.into());
                return;
            }
        };

        let mut synced = false;
        let mut seen_doc = false;

        while let Some(message) = stream.next().await {
            let response = match message {
                Ok(response) => response,
                Err(e) => {
                    on_error(e.into());
                    return;
                }
            };

            if let Some(change) = response.document_change {
                if change.document.name != doc_name {
                    continue;
                }
                seen_doc = true;
                match RawDocument::from_document(change.document) {
                    Ok(raw) if is_soft_deleted(&raw.data) => on_data(None),
                    Ok(raw) => match raw.decode::<T>() {
                        Ok(record) => on_data(Some(record)),
                        Err(e) => on_error(e.into()),
                    },
                    Err(e) => on_error(e.into()),
                }
            } else if let Some(delete) = response.document_delete {
                if delete.document == doc_name {
                    seen_doc = true;
                    on_data(None);
                }
            } else if let Some(remove) = response.document_remove {
                if remove.document == doc_name {
                    seen_doc = true;
                    on_data(None);
                }
            } else if let Some(target) = response.target_change {
                match target.target_change_type {
                    Some(TargetChangeType::Current) if !synced => {
                        synced = true;
                        // Initial sync with no document change: the document
                        // does not exist (or nothing matched the target).
                        if !seen_doc {
                            on_data(None);
                        }
                    }
                    Some(TargetChangeType::Reset) => {
                        synced = false;
                        seen_doc = false;
                    }
                    _ => {}
                }
            }
        }
        debug!(doc = %doc_name, "document listen stream ended");
    });

    ListenerHandle { task }
}

/// Subscribes to a query. After the initial sync marker, the full current
/// page — re-sorted locally by the query's orderings — is re-delivered on
/// every change.
pub(crate) fn spawn_query_listener<T, F, E>(
    firestore: Firestore,
    request: ListenRequest,
    order_by: Vec<OrderSpec>,
    page_size: usize,
    mut on_data: F,
    mut on_error: E,
) -> ListenerHandle
where
    T: Record,
    F: FnMut(Vec<T>) + Send + 'static,
    E: FnMut(ServiceError) + Send + 'static,
{
    let task = tokio::spawn(async move {
        let mut stream = match firestore.listen(&request).await {
            Ok(stream) => stream,
            Err(e) => {
                on_error(e.into());
                return;
            }
        };

        // Current result set keyed by resource name; names also serve as the
        // final ordering tie-break.
        let mut docs: BTreeMap<String, JsonValue> = BTreeMap::new();
        let mut synced = false;

        while let Some(message) = stream.next().await {
            let response = match message {
                Ok(response) => response,
                Err(e) => {
                    on_error(e.into());
                    return;
                }
            };

            let mut dirty = false;
            if let Some(change) = response.document_change {
                let removed = change
                    .removed_target_ids
                    .as_ref()
                    .is_some_and(|ids| !ids.is_empty());
                let name = change.document.name.clone();
                if removed {
                    dirty = docs.remove(&name).is_some();
                } else {
                    match RawDocument::from_document(change.document) {
                        Ok(raw) => {
                            docs.insert(name, raw.data);
                            dirty = true;
                        }
                        Err(e) => on_error(e.into()),
                    }
                }
            } else if let Some(delete) = response.document_delete {
                dirty = docs.remove(&delete.document).is_some();
            } else if let Some(remove) = response.document_remove {
                dirty = docs.remove(&remove.document).is_some();
            } else if let Some(target) = response.target_change {
                match target.target_change_type {
                    Some(TargetChangeType::Current) if !synced => {
                        synced = true;
                        dirty = true;
                    }
                    Some(TargetChangeType::Reset) => {
                        docs.clear();
                        synced = false;
                    }
                    _ => {}
                }
            }

            if synced && dirty {
                let page = assemble_page::<T>(&docs, &order_by, page_size, &mut on_error);
                on_data(page);
            }
        }
        debug!("query listen stream ended");
    });

    ListenerHandle { task }
}

fn assemble_page<T: Record>(
    docs: &BTreeMap<String, JsonValue>,
    order_by: &[OrderSpec],
    page_size: usize,
    on_error: &mut impl FnMut(ServiceError),
) -> Vec<T> {
    let mut entries: Vec<(&String, &JsonValue)> = docs.iter().collect();
    entries.sort_by(|(name_a, a), (name_b, b)| {
        for spec in order_by {
            let ord = compare_json(field_at(a, &spec.field_path), field_at(b, &spec.field_path));
            let ord = match spec.direction {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        name_a.cmp(name_b)
    });

    entries
        .into_iter()
        .take(page_size)
        .filter_map(|(_, data)| match serde_json::from_value(data.clone()) {
            Ok(record) => Some(record),
            Err(e) => {
                on_error(ServiceError::unknown(e.to_string()));
                None
            }
        })
        .collect()
}

fn field_at<'v>(data: &'v JsonValue, path: &str) -> Option<&'v JsonValue> {
    let mut current = data;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Total order over JSON values, approximating the backend's type ordering:
/// null < bool < number < string < array < object. Missing fields sort as
/// null.
fn compare_json(a: Option<&JsonValue>, b: Option<&JsonValue>) -> Ordering {
    fn rank(v: Option<&JsonValue>) -> u8 {
        match v {
            None | Some(JsonValue::Null) => 0,
            Some(JsonValue::Bool(_)) => 1,
            Some(JsonValue::Number(_)) => 2,
            Some(JsonValue::String(_)) => 3,
            Some(JsonValue::Array(_)) => 4,
            Some(JsonValue::Object(_)) => 5,
        }
    }

    match rank(a).cmp(&rank(b)) {
        Ordering::Equal => {}
        unequal => return unequal,
    }

    match (a, b) {
        (Some(JsonValue::Bool(x)), Some(JsonValue::Bool(y))) => x.cmp(y),
        (Some(JsonValue::Number(x)), Some(JsonValue::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(JsonValue::String(x)), Some(JsonValue::String(y))) => x.cmp(y),
        (Some(JsonValue::Array(x)), Some(JsonValue::Array(y))) => {
            for (xv, yv) in x.iter().zip(y.iter()) {
                let ord = compare_json(Some(xv), Some(yv));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Some(JsonValue::Object(_)), Some(JsonValue::Object(_))) => {
            let x = a.map(|v| v.to_string()).unwrap_or_default();
            let y = b.map(|v| v.to_string()).unwrap_or_default();
            x.cmp(&y)
        }
        _ => Ordering::Equal,
    }
}
