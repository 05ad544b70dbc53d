use super::convert::encode_value;
use super::models::{
    CollectionSelector, CompositeFilter, CompositeOperator, Cursor, Direction, FieldFilter,
    FieldOperator, FieldReference, FilterType, Order, QueryFilter, RunQueryRequest,
    RunQueryResponse, StructuredQuery,
};
use super::snapshot::RawDocument;
use super::FirestoreError;
use crate::core::read_error_response;
use reqwest::header;
use reqwest_middleware::ClientWithMiddleware;
use serde_json::Value as JsonValue;

/// A structured-query definition against a single collection, built up with
/// chained filters, orderings, a limit and an optional continuation cursor.
/// Filters AND-compose.
#[derive(Clone, Debug)]
pub struct Query {
    pub(crate) query: StructuredQuery,
}

impl Query {
    pub fn collection(collection_id: impl Into<String>) -> Self {
        Self {
            query: StructuredQuery {
                from: Some(vec![CollectionSelector {
                    collection_id: collection_id.into(),
                    all_descendants: None,
                }]),
                ..StructuredQuery::default()
            },
        }
    }

    pub fn where_field(
        mut self,
        field: &str,
        op: FieldOperator,
        value: &JsonValue,
    ) -> Result<Self, FirestoreError> {
        let filter = QueryFilter {
            filter_type: Some(FilterType::FieldFilter(FieldFilter {
                field: FieldReference {
                    field_path: field.to_string(),
                },
                op,
                value: encode_value(value)?,
            })),
        };

        self.query.where_clause = Some(match self.query.where_clause.take() {
            None => filter,
            // Fold into an existing AND composite instead of nesting.
            Some(existing) => {
                let filters = match existing.filter_type {
                    Some(FilterType::CompositeFilter(cf))
                        if cf.op == CompositeOperator::And =>
                    {
                        let mut filters = cf.filters;
                        filters.push(filter);
                        filters
                    }
                    _ => vec![existing, filter],
                };
                QueryFilter {
                    filter_type: Some(FilterType::CompositeFilter(CompositeFilter {
                        op: CompositeOperator::And,
                        filters,
                    })),
                }
            }
        });

        Ok(self)
    }

    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        let order = Order {
            field: FieldReference {
                field_path: field.to_string(),
            },
            direction,
        };
        self.query.order_by.get_or_insert_with(Vec::new).push(order);
        self
    }

    /// True if an explicit ordering on `field` is already present.
    pub fn orders_on(&self, field: &str) -> bool {
        self.query
            .order_by
            .as_ref()
            .is_some_and(|orders| orders.iter().any(|o| o.field.field_path == field))
    }

    pub fn limit(mut self, limit: i32) -> Self {
        self.query.limit = Some(limit);
        self
    }

    /// Continues strictly after the document whose order-by values are held
    /// by `cursor`.
    pub fn start_after(mut self, cursor: Cursor) -> Self {
        self.query.start_at = Some(Cursor {
            before: false,
            ..cursor
        });
        self
    }
}

/// A [`Query`] bound to a client and a parent path, ready to run.
#[derive(Clone)]
pub struct ExecutableQuery<'a> {
    pub(crate) client: &'a ClientWithMiddleware,
    pub(crate) parent_url: String,
    pub(crate) query: Query,
}

impl<'a> ExecutableQuery<'a> {
    pub(crate) fn new(
        client: &'a ClientWithMiddleware,
        parent_url: String,
        query: Query,
    ) -> Self {
        Self {
            client,
            parent_url,
            query,
        }
    }

    pub(crate) fn structured(&self) -> StructuredQuery {
        self.query.query.clone()
    }

    // Builder proxies onto the underlying Query.

    pub fn where_field(
        mut self,
        field: &str,
        op: FieldOperator,
        value: &JsonValue,
    ) -> Result<Self, FirestoreError> {
        self.query = self.query.where_field(field, op, value)?;
        Ok(self)
    }

    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.query = self.query.order_by(field, direction);
        self
    }

    pub fn orders_on(&self, field: &str) -> bool {
        self.query.orders_on(field)
    }

    pub fn limit(mut self, limit: i32) -> Self {
        self.query = self.query.limit(limit);
        self
    }

    pub fn start_after(mut self, cursor: Cursor) -> Self {
        self.query = self.query.start_after(cursor);
        self
    }

    /// Runs the query and collects the matching documents.
    pub async fn run(&self) -> Result<Vec<RawDocument>, FirestoreError> {
        let url = format!("{}:runQuery", self.parent_url);

        let request = RunQueryRequest {
            structured_query: self.query.query.clone(),
        };

        let response = self
            .client
            .post(&url)
            .header(header::CONTENT_TYPE, "application/json")
            .body(serde_json::to_vec(&request)?)
            .send()
            .await?;

        if !response.status().is_success() {
            let (status, message) = read_error_response(response, "run query failed").await;
            return Err(FirestoreError::Api { status, message });
        }

        let chunks: Vec<RunQueryResponse> = response.json().await?;

        let mut documents = Vec::new();
        for chunk in chunks {
            if let Some(doc) = chunk.document {
                documents.push(RawDocument::from_document(doc)?);
            }
        }
        Ok(documents)
    }
}
