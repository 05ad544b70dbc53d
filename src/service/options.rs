use crate::firestore::models::{self, Direction, FieldOperator};
use serde_json::Value as JsonValue;

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const DEFAULT_SEARCH_LIMIT: u32 = 20;
pub const DEFAULT_LISTEN_PAGE_SIZE: u32 = 50;

/// Comparison/containment operators accepted by list filters, mirroring the
/// backend's native query operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    ArrayContains,
    ArrayContainsAny,
    In,
}

impl FieldOp {
    pub(crate) fn wire(self) -> FieldOperator {
        match self {
            FieldOp::Eq => FieldOperator::Equal,
            FieldOp::Ne => FieldOperator::NotEqual,
            FieldOp::Lt => FieldOperator::LessThan,
            FieldOp::Le => FieldOperator::LessThanOrEqual,
            FieldOp::Gt => FieldOperator::GreaterThan,
            FieldOp::Ge => FieldOperator::GreaterThanOrEqual,
            FieldOp::ArrayContains => FieldOperator::ArrayContains,
            FieldOp::ArrayContainsAny => FieldOperator::ArrayContainsAny,
            FieldOp::In => FieldOperator::In,
        }
    }
}

/// One `{field, op, value}` filter triple. Filters on the same query
/// AND-compose.
#[derive(Debug, Clone)]
pub struct FieldFilterSpec {
    pub field_path: String,
    pub op: FieldOp,
    pub value: JsonValue,
}

impl FieldFilterSpec {
    pub fn new(field_path: impl Into<String>, op: FieldOp, value: JsonValue) -> Self {
        Self {
            field_path: field_path.into(),
            op,
            value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub(crate) fn wire(self) -> Direction {
        match self {
            SortDirection::Asc => Direction::Ascending,
            SortDirection::Desc => Direction::Descending,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrderSpec {
    pub field_path: String,
    pub direction: SortDirection,
}

impl OrderSpec {
    pub fn asc(field_path: impl Into<String>) -> Self {
        Self {
            field_path: field_path.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field_path: impl Into<String>) -> Self {
        Self {
            field_path: field_path.into(),
            direction: SortDirection::Desc,
        }
    }
}

/// Options for [`CollectionService::list`](crate::service::CollectionService::list).
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    /// Page size; defaults to [`DEFAULT_PAGE_SIZE`].
    pub page_size: Option<u32>,
    pub filters: Vec<FieldFilterSpec>,
    pub order_by: Vec<OrderSpec>,
    /// Continuation cursor from a previous page's `last_doc`.
    pub start_after: Option<PageCursor>,
    /// Include soft-deleted records. Off by default.
    pub include_deleted: bool,
}

/// Options for term search.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    /// Array field holding the precomputed search tokens; defaults to
    /// `searchTerms`.
    pub field: Option<String>,
    /// Result cap; defaults to [`DEFAULT_SEARCH_LIMIT`].
    pub limit: Option<u32>,
    pub include_deleted: bool,
}

/// Options for realtime list subscriptions. No cursor: listeners re-deliver
/// the full current page on every change within the limit window.
#[derive(Debug, Clone, Default)]
pub struct ListenOptions {
    /// Page size; defaults to [`DEFAULT_LISTEN_PAGE_SIZE`].
    pub page_size: Option<u32>,
    pub filters: Vec<FieldFilterSpec>,
    pub order_by: Vec<OrderSpec>,
    pub include_deleted: bool,
}

/// Opaque continuation cursor: the order-by values of the last document of a
/// page, ending with its resource name as the total tie-break.
#[derive(Debug, Clone)]
pub struct PageCursor {
    pub(crate) values: Vec<models::Value>,
}

/// One page of list results.
#[derive(Debug, Clone)]
pub struct ListPage<T> {
    pub items: Vec<T>,
    /// Cursor positioned at the last item, for fetching the next page.
    /// Absent on an empty page.
    pub last_doc: Option<PageCursor>,
    pub has_more: bool,
}
