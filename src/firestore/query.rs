//! Firestore Query type
//!
//! A `Query` is immutable: every builder method validates its arguments and
//! returns a new `Query` with modified state. The wire-free [`QueryState`]
//! is what the datastore and the local cache evaluate.

use std::fmt;
use std::sync::Arc;

use super::aggregate_query::{AggregateField, AggregateQuery};
use super::datastore::RemoteDocument;
use super::document_reference::DocumentReference;
use super::document_snapshot::{DocumentSnapshot, SnapshotMetadata};
use super::field_path::{FieldPath, IntoFieldPath};
use super::field_value::Value;
use super::firestore::{Firestore, FirestoreInner};
use super::listener::{QuerySnapshotListener, SnapshotListener};
use super::metadata_changes::MetadataChanges;
use super::path::ResourcePath;
use super::query_snapshot::QuerySnapshot;
use super::settings::Source;
use super::snapshot_stream::QuerySnapshotStream;
use crate::error::{invalid_argument, FirebaseError, FirebaseResult};

/// Maximum number of values accepted by `in`, `not-in` and
/// `array-contains-any` filters
pub const MAX_DISJUNCTIVE_VALUES: usize = 30;

/// Sort direction for query ordering
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Smallest first
    #[default]
    Ascending,
    /// Largest first
    Descending,
}

/// Comparison applied by a field filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterOperator {
    /// `<`
    LessThan,
    /// `<=`
    LessThanOrEqual,
    /// `==`
    Equal,
    /// `!=`
    NotEqual,
    /// `>`
    GreaterThan,
    /// `>=`
    GreaterThanOrEqual,
    /// Array field contains the value
    ArrayContains,
    /// Array field contains any of the listed values
    ArrayContainsAny,
    /// Field equals one of the listed values
    In,
    /// Field equals none of the listed values
    NotIn,
}

impl FilterOperator {
    /// Range and negative operators; at most one field may carry them
    pub fn is_inequality(self) -> bool {
        matches!(
            self,
            FilterOperator::LessThan
                | FilterOperator::LessThanOrEqual
                | FilterOperator::GreaterThan
                | FilterOperator::GreaterThanOrEqual
                | FilterOperator::NotEqual
                | FilterOperator::NotIn
        )
    }

    /// Operators whose operand is a list of values
    pub fn takes_list(self) -> bool {
        matches!(
            self,
            FilterOperator::In | FilterOperator::NotIn | FilterOperator::ArrayContainsAny
        )
    }
}

/// A single `field op value` filter
#[derive(Debug, Clone, PartialEq)]
pub struct FieldFilter {
    pub(crate) field: FieldPath,
    pub(crate) op: FilterOperator,
    pub(crate) value: Value,
}

impl FieldFilter {
    /// Filtered field
    pub fn field(&self) -> &FieldPath {
        &self.field
    }

    /// Operator
    pub fn op(&self) -> FilterOperator {
        self.op
    }

    /// Operand; for document-id filters ids are already resolved to
    /// [`Value::Reference`]
    pub fn value(&self) -> &Value {
        &self.value
    }
}

/// One sort key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OrderBy {
    pub(crate) field: FieldPath,
    pub(crate) direction: Direction,
}

impl OrderBy {
    /// Sorted field
    pub fn field(&self) -> &FieldPath {
        &self.field
    }

    /// Sort direction
    pub fn direction(&self) -> Direction {
        self.direction
    }
}

/// Query cursor position, aligned with the effective ordering
#[derive(Debug, Clone, PartialEq)]
pub struct Bound {
    pub(crate) values: Vec<Value>,
    pub(crate) inclusive: bool,
}

impl Bound {
    /// Cursor values, one per leading ordering
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Whether a document exactly at the cursor is included
    pub fn inclusive(&self) -> bool {
        self.inclusive
    }
}

/// Which end of the ordered results a limit keeps
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum LimitType {
    /// Keep the first `n`
    #[default]
    First,
    /// Keep the last `n`, still returned in query order
    Last,
}

/// Internal query state that all query handles share
#[derive(Debug, Clone, PartialEq)]
pub struct QueryState {
    pub(crate) collection_path: ResourcePath,
    pub(crate) collection_group: Option<String>,
    pub(crate) filters: Vec<FieldFilter>,
    pub(crate) explicit_order: Vec<OrderBy>,
    pub(crate) limit: Option<u32>,
    pub(crate) limit_type: LimitType,
    pub(crate) start_at: Option<Bound>,
    pub(crate) end_at: Option<Bound>,
}

impl QueryState {
    pub(crate) fn for_collection(collection_path: ResourcePath) -> Self {
        Self {
            collection_path,
            collection_group: None,
            filters: Vec::new(),
            explicit_order: Vec::new(),
            limit: None,
            limit_type: LimitType::First,
            start_at: None,
            end_at: None,
        }
    }

    pub(crate) fn for_collection_group(collection_id: String) -> Self {
        Self {
            collection_group: Some(collection_id),
            ..Self::for_collection(ResourcePath::root())
        }
    }

    /// Collection queried (root for collection-group queries)
    pub fn collection_path(&self) -> &ResourcePath {
        &self.collection_path
    }

    /// Collection id matched anywhere in the database, for group queries
    pub fn collection_group(&self) -> Option<&str> {
        self.collection_group.as_deref()
    }

    /// Field filters, all of which must match
    pub fn filters(&self) -> &[FieldFilter] {
        &self.filters
    }

    /// Orderings as given by the caller
    pub fn explicit_order(&self) -> &[OrderBy] {
        &self.explicit_order
    }

    /// Result limit
    pub fn limit(&self) -> Option<u32> {
        self.limit
    }

    /// Which end the limit applies to
    pub fn limit_type(&self) -> LimitType {
        self.limit_type
    }

    /// Start cursor
    pub fn start_at(&self) -> Option<&Bound> {
        self.start_at.as_ref()
    }

    /// End cursor
    pub fn end_at(&self) -> Option<&Bound> {
        self.end_at.as_ref()
    }

    /// Field carrying the query's inequality filters, if any
    pub fn inequality_field(&self) -> Option<&FieldPath> {
        self.filters
            .iter()
            .find(|filter| filter.op.is_inequality())
            .map(|filter| &filter.field)
    }

    /// Effective ordering: the explicit orderings, or the inequality field
    /// when there are none, always ending with the document name
    pub fn normalized_order(&self) -> Vec<OrderBy> {
        let mut orders = self.explicit_order.clone();
        if orders.is_empty() {
            if let Some(field) = self.inequality_field() {
                orders.push(OrderBy {
                    field: field.clone(),
                    direction: Direction::Ascending,
                });
            }
        }
        if !orders.iter().any(|order| order.field.is_document_id()) {
            let direction = orders
                .last()
                .map(|order| order.direction)
                .unwrap_or_default();
            orders.push(OrderBy {
                field: FieldPath::document_id(),
                direction,
            });
        }
        orders
    }

    /// True if a document at `path` belongs to the queried collection(s)
    pub fn matches_path(&self, path: &ResourcePath) -> bool {
        if !path.is_document_path() {
            return false;
        }
        match &self.collection_group {
            Some(group) => {
                let segments = path.segments();
                segments[segments.len() - 2] == *group
                    && self.collection_path.is_prefix_of(path)
            }
            None => self.collection_path.is_immediate_parent_of(path),
        }
    }
}

/// Where a cursor position comes from
#[derive(Debug, Clone, PartialEq)]
pub enum CursorSource {
    /// The position of an existing document
    Snapshot(DocumentSnapshot),
    /// Field values for the leading orderings
    Values(Vec<Value>),
}

impl CursorSource {
    /// Validate loosely-typed cursor arguments: exactly one of a snapshot or
    /// a value list
    pub fn from_parts(
        snapshot: Option<DocumentSnapshot>,
        values: Option<Vec<Value>>,
    ) -> Result<Self, FirebaseError> {
        match (snapshot, values) {
            (Some(snapshot), None) => Ok(CursorSource::Snapshot(snapshot)),
            (None, Some(values)) => Ok(CursorSource::Values(values)),
            (Some(_), Some(_)) => Err(invalid_argument(
                "a cursor takes either a document snapshot or field values, not both",
            )),
            (None, None) => Err(invalid_argument(
                "a cursor requires a document snapshot or field values",
            )),
        }
    }
}

impl From<DocumentSnapshot> for CursorSource {
    fn from(snapshot: DocumentSnapshot) -> Self {
        CursorSource::Snapshot(snapshot)
    }
}

impl From<&DocumentSnapshot> for CursorSource {
    fn from(snapshot: &DocumentSnapshot) -> Self {
        CursorSource::Snapshot(snapshot.clone())
    }
}

impl From<Vec<Value>> for CursorSource {
    fn from(values: Vec<Value>) -> Self {
        CursorSource::Values(values)
    }
}

#[derive(Clone, Copy)]
enum BoundEdge {
    Start,
    End,
}

/// A query over one collection or a collection group
#[derive(Clone)]
pub struct Query {
    pub(crate) firestore: Arc<FirestoreInner>,
    pub(crate) state: QueryState,
}

impl Query {
    pub(crate) fn new(firestore: Arc<FirestoreInner>, state: QueryState) -> Self {
        Self { firestore, state }
    }

    fn with_state(&self, state: QueryState) -> Self {
        Self {
            firestore: Arc::clone(&self.firestore),
            state,
        }
    }

    /// Query definition
    pub fn state(&self) -> &QueryState {
        &self.state
    }

    /// The Firestore instance this query belongs to
    pub fn firestore(&self) -> Firestore {
        Firestore::from_inner(Arc::clone(&self.firestore))
    }

    /// Filter documents by `field op value`
    ///
    /// Fails with `InvalidArgument` on an invalid operand (a sentinel, a
    /// list operator without a 1 to 30 element array), on inequality filters
    /// over two different fields, or when an explicit first ordering is not
    /// the inequality field.
    pub fn where_filter(
        &self,
        field: impl IntoFieldPath,
        op: FilterOperator,
        value: impl Into<Value>,
    ) -> FirebaseResult<Query> {
        let field = field.into_field_path()?;
        let value = value.into();
        if value.contains_sentinel() {
            return Err(invalid_argument(format!(
                "sentinel values cannot be used in a filter on '{}'",
                field
            )));
        }

        let value = if op.takes_list() {
            let elements = match value {
                Value::Array(elements) => elements,
                other => {
                    return Err(invalid_argument(format!(
                        "{:?} filter on '{}' requires an array, got {:?}",
                        op, field, other
                    )))
                }
            };
            if elements.is_empty() || elements.len() > MAX_DISJUNCTIVE_VALUES {
                return Err(invalid_argument(format!(
                    "{:?} filter on '{}' requires between 1 and {} values, got {}",
                    op,
                    field,
                    MAX_DISJUNCTIVE_VALUES,
                    elements.len()
                )));
            }
            if field.is_document_id() {
                Value::Array(
                    elements
                        .into_iter()
                        .map(|element| self.document_key_value(element, "where_filter"))
                        .collect::<Result<_, _>>()?,
                )
            } else {
                Value::Array(elements)
            }
        } else if field.is_document_id() {
            if op == FilterOperator::ArrayContains {
                return Err(invalid_argument(
                    "array-contains cannot be used on the document id",
                ));
            }
            self.document_key_value(value, "where_filter")?
        } else {
            value
        };

        if value.is_null() && !matches!(op, FilterOperator::Equal | FilterOperator::NotEqual) {
            return Err(invalid_argument(format!(
                "null only supports equality comparisons (field '{}')",
                field
            )));
        }

        let state = &self.state;
        if op.is_inequality() {
            if let Some(existing) = state.inequality_field() {
                if *existing != field {
                    return Err(invalid_argument(format!(
                        "inequality filters on multiple fields are not supported ('{}' and '{}')",
                        existing, field
                    )));
                }
            }
            if let Some(first) = state.explicit_order.first() {
                if first.field != field {
                    return Err(invalid_argument(format!(
                        "first order_by on '{}' must match the inequality field '{}'",
                        first.field, field
                    )));
                }
            }
            if state.explicit_order.is_empty()
                && (state.start_at.is_some() || state.end_at.is_some())
            {
                return Err(invalid_argument(
                    "add an order_by before a cursor when filtering with an inequality",
                ));
            }
        }
        let conflicting = |a: FilterOperator, b: FilterOperator| {
            (op == a && state.filters.iter().any(|f| f.op == b))
                || (op == b && state.filters.iter().any(|f| f.op == a))
        };
        if conflicting(FilterOperator::NotIn, FilterOperator::NotEqual)
            || conflicting(FilterOperator::ArrayContains, FilterOperator::ArrayContainsAny)
            || conflicting(FilterOperator::NotIn, FilterOperator::In)
            || state.filters.iter().any(|f| f.op == op && op.takes_list())
        {
            return Err(invalid_argument(format!(
                "{:?} cannot be combined with the query's existing filters",
                op
            )));
        }

        let mut state = state.clone();
        state.filters.push(FieldFilter { field, op, value });
        Ok(self.with_state(state))
    }

    /// Filter documents where field equals value
    pub fn where_equal_to(&self, field: impl IntoFieldPath, value: impl Into<Value>) -> FirebaseResult<Query> {
        self.where_filter(field, FilterOperator::Equal, value)
    }

    /// Filter documents where field does not equal value
    pub fn where_not_equal_to(&self, field: impl IntoFieldPath, value: impl Into<Value>) -> FirebaseResult<Query> {
        self.where_filter(field, FilterOperator::NotEqual, value)
    }

    /// Filter documents where field is less than value
    pub fn where_less_than(&self, field: impl IntoFieldPath, value: impl Into<Value>) -> FirebaseResult<Query> {
        self.where_filter(field, FilterOperator::LessThan, value)
    }

    /// Filter documents where field is less than or equal to value
    pub fn where_less_than_or_equal_to(
        &self,
        field: impl IntoFieldPath,
        value: impl Into<Value>,
    ) -> FirebaseResult<Query> {
        self.where_filter(field, FilterOperator::LessThanOrEqual, value)
    }

    /// Filter documents where field is greater than value
    pub fn where_greater_than(&self, field: impl IntoFieldPath, value: impl Into<Value>) -> FirebaseResult<Query> {
        self.where_filter(field, FilterOperator::GreaterThan, value)
    }

    /// Filter documents where field is greater than or equal to value
    pub fn where_greater_than_or_equal_to(
        &self,
        field: impl IntoFieldPath,
        value: impl Into<Value>,
    ) -> FirebaseResult<Query> {
        self.where_filter(field, FilterOperator::GreaterThanOrEqual, value)
    }

    /// Filter documents where array field contains value
    pub fn where_array_contains(&self, field: impl IntoFieldPath, value: impl Into<Value>) -> FirebaseResult<Query> {
        self.where_filter(field, FilterOperator::ArrayContains, value)
    }

    /// Filter documents where array field contains any of the values
    pub fn where_array_contains_any(&self, field: impl IntoFieldPath, values: Vec<Value>) -> FirebaseResult<Query> {
        self.where_filter(field, FilterOperator::ArrayContainsAny, Value::Array(values))
    }

    /// Filter documents where field value is in the given list
    pub fn where_in(&self, field: impl IntoFieldPath, values: Vec<Value>) -> FirebaseResult<Query> {
        self.where_filter(field, FilterOperator::In, Value::Array(values))
    }

    /// Filter documents where field value is not in the given list
    pub fn where_not_in(&self, field: impl IntoFieldPath, values: Vec<Value>) -> FirebaseResult<Query> {
        self.where_filter(field, FilterOperator::NotIn, Value::Array(values))
    }

    /// Order results by field
    pub fn order_by(&self, field: impl IntoFieldPath, direction: Direction) -> FirebaseResult<Query> {
        let field = field.into_field_path()?;
        if self.state.start_at.is_some() || self.state.end_at.is_some() {
            return Err(invalid_argument(
                "order_by must be called before start_at, start_after, end_at or end_before",
            ));
        }
        if self.state.explicit_order.is_empty() {
            if let Some(inequality) = self.state.inequality_field() {
                if *inequality != field {
                    return Err(invalid_argument(format!(
                        "first order_by on '{}' must match the inequality field '{}'",
                        field, inequality
                    )));
                }
            }
        }
        let mut state = self.state.clone();
        state.explicit_order.push(OrderBy { field, direction });
        Ok(self.with_state(state))
    }

    /// Keep only the first `limit` results
    pub fn limit(&self, limit: i32) -> FirebaseResult<Query> {
        self.with_limit(limit, LimitType::First, "limit")
    }

    /// Keep only the last `limit` results; requires an explicit ordering
    pub fn limit_to_last(&self, limit: i32) -> FirebaseResult<Query> {
        self.with_limit(limit, LimitType::Last, "limit_to_last")
    }

    fn with_limit(&self, limit: i32, limit_type: LimitType, method: &str) -> FirebaseResult<Query> {
        if limit <= 0 {
            return Err(invalid_argument(format!(
                "{}() requires a positive value, got {}",
                method, limit
            )));
        }
        let mut state = self.state.clone();
        state.limit = Some(limit as u32);
        state.limit_type = limit_type;
        Ok(self.with_state(state))
    }

    /// Start at the given position, inclusive
    pub fn start_at(&self, cursor: impl Into<CursorSource>) -> FirebaseResult<Query> {
        self.with_bound(cursor.into(), BoundEdge::Start, true, "start_at")
    }

    /// Start after the given position
    pub fn start_after(&self, cursor: impl Into<CursorSource>) -> FirebaseResult<Query> {
        self.with_bound(cursor.into(), BoundEdge::Start, false, "start_after")
    }

    /// End at the given position, inclusive
    pub fn end_at(&self, cursor: impl Into<CursorSource>) -> FirebaseResult<Query> {
        self.with_bound(cursor.into(), BoundEdge::End, true, "end_at")
    }

    /// End before the given position
    pub fn end_before(&self, cursor: impl Into<CursorSource>) -> FirebaseResult<Query> {
        self.with_bound(cursor.into(), BoundEdge::End, false, "end_before")
    }

    fn with_bound(
        &self,
        cursor: CursorSource,
        edge: BoundEdge,
        inclusive: bool,
        method: &str,
    ) -> FirebaseResult<Query> {
        let values = match cursor {
            CursorSource::Snapshot(snapshot) => self.bound_from_snapshot(&snapshot, method)?,
            CursorSource::Values(values) => self.bound_from_values(values, method)?,
        };
        let bound = Bound { values, inclusive };
        let mut state = self.state.clone();
        match edge {
            BoundEdge::Start => state.start_at = Some(bound),
            BoundEdge::End => state.end_at = Some(bound),
        }
        Ok(self.with_state(state))
    }

    fn bound_from_snapshot(&self, snapshot: &DocumentSnapshot, method: &str) -> FirebaseResult<Vec<Value>> {
        if !snapshot.exists() {
            return Err(invalid_argument(format!(
                "{}() was given a snapshot of missing document '{}'",
                method,
                snapshot.reference.path()
            )));
        }
        self.state
            .normalized_order()
            .iter()
            .map(|order| {
                if order.field.is_document_id() {
                    return Ok(Value::Reference(snapshot.reference.path.clone()));
                }
                snapshot.get_path(&order.field).cloned().ok_or_else(|| {
                    invalid_argument(format!(
                        "{}() snapshot is missing ordered field '{}'",
                        method, order.field
                    ))
                })
            })
            .collect()
    }

    fn bound_from_values(&self, values: Vec<Value>, method: &str) -> FirebaseResult<Vec<Value>> {
        if values.is_empty() {
            return Err(invalid_argument(format!(
                "{}() requires at least one value",
                method
            )));
        }
        if values.len() > self.state.explicit_order.len() {
            return Err(invalid_argument(format!(
                "too many arguments to {}(): got {} values for {} order_by clauses",
                method,
                values.len(),
                self.state.explicit_order.len()
            )));
        }
        values
            .into_iter()
            .zip(&self.state.explicit_order)
            .map(|(value, order)| {
                if value.contains_sentinel() {
                    Err(invalid_argument(format!(
                        "sentinel values cannot be used in {}()",
                        method
                    )))
                } else if order.field.is_document_id() {
                    self.document_key_value(value, method)
                } else {
                    Ok(value)
                }
            })
            .collect()
    }

    /// Resolve a document id operand to a full document reference
    fn document_key_value(&self, value: Value, method: &str) -> FirebaseResult<Value> {
        match value {
            Value::Reference(path) if path.is_document_path() => Ok(Value::Reference(path)),
            Value::String(id) => {
                if self.state.collection_group.is_none() && id.contains('/') {
                    return Err(invalid_argument(format!(
                        "{}(): document id '{}' must not contain '/'",
                        method, id
                    )));
                }
                let path = self.state.collection_path.child(&id)?;
                if !path.is_document_path() {
                    return Err(invalid_argument(format!(
                        "{}(): '{}' is not a document path",
                        method, path
                    )));
                }
                Ok(Value::Reference(path))
            }
            other => Err(invalid_argument(format!(
                "{}(): document id values must be strings or references, got {:?}",
                method, other
            ))),
        }
    }

    pub(crate) fn validate_for_execution(&self) -> FirebaseResult<()> {
        if self.state.limit_type == LimitType::Last && self.state.explicit_order.is_empty() {
            return Err(invalid_argument(
                "limit_to_last() queries require at least one order_by clause",
            ));
        }
        Ok(())
    }

    pub(crate) fn snapshot_of(&self, remote: RemoteDocument, metadata: SnapshotMetadata) -> DocumentSnapshot {
        let reference = DocumentReference::new(remote.path.clone(), Arc::clone(&self.firestore));
        DocumentSnapshot::from_remote(reference, remote, metadata)
    }

    /// Execute the query and return results
    pub async fn get(&self) -> FirebaseResult<QuerySnapshot> {
        self.get_with_source(Source::Default).await
    }

    /// Execute the query with specified source
    pub async fn get_with_source(&self, source: Source) -> FirebaseResult<QuerySnapshot> {
        self.validate_for_execution()?;
        let (documents, from_cache) = self.firestore.run_query(&self.state, source).await?;
        let metadata = SnapshotMetadata::from_cache(from_cache);
        let documents = documents
            .into_iter()
            .map(|remote| self.snapshot_of(remote, metadata))
            .collect();
        Ok(QuerySnapshot::new(self.clone(), documents, None, metadata))
    }

    /// Create an idle snapshot listener for this query
    ///
    /// Nothing is registered with the datastore until the first
    /// [`SnapshotListener::subscribe`].
    pub fn on_snapshot(&self, metadata_changes: MetadataChanges) -> FirebaseResult<QuerySnapshotListener> {
        self.validate_for_execution()?;
        Ok(SnapshotListener::for_query(self.clone(), metadata_changes))
    }

    /// Listen to query result changes, attaching immediately
    ///
    /// The stream is cancelled automatically when dropped.
    pub fn listen(&self, metadata_changes: MetadataChanges) -> FirebaseResult<QuerySnapshotStream> {
        self.on_snapshot(metadata_changes)?.subscribe()
    }

    /// Count the documents matching this query
    pub fn count(&self) -> AggregateQuery {
        AggregateQuery::new(self.clone(), vec![AggregateField::count()])
    }

    /// Compute several aggregations over this query
    pub fn aggregate(&self, fields: Vec<AggregateField>) -> FirebaseResult<AggregateQuery> {
        AggregateQuery::try_new(self.clone(), fields)
    }
}

impl PartialEq for Query {
    fn eq(&self, other: &Self) -> bool {
        self.firestore.client_id == other.firestore.client_id && self.state == other.state
    }
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query").field("state", &self.state).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firestore::field_value::MapValue;
    use crate::firestore::test_support::memory_firestore;

    fn cities() -> Query {
        (*memory_firestore().collection("cities").unwrap()).clone()
    }

    #[test]
    fn test_builders_are_immutable() {
        let base = cities();
        let filtered = base.where_equal_to("state", "CA").unwrap();
        assert!(base.state().filters().is_empty());
        assert_eq!(filtered.state().filters().len(), 1);
    }

    #[test]
    fn test_limit_validation() {
        assert!(cities().limit(0).is_err());
        assert!(cities().limit(-1).is_err());
        assert_eq!(cities().limit(2).unwrap().state().limit(), Some(2));
    }

    #[test]
    fn test_limit_to_last_requires_order() {
        let query = cities().limit_to_last(1).unwrap();
        assert!(query.validate_for_execution().is_err());
        let ordered = cities()
            .order_by("population", Direction::Ascending)
            .unwrap()
            .limit_to_last(1)
            .unwrap();
        assert!(ordered.validate_for_execution().is_ok());
    }

    #[test]
    fn test_list_operand_validation() {
        assert!(cities().where_in("state", vec![]).is_err());
        let too_many: Vec<Value> = (0..31).map(Value::from).collect();
        assert!(cities().where_in("state", too_many).is_err());
        let thirty: Vec<Value> = (0..30).map(Value::from).collect();
        assert!(cities().where_in("state", thirty).is_ok());
        assert!(cities()
            .where_filter("state", FilterOperator::In, "CA")
            .is_err());
    }

    #[test]
    fn test_inequality_rules() {
        let query = cities().where_greater_than("population", 100).unwrap();
        assert!(query.where_less_than("area", 5).is_err());
        assert!(query.where_less_than("population", 500).is_ok());
        assert!(query.order_by("name", Direction::Ascending).is_err());
        assert!(query.order_by("population", Direction::Descending).is_ok());

        let ordered = cities().order_by("name", Direction::Ascending).unwrap();
        assert!(ordered.where_greater_than("population", 100).is_err());
    }

    #[test]
    fn test_null_only_in_equality() {
        assert!(cities().where_equal_to("state", Value::Null).is_ok());
        assert!(cities().where_less_than("state", Value::Null).is_err());
    }

    #[test]
    fn test_sentinel_operand_rejected() {
        assert!(cities()
            .where_equal_to("updated", Value::server_timestamp())
            .is_err());
    }

    #[test]
    fn test_normalized_order() {
        let plain = cities().state().normalized_order();
        assert_eq!(plain.len(), 1);
        assert!(plain[0].field().is_document_id());

        let inequality = cities().where_greater_than("population", 1).unwrap();
        let order = inequality.state().normalized_order();
        assert_eq!(order[0].field().canonical_string(), "population");
        assert!(order[1].field().is_document_id());

        let descending = cities().order_by("name", Direction::Descending).unwrap();
        let order = descending.state().normalized_order();
        assert_eq!(order[1].direction(), Direction::Descending);
    }

    #[test]
    fn test_cursor_from_parts() {
        let values = Some(vec![Value::from(1)]);
        assert!(matches!(
            CursorSource::from_parts(None, values.clone()),
            Ok(CursorSource::Values(_))
        ));
        assert_eq!(
            CursorSource::from_parts(None, None).unwrap_err().code(),
            "invalid-argument"
        );

        let db = memory_firestore();
        let snapshot = DocumentSnapshot {
            reference: db.document("cities/SF").unwrap(),
            data: Some(MapValue::new().with("population", 1)),
            update_time: None,
            metadata: SnapshotMetadata::default(),
        };
        assert_eq!(
            CursorSource::from_parts(Some(snapshot), values).unwrap_err().code(),
            "invalid-argument"
        );
    }

    #[test]
    fn test_cursor_value_validation() {
        let ordered = cities().order_by("population", Direction::Ascending).unwrap();
        assert!(ordered.start_at(Vec::<Value>::new()).is_err());
        assert!(ordered
            .start_at(vec![Value::from(1), Value::from(2)])
            .is_err());
        let started = ordered.start_at(vec![Value::from(1)]).unwrap();
        assert!(started.state().start_at().unwrap().inclusive());
        assert!(started.order_by("name", Direction::Ascending).is_err());
    }

    #[test]
    fn test_snapshot_cursor() {
        let db = memory_firestore();
        let query = (*db.collection("cities").unwrap())
            .clone()
            .order_by("population", Direction::Ascending)
            .unwrap();
        let missing = DocumentSnapshot {
            reference: db.document("cities/SF").unwrap(),
            data: None,
            update_time: None,
            metadata: SnapshotMetadata::default(),
        };
        assert!(query.start_after(&missing).is_err());

        let existing = DocumentSnapshot {
            data: Some(MapValue::new().with("population", 10)),
            ..missing
        };
        let query = query.start_after(&existing).unwrap();
        let bound = query.state().start_at().unwrap();
        assert!(!bound.inclusive());
        assert_eq!(bound.values()[0], Value::from(10));
        assert_eq!(
            bound.values()[1],
            Value::Reference(ResourcePath::parse("cities/SF").unwrap())
        );
    }

    #[test]
    fn test_document_id_filter_resolves_reference() {
        let query = cities()
            .where_equal_to(FieldPath::document_id(), "SF")
            .unwrap();
        assert_eq!(
            query.state().filters()[0].value(),
            &Value::Reference(ResourcePath::parse("cities/SF").unwrap())
        );
        assert!(cities()
            .where_equal_to(FieldPath::document_id(), "a/b")
            .is_err());
    }

    #[test]
    fn test_collection_group_matching() {
        let state = QueryState::for_collection_group("landmarks".to_string());
        assert!(state.matches_path(&ResourcePath::parse("cities/SF/landmarks/bridge").unwrap()));
        assert!(state.matches_path(&ResourcePath::parse("landmarks/tower").unwrap()));
        assert!(!state.matches_path(&ResourcePath::parse("cities/SF").unwrap()));

        let state = QueryState::for_collection(ResourcePath::parse("cities").unwrap());
        assert!(state.matches_path(&ResourcePath::parse("cities/SF").unwrap()));
        assert!(!state.matches_path(&ResourcePath::parse("cities/SF/landmarks/bridge").unwrap()));
    }
}
