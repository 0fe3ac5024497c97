//! Query evaluation over a set of candidate documents
//!
//! Used by the in-process datastore to answer queries and by the local
//! cache to answer them offline, so both agree on filter, ordering, cursor
//! and limit semantics.

use std::cmp::Ordering;

use super::datastore::RemoteDocument;
use super::field_path::FieldPath;
use super::field_value::Value;
use super::query::{Bound, Direction, FieldFilter, FilterOperator, LimitType, OrderBy, QueryState};

/// Filter, order, bound and limit `documents` according to `query`
pub(crate) fn apply_query(documents: Vec<RemoteDocument>, query: &QueryState) -> Vec<RemoteDocument> {
    let order_by = query.normalized_order();
    let mut results: Vec<RemoteDocument> = documents
        .into_iter()
        .filter(|doc| matches(doc, query, &order_by))
        .collect();

    results.sort_by(|left, right| compare_documents(left, right, &order_by));

    if let Some(bound) = query.start_at() {
        results.retain(|doc| !is_before_start(doc, bound, &order_by));
    }
    if let Some(bound) = query.end_at() {
        results.retain(|doc| !is_after_end(doc, bound, &order_by));
    }

    if let Some(limit) = query.limit() {
        let limit = limit as usize;
        if results.len() > limit {
            match query.limit_type() {
                LimitType::First => results.truncate(limit),
                LimitType::Last => {
                    let start = results.len() - limit;
                    results.drain(..start);
                }
            }
        }
    }
    results
}

/// True if a single document belongs to the query's result set, ignoring
/// cursors and limits
pub(crate) fn matches(doc: &RemoteDocument, query: &QueryState, order_by: &[OrderBy]) -> bool {
    if !doc.exists() || !query.matches_path(&doc.path) {
        return false;
    }
    // Documents without an ordered field never appear in ordered results
    let has_ordered_fields = order_by
        .iter()
        .all(|order| field_value(doc, &order.field).is_some());
    has_ordered_fields
        && query
            .filters()
            .iter()
            .all(|filter| satisfies(doc, filter))
}

fn satisfies(doc: &RemoteDocument, filter: &FieldFilter) -> bool {
    let Some(value) = field_value(doc, &filter.field) else {
        return false;
    };
    let operand = &filter.value;
    match filter.op {
        FilterOperator::Equal => value.query_equals(operand),
        FilterOperator::NotEqual => !value.query_equals(operand),
        FilterOperator::LessThan => range_compare(&value, operand) == Some(Ordering::Less),
        FilterOperator::LessThanOrEqual => matches!(
            range_compare(&value, operand),
            Some(Ordering::Less | Ordering::Equal)
        ),
        FilterOperator::GreaterThan => range_compare(&value, operand) == Some(Ordering::Greater),
        FilterOperator::GreaterThanOrEqual => matches!(
            range_compare(&value, operand),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        FilterOperator::ArrayContains => value
            .as_array()
            .is_some_and(|elements| elements.iter().any(|e| e.query_equals(operand))),
        FilterOperator::ArrayContainsAny => match (value.as_array(), operand.as_array()) {
            (Some(elements), Some(needles)) => needles
                .iter()
                .any(|needle| elements.iter().any(|e| e.query_equals(needle))),
            _ => false,
        },
        FilterOperator::In => operand
            .as_array()
            .is_some_and(|needles| needles.iter().any(|needle| value.query_equals(needle))),
        FilterOperator::NotIn => {
            !value.is_null()
                && operand
                    .as_array()
                    .is_some_and(|needles| !needles.iter().any(|needle| value.query_equals(needle)))
        }
    }
}

/// Range comparisons only match values of the same type class
fn range_compare(value: &Value, operand: &Value) -> Option<Ordering> {
    if !value.is_comparable_with(operand) {
        return None;
    }
    if let (Some(a), Some(b)) = (value.as_f64(), operand.as_f64()) {
        if a.is_nan() || b.is_nan() {
            return None;
        }
    }
    Some(value.compare(operand))
}

fn field_value(doc: &RemoteDocument, field: &FieldPath) -> Option<Value> {
    if field.is_document_id() {
        return Some(Value::Reference(doc.path.clone()));
    }
    doc.data.as_ref()?.get_path(field).cloned()
}

pub(crate) fn compare_documents(left: &RemoteDocument, right: &RemoteDocument, order_by: &[OrderBy]) -> Ordering {
    for order in order_by {
        let left_value = field_value(left, &order.field).unwrap_or(Value::Null);
        let right_value = field_value(right, &order.field).unwrap_or(Value::Null);
        let ordering = directed(left_value.compare(&right_value), order.direction);
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

fn directed(ordering: Ordering, direction: Direction) -> Ordering {
    match direction {
        Direction::Ascending => ordering,
        Direction::Descending => ordering.reverse(),
    }
}

/// Compare a document with a cursor over the cursor's leading orderings
fn compare_to_bound(doc: &RemoteDocument, bound: &Bound, order_by: &[OrderBy]) -> Ordering {
    for (value, order) in bound.values().iter().zip(order_by) {
        let doc_value = field_value(doc, &order.field).unwrap_or(Value::Null);
        let ordering = directed(doc_value.compare(value), order.direction);
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

fn is_before_start(doc: &RemoteDocument, bound: &Bound, order_by: &[OrderBy]) -> bool {
    let ordering = compare_to_bound(doc, bound, order_by);
    if bound.inclusive() {
        ordering == Ordering::Less
    } else {
        ordering != Ordering::Greater
    }
}

fn is_after_end(doc: &RemoteDocument, bound: &Bound, order_by: &[OrderBy]) -> bool {
    let ordering = compare_to_bound(doc, bound, order_by);
    if bound.inclusive() {
        ordering == Ordering::Greater
    } else {
        ordering != Ordering::Less
    }
}
