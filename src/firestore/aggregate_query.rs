//! Firestore Aggregation Query support

use std::collections::{BTreeMap, HashMap, HashSet};

use super::datastore::RemoteDocument;
use super::field_path::FieldPath;
use super::field_value::Value;
use super::query::Query;
use crate::error::{invalid_argument, FirebaseError};

/// Type of aggregation operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AggregationType {
    /// Count the number of documents
    Count,
    /// Sum a numeric field across documents
    Sum(String),
    /// Average a numeric field across documents
    Average(String),
}

/// Field specification for aggregation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateField {
    /// Alias for the aggregation result (optional)
    pub alias: Option<String>,
    /// Type of aggregation
    pub aggregation_type: AggregationType,
}

impl AggregateField {
    /// Create a count aggregation
    pub fn count() -> Self {
        Self {
            alias: None,
            aggregation_type: AggregationType::Count,
        }
    }

    /// Create a count aggregation with alias
    pub fn count_with_alias(alias: impl Into<String>) -> Self {
        Self::count().with_alias(alias)
    }

    /// Create a sum aggregation on a dotted field path
    pub fn sum(field: impl Into<String>) -> Self {
        Self {
            alias: None,
            aggregation_type: AggregationType::Sum(field.into()),
        }
    }

    /// Create a sum aggregation with alias
    pub fn sum_with_alias(field: impl Into<String>, alias: impl Into<String>) -> Self {
        Self::sum(field).with_alias(alias)
    }

    /// Create an average aggregation on a dotted field path
    pub fn average(field: impl Into<String>) -> Self {
        Self {
            alias: None,
            aggregation_type: AggregationType::Average(field.into()),
        }
    }

    /// Create an average aggregation with alias
    pub fn average_with_alias(field: impl Into<String>, alias: impl Into<String>) -> Self {
        Self::average(field).with_alias(alias)
    }

    /// Set an alias for this aggregation field
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Key of this aggregation in the results: the alias, or `count`,
    /// `sum_<field>`, `average_<field>`
    pub fn result_key(&self) -> String {
        if let Some(alias) = &self.alias {
            return alias.clone();
        }
        match &self.aggregation_type {
            AggregationType::Count => "count".to_string(),
            AggregationType::Sum(field) => format!("sum_{}", field),
            AggregationType::Average(field) => format!("average_{}", field),
        }
    }

    fn field_path(&self) -> Option<Result<FieldPath, FirebaseError>> {
        match &self.aggregation_type {
            AggregationType::Count => None,
            AggregationType::Sum(field) | AggregationType::Average(field) => {
                Some(FieldPath::from_dotted(field))
            }
        }
    }
}

/// Aggregation query for performing aggregate operations on collections
#[derive(Debug, Clone)]
pub struct AggregateQuery {
    /// Base query
    pub(crate) query: Query,
    /// Aggregations to perform
    pub(crate) aggregations: Vec<AggregateField>,
}

impl AggregateQuery {
    pub(crate) fn new(query: Query, aggregations: Vec<AggregateField>) -> Self {
        Self {
            query,
            aggregations,
        }
    }

    pub(crate) fn try_new(query: Query, aggregations: Vec<AggregateField>) -> Result<Self, FirebaseError> {
        if aggregations.is_empty() {
            return Err(invalid_argument("aggregate() requires at least one field"));
        }
        let mut keys = HashSet::new();
        for field in &aggregations {
            if let Some(path) = field.field_path() {
                path?;
            }
            let key = field.result_key();
            if !keys.insert(key.clone()) {
                return Err(invalid_argument(format!(
                    "duplicate aggregation alias '{}'",
                    key
                )));
            }
        }
        Ok(Self::new(query, aggregations))
    }

    /// The query being aggregated
    pub fn query(&self) -> &Query {
        &self.query
    }

    /// Execute the aggregation query and return results
    ///
    /// Aggregations are always computed by the server.
    ///
    /// # Example
    /// ```no_run
    /// # use firestore_rust_sdk::firestore::Firestore;
    /// # async fn example(firestore: Firestore) -> Result<(), Box<dyn std::error::Error>> {
    /// let result = firestore
    ///     .collection("users")?
    ///     .count()
    ///     .get()
    ///     .await?;
    ///
    /// println!("Total users: {}", result.count().unwrap_or(0));
    /// # Ok(())
    /// # }
    /// ```
    pub async fn get(&self) -> Result<AggregateQuerySnapshot, FirebaseError> {
        self.query.validate_for_execution()?;
        let results = self
            .query
            .firestore
            .run_aggregation(&self.query.state, &self.aggregations)
            .await?;
        Ok(AggregateQuerySnapshot {
            results: results.into_iter().collect(),
        })
    }
}

/// Fold aggregations over an already evaluated result set
pub(crate) fn compute_aggregates(
    documents: &[RemoteDocument],
    aggregations: &[AggregateField],
) -> BTreeMap<String, Value> {
    let mut results = BTreeMap::new();
    for field in aggregations {
        let value = match &field.aggregation_type {
            AggregationType::Count => {
                Value::Integer(documents.iter().filter(|doc| doc.exists()).count() as i64)
            }
            AggregationType::Sum(_) | AggregationType::Average(_) => {
                let Some(Ok(path)) = field.field_path() else {
                    results.insert(field.result_key(), Value::Null);
                    continue;
                };
                let numbers: Vec<&Value> = documents
                    .iter()
                    .filter_map(|doc| doc.data.as_ref()?.get_path(&path))
                    .filter(|value| value.is_number())
                    .collect();
                if matches!(field.aggregation_type, AggregationType::Sum(_)) {
                    sum_values(&numbers)
                } else if numbers.is_empty() {
                    Value::Null
                } else {
                    let total: f64 = numbers.iter().filter_map(|v| v.as_f64()).sum();
                    Value::Double(total / numbers.len() as f64)
                }
            }
        };
        results.insert(field.result_key(), value);
    }
    results
}

/// Integer sums stay integers until a double is seen or the sum overflows
fn sum_values(numbers: &[&Value]) -> Value {
    let mut integer_sum: Option<i64> = Some(0);
    let mut double_sum = 0.0;
    for value in numbers {
        match value {
            Value::Integer(n) => {
                integer_sum = integer_sum.and_then(|sum| sum.checked_add(*n));
                double_sum += *n as f64;
            }
            Value::Double(d) => {
                integer_sum = None;
                double_sum += d;
            }
            _ => {}
        }
    }
    match integer_sum {
        Some(sum) => Value::Integer(sum),
        None => Value::Double(double_sum),
    }
}

/// Snapshot of aggregation query results
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateQuerySnapshot {
    /// Aggregation results keyed by alias
    results: HashMap<String, Value>,
}

impl AggregateQuerySnapshot {
    /// Get count result (convenience method for count aggregations)
    pub fn count(&self) -> Option<i64> {
        self.get_int("count")
    }

    /// Get a specific aggregation result by alias
    pub fn get(&self, alias: &str) -> Option<&Value> {
        self.results.get(alias)
    }

    /// Get integer value from aggregation result
    pub fn get_int(&self, alias: &str) -> Option<i64> {
        match self.get(alias)? {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Get double value from aggregation result
    pub fn get_double(&self, alias: &str) -> Option<f64> {
        self.get(alias)?.as_f64()
    }

    /// Get all aggregation results
    pub fn results(&self) -> &HashMap<String, Value> {
        &self.results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firestore::field_value::MapValue;
    use crate::firestore::path::ResourcePath;

    fn doc(id: &str, data: MapValue) -> RemoteDocument {
        RemoteDocument {
            path: ResourcePath::parse(&format!("orders/{}", id)).unwrap(),
            data: Some(data),
            update_time: None,
        }
    }

    #[test]
    fn test_aggregate_field_keys() {
        assert_eq!(AggregateField::count().result_key(), "count");
        assert_eq!(AggregateField::sum("price").result_key(), "sum_price");
        assert_eq!(AggregateField::average("price").result_key(), "average_price");
        assert_eq!(
            AggregateField::sum("price").with_alias("total").result_key(),
            "total"
        );
    }

    #[test]
    fn test_compute_aggregates() {
        let docs = vec![
            doc("a", MapValue::new().with("price", 10)),
            doc("b", MapValue::new().with("price", 20)),
            doc("c", MapValue::new().with("price", "n/a")),
        ];
        let results = compute_aggregates(
            &docs,
            &[
                AggregateField::count(),
                AggregateField::sum("price"),
                AggregateField::average("price"),
            ],
        );
        assert_eq!(results["count"], Value::Integer(3));
        assert_eq!(results["sum_price"], Value::Integer(30));
        assert_eq!(results["average_price"], Value::Double(15.0));
    }

    #[test]
    fn test_sum_with_doubles_and_empty_average() {
        let docs = vec![
            doc("a", MapValue::new().with("price", 1)),
            doc("b", MapValue::new().with("price", 0.5)),
        ];
        let results = compute_aggregates(
            &docs,
            &[AggregateField::sum("price"), AggregateField::average("weight")],
        );
        assert_eq!(results["sum_price"], Value::Double(1.5));
        assert_eq!(results["average_weight"], Value::Null);
    }

    #[test]
    fn test_snapshot_accessors() {
        let snapshot = AggregateQuerySnapshot {
            results: HashMap::from([
                ("count".to_string(), Value::Integer(4)),
                ("avg".to_string(), Value::Double(2.5)),
            ]),
        };
        assert_eq!(snapshot.count(), Some(4));
        assert_eq!(snapshot.get_double("avg"), Some(2.5));
        assert_eq!(snapshot.get_double("count"), Some(4.0));
        assert_eq!(snapshot.get_int("avg"), None);
    }
}
