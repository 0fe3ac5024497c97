//! Firestore field value types
//!
//! `Value` is the dynamically-typed value stored in a document field. It covers
//! every scalar the database understands, nested arrays and maps, and the
//! write-only [`Sentinel`] transforms that the datastore resolves on commit.
//!
//! # Marshalling
//! Rust scalars and collections convert into `Value` through `From`, which is
//! lossless. JSON (`serde_json::Value`) converts both ways; in the JSON
//! direction special types are rendered as plain JSON (timestamps as RFC 3339
//! strings, blobs as base64, references as path strings).

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::blob::Blob;
use super::field_path::FieldPath;
use super::geo_point::GeoPoint;
use super::path::ResourcePath;
use super::timestamp::Timestamp;
use crate::error::{invalid_argument, FirebaseError};

/// Document field value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Explicit null
    Null,
    /// Boolean
    Boolean(bool),
    /// 64-bit signed integer
    Integer(i64),
    /// 64-bit float
    Double(f64),
    /// Point in time
    Timestamp(Timestamp),
    /// UTF-8 string
    String(String),
    /// Binary data
    Bytes(Blob),
    /// Path of another document in the same database
    Reference(ResourcePath),
    /// Latitude/longitude pair
    GeoPoint(GeoPoint),
    /// Ordered list (may not directly contain another array)
    Array(Vec<Value>),
    /// Nested map
    Map(MapValue),
    /// Write-only transform resolved by the datastore
    Sentinel(Sentinel),
}

/// Numeric operand of an increment
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Numeric {
    /// Integer operand
    Integer(i64),
    /// Floating point operand
    Double(f64),
}

impl From<i64> for Numeric {
    fn from(v: i64) -> Self {
        Numeric::Integer(v)
    }
}

impl From<i32> for Numeric {
    fn from(v: i32) -> Self {
        Numeric::Integer(v as i64)
    }
}

impl From<f64> for Numeric {
    fn from(v: f64) -> Self {
        Numeric::Double(v)
    }
}

/// Field transforms applied by the datastore, not by the client
#[derive(Debug, Clone, PartialEq)]
pub enum Sentinel {
    /// Remove the field (update and merge-set only)
    Delete,
    /// Replace with the commit time
    ServerTimestamp,
    /// Add to the current numeric value (missing or non-numeric counts as 0)
    Increment(Numeric),
    /// Append each element not already present
    ArrayUnion(Vec<Value>),
    /// Remove every occurrence of each element
    ArrayRemove(Vec<Value>),
}

/// Map of field values
///
/// Keys are plain field names; nesting is expressed with `Value::Map`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MapValue {
    /// Fields sorted by name
    pub fields: BTreeMap<String, Value>,
}

impl Value {
    /// Sentinel deleting a field
    pub fn delete_field() -> Self {
        Value::Sentinel(Sentinel::Delete)
    }

    /// Sentinel replaced by the commit time
    pub fn server_timestamp() -> Self {
        Value::Sentinel(Sentinel::ServerTimestamp)
    }

    /// Sentinel adding `by` to the current value
    pub fn increment(by: impl Into<Numeric>) -> Self {
        Value::Sentinel(Sentinel::Increment(by.into()))
    }

    /// Sentinel appending missing elements to an array field
    pub fn array_union(elements: Vec<Value>) -> Self {
        Value::Sentinel(Sentinel::ArrayUnion(elements))
    }

    /// Sentinel removing elements from an array field
    pub fn array_remove(elements: Vec<Value>) -> Self {
        Value::Sentinel(Sentinel::ArrayRemove(elements))
    }

    /// Null check
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Boolean content
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Integer content
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric content widened to f64
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Double(d) => Some(*d),
            _ => None,
        }
    }

    /// String content
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Array content
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(values) => Some(values),
            _ => None,
        }
    }

    /// Map content
    pub fn as_map(&self) -> Option<&MapValue> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Timestamp content
    pub fn as_timestamp(&self) -> Option<Timestamp> {
        match self {
            Value::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }

    /// True for integers and doubles
    pub fn is_number(&self) -> bool {
        matches!(self, Value::Integer(_) | Value::Double(_))
    }

    /// Rank of the value's type in the cross-type sort order
    fn type_order(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Boolean(_) => 1,
            Value::Integer(_) | Value::Double(_) => 2,
            Value::Timestamp(_) => 3,
            Value::String(_) => 4,
            Value::Bytes(_) => 5,
            Value::Reference(_) => 6,
            Value::GeoPoint(_) => 7,
            Value::Array(_) => 8,
            Value::Map(_) => 9,
            Value::Sentinel(_) => 10,
        }
    }

    /// True when both values belong to the same type class (numbers form one class)
    pub fn is_comparable_with(&self, other: &Value) -> bool {
        self.type_order() == other.type_order()
    }

    /// Total order used for sorting query results
    ///
    /// Values of different types order by type (null, booleans, numbers,
    /// timestamps, strings, bytes, references, geo points, arrays, maps).
    /// Integers and doubles compare numerically; NaN sorts before every number.
    pub fn compare(&self, other: &Value) -> Ordering {
        let by_type = self.type_order().cmp(&other.type_order());
        if by_type != Ordering::Equal {
            return by_type;
        }
        match (self, other) {
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (Value::Integer(_), Value::Double(_))
            | (Value::Double(_), Value::Integer(_))
            | (Value::Double(_), Value::Double(_)) => {
                compare_doubles(self.as_f64().unwrap_or(0.0), other.as_f64().unwrap_or(0.0))
            }
            (Value::Timestamp(a), Value::Timestamp(b)) => a.cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Bytes(a), Value::Bytes(b)) => a.cmp(b),
            (Value::Reference(a), Value::Reference(b)) => a.cmp(b),
            (Value::GeoPoint(a), Value::GeoPoint(b)) => a.compare(b),
            (Value::Array(a), Value::Array(b)) => {
                for (left, right) in a.iter().zip(b.iter()) {
                    let ordering = left.compare(right);
                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }
                a.len().cmp(&b.len())
            }
            (Value::Map(a), Value::Map(b)) => {
                for ((lk, lv), (rk, rv)) in a.fields.iter().zip(b.fields.iter()) {
                    let ordering = lk.cmp(rk).then_with(|| lv.compare(rv));
                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }
                a.fields.len().cmp(&b.fields.len())
            }
            _ => Ordering::Equal,
        }
    }

    /// Equality used by queries: numbers compare by value across int/double
    pub fn query_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Integer(_) | Value::Double(_), Value::Integer(_) | Value::Double(_)) => {
                self.compare(other) == Ordering::Equal
            }
            (Value::Array(a), Value::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(l, r)| l.query_equals(r))
            }
            (Value::Map(a), Value::Map(b)) => {
                a.fields.len() == b.fields.len()
                    && a
                        .fields
                        .iter()
                        .zip(b.fields.iter())
                        .all(|((lk, lv), (rk, rv))| lk == rk && lv.query_equals(rv))
            }
            _ => self == other,
        }
    }

    /// True if this value or anything nested in it is a sentinel
    pub fn contains_sentinel(&self) -> bool {
        match self {
            Value::Sentinel(_) => true,
            Value::Array(values) => values.iter().any(Value::contains_sentinel),
            Value::Map(map) => map.contains_sentinel(),
            _ => false,
        }
    }

    /// Rough in-memory footprint, used for cache accounting
    pub(crate) fn approximate_size(&self) -> usize {
        match self {
            Value::Null | Value::Boolean(_) => 1,
            Value::Integer(_) | Value::Double(_) => 8,
            Value::Timestamp(_) => 12,
            Value::String(s) => s.len() + 1,
            Value::Bytes(b) => b.len(),
            Value::Reference(path) => path.canonical_string().len() + 1,
            Value::GeoPoint(_) => 16,
            Value::Array(values) => values.iter().map(Value::approximate_size).sum(),
            Value::Map(map) => map.approximate_size(),
            Value::Sentinel(_) => 0,
        }
    }

    /// Convert to JSON (special types become plain JSON; see module docs)
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            Value::Null | Value::Sentinel(_) => Json::Null,
            Value::Boolean(b) => Json::Bool(*b),
            Value::Integer(i) => Json::from(*i),
            Value::Double(d) => serde_json::Number::from_f64(*d)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Value::Timestamp(ts) => Json::String(ts.to_rfc3339()),
            Value::String(s) => Json::String(s.clone()),
            Value::Bytes(b) => Json::String(b.to_base64()),
            Value::Reference(path) => Json::String(path.canonical_string()),
            Value::GeoPoint(gp) => serde_json::json!({
                "latitude": gp.latitude,
                "longitude": gp.longitude,
            }),
            Value::Array(values) => Json::Array(values.iter().map(Value::to_json).collect()),
            Value::Map(map) => map.to_json(),
        }
    }
}

fn compare_doubles(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
    }
}

impl MapValue {
    /// Empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert of a top-level field
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Insert a top-level field
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(key.into(), value.into())
    }

    /// Top-level field
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Number of top-level fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True when there are no fields
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Value at a (possibly nested) field path
    pub fn get_path(&self, path: &FieldPath) -> Option<&Value> {
        let (first, rest) = path.segments().split_first()?;
        let mut current = self.fields.get(first)?;
        for segment in rest {
            current = match current {
                Value::Map(map) => map.fields.get(segment)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Set the value at a field path, creating (or replacing non-map)
    /// intermediate maps as needed
    pub fn set_path(&mut self, path: &FieldPath, value: Value) {
        let segments = path.segments();
        let mut current = self;
        for segment in &segments[..segments.len() - 1] {
            let entry = current
                .fields
                .entry(segment.clone())
                .or_insert_with(|| Value::Map(MapValue::new()));
            if !matches!(entry, Value::Map(_)) {
                *entry = Value::Map(MapValue::new());
            }
            let Value::Map(map) = entry else {
                return;
            };
            current = map;
        }
        if let Some(last) = segments.last() {
            current.fields.insert(last.clone(), value);
        }
    }

    /// Remove the value at a field path; missing paths are ignored
    pub fn remove_path(&mut self, path: &FieldPath) -> Option<Value> {
        let segments = path.segments();
        let (last, parents) = segments.split_last()?;
        let mut current = self;
        for segment in parents {
            current = match current.fields.get_mut(segment) {
                Some(Value::Map(map)) => map,
                _ => return None,
            };
        }
        current.fields.remove(last)
    }

    /// Paths of every leaf value; non-empty maps are descended into,
    /// empty maps count as leaves
    pub fn leaf_paths(&self) -> Vec<FieldPath> {
        let mut paths = Vec::new();
        collect_leaf_paths(self, None, &mut paths);
        paths
    }

    /// True if any nested value is a sentinel
    pub fn contains_sentinel(&self) -> bool {
        self.fields.values().any(Value::contains_sentinel)
    }

    pub(crate) fn approximate_size(&self) -> usize {
        self.fields
            .iter()
            .map(|(k, v)| k.len() + v.approximate_size())
            .sum()
    }

    /// Convert to a JSON object
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.fields
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }

    /// Marshal any serde-serializable struct or map into document data
    ///
    /// The value must serialize to a JSON object.
    pub fn from_serializable<T: Serialize + ?Sized>(value: &T) -> Result<Self, FirebaseError> {
        match serde_json::to_value(value)? {
            serde_json::Value::Object(object) => Ok(Self::from(object)),
            other => Err(invalid_argument(format!(
                "document data must be an object, got {}",
                json_kind(&other)
            ))),
        }
    }

    /// Unmarshal document data into a deserializable type
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, FirebaseError> {
        Ok(serde_json::from_value(self.to_json())?)
    }
}

fn collect_leaf_paths(map: &MapValue, prefix: Option<&FieldPath>, out: &mut Vec<FieldPath>) {
    for (key, value) in &map.fields {
        let path = match prefix {
            Some(prefix) => prefix.child(key.clone()),
            None => FieldPath::unchecked(vec![key.clone()]),
        };
        match value {
            Value::Map(child) if !child.is_empty() => collect_leaf_paths(child, Some(&path), out),
            _ => out.push(path),
        }
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

impl FromIterator<(String, Value)> for MapValue {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

impl From<BTreeMap<String, Value>> for MapValue {
    fn from(fields: BTreeMap<String, Value>) -> Self {
        Self { fields }
    }
}

impl From<serde_json::Map<String, serde_json::Value>> for MapValue {
    fn from(object: serde_json::Map<String, serde_json::Value>) -> Self {
        object.into_iter().map(|(k, v)| (k, Value::from(v))).collect()
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        use serde_json::Value as Json;
        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Boolean(b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => Value::Double(n.as_f64().unwrap_or(f64::NAN)),
            },
            Json::String(s) => Value::String(s),
            Json::Array(values) => Value::Array(values.into_iter().map(Value::from).collect()),
            Json::Object(object) => Value::Map(MapValue::from(object)),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Timestamp> for Value {
    fn from(v: Timestamp) -> Self {
        Value::Timestamp(v)
    }
}

impl From<GeoPoint> for Value {
    fn from(v: GeoPoint) -> Self {
        Value::GeoPoint(v)
    }
}

impl From<Blob> for Value {
    fn from(v: Blob) -> Self {
        Value::Bytes(v)
    }
}

impl From<ResourcePath> for Value {
    fn from(v: ResourcePath) -> Self {
        Value::Reference(v)
    }
}

impl From<MapValue> for Value {
    fn from(v: MapValue) -> Self {
        Value::Map(v)
    }
}

impl From<Sentinel> for Value {
    fn from(v: Sentinel) -> Self {
        Value::Sentinel(v)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::Array(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}
