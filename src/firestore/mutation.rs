//! Shared set/update/delete argument handling
//!
//! `DocumentReference`, `WriteBatch` and `Transaction` all accept the same
//! write arguments. They validate and normalise them through the free
//! functions here, passing the target document explicitly.

use super::document_reference::DocumentReference;
use super::field_path::{FieldPath, IntoFieldPath};
use super::field_value::{MapValue, Sentinel, Value};
use super::firestore::FirestoreInner;
use super::path::ResourcePath;
use crate::error::{invalid_argument, FirebaseError};

/// How `set` treats fields already in the document
#[derive(Debug, Clone, Default, PartialEq)]
pub enum SetOptions {
    /// Replace the whole document
    #[default]
    Overwrite,
    /// Merge every field present in the data, leaving others untouched
    Merge,
    /// Merge only the listed fields
    MergeFields(Vec<FieldPath>),
}

impl SetOptions {
    /// Merge every field present in the data
    pub fn merge() -> Self {
        SetOptions::Merge
    }

    /// Merge only the given dotted or structured field paths
    pub fn merge_fields<I, P>(fields: I) -> Result<Self, FirebaseError>
    where
        I: IntoIterator<Item = P>,
        P: IntoFieldPath,
    {
        let fields = fields
            .into_iter()
            .map(IntoFieldPath::into_field_path)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(SetOptions::MergeFields(fields))
    }
}

/// Arguments of an update: a mapping keyed by dotted field paths, or an
/// explicit list of field path / value pairs
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateSpec {
    /// Keys are dotted field paths, e.g. `"address.city"`
    WholeMapping(MapValue),
    /// Structured field paths with their new values
    FieldList(Vec<(FieldPath, Value)>),
}

impl UpdateSpec {
    /// Validate loosely-typed arguments: exactly one of `data` and `fields`
    pub fn from_parts(
        data: Option<MapValue>,
        fields: Option<Vec<(FieldPath, Value)>>,
    ) -> Result<Self, FirebaseError> {
        match (data, fields) {
            (Some(data), None) => Ok(UpdateSpec::WholeMapping(data)),
            (None, Some(fields)) => Ok(UpdateSpec::FieldList(fields)),
            (Some(_), Some(_)) => Err(invalid_argument(
                "update takes either a data mapping or a field list, not both",
            )),
            (None, None) => Err(invalid_argument(
                "update requires a data mapping or a field list",
            )),
        }
    }

    /// Single-field update
    pub fn field(path: impl IntoFieldPath, value: impl Into<Value>) -> Result<Self, FirebaseError> {
        Ok(UpdateSpec::FieldList(vec![(path.into_field_path()?, value.into())]))
    }
}

impl From<MapValue> for UpdateSpec {
    fn from(data: MapValue) -> Self {
        UpdateSpec::WholeMapping(data)
    }
}

impl From<Vec<(FieldPath, Value)>> for UpdateSpec {
    fn from(fields: Vec<(FieldPath, Value)>) -> Self {
        UpdateSpec::FieldList(fields)
    }
}

/// Validated write, ready for a commit
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOperation {
    /// Create or replace a document (or merge into it when `merge` is set)
    Set {
        /// Document path
        path: ResourcePath,
        /// Document data, may contain sentinels
        data: MapValue,
        /// Fields to merge; `None` replaces the whole document
        merge: Option<Vec<FieldPath>>,
    },
    /// Modify fields of an existing document
    Update {
        /// Document path
        path: ResourcePath,
        /// Field paths and their new values, may contain sentinels
        fields: Vec<(FieldPath, Value)>,
    },
    /// Delete a document (no-op when absent)
    Delete {
        /// Document path
        path: ResourcePath,
    },
}

impl WriteOperation {
    /// Document the write targets
    pub fn path(&self) -> &ResourcePath {
        match self {
            WriteOperation::Set { path, .. }
            | WriteOperation::Update { path, .. }
            | WriteOperation::Delete { path } => path,
        }
    }
}

pub(crate) fn prepare_set(
    owner: &FirestoreInner,
    target: &DocumentReference,
    data: MapValue,
    options: SetOptions,
) -> Result<WriteOperation, FirebaseError> {
    check_owner(owner, target)?;
    let merge = match options {
        SetOptions::Overwrite => {
            validate_map(&data, false)?;
            None
        }
        SetOptions::Merge => {
            validate_map(&data, true)?;
            Some(data.leaf_paths())
        }
        SetOptions::MergeFields(fields) => {
            validate_map(&data, true)?;
            for field in &fields {
                if data.get_path(field).is_none() {
                    return Err(invalid_argument(format!(
                        "field '{}' is specified in merge fields but missing from the data",
                        field
                    )));
                }
            }
            Some(fields)
        }
    };
    Ok(WriteOperation::Set {
        path: target.path.clone(),
        data,
        merge,
    })
}

pub(crate) fn prepare_update(
    owner: &FirestoreInner,
    target: &DocumentReference,
    spec: UpdateSpec,
) -> Result<WriteOperation, FirebaseError> {
    check_owner(owner, target)?;
    let fields = match spec {
        UpdateSpec::WholeMapping(data) => data
            .fields
            .into_iter()
            .map(|(key, value)| Ok((FieldPath::from_dotted(&key)?, value)))
            .collect::<Result<Vec<_>, FirebaseError>>()?,
        UpdateSpec::FieldList(fields) => fields,
    };
    if fields.is_empty() {
        return Err(invalid_argument("update requires at least one field"));
    }

    let mut sorted: Vec<&FieldPath> = fields.iter().map(|(path, _)| path).collect();
    sorted.sort();
    for pair in sorted.windows(2) {
        if pair[0].is_prefix_of(pair[1]) {
            return Err(invalid_argument(format!(
                "field '{}' conflicts with field '{}' in the same update",
                pair[0], pair[1]
            )));
        }
    }

    for (path, value) in &fields {
        // Delete is only allowed as the direct value of an updated path
        if !matches!(value, Value::Sentinel(Sentinel::Delete)) {
            validate_value(value, path, false)?;
        }
    }

    Ok(WriteOperation::Update {
        path: target.path.clone(),
        fields,
    })
}

pub(crate) fn prepare_delete(
    owner: &FirestoreInner,
    target: &DocumentReference,
) -> Result<WriteOperation, FirebaseError> {
    check_owner(owner, target)?;
    Ok(WriteOperation::Delete {
        path: target.path.clone(),
    })
}

fn check_owner(owner: &FirestoreInner, target: &DocumentReference) -> Result<(), FirebaseError> {
    if target.firestore.client_id != owner.client_id {
        return Err(invalid_argument(format!(
            "document '{}' belongs to a different Firestore instance",
            target.path
        )));
    }
    Ok(())
}

fn validate_map(data: &MapValue, allow_delete: bool) -> Result<(), FirebaseError> {
    for (key, value) in &data.fields {
        if key.is_empty() {
            return Err(invalid_argument("field names must not be empty"));
        }
        let path = FieldPath::unchecked(vec![key.clone()]);
        validate_nested(value, &path, allow_delete)?;
    }
    Ok(())
}

fn validate_nested(value: &Value, path: &FieldPath, allow_delete: bool) -> Result<(), FirebaseError> {
    match value {
        Value::Sentinel(Sentinel::Delete) if allow_delete => Ok(()),
        Value::Map(map) => {
            for (key, child) in &map.fields {
                if key.is_empty() {
                    return Err(invalid_argument(format!(
                        "empty field name inside '{}'",
                        path
                    )));
                }
                validate_nested(child, &path.child(key.clone()), allow_delete)?;
            }
            Ok(())
        }
        other => validate_value(other, path, false),
    }
}

fn validate_value(value: &Value, path: &FieldPath, allow_delete: bool) -> Result<(), FirebaseError> {
    match value {
        Value::Sentinel(Sentinel::Delete) if !allow_delete => Err(invalid_argument(format!(
            "delete sentinel at '{}' is only allowed in update or merge set",
            path
        ))),
        Value::Sentinel(Sentinel::ArrayUnion(elements) | Sentinel::ArrayRemove(elements)) => {
            elements
                .iter()
                .try_for_each(|element| validate_array_element(element, path))
        }
        Value::Array(elements) => elements
            .iter()
            .try_for_each(|element| validate_array_element(element, path)),
        Value::Map(map) => {
            for (key, child) in &map.fields {
                if key.is_empty() {
                    return Err(invalid_argument(format!("empty field name inside '{}'", path)));
                }
                validate_value(child, &path.child(key.clone()), false)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn validate_array_element(element: &Value, path: &FieldPath) -> Result<(), FirebaseError> {
    match element {
        Value::Array(_) => Err(invalid_argument(format!(
            "nested arrays are not supported (field '{}')",
            path
        ))),
        _ if element.contains_sentinel() => Err(invalid_argument(format!(
            "sentinel values cannot be used inside arrays (field '{}')",
            path
        ))),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firestore::test_support::memory_firestore;

    fn doc(path: &str) -> DocumentReference {
        memory_firestore().document(path).unwrap()
    }

    #[test]
    fn test_update_spec_from_parts() {
        let data = MapValue::new().with("a", 1);
        let fields = vec![(FieldPath::from_dotted("a").unwrap(), Value::from(1))];

        assert!(matches!(
            UpdateSpec::from_parts(Some(data.clone()), None),
            Ok(UpdateSpec::WholeMapping(_))
        ));
        assert!(matches!(
            UpdateSpec::from_parts(None, Some(fields.clone())),
            Ok(UpdateSpec::FieldList(_))
        ));
        assert_eq!(
            UpdateSpec::from_parts(Some(data), Some(fields)).unwrap_err().code(),
            "invalid-argument"
        );
        assert_eq!(
            UpdateSpec::from_parts(None, None).unwrap_err().code(),
            "invalid-argument"
        );
    }

    #[test]
    fn test_prepare_update_parses_dotted_keys() {
        let target = doc("users/alice");
        let data = MapValue::new().with("address.city", "Paris");
        let op = prepare_update(&target.firestore, &target, data.into()).unwrap();
        match op {
            WriteOperation::Update { fields, .. } => {
                assert_eq!(fields[0].0.segments(), &["address", "city"]);
            }
            other => panic!("Expected Update operation, got {:?}", other),
        }
    }

    #[test]
    fn test_prepare_update_rejects_empty_and_conflicts() {
        let target = doc("users/alice");
        let empty = prepare_update(&target.firestore, &target, MapValue::new().into());
        assert!(empty.is_err());

        let conflicting = MapValue::new().with("a", 1).with("a.b", 2);
        let err = prepare_update(&target.firestore, &target, conflicting.into()).unwrap_err();
        assert!(err.to_string().contains("conflicts"));
    }

    #[test]
    fn test_delete_sentinel_rules() {
        let target = doc("users/alice");
        let data = MapValue::new().with("gone", Value::delete_field());

        assert!(prepare_set(&target.firestore, &target, data.clone(), SetOptions::Overwrite).is_err());
        assert!(prepare_set(&target.firestore, &target, data.clone(), SetOptions::Merge).is_ok());
        assert!(prepare_update(&target.firestore, &target, data.into()).is_ok());

        let nested = MapValue::new().with("a", MapValue::new().with("b", Value::delete_field()));
        assert!(prepare_update(&target.firestore, &target, nested.into()).is_err());
    }

    #[test]
    fn test_arrays_validation() {
        let target = doc("users/alice");
        let nested = MapValue::new().with("a", Value::Array(vec![Value::Array(vec![])]));
        assert!(prepare_set(&target.firestore, &target, nested, SetOptions::Overwrite).is_err());

        let sentinel_in_array =
            MapValue::new().with("a", Value::Array(vec![Value::server_timestamp()]));
        assert!(prepare_set(&target.firestore, &target, sentinel_in_array, SetOptions::Overwrite).is_err());
    }

    #[test]
    fn test_merge_fields_must_exist_in_data() {
        let target = doc("users/alice");
        let data = MapValue::new().with("a", 1);
        let options = SetOptions::merge_fields(["b"]).unwrap();
        assert!(prepare_set(&target.firestore, &target, data.clone(), options).is_err());

        let options = SetOptions::merge_fields(["a"]).unwrap();
        let op = prepare_set(&target.firestore, &target, data, options).unwrap();
        assert!(matches!(op, WriteOperation::Set { merge: Some(ref m), .. } if m.len() == 1));
    }

    #[test]
    fn test_merge_uses_leaf_paths() {
        let target = doc("users/alice");
        let data = MapValue::new().with("address", MapValue::new().with("city", "Paris"));
        let op = prepare_set(&target.firestore, &target, data, SetOptions::Merge).unwrap();
        match op {
            WriteOperation::Set { merge: Some(mask), .. } => {
                assert_eq!(mask, vec![FieldPath::from_dotted("address.city").unwrap()]);
            }
            other => panic!("Expected merge Set, got {:?}", other),
        }
    }

    #[test]
    fn test_foreign_reference_rejected() {
        let ours = memory_firestore();
        let theirs = doc("users/alice");
        let err = prepare_delete(&ours.inner, &theirs).unwrap_err();
        assert!(err.to_string().contains("different Firestore instance"));
    }
}
