//! Firestore DocumentSnapshot and SnapshotMetadata types

use serde::de::DeserializeOwned;

use super::datastore::RemoteDocument;
use super::document_reference::DocumentReference;
use super::field_path::FieldPath;
use super::field_value::{MapValue, Value};
use super::timestamp::Timestamp;
use crate::error::FirebaseResult;

/// Firestore document snapshot
///
/// An immutable view of a document at one point in time. A snapshot of a
/// missing document still carries its reference and id, but no data.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSnapshot {
    /// Document reference
    pub reference: DocumentReference,

    /// Document data (None if document doesn't exist)
    pub data: Option<MapValue>,

    /// Time of the last write the snapshot reflects
    pub update_time: Option<Timestamp>,

    /// Document metadata
    pub metadata: SnapshotMetadata,
}

impl DocumentSnapshot {
    pub(crate) fn from_remote(
        reference: DocumentReference,
        remote: RemoteDocument,
        metadata: SnapshotMetadata,
    ) -> Self {
        Self {
            reference,
            data: remote.data,
            update_time: remote.update_time,
            metadata,
        }
    }

    /// Check if document exists
    pub fn exists(&self) -> bool {
        self.data.is_some()
    }

    /// Get document ID
    pub fn id(&self) -> &str {
        self.reference.id()
    }

    /// Document data, `None` if the document does not exist
    pub fn data(&self) -> Option<&MapValue> {
        self.data.as_ref()
    }

    /// Get a field value by dotted path, e.g. `"address.city"`
    ///
    /// Returns `None` when the document or the field does not exist, or when
    /// `field` is not a valid dotted path.
    pub fn get(&self, field: &str) -> Option<&Value> {
        let path = FieldPath::from_dotted(field).ok()?;
        self.get_path(&path)
    }

    /// Get a field value by structured path
    pub fn get_path(&self, field: &FieldPath) -> Option<&Value> {
        self.data.as_ref()?.get_path(field)
    }

    /// Deserialize the document data into `T`
    pub fn data_as<T: DeserializeOwned>(&self) -> FirebaseResult<Option<T>> {
        self.data.as_ref().map(MapValue::deserialize::<T>).transpose()
    }

    /// Same document contents, ignoring metadata
    pub(crate) fn same_contents(&self, other: &DocumentSnapshot) -> bool {
        self.reference == other.reference
            && self.data == other.data
            && self.update_time == other.update_time
    }
}

/// Metadata about a document snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SnapshotMetadata {
    /// Whether the snapshot contains pending writes
    ///
    /// Writes are never queued locally, so this is always false.
    pub has_pending_writes: bool,

    /// Whether the data came from cache
    pub is_from_cache: bool,
}

impl SnapshotMetadata {
    pub(crate) fn from_cache(is_from_cache: bool) -> Self {
        Self {
            has_pending_writes: false,
            is_from_cache,
        }
    }
}
