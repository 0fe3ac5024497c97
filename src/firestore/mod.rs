//! Cloud Firestore module
//!
//! Module layout:
//! - `firestore.rs`: the [`Firestore`] client
//! - `path.rs`, `field_path.rs`: document/collection paths and field paths
//! - `document_reference.rs`, `collection_reference.rs`, `query.rs`: location
//!   handles and the query builder
//! - `document_snapshot.rs`, `query_snapshot.rs`: read results
//! - `write_batch.rs`, `transaction.rs`, `mutation.rs`: writes
//! - `listener.rs`, `snapshot_stream.rs`: live updates
//! - `datastore.rs`, `memory_datastore.rs`: the backend boundary and the
//!   in-process backend
//! - `field_value.rs`, `timestamp.rs`, `geo_point.rs`, `blob.rs`: values

pub mod aggregate_query;
pub mod blob;
pub mod collection_reference;
pub mod datastore;
pub mod document_reference;
pub mod document_snapshot;
pub mod field_path;
pub mod field_value;
pub mod geo_point;
/// Metadata change tracking for real-time listeners
pub mod metadata_changes;
pub mod memory_datastore;
pub mod mutation;
pub mod path;
pub mod query;
pub mod query_snapshot;
pub mod settings;
pub mod snapshot_stream;
pub mod timestamp;
pub mod write_batch;

/// Firestore client
pub mod firestore;
pub mod listener;
pub mod transaction;

mod local_cache;
mod query_matcher;

pub use aggregate_query::{AggregateField, AggregateQuery, AggregateQuerySnapshot, AggregationType};
pub use blob::Blob;
pub use collection_reference::CollectionReference;
pub use datastore::{
    CommitRequest, CommitResponse, Datastore, ListenTarget, ReadVersion, RemoteDocument, WatchEvent, WatchStream,
};
pub use document_reference::DocumentReference;
pub use document_snapshot::{DocumentSnapshot, SnapshotMetadata};
pub use field_path::{FieldPath, IntoFieldPath};
pub use field_value::{MapValue, Numeric, Sentinel, Value};
pub use firestore::{Firestore, DEFAULT_DATABASE_ID};
pub use geo_point::GeoPoint;
pub use listener::{DocumentSnapshotListener, ListenedSnapshot, ListenerState, QuerySnapshotListener, SnapshotListener};
pub use memory_datastore::MemoryDatastore;
pub use metadata_changes::MetadataChanges;
pub use mutation::{SetOptions, UpdateSpec, WriteOperation};
pub use path::ResourcePath;
pub use query::{
    Bound, CursorSource, Direction, FieldFilter, FilterOperator, LimitType, OrderBy, Query, QueryState,
    MAX_DISJUNCTIVE_VALUES,
};
pub use query_snapshot::{DocumentChange, DocumentChangeType, QuerySnapshot};
pub use settings::{Settings, Source};
pub use snapshot_stream::{DocumentSnapshotStream, QuerySnapshotStream, SnapshotStream};
pub use timestamp::Timestamp;
pub use transaction::{Transaction, TransactionOptions};
pub use write_batch::WriteBatch;

#[cfg(test)]
pub(crate) mod test_support {
    use super::{Firestore, MemoryDatastore};
    use crate::app::App;

    /// Client over a fresh in-process datastore
    pub(crate) fn memory_firestore() -> Firestore {
        memory_firestore_for("test-project")
    }

    /// Same, for a given project; persistence is keyed by project
    pub(crate) fn memory_firestore_for(project_id: &str) -> Firestore {
        Firestore::new(&App::detached(project_id), MemoryDatastore::new())
    }
}
