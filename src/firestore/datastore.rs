//! Transport boundary
//!
//! The client delegates every I/O operation to a [`Datastore`]: document
//! lookups, query execution, atomic commits and watch registrations. The types
//! here are the wire-independent request and response shapes it consumes and
//! produces. [`MemoryDatastore`](super::MemoryDatastore) is the in-process
//! implementation.

use std::collections::BTreeMap;
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use super::aggregate_query::{compute_aggregates, AggregateField};
use super::field_value::{MapValue, Value};
use super::mutation::WriteOperation;
use super::path::ResourcePath;
use super::query::QueryState;
use super::timestamp::Timestamp;
use crate::error::{FirebaseResult, FirestoreError};

/// A document as known to the datastore
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteDocument {
    /// Full document path
    pub path: ResourcePath,
    /// Field data, `None` when the document does not exist
    pub data: Option<MapValue>,
    /// Time of the last write, `None` when the document does not exist
    pub update_time: Option<Timestamp>,
}

impl RemoteDocument {
    /// A document known not to exist
    pub fn missing(path: ResourcePath) -> Self {
        Self {
            path,
            data: None,
            update_time: None,
        }
    }

    /// True when the document exists
    pub fn exists(&self) -> bool {
        self.data.is_some()
    }
}

/// Version of a document observed by a transaction read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadVersion {
    /// Document that was read
    pub path: ResourcePath,
    /// Update time seen, `None` if the document was missing
    pub update_time: Option<Timestamp>,
}

/// One atomic commit
#[derive(Debug, Clone, Default)]
pub struct CommitRequest {
    /// Ordered writes, applied all-or-nothing
    pub writes: Vec<WriteOperation>,
    /// Documents that must still be at the given versions; a mismatch fails
    /// the commit with [`FirestoreError::Conflict`]
    pub read_versions: Vec<ReadVersion>,
}

/// Result of a successful commit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitResponse {
    /// Time at which the writes were applied
    pub commit_time: Timestamp,
}

/// What a watch observes
#[derive(Debug, Clone, PartialEq)]
pub enum ListenTarget {
    /// A single document
    Document(ResourcePath),
    /// The result set of a query
    Query(QueryState),
}

/// Push-based change feed item
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    /// Current server state of the target; for a query target the documents
    /// are the full, ordered result set
    Snapshot(Vec<RemoteDocument>),
    /// The watch lost contact with the server; the last state is now stale
    Offline,
}

/// Stream of watch events; dropping it unregisters the watch
pub type WatchStream = Pin<Box<dyn Stream<Item = Result<WatchEvent, FirestoreError>> + Send>>;

/// Backend operations the client delegates to
///
/// Failures use the crate's error kinds: `Unavailable` when the server cannot
/// be reached, `NotFound` when an update targets a missing document,
/// `Conflict` when commit read versions are stale and `Aborted` for any other
/// rejection.
#[async_trait]
pub trait Datastore: Send + Sync + 'static {
    /// Fetch documents by path, in request order; missing documents are
    /// returned with `data: None`
    async fn lookup(&self, paths: &[ResourcePath]) -> FirebaseResult<Vec<RemoteDocument>>;

    /// Execute a query and return the ordered result set
    async fn run_query(&self, query: &QueryState) -> FirebaseResult<Vec<RemoteDocument>>;

    /// Compute aggregations over a query's result set, keyed by alias
    async fn run_aggregation(
        &self,
        query: &QueryState,
        aggregations: &[AggregateField],
    ) -> FirebaseResult<BTreeMap<String, Value>> {
        let documents = self.run_query(query).await?;
        Ok(compute_aggregates(&documents, aggregations))
    }

    /// Apply writes atomically
    async fn commit(&self, request: CommitRequest) -> FirebaseResult<CommitResponse>;

    /// Register a watch on `target`
    fn listen(&self, target: ListenTarget) -> FirebaseResult<WatchStream>;

    /// Whether a local cache for this datastore may be persisted
    fn supports_persistence(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_document() {
        let doc = RemoteDocument::missing(ResourcePath::parse("cities/LA").unwrap());
        assert!(!doc.exists());
        assert!(doc.update_time.is_none());
    }
}
