//! Firestore CollectionReference type

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use rand::Rng;

use super::document_reference::DocumentReference;
use super::field_value::MapValue;
use super::firestore::FirestoreInner;
use super::path::{resolve_document, ResourcePath};
use super::query::{Query, QueryState};
use crate::error::FirebaseError;

const AUTO_ID_LENGTH: usize = 20;

/// Random 20-character alphanumeric document id
pub(crate) fn auto_id() -> String {
    rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(AUTO_ID_LENGTH)
        .map(char::from)
        .collect()
}

/// Reference to a Firestore collection
///
/// A collection reference is also the unfiltered query over its documents:
/// it dereferences to [`Query`], so every query builder is available on it.
#[derive(Clone, PartialEq)]
pub struct CollectionReference {
    query: Query,
}

impl CollectionReference {
    pub(crate) fn new(path: ResourcePath, firestore: Arc<FirestoreInner>) -> Self {
        Self {
            query: Query::new(firestore, QueryState::for_collection(path)),
        }
    }

    /// Get collection ID (last segment of path)
    pub fn id(&self) -> &str {
        self.path().last_segment().unwrap_or_default()
    }

    /// Full collection path
    pub fn path(&self) -> &ResourcePath {
        &self.query.state.collection_path
    }

    /// The document containing this collection, `None` for top-level
    /// collections
    pub fn parent(&self) -> Option<DocumentReference> {
        let parent = self.path().parent().ok()?;
        if parent.is_empty() {
            return None;
        }
        Some(DocumentReference::new(parent, Arc::clone(&self.query.firestore)))
    }

    /// Get a document reference within this collection; `path` may span
    /// several segments (`"doc/sub/doc2"`) as long as it names a document
    pub fn document(&self, path: &str) -> Result<DocumentReference, FirebaseError> {
        let path = resolve_document(self.path(), path)?;
        Ok(DocumentReference::new(path, Arc::clone(&self.query.firestore)))
    }

    /// Document reference by id, or with an auto-generated id when `None`
    pub fn doc(&self, document_id: Option<&str>) -> Result<DocumentReference, FirebaseError> {
        match document_id {
            Some(id) => self.document(id),
            None => self.document(&auto_id()),
        }
    }

    /// Add a new document with auto-generated ID
    pub async fn add(&self, data: MapValue) -> Result<DocumentReference, FirebaseError> {
        let doc_ref = self.doc(None)?;
        doc_ref.set(data).await?;
        Ok(doc_ref)
    }
}

impl Deref for CollectionReference {
    type Target = Query;

    fn deref(&self) -> &Query {
        &self.query
    }
}

impl From<CollectionReference> for Query {
    fn from(collection: CollectionReference) -> Self {
        collection.query
    }
}

impl fmt::Debug for CollectionReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionReference")
            .field("path", &self.path().canonical_string())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firestore::test_support::memory_firestore;

    #[test]
    fn test_auto_id() {
        let id = auto_id();
        assert_eq!(id.len(), 20);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(auto_id(), id);
    }

    #[test]
    fn test_collection_navigation() {
        let db = memory_firestore();
        let users = db.collection("users").unwrap();
        assert_eq!(users.id(), "users");
        assert!(users.parent().is_none());

        let posts = db.collection("users/alice/posts").unwrap();
        assert_eq!(posts.parent().unwrap().id(), "alice");

        let doc = users.document("alice").unwrap();
        assert_eq!(doc.parent(), users);
        assert_eq!(users.document("alice/posts").unwrap_err().code(), "invalid-path");
        assert_eq!(users.document("alice/posts/p1").unwrap().id(), "p1");
    }

    #[test]
    fn test_doc_with_and_without_id() {
        let db = memory_firestore();
        let users = db.collection("users").unwrap();
        assert_eq!(users.doc(Some("bob")).unwrap().id(), "bob");
        let generated = users.doc(None).unwrap();
        assert_eq!(generated.id().len(), 20);
        assert!(users.path().is_immediate_parent_of(generated.path()));
    }

    #[test]
    fn test_query_builders_available() {
        let db = memory_firestore();
        let users = db.collection("users").unwrap();
        let query = users.where_equal_to("name", "alice").unwrap();
        assert_eq!(query.state().filters().len(), 1);
        assert_eq!(query.state().collection_path(), users.path());
    }
}
