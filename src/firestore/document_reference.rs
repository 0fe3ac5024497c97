//! Firestore DocumentReference type

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use super::collection_reference::CollectionReference;
use super::document_snapshot::{DocumentSnapshot, SnapshotMetadata};
use super::field_value::{MapValue, Value};
use super::firestore::{Firestore, FirestoreInner};
use super::listener::{DocumentSnapshotListener, SnapshotListener};
use super::metadata_changes::MetadataChanges;
use super::mutation::{prepare_delete, prepare_set, prepare_update, SetOptions, UpdateSpec};
use super::path::{resolve_collection, ResourcePath};
use super::settings::Source;
use super::snapshot_stream::DocumentSnapshotStream;
use crate::error::FirebaseResult;

/// Reference to a Firestore document
///
/// Creating a reference never performs I/O. Two references are equal when
/// they belong to the same client and name the same path.
#[derive(Clone)]
pub struct DocumentReference {
    pub(crate) path: ResourcePath,
    pub(crate) firestore: Arc<FirestoreInner>,
}

impl DocumentReference {
    pub(crate) fn new(path: ResourcePath, firestore: Arc<FirestoreInner>) -> Self {
        Self { path, firestore }
    }

    /// Get the document ID (last segment of path)
    pub fn id(&self) -> &str {
        self.path.last_segment().unwrap_or_default()
    }

    /// Full document path, e.g. `users/alice`
    pub fn path(&self) -> &ResourcePath {
        &self.path
    }

    /// The collection containing this document
    pub fn parent(&self) -> CollectionReference {
        let parent = self.path.parent().unwrap_or_else(|_| ResourcePath::root());
        CollectionReference::new(parent, Arc::clone(&self.firestore))
    }

    /// A subcollection of this document; `path` may span several segments
    /// (`"a/b/c"`) as long as it names a collection
    pub fn collection(&self, path: &str) -> FirebaseResult<CollectionReference> {
        let path = resolve_collection(&self.path, path)?;
        Ok(CollectionReference::new(path, Arc::clone(&self.firestore)))
    }

    /// The Firestore instance this reference belongs to
    pub fn firestore(&self) -> Firestore {
        Firestore::from_inner(Arc::clone(&self.firestore))
    }

    /// Read the document, preferring the server and falling back to the
    /// local cache when the server is unreachable
    pub async fn get(&self) -> FirebaseResult<DocumentSnapshot> {
        self.get_with_source(Source::Default).await
    }

    /// Read the document from the given source
    pub async fn get_with_source(&self, source: Source) -> FirebaseResult<DocumentSnapshot> {
        let (remote, from_cache) = self.firestore.lookup_document(&self.path, source).await?;
        Ok(DocumentSnapshot::from_remote(
            self.clone(),
            remote,
            SnapshotMetadata::from_cache(from_cache),
        ))
    }

    /// Create or replace the document
    pub async fn set(&self, data: MapValue) -> FirebaseResult<()> {
        self.set_with_options(data, SetOptions::Overwrite).await
    }

    /// Create or modify the document, optionally merging into existing data
    pub async fn set_with_options(&self, data: MapValue, options: SetOptions) -> FirebaseResult<()> {
        let write = prepare_set(&self.firestore, self, data, options)?;
        self.firestore.commit_writes(vec![write], Vec::new()).await?;
        Ok(())
    }

    /// Update fields of an existing document
    ///
    /// Fails with `NotFound` when the document does not exist.
    pub async fn update(&self, spec: impl Into<UpdateSpec>) -> FirebaseResult<()> {
        let write = prepare_update(&self.firestore, self, spec.into())?;
        self.firestore.commit_writes(vec![write], Vec::new()).await?;
        Ok(())
    }

    /// Delete the document; deleting a missing document succeeds
    pub async fn delete(&self) -> FirebaseResult<()> {
        let write = prepare_delete(&self.firestore, self)?;
        self.firestore.commit_writes(vec![write], Vec::new()).await?;
        Ok(())
    }

    /// Create an idle snapshot listener for this document
    ///
    /// Nothing is registered with the datastore until the first
    /// [`SnapshotListener::subscribe`].
    pub fn on_snapshot(&self, metadata_changes: MetadataChanges) -> DocumentSnapshotListener {
        SnapshotListener::for_document(self.clone(), metadata_changes)
    }

    /// Listen to document changes, attaching immediately
    ///
    /// The stream is cancelled automatically when dropped.
    ///
    /// # Example
    /// ```no_run
    /// use firestore_rust_sdk::firestore::{Firestore, MetadataChanges};
    /// use futures::StreamExt;
    ///
    /// # async fn example(firestore: Firestore) -> Result<(), Box<dyn std::error::Error>> {
    /// let doc_ref = firestore.collection("cities")?.document("SF")?;
    ///
    /// let mut stream = doc_ref.listen(MetadataChanges::Exclude)?;
    /// while let Some(result) = stream.next().await {
    ///     match result {
    ///         Ok(snapshot) => println!("Document: {:?}", snapshot.id()),
    ///         Err(e) => eprintln!("Error: {}", e),
    ///     }
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub fn listen(&self, metadata_changes: MetadataChanges) -> FirebaseResult<DocumentSnapshotStream> {
        self.on_snapshot(metadata_changes).subscribe()
    }
}

impl PartialEq for DocumentReference {
    fn eq(&self, other: &Self) -> bool {
        self.firestore.client_id == other.firestore.client_id && self.path == other.path
    }
}

impl Eq for DocumentReference {}

impl Hash for DocumentReference {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.firestore.client_id.hash(state);
        self.path.hash(state);
    }
}

impl fmt::Debug for DocumentReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentReference")
            .field("path", &self.path.canonical_string())
            .finish()
    }
}

impl From<DocumentReference> for Value {
    fn from(reference: DocumentReference) -> Self {
        Value::Reference(reference.path)
    }
}

impl From<&DocumentReference> for Value {
    fn from(reference: &DocumentReference) -> Self {
        Value::Reference(reference.path.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firestore::test_support::memory_firestore;
    use std::collections::HashSet;

    #[test]
    fn test_reference_navigation() {
        let db = memory_firestore();
        let doc = db.document("users/alice").unwrap();
        assert_eq!(doc.id(), "alice");
        assert_eq!(doc.parent().path().canonical_string(), "users");

        let nested = doc.collection("posts/p1/comments").unwrap();
        assert_eq!(nested.path().canonical_string(), "users/alice/posts/p1/comments");
        assert_eq!(doc.collection("posts/p1").unwrap_err().code(), "invalid-path");
        assert_eq!(doc.collection("").unwrap_err().code(), "invalid-path");
    }

    #[test]
    fn test_equality_and_hash_by_client_and_path() {
        let db = memory_firestore();
        let other = memory_firestore();
        let a1 = db.document("users/alice").unwrap();
        let a2 = db.collection("users").unwrap().document("alice").unwrap();
        let foreign = other.document("users/alice").unwrap();

        assert_eq!(a1, a2);
        assert_ne!(a1, foreign);

        let set: HashSet<DocumentReference> = [a1, a2, foreign].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_reference_as_value() {
        let db = memory_firestore();
        let doc = db.document("users/alice").unwrap();
        assert_eq!(
            Value::from(&doc),
            Value::Reference(ResourcePath::parse("users/alice").unwrap())
        );
    }
}
