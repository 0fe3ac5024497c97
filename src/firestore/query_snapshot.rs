//! Firestore QuerySnapshot and DocumentChange types

use std::collections::HashMap;

use super::document_snapshot::{DocumentSnapshot, SnapshotMetadata};
use super::path::ResourcePath;
use super::query::Query;

/// Query snapshot containing multiple documents
///
/// Documents are in query order. `document_changes` describes how this
/// snapshot differs from the previous one delivered on the same listener;
/// for one-shot reads and first deliveries every document is `Added`.
#[derive(Debug, Clone)]
pub struct QuerySnapshot {
    pub(crate) query: Query,
    pub(crate) documents: Vec<DocumentSnapshot>,
    pub(crate) changes: Vec<DocumentChange>,
    pub(crate) metadata: SnapshotMetadata,
}

impl QuerySnapshot {
    pub(crate) fn new(
        query: Query,
        documents: Vec<DocumentSnapshot>,
        previous: Option<&[DocumentSnapshot]>,
        metadata: SnapshotMetadata,
    ) -> Self {
        let changes = compute_changes(previous, &documents);
        Self {
            query,
            documents,
            changes,
            metadata,
        }
    }

    /// Documents in query order
    pub fn documents(&self) -> &[DocumentSnapshot] {
        &self.documents
    }

    /// Changes since the previous snapshot
    pub fn document_changes(&self) -> &[DocumentChange] {
        &self.changes
    }

    /// Snapshot metadata
    pub fn metadata(&self) -> SnapshotMetadata {
        self.metadata
    }

    /// The query that produced this snapshot
    pub fn query(&self) -> &Query {
        &self.query
    }

    /// Check if the query result is empty
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Get the number of documents in the snapshot
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// Iterate over the documents
    pub fn iter(&self) -> std::slice::Iter<'_, DocumentSnapshot> {
        self.documents.iter()
    }

    pub(crate) fn same_contents(&self, other: &QuerySnapshot) -> bool {
        self.documents.len() == other.documents.len()
            && self
                .documents
                .iter()
                .zip(&other.documents)
                .all(|(a, b)| a.same_contents(b))
    }
}

impl<'a> IntoIterator for &'a QuerySnapshot {
    type Item = &'a DocumentSnapshot;
    type IntoIter = std::slice::Iter<'a, DocumentSnapshot>;

    fn into_iter(self) -> Self::IntoIter {
        self.documents.iter()
    }
}

/// Document change type for snapshot listeners
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentChangeType {
    /// Document was added
    Added,
    /// Document was modified
    Modified,
    /// Document was removed
    Removed,
}

/// Represents a change to a document in a query snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentChange {
    /// Type of change
    pub change_type: DocumentChangeType,

    /// The document that changed
    pub document: DocumentSnapshot,

    /// Index in the previous snapshot (-1 if added)
    pub old_index: i32,

    /// Index in the new snapshot (-1 if removed)
    pub new_index: i32,
}

/// Diff two ordered result sets: removals first, in old order, then
/// additions and modifications in new order.
pub(crate) fn compute_changes(
    previous: Option<&[DocumentSnapshot]>,
    current: &[DocumentSnapshot],
) -> Vec<DocumentChange> {
    let Some(previous) = previous else {
        return current
            .iter()
            .enumerate()
            .map(|(index, document)| DocumentChange {
                change_type: DocumentChangeType::Added,
                document: document.clone(),
                old_index: -1,
                new_index: index as i32,
            })
            .collect();
    };

    let old_positions: HashMap<&ResourcePath, usize> = previous
        .iter()
        .enumerate()
        .map(|(index, doc)| (&doc.reference.path, index))
        .collect();
    let new_positions: HashMap<&ResourcePath, usize> = current
        .iter()
        .enumerate()
        .map(|(index, doc)| (&doc.reference.path, index))
        .collect();

    let mut changes = Vec::new();
    for (old_index, document) in previous.iter().enumerate() {
        if !new_positions.contains_key(&document.reference.path) {
            changes.push(DocumentChange {
                change_type: DocumentChangeType::Removed,
                document: document.clone(),
                old_index: old_index as i32,
                new_index: -1,
            });
        }
    }

    for (new_index, document) in current.iter().enumerate() {
        match old_positions.get(&document.reference.path) {
            None => changes.push(DocumentChange {
                change_type: DocumentChangeType::Added,
                document: document.clone(),
                old_index: -1,
                new_index: new_index as i32,
            }),
            Some(&old_index) if !previous[old_index].same_contents(document) => {
                changes.push(DocumentChange {
                    change_type: DocumentChangeType::Modified,
                    document: document.clone(),
                    old_index: old_index as i32,
                    new_index: new_index as i32,
                })
            }
            Some(_) => {}
        }
    }
    changes
}
