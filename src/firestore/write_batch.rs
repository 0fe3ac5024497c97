//! Firestore WriteBatch for atomic multi-document writes

use std::sync::Arc;

use super::document_reference::DocumentReference;
use super::field_value::MapValue;
use super::firestore::FirestoreInner;
use super::mutation::{prepare_delete, prepare_set, prepare_update, SetOptions, UpdateSpec, WriteOperation};
use crate::error::FirebaseResult;

/// WriteBatch for atomic multi-document writes
///
/// Operations are validated when they are added and applied together on
/// [`commit`](WriteBatch::commit): either every write is applied or none is.
/// `commit` consumes the batch, so a batch is committed at most once.
///
/// The builders take the batch by value. When an operation fails validation
/// the batch is consumed along with every operation queued before it, and
/// nothing is sent; build a new batch to retry.
///
/// # Example
/// ```no_run
/// # use firestore_rust_sdk::firestore::{Firestore, MapValue};
/// # async fn example(firestore: Firestore) -> Result<(), Box<dyn std::error::Error>> {
/// let sf = firestore.document("cities/SF")?;
/// let la = firestore.document("cities/LA")?;
///
/// firestore.batch()
///     .set(&sf, MapValue::new().with("name", "San Francisco"))?
///     .update(&la, MapValue::new().with("population", 3_900_000))?
///     .delete(&firestore.document("cities/DEN")?)?
///     .commit()
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct WriteBatch {
    operations: Vec<WriteOperation>,
    firestore: Arc<FirestoreInner>,
}

impl WriteBatch {
    pub(crate) fn new(firestore: Arc<FirestoreInner>) -> Self {
        Self {
            operations: Vec::new(),
            firestore,
        }
    }

    /// Overwrite a document
    ///
    /// On a validation error the batch is dropped.
    pub fn set(self, document: &DocumentReference, data: MapValue) -> FirebaseResult<Self> {
        self.set_with_options(document, data, SetOptions::Overwrite)
    }

    /// Write a document, optionally merging into existing data
    pub fn set_with_options(
        mut self,
        document: &DocumentReference,
        data: MapValue,
        options: SetOptions,
    ) -> FirebaseResult<Self> {
        let write = prepare_set(&self.firestore, document, data, options)?;
        self.operations.push(write);
        Ok(self)
    }

    /// Update fields of a document that must exist at commit time
    pub fn update(mut self, document: &DocumentReference, spec: impl Into<UpdateSpec>) -> FirebaseResult<Self> {
        let write = prepare_update(&self.firestore, document, spec.into())?;
        self.operations.push(write);
        Ok(self)
    }

    /// Delete a document
    pub fn delete(mut self, document: &DocumentReference) -> FirebaseResult<Self> {
        let write = prepare_delete(&self.firestore, document)?;
        self.operations.push(write);
        Ok(self)
    }

    /// Commit the batch
    ///
    /// An empty batch resolves immediately without contacting the datastore.
    ///
    /// # Errors
    /// - `Aborted` if the datastore rejects the batch (nothing is applied)
    /// - `NotFound` if an update targets a missing document (nothing is applied)
    /// - `Unavailable` if the network is disabled or unreachable
    pub async fn commit(self) -> FirebaseResult<()> {
        if self.operations.is_empty() {
            tracing::debug!("empty write batch, nothing to commit");
            return Ok(());
        }
        self.firestore.commit_writes(self.operations, Vec::new()).await?;
        Ok(())
    }

    /// Check if batch is empty
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Get number of operations
    pub fn len(&self) -> usize {
        self.operations.len()
    }
}

impl std::fmt::Debug for WriteBatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteBatch")
            .field("operations", &self.operations)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firestore::field_value::Value;
    use crate::firestore::test_support::memory_firestore;

    #[test]
    fn test_write_batch_operations() {
        let db = memory_firestore();
        let la = db.document("cities/LA").unwrap();
        let sf = db.document("cities/SF").unwrap();

        let batch = db
            .batch()
            .set(&la, MapValue::new().with("name", "Los Angeles"))
            .unwrap()
            .update(&sf, MapValue::new().with("population", 1))
            .unwrap()
            .delete(&db.document("cities/NYC").unwrap())
            .unwrap();

        assert_eq!(batch.len(), 3);
        let paths: Vec<String> = batch
            .operations
            .iter()
            .map(|op| op.path().canonical_string())
            .collect();
        assert_eq!(paths, vec!["cities/LA", "cities/SF", "cities/NYC"]);
        assert!(matches!(batch.operations[2], WriteOperation::Delete { .. }));
    }

    #[test]
    fn test_validation_is_synchronous() {
        let db = memory_firestore();
        let la = db.document("cities/LA").unwrap();
        let data = MapValue::new().with("name", Value::delete_field());
        let err = db.batch().set(&la, data).unwrap_err();
        assert_eq!(err.code(), "invalid-argument");
    }

    #[tokio::test]
    async fn test_invalid_operation_abandons_queued_writes() {
        let db = memory_firestore();
        let la = db.document("cities/LA").unwrap();
        let sf = db.document("cities/SF").unwrap();

        let result = db
            .batch()
            .set(&la, MapValue::new().with("name", "Los Angeles"))
            .and_then(|batch| batch.update(&sf, MapValue::new()));
        assert_eq!(result.unwrap_err().code(), "invalid-argument");

        assert!(!la.get().await.unwrap().exists());
    }

    #[tokio::test]
    async fn test_empty_batch_commits() {
        let db = memory_firestore();
        let batch = db.batch();
        assert!(batch.is_empty());
        batch.commit().await.unwrap();
    }
}
