//! Firestore transaction support
//!
//! A transaction is a callback run by
//! [`Firestore::run_transaction`](super::Firestore::run_transaction). Each
//! attempt gets a fresh [`Transaction`]: reads go to the server and record the
//! version seen, writes are buffered, and on success the writes are committed
//! with those versions as preconditions. A stale read fails the commit and the
//! callback is run again from scratch.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::datastore::ReadVersion;
use super::document_reference::DocumentReference;
use super::document_snapshot::{DocumentSnapshot, SnapshotMetadata};
use super::field_value::MapValue;
use super::firestore::FirestoreInner;
use super::mutation::{prepare_delete, prepare_set, prepare_update, SetOptions, UpdateSpec, WriteOperation};
use super::settings::{Settings, Source};
use crate::error::{failed_precondition, invalid_argument, FirebaseResult};

/// Options for [`Firestore::run_transaction_with_options`](super::Firestore::run_transaction_with_options)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionOptions {
    /// Attempts made before giving up with `TransactionFailed`
    ///
    /// Default: 5
    pub max_attempts: usize,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            max_attempts: Settings::DEFAULT_MAX_TRANSACTION_ATTEMPTS,
        }
    }
}

impl TransactionOptions {
    pub(crate) fn validate(&self) -> FirebaseResult<()> {
        if self.max_attempts == 0 {
            return Err(invalid_argument("max_attempts must be at least 1"));
        }
        Ok(())
    }
}

/// Transaction for atomic read-write operations
///
/// All reads must be executed before any writes. The handle is cheap to clone;
/// every clone refers to the same attempt, and using it after the attempt
/// ended fails with `FailedPrecondition`.
///
/// # Example
/// ```no_run
/// # use firestore_rust_sdk::firestore::{Firestore, MapValue};
/// # async fn example(firestore: Firestore) -> Result<(), Box<dyn std::error::Error>> {
/// let counter = firestore.document("counters/visits")?;
///
/// let next = firestore
///     .run_transaction(|txn| {
///         let counter = counter.clone();
///         async move {
///             let snapshot = txn.get(&counter).await?;
///             let count = snapshot.get("count").and_then(|v| v.as_i64()).unwrap_or(0);
///             txn.set(&counter, MapValue::new().with("count", count + 1))?;
///             Ok(count + 1)
///         }
///     })
///     .await?;
/// println!("visits: {}", next);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Transaction {
    state: Arc<Mutex<TransactionState>>,
}

struct TransactionState {
    firestore: Arc<FirestoreInner>,
    read_versions: Vec<ReadVersion>,
    writes: Vec<WriteOperation>,
    finished: bool,
}

impl Transaction {
    pub(crate) fn new(firestore: Arc<FirestoreInner>) -> Self {
        Self {
            state: Arc::new(Mutex::new(TransactionState {
                firestore,
                read_versions: Vec::new(),
                writes: Vec::new(),
                finished: false,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TransactionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get a document within the transaction
    ///
    /// Always reads from the server. Returns a snapshot whose `exists()` is
    /// false when the document is missing.
    ///
    /// # Errors
    /// - `InvalidArgument` if a write was already buffered in this attempt, or
    ///   the reference belongs to another client
    /// - `FailedPrecondition` if the attempt has ended
    pub async fn get(&self, document: &DocumentReference) -> FirebaseResult<DocumentSnapshot> {
        let firestore = {
            let state = self.lock();
            state.check_open()?;
            if !state.writes.is_empty() {
                return Err(invalid_argument(
                    "Firestore transactions require all reads to be executed before all writes",
                ));
            }
            if state.firestore.client_id != document.firestore.client_id {
                return Err(invalid_argument(
                    "document reference belongs to a different Firestore instance",
                ));
            }
            Arc::clone(&state.firestore)
        };

        let (remote, _) = firestore.lookup_document(&document.path, Source::Server).await?;

        let mut state = self.lock();
        state.check_open()?;
        if !state.read_versions.iter().any(|read| read.path == remote.path) {
            state.read_versions.push(ReadVersion {
                path: remote.path.clone(),
                update_time: remote.update_time,
            });
        }
        drop(state);

        Ok(DocumentSnapshot::from_remote(
            document.clone(),
            remote,
            SnapshotMetadata::default(),
        ))
    }

    /// Overwrite a document when the transaction commits
    pub fn set(&self, document: &DocumentReference, data: MapValue) -> FirebaseResult<()> {
        self.set_with_options(document, data, SetOptions::Overwrite)
    }

    /// Write a document when the transaction commits, optionally merging
    pub fn set_with_options(
        &self,
        document: &DocumentReference,
        data: MapValue,
        options: SetOptions,
    ) -> FirebaseResult<()> {
        self.buffer(|owner| prepare_set(owner, document, data, options))
    }

    /// Update fields of a document when the transaction commits
    ///
    /// The commit fails with `NotFound` if the document does not exist then.
    pub fn update(&self, document: &DocumentReference, spec: impl Into<UpdateSpec>) -> FirebaseResult<()> {
        let spec = spec.into();
        self.buffer(|owner| prepare_update(owner, document, spec))
    }

    /// Delete a document when the transaction commits
    pub fn delete(&self, document: &DocumentReference) -> FirebaseResult<()> {
        self.buffer(|owner| prepare_delete(owner, document))
    }

    fn buffer(
        &self,
        prepare: impl FnOnce(&FirestoreInner) -> FirebaseResult<WriteOperation>,
    ) -> FirebaseResult<()> {
        let mut state = self.lock();
        state.check_open()?;
        let write = prepare(&state.firestore)?;
        state.writes.push(write);
        Ok(())
    }

    /// End the attempt and hand over its writes and read versions
    pub(crate) fn finish(&self) -> (Vec<WriteOperation>, Vec<ReadVersion>) {
        let mut state = self.lock();
        state.finished = true;
        (
            std::mem::take(&mut state.writes),
            std::mem::take(&mut state.read_versions),
        )
    }
}

impl TransactionState {
    fn check_open(&self) -> FirebaseResult<()> {
        if self.finished {
            return Err(failed_precondition("transaction attempt has already ended"));
        }
        Ok(())
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("Transaction")
            .field("reads", &state.read_versions.len())
            .field("writes", &state.writes.len())
            .field("finished", &state.finished)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firestore::test_support::memory_firestore;

    #[tokio::test]
    async fn test_transaction_read_before_write() {
        let db = memory_firestore();
        let doc = db.document("counters/a").unwrap();
        let txn = Transaction::new(Arc::clone(&db.inner));

        let snapshot = txn.get(&doc).await.unwrap();
        assert!(!snapshot.exists());

        txn.set(&doc, MapValue::new().with("count", 1)).unwrap();
        let err = txn.get(&doc).await.unwrap_err();
        assert_eq!(err.code(), "invalid-argument");
    }

    #[tokio::test]
    async fn test_finish_hands_over_buffers() {
        let db = memory_firestore();
        let doc = db.document("counters/a").unwrap();
        let txn = Transaction::new(Arc::clone(&db.inner));
        txn.get(&doc).await.unwrap();
        txn.get(&doc).await.unwrap();
        txn.delete(&doc).unwrap();

        let (writes, reads) = txn.finish();
        assert_eq!(writes.len(), 1);
        assert_eq!(reads.len(), 1);
        assert_eq!(reads[0].update_time, None);
    }

    #[tokio::test]
    async fn test_use_after_finish_fails() {
        let db = memory_firestore();
        let doc = db.document("counters/a").unwrap();
        let txn = Transaction::new(Arc::clone(&db.inner));
        let escaped = txn.clone();
        txn.finish();

        assert_eq!(escaped.delete(&doc).unwrap_err().code(), "failed-precondition");
        assert_eq!(escaped.get(&doc).await.unwrap_err().code(), "failed-precondition");
    }

    #[test]
    fn test_options_validation() {
        assert_eq!(TransactionOptions::default().max_attempts, 5);
        let options = TransactionOptions { max_attempts: 0 };
        assert_eq!(options.validate().unwrap_err().code(), "invalid-argument");
    }
}
