//! Snapshot listener streams
//!
//! A [`SnapshotStream`] is one consumer attached to a
//! [`SnapshotListener`](super::SnapshotListener). It yields every delivery made
//! after it attached, then ends when the listener terminates. Dropping the
//! stream detaches the consumer; when the last consumer detaches the listener
//! is cancelled and its datastore watch released.
//!
//! # Example
//! ```no_run
//! use firestore_rust_sdk::firestore::{Firestore, MetadataChanges};
//! use futures::StreamExt;
//!
//! # async fn example(firestore: Firestore) -> Result<(), Box<dyn std::error::Error>> {
//! let doc_ref = firestore.collection("cities")?.document("SF")?;
//!
//! let mut stream = doc_ref.listen(MetadataChanges::Exclude)?;
//! while let Some(result) = stream.next().await {
//!     match result {
//!         Ok(snapshot) => println!("Document: {:?}", snapshot.id()),
//!         Err(e) => eprintln!("Error: {}", e),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;

use super::document_snapshot::DocumentSnapshot;
use super::query_snapshot::QuerySnapshot;
use crate::error::FirebaseError;

type Detach = Box<dyn FnOnce() + Send + Sync>;

/// A stream of snapshot updates for one consumer
pub struct SnapshotStream<T> {
    receiver: mpsc::UnboundedReceiver<Result<T, FirebaseError>>,
    detach: Option<Detach>,
}

/// Stream of updates for a single document
pub type DocumentSnapshotStream = SnapshotStream<DocumentSnapshot>;

/// Stream of updates for a query result set
pub type QuerySnapshotStream = SnapshotStream<QuerySnapshot>;

impl<T> SnapshotStream<T> {
    pub(crate) fn new(
        receiver: mpsc::UnboundedReceiver<Result<T, FirebaseError>>,
        detach: impl FnOnce() + Send + Sync + 'static,
    ) -> Self {
        Self {
            receiver,
            detach: Some(Box::new(detach)),
        }
    }
}

impl<T> Stream for SnapshotStream<T> {
    type Item = Result<T, FirebaseError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl<T> Drop for SnapshotStream<T> {
    fn drop(&mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl<T> std::fmt::Debug for SnapshotStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotStream").finish_non_exhaustive()
    }
}
