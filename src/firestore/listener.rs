//! Snapshot listeners
//!
//! A [`SnapshotListener`] is one live-update subscription on a document or a
//! query. It moves through `Idle -> Listening -> Cancelled`:
//!
//! - `on_snapshot` returns an idle listener; nothing is registered yet.
//! - The first [`subscribe`](SnapshotListener::subscribe) registers exactly one
//!   datastore watch and spawns one forwarding task. Every attached
//!   [`SnapshotStream`] receives each later delivery, in order.
//! - When the last stream is dropped, or the watch fails, the subscription is
//!   cancelled and the forwarding task releases the watch.
//!
//! Deliveries that repeat the previous snapshot are suppressed. A delivery that
//! only changes metadata (e.g. going from server to cache) is suppressed unless
//! the listener was created with [`MetadataChanges::Include`].

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::StreamExt;
use tokio::sync::{mpsc, oneshot, watch};

use super::datastore::{ListenTarget, RemoteDocument, WatchEvent, WatchStream};
use super::document_reference::DocumentReference;
use super::document_snapshot::{DocumentSnapshot, SnapshotMetadata};
use super::firestore::{FirestoreInner, NetworkState};
use super::metadata_changes::MetadataChanges;
use super::query::Query;
use super::query_snapshot::QuerySnapshot;
use super::snapshot_stream::SnapshotStream;
use crate::error::{FirebaseError, FirebaseResult, FirestoreError};

mod sealed {
    pub trait Sealed {}
}

/// Snapshot types a listener can deliver
///
/// Implemented by [`DocumentSnapshot`] and [`QuerySnapshot`].
pub trait ListenedSnapshot: sealed::Sealed + Clone + Send + Sync + 'static {
    /// What the listener watches
    #[doc(hidden)]
    type Origin: Clone + Send + Sync + 'static;

    #[doc(hidden)]
    fn target(origin: &Self::Origin) -> ListenTarget;

    #[doc(hidden)]
    fn build(
        origin: &Self::Origin,
        documents: Vec<RemoteDocument>,
        previous: Option<&Self>,
        metadata: SnapshotMetadata,
    ) -> Self;

    #[doc(hidden)]
    fn same_view(&self, other: &Self) -> bool;

    #[doc(hidden)]
    fn view_metadata(&self) -> SnapshotMetadata;
}

impl sealed::Sealed for DocumentSnapshot {}

impl ListenedSnapshot for DocumentSnapshot {
    type Origin = DocumentReference;

    fn target(origin: &DocumentReference) -> ListenTarget {
        ListenTarget::Document(origin.path.clone())
    }

    fn build(
        origin: &DocumentReference,
        documents: Vec<RemoteDocument>,
        _previous: Option<&Self>,
        metadata: SnapshotMetadata,
    ) -> Self {
        let remote = documents
            .into_iter()
            .find(|doc| doc.path == origin.path)
            .unwrap_or_else(|| RemoteDocument::missing(origin.path.clone()));
        DocumentSnapshot::from_remote(origin.clone(), remote, metadata)
    }

    fn same_view(&self, other: &Self) -> bool {
        self.same_contents(other)
    }

    fn view_metadata(&self) -> SnapshotMetadata {
        self.metadata
    }
}

impl sealed::Sealed for QuerySnapshot {}

impl ListenedSnapshot for QuerySnapshot {
    type Origin = Query;

    fn target(origin: &Query) -> ListenTarget {
        ListenTarget::Query(origin.state.clone())
    }

    fn build(
        origin: &Query,
        documents: Vec<RemoteDocument>,
        previous: Option<&Self>,
        metadata: SnapshotMetadata,
    ) -> Self {
        let documents = documents
            .into_iter()
            .map(|remote| origin.snapshot_of(remote, metadata))
            .collect();
        QuerySnapshot::new(
            origin.clone(),
            documents,
            previous.map(QuerySnapshot::documents),
            metadata,
        )
    }

    fn same_view(&self, other: &Self) -> bool {
        self.same_contents(other)
    }

    fn view_metadata(&self) -> SnapshotMetadata {
        self.metadata
    }
}

/// Lifecycle of a snapshot listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    /// Created, no consumer attached yet
    Idle,
    /// Watch registered, delivering to attached consumers
    Listening,
    /// Terminated; no further deliveries
    Cancelled,
}

/// Live-update subscription on a document or query
///
/// Cloning the listener yields another handle to the same subscription.
pub struct SnapshotListener<T: ListenedSnapshot> {
    shared: Arc<ListenerShared<T>>,
}

/// Listener on a single document
pub type DocumentSnapshotListener = SnapshotListener<DocumentSnapshot>;

/// Listener on a query result set
pub type QuerySnapshotListener = SnapshotListener<QuerySnapshot>;

type Consumer<T> = mpsc::UnboundedSender<FirebaseResult<T>>;

struct ListenerShared<T: ListenedSnapshot> {
    firestore: Arc<FirestoreInner>,
    origin: T::Origin,
    metadata_changes: MetadataChanges,
    registry: Mutex<Registry<T>>,
}

struct Registry<T> {
    state: ListenerState,
    consumers: Vec<(u64, Consumer<T>)>,
    next_consumer: u64,
    cancel: Option<oneshot::Sender<()>>,
}

impl SnapshotListener<DocumentSnapshot> {
    pub(crate) fn for_document(document: DocumentReference, metadata_changes: MetadataChanges) -> Self {
        Self::new(Arc::clone(&document.firestore), document, metadata_changes)
    }
}

impl SnapshotListener<QuerySnapshot> {
    pub(crate) fn for_query(query: Query, metadata_changes: MetadataChanges) -> Self {
        Self::new(Arc::clone(&query.firestore), query, metadata_changes)
    }
}

impl<T: ListenedSnapshot> SnapshotListener<T> {
    fn new(firestore: Arc<FirestoreInner>, origin: T::Origin, metadata_changes: MetadataChanges) -> Self {
        Self {
            shared: Arc::new(ListenerShared {
                firestore,
                origin,
                metadata_changes,
                registry: Mutex::new(Registry {
                    state: ListenerState::Idle,
                    consumers: Vec::new(),
                    next_consumer: 0,
                    cancel: None,
                }),
            }),
        }
    }

    /// Attach a consumer
    ///
    /// The first consumer registers the datastore watch; it must be called
    /// from within a Tokio runtime.
    ///
    /// # Errors
    /// - [`FirebaseError::Cancelled`] if the listener was already cancelled
    /// - `FailedPrecondition` if the client was terminated
    pub fn subscribe(&self) -> FirebaseResult<SnapshotStream<T>> {
        let mut registry = self.shared.lock();
        match registry.state {
            ListenerState::Cancelled => return Err(FirebaseError::Cancelled),
            ListenerState::Listening => {}
            ListenerState::Idle => {
                let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
                    FirebaseError::internal("snapshot listeners require a Tokio runtime")
                })?;
                let events = self.shared.firestore.listen(T::target(&self.shared.origin))?;
                let (cancel_tx, cancel_rx) = oneshot::channel();
                registry.cancel = Some(cancel_tx);
                registry.state = ListenerState::Listening;
                runtime.spawn(forward(Arc::clone(&self.shared), events, cancel_rx));
            }
        }

        let id = registry.next_consumer;
        registry.next_consumer += 1;
        let (tx, rx) = mpsc::unbounded_channel();
        registry.consumers.push((id, tx));
        tracing::debug!(consumer = id, consumers = registry.consumers.len(), "attached listener consumer");
        drop(registry);

        let shared = Arc::clone(&self.shared);
        Ok(SnapshotStream::new(rx, move || shared.detach(id)))
    }

    /// Current lifecycle state
    pub fn listener_state(&self) -> ListenerState {
        self.shared.lock().state
    }

    /// Number of attached consumers
    pub fn consumer_count(&self) -> usize {
        self.shared.lock().consumers.len()
    }
}

impl<T: ListenedSnapshot> Clone for SnapshotListener<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: ListenedSnapshot> std::fmt::Debug for SnapshotListener<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.shared.lock();
        f.debug_struct("SnapshotListener")
            .field("state", &registry.state)
            .field("consumers", &registry.consumers.len())
            .field("metadata_changes", &self.shared.metadata_changes)
            .finish()
    }
}

impl<T: ListenedSnapshot> ListenerShared<T> {
    fn lock(&self) -> MutexGuard<'_, Registry<T>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn detach(&self, id: u64) {
        let mut registry = self.lock();
        registry.consumers.retain(|(consumer, _)| *consumer != id);
        tracing::debug!(consumer = id, consumers = registry.consumers.len(), "detached listener consumer");
        if registry.consumers.is_empty() && registry.state == ListenerState::Listening {
            registry.state = ListenerState::Cancelled;
            if let Some(cancel) = registry.cancel.take() {
                let _ = cancel.send(());
            }
        }
    }

    fn broadcast(&self, snapshot: &T) {
        let registry = self.lock();
        for (_, consumer) in &registry.consumers {
            let _ = consumer.send(Ok(snapshot.clone()));
        }
    }

    fn broadcast_error(&self, err: &FirestoreError) {
        let registry = self.lock();
        for (_, consumer) in &registry.consumers {
            let _ = consumer.send(Err(FirebaseError::from(err.clone())));
        }
    }

    /// Terminate: every consumer sees end-of-stream
    fn finish(&self) {
        let mut registry = self.lock();
        registry.state = ListenerState::Cancelled;
        registry.consumers.clear();
        registry.cancel = None;
    }
}

/// Per-subscription view state kept by the forwarding task
struct View<T: ListenedSnapshot> {
    shared: Arc<ListenerShared<T>>,
    target: ListenTarget,
    last: Option<T>,
    last_documents: Option<Vec<RemoteDocument>>,
    server_documents: Option<Vec<RemoteDocument>>,
    watch_online: bool,
}

impl<T: ListenedSnapshot> View<T> {
    fn deliver(&mut self, documents: Vec<RemoteDocument>, from_cache: bool) {
        let metadata = SnapshotMetadata::from_cache(from_cache);
        let snapshot = T::build(&self.shared.origin, documents.clone(), self.last.as_ref(), metadata);

        if let Some(previous) = &self.last {
            if previous.same_view(&snapshot) {
                let metadata_only = previous.view_metadata() != snapshot.view_metadata();
                if !metadata_only || !self.shared.metadata_changes.includes_metadata() {
                    tracing::trace!(metadata_only, "suppressed snapshot delivery");
                    self.last = Some(snapshot);
                    self.last_documents = Some(documents);
                    return;
                }
            }
        }

        tracing::trace!(from_cache, "delivering snapshot");
        self.shared.broadcast(&snapshot);
        self.last = Some(snapshot);
        self.last_documents = Some(documents);
    }

    /// Re-deliver the last state marked as coming from the cache
    fn deliver_stale(&mut self) {
        let documents = match &self.last_documents {
            Some(documents) => documents.clone(),
            None => self.shared.firestore.cached_documents(&self.target),
        };
        self.deliver(documents, true);
    }

    fn on_server_state(&mut self, documents: Vec<RemoteDocument>, network_enabled: bool) {
        self.watch_online = true;
        self.shared.firestore.remember_documents(&self.target, &documents);
        self.server_documents = Some(documents.clone());
        if network_enabled {
            self.deliver(documents, false);
        }
    }
}

async fn forward<T: ListenedSnapshot>(
    shared: Arc<ListenerShared<T>>,
    mut events: WatchStream,
    mut cancel: oneshot::Receiver<()>,
) {
    let mut network: watch::Receiver<NetworkState> = shared.firestore.network_state();
    let mut view = View {
        target: T::target(&shared.origin),
        shared: Arc::clone(&shared),
        last: None,
        last_documents: None,
        server_documents: None,
        watch_online: true,
    };
    tracing::debug!(target = ?view.target, "listener started");

    // The client may have been terminated before this task first ran; that
    // change is already marked seen, so it has to be handled here
    let initial = *network.borrow_and_update();
    match initial {
        NetworkState::Terminated => tracing::debug!("client terminated before the listener started"),
        NetworkState::Disabled => {
            view.deliver_stale();
            run(&mut view, &mut events, &mut network, &mut cancel).await;
        }
        NetworkState::Enabled => run(&mut view, &mut events, &mut network, &mut cancel).await,
    }

    // Dropping the watch unregisters it with the datastore
    drop(events);
    shared.finish();
    tracing::debug!("listener stopped");
}

/// Pump watch events and network changes until the subscription ends
async fn run<T: ListenedSnapshot>(
    view: &mut View<T>,
    events: &mut WatchStream,
    network: &mut watch::Receiver<NetworkState>,
    cancel: &mut oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut *cancel => {
                tracing::debug!("listener cancelled");
                return;
            }
            changed = network.changed() => {
                if changed.is_err() {
                    return;
                }
                let state = *network.borrow_and_update();
                match state {
                    NetworkState::Terminated => return,
                    NetworkState::Disabled => view.deliver_stale(),
                    NetworkState::Enabled => {
                        if view.watch_online {
                            if let Some(documents) = view.server_documents.clone() {
                                view.deliver(documents, false);
                            }
                        }
                    }
                }
            }
            event = events.next() => match event {
                Some(Ok(WatchEvent::Snapshot(documents))) => {
                    let enabled = *network.borrow() == NetworkState::Enabled;
                    view.on_server_state(documents, enabled);
                }
                Some(Ok(WatchEvent::Offline)) => {
                    view.watch_online = false;
                    view.deliver_stale();
                }
                Some(Err(err)) => {
                    tracing::warn!(error = %err, "listener watch failed");
                    view.shared.broadcast_error(&err);
                    return;
                }
                None => return,
            }
        }
    }
}
