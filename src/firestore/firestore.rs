//! Firestore client
//!
//! [`Firestore`] is the root handle: it hands out references, batches and
//! transactions, owns the settings and the local document cache, and routes
//! every read, commit and watch through its [`Datastore`].
//!
//! The client "starts" on its first read, write or listener. Settings are
//! fixed from then on and persistence, when requested through
//! [`Settings::persistence_enabled`], is acquired at that point.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, PoisonError};

use tokio::sync::watch;

use super::aggregate_query::AggregateField;
use super::collection_reference::CollectionReference;
use super::datastore::{CommitRequest, CommitResponse, Datastore, ListenTarget, ReadVersion, RemoteDocument, WatchStream};
use super::document_reference::DocumentReference;
use super::field_value::Value;
use super::local_cache::{self, LocalCache};
use super::mutation::WriteOperation;
use super::path::{resolve_collection, resolve_document, ResourcePath};
use super::query::{Query, QueryState};
use super::settings::{Settings, Source};
use super::transaction::{Transaction, TransactionOptions};
use super::write_batch::WriteBatch;
use crate::app::App;
use crate::error::{
    failed_precondition, invalid_argument, unavailable, FirebaseError, FirebaseResult, FirestoreError,
    PersistenceFailure,
};

/// Database used when none is given
pub const DEFAULT_DATABASE_ID: &str = "(default)";

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// Network state as seen by listeners
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NetworkState {
    Enabled,
    Disabled,
    Terminated,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn is_unavailable(err: &FirebaseError) -> bool {
    matches!(err.firestore(), Some(FirestoreError::Unavailable(_)))
}

/// Firestore database client
///
/// Cheap to clone; clones share the same client.
///
/// # Example
/// ```no_run
/// use firestore_rust_sdk::{App, AppOptions};
/// use firestore_rust_sdk::firestore::{Firestore, MapValue, MemoryDatastore};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let app = App::create(AppOptions {
///     api_key: "YOUR_API_KEY".to_string(),
///     project_id: "your-project-id".to_string(),
///     app_name: None,
/// })
/// .await?;
///
/// let firestore = Firestore::new(&app, MemoryDatastore::new());
/// let alice = firestore.collection("users")?.add(MapValue::new().with("name", "alice")).await?;
/// println!("created {}", alice.id());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Firestore {
    pub(crate) inner: Arc<FirestoreInner>,
}

pub(crate) struct FirestoreInner {
    pub(crate) client_id: u64,
    app: App,
    database_id: String,
    datastore: Arc<dyn Datastore>,
    settings: RwLock<Settings>,
    started: AtomicBool,
    network: watch::Sender<NetworkState>,
    cache: RwLock<Arc<LocalCache>>,
    persistence_held: AtomicBool,
}

impl Firestore {
    /// Create a client for the default database of `app`'s project
    pub fn new(app: &App, datastore: impl Datastore) -> Self {
        Self::from_datastore(app, DEFAULT_DATABASE_ID.to_string(), Arc::new(datastore))
    }

    /// Create a client for a named database
    pub fn with_database(
        app: &App,
        database_id: impl Into<String>,
        datastore: impl Datastore,
    ) -> FirebaseResult<Self> {
        let database_id = database_id.into();
        if database_id.is_empty() || database_id.contains('/') {
            return Err(invalid_argument(format!("invalid database id '{}'", database_id)));
        }
        Ok(Self::from_datastore(app, database_id, Arc::new(datastore)))
    }

    /// Create a client over a shared datastore handle
    pub fn from_datastore(app: &App, database_id: String, datastore: Arc<dyn Datastore>) -> Self {
        let settings = Settings::default();
        let (network, _) = watch::channel(NetworkState::Enabled);
        let client_id = NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            client_id,
            project = app.project_id(),
            database = %database_id,
            "created Firestore client"
        );
        Self {
            inner: Arc::new(FirestoreInner {
                client_id,
                app: app.clone(),
                database_id,
                datastore,
                cache: RwLock::new(Arc::new(LocalCache::new(settings.cache_limit()))),
                settings: RwLock::new(settings),
                started: AtomicBool::new(false),
                network,
                persistence_held: AtomicBool::new(false),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<FirestoreInner>) -> Self {
        Self { inner }
    }

    /// The app this client belongs to
    pub fn app(&self) -> &App {
        &self.inner.app
    }

    /// Get the project ID
    pub fn project_id(&self) -> &str {
        self.inner.app.project_id()
    }

    /// Get the database ID
    pub fn database_id(&self) -> &str {
        &self.inner.database_id
    }

    /// Current settings
    pub fn settings(&self) -> Settings {
        read(&self.inner.settings).clone()
    }

    /// Replace the settings
    ///
    /// # Errors
    /// - `InvalidArgument` if the settings are invalid
    /// - `FailedPrecondition` once the client has started
    pub fn set_settings(&self, settings: Settings) -> FirebaseResult<()> {
        settings.validate()?;
        let mut current = write(&self.inner.settings);
        if self.inner.started.load(Ordering::SeqCst) {
            return Err(failed_precondition(
                "settings can no longer be changed after the client has started",
            ));
        }
        self.inner.cache().set_limit(settings.cache_limit());
        *current = settings;
        Ok(())
    }

    /// Get a collection reference; `path` must have an odd number of segments
    pub fn collection(&self, path: &str) -> FirebaseResult<CollectionReference> {
        let path = resolve_collection(&ResourcePath::root(), path)?;
        Ok(CollectionReference::new(path, Arc::clone(&self.inner)))
    }

    /// Get a document reference; `path` must have an even number of segments
    pub fn document(&self, path: &str) -> FirebaseResult<DocumentReference> {
        let path = resolve_document(&ResourcePath::root(), path)?;
        Ok(DocumentReference::new(path, Arc::clone(&self.inner)))
    }

    /// Query every collection named `collection_id`, at any depth
    pub fn collection_group(&self, collection_id: &str) -> FirebaseResult<Query> {
        if collection_id.is_empty() || collection_id.contains('/') {
            return Err(invalid_argument(format!(
                "invalid collection id '{}': must be non-empty and contain no '/'",
                collection_id
            )));
        }
        Ok(Query::new(
            Arc::clone(&self.inner),
            QueryState::for_collection_group(collection_id.to_string()),
        ))
    }

    /// Create a new write batch
    pub fn batch(&self) -> WriteBatch {
        WriteBatch::new(Arc::clone(&self.inner))
    }

    /// Run a read-write transaction
    ///
    /// `update` is called once per attempt with a fresh [`Transaction`]. When
    /// it succeeds its writes are committed; if a document it read changed in
    /// the meantime, `update` is called again, up to
    /// [`Settings::max_transaction_attempts`] times.
    ///
    /// # Errors
    /// - whatever `update` returns, immediately and without committing
    /// - `TransactionFailed` when every attempt conflicted
    /// - any other commit failure (`NotFound`, `Aborted`, `Unavailable`)
    ///
    /// # Example
    /// ```no_run
    /// # use firestore_rust_sdk::firestore::{Firestore, MapValue, Value};
    /// # async fn example(firestore: Firestore) -> Result<(), Box<dyn std::error::Error>> {
    /// let from = firestore.document("accounts/alice")?;
    /// let to = firestore.document("accounts/bob")?;
    ///
    /// firestore
    ///     .run_transaction(|txn| {
    ///         let (from, to) = (from.clone(), to.clone());
    ///         async move {
    ///             let balance = txn.get(&from).await?.get("balance").and_then(|v| v.as_i64()).unwrap_or(0);
    ///             txn.update(&from, MapValue::new().with("balance", balance - 10))?;
    ///             txn.update(&to, MapValue::new().with("balance", Value::increment(10)))?;
    ///             Ok(())
    ///         }
    ///     })
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn run_transaction<F, Fut, T>(&self, update: F) -> FirebaseResult<T>
    where
        F: FnMut(Transaction) -> Fut,
        Fut: Future<Output = FirebaseResult<T>>,
    {
        let options = TransactionOptions {
            max_attempts: self.settings().max_transaction_attempts,
        };
        self.run_transaction_with_options(options, update).await
    }

    /// Run a read-write transaction with an explicit retry budget
    pub async fn run_transaction_with_options<F, Fut, T>(
        &self,
        options: TransactionOptions,
        mut update: F,
    ) -> FirebaseResult<T>
    where
        F: FnMut(Transaction) -> Fut,
        Fut: Future<Output = FirebaseResult<T>>,
    {
        options.validate()?;
        self.inner.check_active()?;

        for attempt in 1..=options.max_attempts {
            let transaction = Transaction::new(Arc::clone(&self.inner));
            let outcome = update(transaction.clone()).await;
            let (writes, read_versions) = transaction.finish();
            let value = outcome?;

            if writes.is_empty() {
                return Ok(value);
            }
            match self.inner.commit_writes(writes, read_versions).await {
                Ok(_) => {
                    tracing::debug!(attempt, "transaction committed");
                    return Ok(value);
                }
                Err(FirebaseError::Firestore(FirestoreError::Conflict(reason))) => {
                    tracing::debug!(attempt, %reason, "transaction conflicted, retrying");
                }
                Err(e) => return Err(e),
            }
        }

        Err(FirestoreError::TransactionFailed {
            attempts: options.max_attempts,
        }
        .into())
    }

    /// Hold the persisted local cache for this project and database
    ///
    /// Must be called before the client starts. On failure the client keeps
    /// working with a private memory cache.
    ///
    /// # Errors
    /// - `Persistence(Unsupported)` if the datastore cannot persist a cache
    /// - `Persistence(AlreadyOpen)` if another live client holds it
    /// - `FailedPrecondition` if the client has started or was terminated
    pub fn enable_persistence(&self) -> FirebaseResult<()> {
        self.inner.check_active()?;
        if self.inner.started.load(Ordering::SeqCst) {
            return Err(failed_precondition(
                "persistence must be enabled before the client starts",
            ));
        }
        let limit = read(&self.inner.settings).cache_limit();
        self.inner
            .acquire_persistence(limit)
            .map_err(|failure| FirestoreError::Persistence(failure).into())
    }

    /// Delete the persisted cache for this project and database
    ///
    /// Only allowed while no client holds it: this client must be terminated
    /// or not yet started.
    pub async fn clear_persistence(&self) -> FirebaseResult<()> {
        let inner = &self.inner;
        if inner.started.load(Ordering::SeqCst) && !inner.is_terminated() {
            return Err(failed_precondition(
                "clear_persistence requires a client that is terminated or not started",
            ));
        }
        local_cache::clear_persisted(&inner.persistence_key())?;
        inner.cache().clear();
        tracing::debug!(key = %inner.persistence_key(), "cleared persisted cache");
        Ok(())
    }

    /// Stop using the network; reads are answered from the cache and
    /// listeners re-deliver their last state marked as from-cache
    pub async fn disable_network(&self) -> FirebaseResult<()> {
        self.inner.check_active()?;
        self.inner.ensure_started();
        self.inner.set_network(NetworkState::Disabled);
        Ok(())
    }

    /// Resume using the network
    pub async fn enable_network(&self) -> FirebaseResult<()> {
        self.inner.check_active()?;
        self.inner.ensure_started();
        self.inner.set_network(NetworkState::Enabled);
        Ok(())
    }

    /// Shut the client down
    ///
    /// Releases persistence and ends every listener. Later operations fail
    /// with `FailedPrecondition`. Terminating twice is a no-op.
    pub async fn terminate(&self) -> FirebaseResult<()> {
        if self.inner.is_terminated() {
            return Ok(());
        }
        self.inner.network.send_replace(NetworkState::Terminated);
        self.inner.release_persistence();
        tracing::debug!(client_id = self.inner.client_id, "terminated Firestore client");
        Ok(())
    }

    /// Whether [`terminate`](Self::terminate) was called
    pub fn is_terminated(&self) -> bool {
        self.inner.is_terminated()
    }
}

impl std::fmt::Debug for Firestore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Firestore")
            .field("client_id", &self.inner.client_id)
            .field("project_id", &self.project_id())
            .field("database_id", &self.inner.database_id)
            .finish()
    }
}

impl FirestoreInner {
    pub(crate) fn cache(&self) -> Arc<LocalCache> {
        Arc::clone(&read(&self.cache))
    }

    pub(crate) fn network_state(&self) -> watch::Receiver<NetworkState> {
        self.network.subscribe()
    }

    fn network_enabled(&self) -> bool {
        *self.network.borrow() == NetworkState::Enabled
    }

    fn is_terminated(&self) -> bool {
        *self.network.borrow() == NetworkState::Terminated
    }

    fn set_network(&self, state: NetworkState) {
        let previous = self.network.send_replace(state);
        if previous != state {
            tracing::debug!(client_id = self.client_id, ?state, "network state changed");
        }
    }

    fn persistence_key(&self) -> String {
        format!("{}/{}", self.app.project_id(), self.database_id)
    }

    pub(crate) fn check_active(&self) -> FirebaseResult<()> {
        if self.is_terminated() {
            return Err(failed_precondition("the client has been terminated"));
        }
        Ok(())
    }

    /// Fix the settings and acquire persistence if requested
    pub(crate) fn ensure_started(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let settings = read(&self.settings).clone();
        tracing::debug!(client_id = self.client_id, host = %settings.host, "starting Firestore client");
        if settings.persistence_enabled && !self.persistence_held.load(Ordering::SeqCst) {
            if let Err(failure) = self.acquire_persistence(settings.cache_limit()) {
                tracing::warn!(%failure, "persistence unavailable, using a memory cache");
            }
        }
    }

    fn acquire_persistence(&self, limit: Option<usize>) -> Result<(), PersistenceFailure> {
        if self.persistence_held.load(Ordering::SeqCst) {
            return Ok(());
        }
        if !self.datastore.supports_persistence() {
            return Err(PersistenceFailure::Unsupported);
        }
        let cache = local_cache::acquire_persistence(&self.persistence_key(), self.client_id, limit)?;
        *write(&self.cache) = cache;
        self.persistence_held.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn release_persistence(&self) {
        if self.persistence_held.swap(false, Ordering::SeqCst) {
            local_cache::release_persistence(&self.persistence_key(), self.client_id);
        }
    }

    fn prepare_io(&self) -> FirebaseResult<()> {
        self.check_active()?;
        self.ensure_started();
        Ok(())
    }

    fn require_network(&self) -> FirebaseResult<()> {
        if !self.network_enabled() {
            return Err(unavailable("the network is disabled"));
        }
        Ok(())
    }

    /// Read one document; the flag is true when the cache answered
    pub(crate) async fn lookup_document(
        &self,
        path: &ResourcePath,
        source: Source,
    ) -> FirebaseResult<(RemoteDocument, bool)> {
        self.prepare_io()?;
        let from_cache = || {
            self.cache()
                .get(path)
                .map(|document| (document, true))
                .ok_or_else(|| unavailable(format!("document '{}' is not in the cache", path)))
        };
        match source {
            Source::Cache => from_cache(),
            Source::Server => Ok((self.lookup_remote(path).await?, false)),
            Source::Default => match self.lookup_remote(path).await {
                Ok(document) => Ok((document, false)),
                Err(err) if is_unavailable(&err) => {
                    tracing::debug!(path = %path, "server unreachable, reading document from cache");
                    from_cache().map_err(|_| err)
                }
                Err(err) => Err(err),
            },
        }
    }

    async fn lookup_remote(&self, path: &ResourcePath) -> FirebaseResult<RemoteDocument> {
        self.require_network()?;
        let documents = self.datastore.lookup(std::slice::from_ref(path)).await?;
        let document = documents
            .into_iter()
            .find(|document| &document.path == path)
            .unwrap_or_else(|| RemoteDocument::missing(path.clone()));
        self.cache().store(std::slice::from_ref(&document));
        Ok(document)
    }

    /// Execute a query; the flag is true when the cache answered
    pub(crate) async fn run_query(
        &self,
        query: &QueryState,
        source: Source,
    ) -> FirebaseResult<(Vec<RemoteDocument>, bool)> {
        self.prepare_io()?;
        match source {
            Source::Cache => Ok((self.cache().query(query), true)),
            Source::Server => Ok((self.query_remote(query).await?, false)),
            Source::Default => match self.query_remote(query).await {
                Ok(documents) => Ok((documents, false)),
                Err(err) if is_unavailable(&err) => {
                    tracing::debug!("server unreachable, evaluating query over the cache");
                    Ok((self.cache().query(query), true))
                }
                Err(err) => Err(err),
            },
        }
    }

    async fn query_remote(&self, query: &QueryState) -> FirebaseResult<Vec<RemoteDocument>> {
        self.require_network()?;
        let documents = self.datastore.run_query(query).await?;
        self.cache().store_query_results(query, &documents);
        Ok(documents)
    }

    pub(crate) async fn run_aggregation(
        &self,
        query: &QueryState,
        aggregations: &[AggregateField],
    ) -> FirebaseResult<std::collections::BTreeMap<String, Value>> {
        self.prepare_io()?;
        self.require_network()?;
        self.datastore.run_aggregation(query, aggregations).await
    }

    /// Commit writes atomically; touched documents leave the cache
    pub(crate) async fn commit_writes(
        &self,
        writes: Vec<WriteOperation>,
        read_versions: Vec<ReadVersion>,
    ) -> FirebaseResult<CommitResponse> {
        self.prepare_io()?;
        self.require_network()?;
        let paths: Vec<ResourcePath> = writes.iter().map(|write| write.path().clone()).collect();
        tracing::debug!(writes = writes.len(), reads = read_versions.len(), "committing writes");
        let response = self
            .datastore
            .commit(CommitRequest {
                writes,
                read_versions,
            })
            .await?;
        self.cache().evict(&paths);
        Ok(response)
    }

    pub(crate) fn listen(&self, target: ListenTarget) -> FirebaseResult<WatchStream> {
        self.prepare_io()?;
        tracing::debug!(?target, "registering watch");
        self.datastore.listen(target)
    }

    /// Cached view of a watch target
    pub(crate) fn cached_documents(&self, target: &ListenTarget) -> Vec<RemoteDocument> {
        let cache = self.cache();
        match target {
            ListenTarget::Document(path) => vec![cache
                .get(path)
                .unwrap_or_else(|| RemoteDocument::missing(path.clone()))],
            ListenTarget::Query(query) => cache.query(query),
        }
    }

    /// Refresh the cache from a watch snapshot
    pub(crate) fn remember_documents(&self, target: &ListenTarget, documents: &[RemoteDocument]) {
        let cache = self.cache();
        match target {
            ListenTarget::Document(_) => cache.store(documents),
            ListenTarget::Query(query) => cache.store_query_results(query, documents),
        }
    }
}

impl Drop for FirestoreInner {
    fn drop(&mut self) {
        self.release_persistence();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firestore::field_value::MapValue;
    use crate::firestore::memory_datastore::MemoryDatastore;
    use crate::firestore::test_support::{memory_firestore, memory_firestore_for};

    #[test]
    fn test_client_ids_are_unique() {
        let a = memory_firestore();
        let b = memory_firestore();
        assert_ne!(a.inner.client_id, b.inner.client_id);
        assert_eq!(a.database_id(), DEFAULT_DATABASE_ID);
        assert_eq!(a.project_id(), "test-project");
    }

    #[test]
    fn test_reference_paths_validated() {
        let db = memory_firestore();
        assert_eq!(db.collection("users/alice").unwrap_err().code(), "invalid-path");
        assert_eq!(db.document("users").unwrap_err().code(), "invalid-path");
        assert_eq!(db.collection("users//posts").unwrap_err().code(), "invalid-path");
        assert_eq!(db.collection_group("a/b").unwrap_err().code(), "invalid-argument");
    }

    #[tokio::test]
    async fn test_settings_fixed_after_start() {
        let db = memory_firestore();
        let settings = Settings {
            max_transaction_attempts: 3,
            ..Settings::default()
        };
        db.set_settings(settings.clone()).unwrap();
        assert_eq!(db.settings(), settings);

        db.document("users/alice").unwrap().get().await.unwrap();
        let err = db.set_settings(Settings::default()).unwrap_err();
        assert_eq!(err.code(), "failed-precondition");
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let db = memory_firestore();
        let settings = Settings {
            cache_size_bytes: 1,
            ..Settings::default()
        };
        assert_eq!(db.set_settings(settings).unwrap_err().code(), "invalid-argument");
    }

    #[test]
    fn test_persistence_unsupported() {
        let app = App::detached("persistence-unsupported");
        let db = Firestore::new(&app, MemoryDatastore::without_persistence());
        let err = db.enable_persistence().unwrap_err();
        assert_eq!(
            err.firestore(),
            Some(&FirestoreError::Persistence(PersistenceFailure::Unsupported))
        );
    }

    #[tokio::test]
    async fn test_persistence_held_by_one_client() {
        let first = memory_firestore_for("persistence-exclusive");
        let second = memory_firestore_for("persistence-exclusive");
        first.enable_persistence().unwrap();
        assert_eq!(
            second.enable_persistence().unwrap_err().firestore(),
            Some(&FirestoreError::Persistence(PersistenceFailure::AlreadyOpen))
        );
        assert_eq!(second.clear_persistence().await.unwrap_err().code(), "failed-precondition");

        first.terminate().await.unwrap();
        second.enable_persistence().unwrap();
        second.terminate().await.unwrap();
        second.clear_persistence().await.unwrap();
    }

    #[tokio::test]
    async fn test_terminate_rejects_operations() {
        let db = memory_firestore();
        let doc = db.document("users/alice").unwrap();
        db.terminate().await.unwrap();
        assert!(db.is_terminated());
        db.terminate().await.unwrap();

        assert_eq!(doc.get().await.unwrap_err().code(), "failed-precondition");
        assert_eq!(
            doc.set(MapValue::new().with("a", 1)).await.unwrap_err().code(),
            "failed-precondition"
        );
        assert_eq!(db.disable_network().await.unwrap_err().code(), "failed-precondition");
    }

    #[tokio::test]
    async fn test_offline_writes_fail() {
        let db = memory_firestore();
        db.disable_network().await.unwrap();
        let err = db
            .document("users/alice")
            .unwrap()
            .set(MapValue::new().with("a", 1))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "unavailable");
    }

    #[tokio::test]
    async fn test_transaction_options_validated() {
        let db = memory_firestore();
        let err = db
            .run_transaction_with_options(TransactionOptions { max_attempts: 0 }, |_txn| async { Ok(()) })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid-argument");
    }
}
