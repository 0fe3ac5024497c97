//! In-process datastore
//!
//! `MemoryDatastore` behaves like a Firestore backend living in the same
//! process: it resolves write sentinels at commit time, enforces update and
//! transaction preconditions, evaluates queries and pushes watch events to
//! registered listeners. Clones share state, so several clients created over
//! clones of one `MemoryDatastore` observe each other's writes.

use std::collections::{BTreeMap, HashMap};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::datastore::{
    CommitRequest, CommitResponse, Datastore, ListenTarget, RemoteDocument, WatchEvent, WatchStream,
};
use super::field_path::FieldPath;
use super::field_value::{MapValue, Numeric, Sentinel, Value};
use super::mutation::WriteOperation;
use super::path::ResourcePath;
use super::query::QueryState;
use super::query_matcher::apply_query;
use super::timestamp::Timestamp;
use crate::error::{FirebaseResult, FirestoreError};

/// Writes accepted in a single commit
pub const MAX_WRITES_PER_COMMIT: usize = 500;

type WatchSender = mpsc::UnboundedSender<Result<WatchEvent, FirestoreError>>;

/// In-process Firestore backend
#[derive(Clone)]
pub struct MemoryDatastore {
    state: Arc<Mutex<MemoryState>>,
    supports_persistence: bool,
}

#[derive(Debug, Clone)]
struct StoredDocument {
    data: MapValue,
    update_time: Timestamp,
}

struct Watcher {
    target: ListenTarget,
    sender: WatchSender,
    last_sent: Option<Vec<RemoteDocument>>,
}

#[derive(Default)]
struct MemoryState {
    documents: BTreeMap<ResourcePath, StoredDocument>,
    watchers: HashMap<u64, Watcher>,
    next_watch_id: u64,
    last_commit: Option<Timestamp>,
    unreachable: bool,
    listen_count: usize,
    commit_count: usize,
}

fn lock(state: &Mutex<MemoryState>) -> MutexGuard<'_, MemoryState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Default for MemoryDatastore {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
            supports_persistence: true,
        }
    }
}

impl MemoryDatastore {
    /// Empty, reachable datastore
    pub fn new() -> Self {
        Self::default()
    }

    /// A datastore whose clients cannot enable local persistence
    pub fn without_persistence() -> Self {
        Self {
            supports_persistence: false,
            ..Self::default()
        }
    }

    /// Simulate losing or regaining the connection to the server
    ///
    /// While unreachable every request fails with `Unavailable` and watches
    /// receive [`WatchEvent::Offline`]; on reconnection they receive the
    /// current server state.
    pub fn set_reachable(&self, reachable: bool) {
        let mut state = lock(&self.state);
        if state.unreachable == !reachable {
            return;
        }
        state.unreachable = !reachable;
        tracing::debug!(reachable, "memory datastore reachability changed");
        if reachable {
            state.notify_watchers(true);
        } else {
            for watcher in state.watchers.values_mut() {
                watcher.last_sent = None;
                let _ = watcher.sender.send(Ok(WatchEvent::Offline));
            }
        }
    }

    /// Whether requests currently succeed
    pub fn is_reachable(&self) -> bool {
        !lock(&self.state).unreachable
    }

    /// Terminate every active watch with `error`
    pub fn fail_listeners(&self, error: FirestoreError) {
        let mut state = lock(&self.state);
        for (_, watcher) in state.watchers.drain() {
            let _ = watcher.sender.send(Err(error.clone()));
        }
    }

    /// Total watch registrations ever made
    pub fn listen_count(&self) -> usize {
        lock(&self.state).listen_count
    }

    /// Watches currently registered
    pub fn active_listener_count(&self) -> usize {
        lock(&self.state).watchers.len()
    }

    /// Successful commits so far
    pub fn commit_count(&self) -> usize {
        lock(&self.state).commit_count
    }

    /// Number of stored documents
    pub fn document_count(&self) -> usize {
        lock(&self.state).documents.len()
    }

    /// Server-side view of a document, bypassing any client
    pub fn document(&self, path: &str) -> FirebaseResult<RemoteDocument> {
        let path = ResourcePath::parse(path)?;
        Ok(lock(&self.state).remote_document(&path))
    }
}

impl MemoryState {
    fn ensure_reachable(&self) -> FirebaseResult<()> {
        if self.unreachable {
            return Err(FirestoreError::Unavailable("the datastore is unreachable".to_string()).into());
        }
        Ok(())
    }

    fn remote_document(&self, path: &ResourcePath) -> RemoteDocument {
        match self.documents.get(path) {
            Some(stored) => RemoteDocument {
                path: path.clone(),
                data: Some(stored.data.clone()),
                update_time: Some(stored.update_time),
            },
            None => RemoteDocument::missing(path.clone()),
        }
    }

    fn query(&self, query: &QueryState) -> Vec<RemoteDocument> {
        let candidates = self
            .documents
            .keys()
            .filter(|path| query.matches_path(path))
            .map(|path| self.remote_document(path))
            .collect();
        apply_query(candidates, query)
    }

    fn evaluate(&self, target: &ListenTarget) -> Vec<RemoteDocument> {
        match target {
            ListenTarget::Document(path) => vec![self.remote_document(path)],
            ListenTarget::Query(query) => self.query(query),
        }
    }

    /// Commit times strictly increase, so update times identify versions
    fn next_commit_time(&self) -> Timestamp {
        let now = Timestamp::now();
        match self.last_commit {
            Some(last) if now <= last => {
                Timestamp::from_datetime(last.to_datetime() + chrono::Duration::nanoseconds(1))
            }
            _ => now,
        }
    }

    /// Push the current state to watches whose view changed, or to all of
    /// them when `force` is set
    fn notify_watchers(&mut self, force: bool) {
        let views: Vec<(u64, Vec<RemoteDocument>)> = self
            .watchers
            .iter()
            .map(|(id, watcher)| (*id, self.evaluate(&watcher.target)))
            .collect();
        for (id, documents) in views {
            let Some(watcher) = self.watchers.get_mut(&id) else {
                continue;
            };
            if !force && watcher.last_sent.as_ref() == Some(&documents) {
                continue;
            }
            tracing::trace!(watch_id = id, documents = documents.len(), "pushing watch snapshot");
            let _ = watcher
                .sender
                .send(Ok(WatchEvent::Snapshot(documents.clone())));
            watcher.last_sent = Some(documents);
        }
    }
}

fn apply_write(
    current: Option<StoredDocument>,
    write: &WriteOperation,
    commit_time: Timestamp,
) -> FirebaseResult<Option<StoredDocument>> {
    match write {
        WriteOperation::Set {
            data, merge: None, ..
        } => Ok(Some(StoredDocument {
            data: resolve_map(data, commit_time),
            update_time: commit_time,
        })),
        WriteOperation::Set {
            data,
            merge: Some(mask),
            ..
        } => {
            let mut base = current.map(|doc| doc.data).unwrap_or_default();
            for field in mask {
                if let Some(value) = data.get_path(field) {
                    apply_field(&mut base, field, value, commit_time);
                }
            }
            Ok(Some(StoredDocument {
                data: base,
                update_time: commit_time,
            }))
        }
        WriteOperation::Update { path, fields } => {
            let Some(current) = current else {
                return Err(FirestoreError::NotFound(format!(
                    "no document to update: {}",
                    path
                ))
                .into());
            };
            let mut base = current.data;
            for (field, value) in fields {
                apply_field(&mut base, field, value, commit_time);
            }
            Ok(Some(StoredDocument {
                data: base,
                update_time: commit_time,
            }))
        }
        WriteOperation::Delete { .. } => Ok(None),
    }
}

fn apply_field(base: &mut MapValue, field: &FieldPath, value: &Value, commit_time: Timestamp) {
    let existing = base.get_path(field);
    match resolve_value(value, existing, commit_time) {
        Some(resolved) => base.set_path(field, resolved),
        None => {
            base.remove_path(field);
        }
    }
}

fn resolve_map(data: &MapValue, commit_time: Timestamp) -> MapValue {
    data.fields
        .iter()
        .filter_map(|(key, value)| {
            resolve_value(value, None, commit_time).map(|resolved| (key.clone(), resolved))
        })
        .collect()
}

/// Resolve sentinels against the value currently stored at the same path;
/// `None` means the field is deleted
fn resolve_value(value: &Value, existing: Option<&Value>, commit_time: Timestamp) -> Option<Value> {
    match value {
        Value::Sentinel(sentinel) => resolve_sentinel(sentinel, existing, commit_time),
        // A map value replaces whatever was stored, so nested transforms see no prior value
        Value::Map(map) => Some(Value::Map(resolve_map(map, commit_time))),
        other => Some(other.clone()),
    }
}

fn resolve_sentinel(sentinel: &Sentinel, existing: Option<&Value>, commit_time: Timestamp) -> Option<Value> {
    match sentinel {
        Sentinel::Delete => None,
        Sentinel::ServerTimestamp => Some(Value::Timestamp(commit_time)),
        Sentinel::Increment(operand) => Some(match (existing, operand) {
            (Some(Value::Integer(current)), Numeric::Integer(by)) => {
                Value::Integer(current.saturating_add(*by))
            }
            (Some(current @ (Value::Integer(_) | Value::Double(_))), operand) => {
                Value::Double(current.as_f64().unwrap_or(0.0) + numeric_f64(operand))
            }
            (_, Numeric::Integer(by)) => Value::Integer(*by),
            (_, Numeric::Double(by)) => Value::Double(*by),
        }),
        Sentinel::ArrayUnion(elements) => {
            let mut array = existing_array(existing);
            for element in elements {
                if !array.iter().any(|present| present.query_equals(element)) {
                    array.push(element.clone());
                }
            }
            Some(Value::Array(array))
        }
        Sentinel::ArrayRemove(elements) => {
            let mut array = existing_array(existing);
            array.retain(|present| !elements.iter().any(|element| present.query_equals(element)));
            Some(Value::Array(array))
        }
    }
}

fn numeric_f64(operand: &Numeric) -> f64 {
    match operand {
        Numeric::Integer(i) => *i as f64,
        Numeric::Double(d) => *d,
    }
}

fn existing_array(existing: Option<&Value>) -> Vec<Value> {
    match existing {
        Some(Value::Array(elements)) => elements.clone(),
        _ => Vec::new(),
    }
}

#[async_trait]
impl Datastore for MemoryDatastore {
    async fn lookup(&self, paths: &[ResourcePath]) -> FirebaseResult<Vec<RemoteDocument>> {
        let state = lock(&self.state);
        state.ensure_reachable()?;
        Ok(paths.iter().map(|path| state.remote_document(path)).collect())
    }

    async fn run_query(&self, query: &QueryState) -> FirebaseResult<Vec<RemoteDocument>> {
        let state = lock(&self.state);
        state.ensure_reachable()?;
        Ok(state.query(query))
    }

    async fn commit(&self, request: CommitRequest) -> FirebaseResult<CommitResponse> {
        let mut state = lock(&self.state);
        state.ensure_reachable()?;
        if request.writes.len() > MAX_WRITES_PER_COMMIT {
            return Err(FirestoreError::Aborted(format!(
                "a commit may contain at most {} writes, got {}",
                MAX_WRITES_PER_COMMIT,
                request.writes.len()
            ))
            .into());
        }
        for read in &request.read_versions {
            let current = state.documents.get(&read.path).map(|doc| doc.update_time);
            if current != read.update_time {
                return Err(FirestoreError::Conflict(format!(
                    "document {} changed since it was read",
                    read.path
                ))
                .into());
            }
        }

        let commit_time = state.next_commit_time();
        // Stage every write first so a failure leaves the store untouched
        let mut staged: BTreeMap<ResourcePath, Option<StoredDocument>> = BTreeMap::new();
        for write in &request.writes {
            let path = write.path();
            let current = match staged.get(path) {
                Some(staged_doc) => staged_doc.clone(),
                None => state.documents.get(path).cloned(),
            };
            let next = apply_write(current, write, commit_time)?;
            staged.insert(path.clone(), next);
        }
        for (path, document) in staged {
            match document {
                Some(document) => {
                    state.documents.insert(path, document);
                }
                None => {
                    state.documents.remove(&path);
                }
            }
        }
        state.last_commit = Some(commit_time);
        state.commit_count += 1;
        tracing::debug!(writes = request.writes.len(), "memory datastore applied commit");
        state.notify_watchers(false);
        Ok(CommitResponse { commit_time })
    }

    fn listen(&self, target: ListenTarget) -> FirebaseResult<WatchStream> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut state = lock(&self.state);
        let id = state.next_watch_id;
        state.next_watch_id += 1;
        state.listen_count += 1;

        let last_sent = if state.unreachable {
            let _ = sender.send(Ok(WatchEvent::Offline));
            None
        } else {
            let documents = state.evaluate(&target);
            let _ = sender.send(Ok(WatchEvent::Snapshot(documents.clone())));
            Some(documents)
        };
        state.watchers.insert(
            id,
            Watcher {
                target,
                sender,
                last_sent,
            },
        );
        tracing::debug!(watch_id = id, "registered watch");

        Ok(Box::pin(MemoryWatch {
            events: UnboundedReceiverStream::new(receiver),
            _registration: WatchRegistration {
                state: Arc::downgrade(&self.state),
                id,
            },
        }))
    }

    fn supports_persistence(&self) -> bool {
        self.supports_persistence
    }
}

struct MemoryWatch {
    events: UnboundedReceiverStream<Result<WatchEvent, FirestoreError>>,
    _registration: WatchRegistration,
}

impl Stream for MemoryWatch {
    type Item = Result<WatchEvent, FirestoreError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.events).poll_next(cx)
    }
}

/// Removes the watch from the datastore when dropped
struct WatchRegistration {
    state: Weak<Mutex<MemoryState>>,
    id: u64,
}

impl Drop for WatchRegistration {
    fn drop(&mut self) {
        if let Some(state) = self.state.upgrade() {
            if lock(&state).watchers.remove(&self.id).is_some() {
                tracing::debug!(watch_id = self.id, "unregistered watch");
            }
        }
    }
}

impl std::fmt::Debug for MemoryDatastore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("MemoryDatastore")
            .field("documents", &state.documents.len())
            .field("watchers", &state.watchers.len())
            .field("reachable", &!state.unreachable)
            .finish()
    }
}
