//! Client-side document cache
//!
//! Every successful server read refreshes the cache and every successful
//! commit evicts the documents it touched, so cached entries are always
//! versions the server once returned. Offline reads are answered from here.
//!
//! A cache is either private to one client or "persisted": held in a
//! process-wide registry keyed by project and database, it outlives the client
//! and is handed to the next client that acquires persistence.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use once_cell::sync::Lazy;

use super::datastore::RemoteDocument;
use super::field_value::MapValue;
use super::path::ResourcePath;
use super::query::QueryState;
use super::query_matcher::{apply_query, matches};
use super::timestamp::Timestamp;
use crate::error::{failed_precondition, FirebaseResult, PersistenceFailure};

/// Persisted caches by `project/database`
static PERSISTED_CACHES: Lazy<Mutex<HashMap<String, PersistedSlot>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

struct PersistedSlot {
    cache: Arc<LocalCache>,
    holder: Option<u64>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
struct CacheEntry {
    data: Option<MapValue>,
    update_time: Option<Timestamp>,
    sequence: u64,
    size: usize,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: BTreeMap<ResourcePath, CacheEntry>,
    by_sequence: BTreeMap<u64, ResourcePath>,
    next_sequence: u64,
    size: usize,
    limit: Option<usize>,
}

/// Size-bounded document cache
#[derive(Debug, Default)]
pub(crate) struct LocalCache {
    state: Mutex<CacheState>,
}

impl LocalCache {
    pub(crate) fn new(limit: Option<usize>) -> Self {
        Self {
            state: Mutex::new(CacheState {
                limit,
                ..CacheState::default()
            }),
        }
    }

    pub(crate) fn set_limit(&self, limit: Option<usize>) {
        let mut state = lock(&self.state);
        state.limit = limit;
        state.evict_to_limit();
    }

    /// Record server versions; missing documents are remembered as missing
    pub(crate) fn store(&self, documents: &[RemoteDocument]) {
        let mut state = lock(&self.state);
        for document in documents {
            state.insert(document);
        }
        state.evict_to_limit();
    }

    /// Record a query's server results and drop cached documents the server
    /// no longer returns for it
    pub(crate) fn store_query_results(&self, query: &QueryState, documents: &[RemoteDocument]) {
        let mut state = lock(&self.state);
        // Only an unbounded result set proves that a document stopped matching
        let complete = query.limit().is_none() && query.start_at().is_none() && query.end_at().is_none();
        if complete {
            let order_by = query.normalized_order();
            let stale: Vec<ResourcePath> = state
                .entries
                .iter()
                .filter(|(path, entry)| {
                    let remote = RemoteDocument {
                        path: (*path).clone(),
                        data: entry.data.clone(),
                        update_time: entry.update_time,
                    };
                    matches(&remote, query, &order_by)
                        && !documents.iter().any(|doc| &doc.path == *path)
                })
                .map(|(path, _)| path.clone())
                .collect();
            for path in stale {
                state.remove(&path);
            }
        }
        for document in documents {
            state.insert(document);
        }
        state.evict_to_limit();
    }

    pub(crate) fn get(&self, path: &ResourcePath) -> Option<RemoteDocument> {
        let state = lock(&self.state);
        state.entries.get(path).map(|entry| RemoteDocument {
            path: path.clone(),
            data: entry.data.clone(),
            update_time: entry.update_time,
        })
    }

    /// Evaluate a query over the cached documents
    pub(crate) fn query(&self, query: &QueryState) -> Vec<RemoteDocument> {
        let candidates: Vec<RemoteDocument> = {
            let state = lock(&self.state);
            state
                .entries
                .iter()
                .filter(|(path, entry)| entry.data.is_some() && query.matches_path(path))
                .map(|(path, entry)| RemoteDocument {
                    path: path.clone(),
                    data: entry.data.clone(),
                    update_time: entry.update_time,
                })
                .collect()
        };
        apply_query(candidates, query)
    }

    pub(crate) fn evict<'a>(&self, paths: impl IntoIterator<Item = &'a ResourcePath>) {
        let mut state = lock(&self.state);
        for path in paths {
            state.remove(path);
        }
    }

    pub(crate) fn clear(&self) {
        let mut state = lock(&self.state);
        let limit = state.limit;
        *state = CacheState {
            limit,
            ..CacheState::default()
        };
    }

    pub(crate) fn len(&self) -> usize {
        lock(&self.state).entries.len()
    }

    pub(crate) fn size_bytes(&self) -> usize {
        lock(&self.state).size
    }
}

impl CacheState {
    fn insert(&mut self, document: &RemoteDocument) {
        self.remove(&document.path);
        let size = document.path.canonical_string().len()
            + document.data.as_ref().map_or(0, MapValue::approximate_size);
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.by_sequence.insert(sequence, document.path.clone());
        self.entries.insert(
            document.path.clone(),
            CacheEntry {
                data: document.data.clone(),
                update_time: document.update_time,
                sequence,
                size,
            },
        );
        self.size += size;
    }

    fn remove(&mut self, path: &ResourcePath) {
        if let Some(entry) = self.entries.remove(path) {
            self.by_sequence.remove(&entry.sequence);
            self.size -= entry.size;
        }
    }

    /// Drop the least recently written entries until under the limit
    fn evict_to_limit(&mut self) {
        let Some(limit) = self.limit else {
            return;
        };
        let mut evicted = 0usize;
        while self.size > limit {
            let Some((_, path)) = self.by_sequence.pop_first() else {
                break;
            };
            if let Some(entry) = self.entries.remove(&path) {
                self.size -= entry.size;
                evicted += 1;
            }
        }
        if evicted > 0 {
            tracing::debug!(evicted, size = self.size, limit, "evicted cached documents");
        }
    }
}

/// Take exclusive hold of the persisted cache for `key`
pub(crate) fn acquire_persistence(
    key: &str,
    client_id: u64,
    limit: Option<usize>,
) -> Result<Arc<LocalCache>, PersistenceFailure> {
    let mut caches = lock(&*PERSISTED_CACHES);
    let slot = caches.entry(key.to_string()).or_insert_with(|| PersistedSlot {
        cache: Arc::new(LocalCache::new(limit)),
        holder: None,
    });
    match slot.holder {
        Some(holder) if holder != client_id => Err(PersistenceFailure::AlreadyOpen),
        _ => {
            slot.holder = Some(client_id);
            slot.cache.set_limit(limit);
            tracing::debug!(key, client_id, "acquired persistence");
            Ok(Arc::clone(&slot.cache))
        }
    }
}

/// Give up the hold on the persisted cache; the cache itself is kept
pub(crate) fn release_persistence(key: &str, client_id: u64) {
    let mut caches = lock(&*PERSISTED_CACHES);
    if let Some(slot) = caches.get_mut(key) {
        if slot.holder == Some(client_id) {
            slot.holder = None;
            tracing::debug!(key, client_id, "released persistence");
        }
    }
}

/// Delete the persisted cache for `key`; fails while a client holds it
pub(crate) fn clear_persisted(key: &str) -> FirebaseResult<()> {
    let mut caches = lock(&*PERSISTED_CACHES);
    if let Some(slot) = caches.get(key) {
        if slot.holder.is_some() {
            return Err(failed_precondition(
                "persistence can only be cleared while no client holds it",
            ));
        }
        slot.cache.clear();
        caches.remove(key);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(path: &str, n: i64) -> RemoteDocument {
        RemoteDocument {
            path: ResourcePath::parse(path).unwrap(),
            data: Some(MapValue::new().with("n", n).with("padding", "x".repeat(100))),
            update_time: Some(Timestamp::now()),
        }
    }

    #[test]
    fn test_store_and_get() {
        let cache = LocalCache::new(None);
        cache.store(&[doc("items/a", 1), RemoteDocument::missing(ResourcePath::parse("items/b").unwrap())]);
        assert!(cache.get(&ResourcePath::parse("items/a").unwrap()).unwrap().exists());
        assert!(!cache.get(&ResourcePath::parse("items/b").unwrap()).unwrap().exists());
        assert!(cache.get(&ResourcePath::parse("items/c").unwrap()).is_none());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_eviction_drops_oldest() {
        let one = doc("items/a", 1);
        let entry_size = one.path.canonical_string().len() + one.data.as_ref().unwrap().approximate_size();
        let cache = LocalCache::new(Some(entry_size * 2));
        cache.store(&[one]);
        cache.store(&[doc("items/b", 2)]);
        cache.store(&[doc("items/c", 3)]);
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&ResourcePath::parse("items/a").unwrap()).is_none());
        assert!(cache.size_bytes() <= entry_size * 2);
    }

    #[test]
    fn test_query_results_replace_stale_entries() {
        let cache = LocalCache::new(None);
        cache.store(&[doc("items/a", 1), doc("items/b", 2)]);
        let query = QueryState::for_collection(ResourcePath::parse("items").unwrap());
        cache.store_query_results(&query, &[doc("items/b", 3)]);
        assert_eq!(cache.len(), 1);
        let results = cache.query(&query);
        assert_eq!(results.len(), 1);
        assert_eq!(
            results[0].data.as_ref().unwrap().get("n"),
            Some(&crate::firestore::field_value::Value::Integer(3))
        );
    }

    #[test]
    fn test_evict_and_clear() {
        let cache = LocalCache::new(None);
        cache.store(&[doc("items/a", 1), doc("items/b", 2)]);
        cache.evict([&ResourcePath::parse("items/a").unwrap()]);
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.size_bytes(), 0);
    }

    #[test]
    fn test_persistence_registry() {
        let key = "registry-test/(default)";
        let first = acquire_persistence(key, 1, None).unwrap();
        assert_eq!(acquire_persistence(key, 2, None).unwrap_err(), PersistenceFailure::AlreadyOpen);
        assert!(clear_persisted(key).is_err());

        first.store(&[doc("items/a", 1)]);
        release_persistence(key, 1);
        let second = acquire_persistence(key, 2, None).unwrap();
        assert_eq!(second.len(), 1);

        release_persistence(key, 2);
        clear_persisted(key).unwrap();
        let third = acquire_persistence(key, 3, None).unwrap();
        assert_eq!(third.len(), 0);
        release_persistence(key, 3);
    }
}
