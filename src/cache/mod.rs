//! Metadata result cache.
//!
//! # Design
//!
//! - In-memory tier: a sharded map of [`CacheEntry`] with a per-entry
//!   expiry, checked when the entry is read.
//! - Single-flight: concurrent misses on one key share a single fetch,
//!   which runs as its own task so no waiter can cancel it.
//! - Generations: [`MetadataCache::invalidate`] bumps a per-data-source
//!   counter. A fetch that started under an older generation does not
//!   store its result.
//! - Optional persistent tier ([`PersistentStore`]). Its failures are
//!   logged and count as misses.
//!
//! ```text
//! get_or_fetch(key)
//!   ├─ memory hit ─────────────────────────────► value
//!   ├─ persistent hit ── promote to memory ────► value
//!   ├─ fetch in flight ── await shared future ─► value
//!   └─ spawn fetch ── store (same generation) ─► value
//! ```

mod hash;
mod key;
mod store;

pub use hash::{compute_hash, hash_text};
pub use key::CacheKey;
pub use store::PersistentStore;

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::{CacheSettings, DataSourceId, SettingsError};
use crate::error::{FailureKind, IntrospectError, IntrospectResult, Operation};
use crate::metadata::CanonicalSchemaInfo;

/// Default lifetime of a cached result.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Errors of the persistent tier.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to determine cache directory")]
    NoCacheDir,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cache store lock poisoned")]
    Poisoned,
}

pub type CacheResult<T> = Result<T, CacheError>;

/// A cached result and its lifetime.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub value: Arc<CanonicalSchemaInfo>,
    pub inserted_at: Instant,
    pub expires_at: Instant,
}

impl CacheEntry {
    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

/// Snapshot of cache occupancy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub in_flight: usize,
    /// Rows in the persistent tier, if one is attached and readable.
    pub persistent_entries: Option<usize>,
}

/// How [`MetadataCache::lookup_or_fetch`] produced its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    /// Served from memory or the persistent tier.
    Hit,
    /// Shared a fetch another caller started.
    Joined,
    /// Started the fetch.
    Fetched,
}

type SharedFetch = Shared<BoxFuture<'static, IntrospectResult<Arc<CanonicalSchemaInfo>>>>;

#[derive(Clone)]
struct InFlight {
    id: u64,
    fetch: SharedFetch,
}

pub struct MetadataCache {
    entries: DashMap<CacheKey, CacheEntry>,
    in_flight: DashMap<CacheKey, InFlight>,
    generations: DashMap<DataSourceId, u64>,
    next_fetch_id: AtomicU64,
    default_ttl: Duration,
    store: Option<PersistentStore>,
}

impl std::fmt::Debug for MetadataCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataCache")
            .field("entries", &self.entries.len())
            .field("in_flight", &self.in_flight.len())
            .field("default_ttl", &self.default_ttl)
            .field("persistent", &self.store.is_some())
            .finish()
    }
}

impl Default for MetadataCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl MetadataCache {
    /// Memory-only cache.
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            in_flight: DashMap::new(),
            generations: DashMap::new(),
            next_fetch_id: AtomicU64::new(0),
            default_ttl,
            store: None,
        }
    }

    /// Cache backed by a persistent tier.
    pub fn with_store(default_ttl: Duration, store: PersistentStore) -> Self {
        Self {
            store: Some(store),
            ..Self::new(default_ttl)
        }
    }

    /// Build from settings. A persistent tier that cannot be opened is
    /// logged and skipped.
    pub fn from_settings(settings: &CacheSettings) -> Result<Self, SettingsError> {
        let ttl = settings.ttl()?;
        if !settings.persistent {
            return Ok(Self::new(ttl));
        }

        let opened = match settings.resolved_path()? {
            Some(path) => PersistentStore::open(&path),
            None => PersistentStore::default_path().and_then(|p| PersistentStore::open(&p)),
        };
        match opened {
            Ok(store) => Ok(Self::with_store(ttl, store)),
            Err(e) => {
                warn!(error = %e, "persistent metadata cache unavailable, using memory only");
                Ok(Self::new(ttl))
            }
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Cached value for `key`, if present and unexpired.
    pub fn get(&self, key: &CacheKey) -> Option<Arc<CanonicalSchemaInfo>> {
        if let Some(value) = self.fresh(key) {
            return Some(value);
        }
        self.load_persistent(key)
    }

    pub fn put(&self, key: CacheKey, value: Arc<CanonicalSchemaInfo>) {
        self.put_with_ttl(key, value, self.default_ttl);
    }

    pub fn put_with_ttl(&self, key: CacheKey, value: Arc<CanonicalSchemaInfo>, ttl: Duration) {
        if let Some(store) = &self.store {
            if let Err(e) = store.put(&key, &value, ttl) {
                warn!(key = %key, error = %e, "failed to persist metadata");
            }
        }
        self.insert_memory(key, value, ttl);
    }

    /// Drop every entry of `data_source` in both tiers and detach its
    /// in-flight fetches. Returns the number of memory entries removed.
    pub fn invalidate(&self, data_source: &DataSourceId) -> usize {
        *self.generations.entry(data_source.clone()).or_insert(0) += 1;

        let keys: Vec<CacheKey> = self
            .entries
            .iter()
            .filter(|e| e.key().data_source == *data_source)
            .map(|e| e.key().clone())
            .collect();
        let removed = keys
            .iter()
            .filter(|k| self.entries.remove(*k).is_some())
            .count();

        self.in_flight.retain(|k, _| k.data_source != *data_source);

        if let Some(store) = &self.store {
            if let Err(e) = store.invalidate(data_source) {
                warn!(data_source = %data_source, error = %e, "failed to invalidate persistent metadata");
            }
        }

        debug!(data_source = %data_source, removed, "invalidated metadata cache");
        removed
    }

    /// Invalidate every data source.
    pub fn clear(&self) -> usize {
        let mut sources: Vec<DataSourceId> = self
            .entries
            .iter()
            .map(|e| e.key().data_source.clone())
            .chain(self.in_flight.iter().map(|e| e.key().data_source.clone()))
            .collect();
        sources.sort();
        sources.dedup();

        let removed = sources.iter().map(|ds| self.invalidate(ds)).sum();
        if let Some(store) = &self.store {
            if let Err(e) = store.clear() {
                warn!(error = %e, "failed to clear persistent metadata");
            }
        }
        removed
    }

    /// Remove expired entries from both tiers.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.is_expired(now));
        let purged = before.saturating_sub(self.entries.len());

        if let Some(store) = &self.store {
            if let Err(e) = store.purge_expired() {
                warn!(error = %e, "failed to purge persistent metadata");
            }
        }
        purged
    }

    pub fn stats(&self) -> CacheStats {
        let persistent_entries = self.store.as_ref().and_then(|s| match s.len() {
            Ok(n) => Some(n),
            Err(e) => {
                warn!(error = %e, "failed to count persistent metadata");
                None
            }
        });
        CacheStats {
            entries: self.entries.len(),
            in_flight: self.in_flight.len(),
            persistent_entries,
        }
    }

    /// Return the cached value or run `fetch` once for all concurrent callers.
    ///
    /// `fetch` is only invoked by the caller that starts the flight. The
    /// future it returns is spawned, so dropping any waiter (including the
    /// one that started it) leaves the fetch running to completion.
    pub async fn get_or_fetch<F, Fut>(
        self: &Arc<Self>,
        key: CacheKey,
        fetch: F,
    ) -> IntrospectResult<Arc<CanonicalSchemaInfo>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = IntrospectResult<Arc<CanonicalSchemaInfo>>> + Send + 'static,
    {
        self.lookup_or_fetch(key, fetch).await.map(|(value, _)| value)
    }

    /// Like [`get_or_fetch`](Self::get_or_fetch), also reporting whether
    /// the value was a hit. Each tier is read once.
    pub async fn lookup_or_fetch<F, Fut>(
        self: &Arc<Self>,
        key: CacheKey,
        fetch: F,
    ) -> IntrospectResult<(Arc<CanonicalSchemaInfo>, Lookup)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = IntrospectResult<Arc<CanonicalSchemaInfo>>> + Send + 'static,
    {
        if let Some(value) = self.get(&key) {
            debug!(key = %key, "metadata cache hit");
            return Ok((value, Lookup::Hit));
        }

        let (flight, lookup) = match self.in_flight.entry(key.clone()) {
            Entry::Occupied(existing) => {
                debug!(key = %key, "joining in-flight metadata fetch");
                (existing.get().fetch.clone(), Lookup::Joined)
            }
            Entry::Vacant(slot) => {
                // A flight may have stored its value since the miss above
                if let Some(value) = self.fresh(&key) {
                    return Ok((value, Lookup::Hit));
                }
                let flight = self.start_flight(key.clone(), fetch());
                slot.insert(flight.clone());
                (flight.fetch, Lookup::Fetched)
            }
        };

        flight.await.map(|value| (value, lookup))
    }

    fn start_flight<Fut>(self: &Arc<Self>, key: CacheKey, fetch: Fut) -> InFlight
    where
        Fut: Future<Output = IntrospectResult<Arc<CanonicalSchemaInfo>>> + Send + 'static,
    {
        let id = self.next_fetch_id.fetch_add(1, Ordering::Relaxed);
        let generation = self.generation(&key.data_source);
        let cache = Arc::clone(self);
        let task_key = key.clone();

        let handle = tokio::spawn(async move {
            let result = fetch.await;
            if let Ok(value) = &result {
                cache.store_if_current(&task_key, generation, value.clone());
            }
            cache.in_flight.remove_if(&task_key, |_, f| f.id == id);
            result
        });

        let data_source = key.data_source;
        let fetch = async move {
            handle.await.unwrap_or_else(|e| {
                Err(IntrospectError::failure(
                    data_source,
                    Operation::Request,
                    FailureKind::Other,
                    None,
                    format!("metadata fetch aborted: {}", e),
                ))
            })
        }
        .boxed()
        .shared();

        InFlight { id, fetch }
    }

    fn generation(&self, data_source: &DataSourceId) -> u64 {
        self.generations.get(data_source).map(|g| *g).unwrap_or(0)
    }

    fn store_if_current(&self, key: &CacheKey, generation: u64, value: Arc<CanonicalSchemaInfo>) {
        if self.generation(&key.data_source) != generation {
            debug!(key = %key, "discarding metadata fetched before invalidation");
            return;
        }
        self.put(key.clone(), value);

        // An invalidation may have slipped in between the check and the put
        if self.generation(&key.data_source) != generation {
            self.entries.remove(key);
            if let Some(store) = &self.store {
                if let Err(e) = store.delete(key) {
                    warn!(key = %key, error = %e, "failed to drop stale persistent metadata");
                }
            }
        }
    }

    /// Unexpired memory entry. An expired one is removed.
    fn fresh(&self, key: &CacheKey) -> Option<Arc<CanonicalSchemaInfo>> {
        let now = Instant::now();
        {
            let entry = self.entries.get(key)?;
            if !entry.is_expired(now) {
                return Some(entry.value.clone());
            }
        }
        self.entries.remove_if(key, |_, e| e.is_expired(now));
        None
    }

    fn load_persistent(&self, key: &CacheKey) -> Option<Arc<CanonicalSchemaInfo>> {
        let store = self.store.as_ref()?;
        match store.get(key) {
            Ok(Some((value, remaining))) => {
                let value = Arc::new(value);
                self.insert_memory(key.clone(), value.clone(), remaining);
                Some(value)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(key = %key, error = %e, "persistent metadata read failed, treating as miss");
                None
            }
        }
    }

    fn insert_memory(&self, key: CacheKey, value: Arc<CanonicalSchemaInfo>, ttl: Duration) {
        let inserted_at = Instant::now();
        let entry = CacheEntry {
            key: key.clone(),
            value,
            inserted_at,
            expires_at: inserted_at + ttl,
        };
        self.entries.insert(key, entry);
    }
}
