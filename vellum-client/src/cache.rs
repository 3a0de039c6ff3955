//! Conditional-request response cache.
//!
//! Entries are keyed by database, method and route (path plus query). Each
//! holds the validator the server sent with the payload; the executor sends
//! it back as `If-None-Match` and serves the stored payload on `304`.
//!
//! Entries are immutable once stored and swapped whole, so a concurrent
//! reader sees either the old or the new entry, never a mix.
//!
//! Expired entries are swept by `put` at most once per max age, so the cache
//! stays bounded even when no background watcher runs.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use vellum_core::HttpMethod;

/// Identity of a cached response.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Database the route belongs to (`None` for server-scoped routes).
    pub database: Option<String>,
    /// HTTP method.
    pub method: HttpMethod,
    /// Path plus query.
    pub route: String,
}

impl CacheKey {
    /// Create a key.
    pub fn new(database: Option<&str>, method: HttpMethod, route: impl Into<String>) -> Self {
        Self {
            database: database.map(str::to_string),
            method,
            route: route.into(),
        }
    }
}

/// A stored response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Validator (entity tag) the server returned.
    pub validator: String,
    /// Raw response body.
    pub payload: Vec<u8>,
    /// When the entry was stored.
    pub inserted_at: Instant,
}

/// Shared response cache.
#[derive(Debug)]
pub struct ResponseCache {
    entries: RwLock<HashMap<CacheKey, Arc<CacheEntry>>>,
    max_age: Duration,
    last_sweep: Mutex<Instant>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResponseCache {
    /// Create a cache whose entries expire after `max_age`.
    pub fn new(max_age: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_age,
            last_sweep: Mutex::new(Instant::now()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Look up an entry. Expired entries are dropped and reported absent.
    pub fn get(&self, key: &CacheKey) -> Option<Arc<CacheEntry>> {
        let entry = self.entries.read().get(key).cloned();

        match entry {
            Some(entry) if entry.inserted_at.elapsed() < self.max_age => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry)
            }
            Some(expired) => {
                let mut entries = self.entries.write();
                // A writer may have replaced it since we looked.
                if entries
                    .get(key)
                    .is_some_and(|current| Arc::ptr_eq(current, &expired))
                {
                    entries.remove(key);
                }
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store or replace an entry, sweeping expired ones first if the last
    /// sweep is older than the max age.
    pub fn put(&self, key: CacheKey, validator: impl Into<String>, payload: Vec<u8>) {
        let entry = Arc::new(CacheEntry {
            validator: validator.into(),
            payload,
            inserted_at: Instant::now(),
        });

        let mut entries = self.entries.write();
        if self.sweep_due() {
            let before = entries.len();
            let max_age = self.max_age;
            entries.retain(|_, entry| entry.inserted_at.elapsed() < max_age);
            let removed = before - entries.len();
            if removed > 0 {
                tracing::trace!(removed, "Swept expired cache entries");
            }
        }
        entries.insert(key, entry);
    }

    fn sweep_due(&self) -> bool {
        let mut last_sweep = self.last_sweep.lock();
        if last_sweep.elapsed() < self.max_age {
            return false;
        }
        *last_sweep = Instant::now();
        true
    }

    /// Remove one entry.
    pub fn remove(&self, key: &CacheKey) -> bool {
        self.entries.write().remove(key).is_some()
    }

    /// Remove every entry of `database` whose route starts with `prefix`.
    ///
    /// Returns the number of entries removed.
    pub fn invalidate(&self, database: Option<&str>, prefix: &str) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|key, _| {
            !(key.database.as_deref() == database && key.route.starts_with(prefix))
        });
        let removed = before - entries.len();

        if removed > 0 {
            tracing::debug!(database = ?database, prefix = %prefix, removed, "Invalidated cache entries");
        }
        removed
    }

    /// Drop every entry older than the max age.
    pub fn evict_expired(&self) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        let max_age = self.max_age;
        entries.retain(|_, entry| entry.inserted_at.elapsed() < max_age);
        *self.last_sweep.lock() = Instant::now();
        before - entries.len()
    }

    /// Number of stored entries, including expired ones not yet evicted.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// True if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Drop everything.
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Lookups that found a live entry.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Lookups that found nothing usable.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}
