//! Time-bounded result cache.
//!
//! Memoizes per-(database, object) analysis results with a TTL and a size
//! bound. Correctness rests on the read-time TTL check alone; the optional
//! [`ResultCache::purge_expired`] sweep is an optimization. Concurrent reads
//! are lock-free per key and concurrent writes to the same key serialize
//! last-writer-wins, which is sound because results are idempotent for
//! unchanged input.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use tracing::debug;

use crate::result::AnalysisResult;

/// Default time-to-live for cached results.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);
/// Default maximum number of cached entries.
pub const DEFAULT_CACHE_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    database: String,
    object: String,
}

impl CacheKey {
    fn new(database: &str, object: &str) -> Self {
        // Object identifiers are case-insensitive in the supported dialect.
        Self {
            database: database.to_uppercase(),
            object: object.to_uppercase(),
        }
    }
}

struct CacheEntry {
    result: AnalysisResult,
    stored_at: Instant,
}

/// Operability counters exposed through the administrative surface.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// TTL- and size-bounded store of analysis results.
pub struct ResultCache {
    entries: DashMap<CacheKey, CacheEntry>,
    ttl: Duration,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl ResultCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            capacity: capacity.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Fetch a cached result. An entry older than the TTL is removed and
    /// reported as a miss; a stale result is never served.
    pub fn get(&self, database: &str, object: &str) -> Option<AnalysisResult> {
        let key = CacheKey::new(database, object);
        let expired = match self.entries.get(&key) {
            Some(entry) if entry.stored_at.elapsed() <= self.ttl => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(database, object, "analysis cache hit");
                return Some(entry.result.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove(&key);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Store a completed result, evicting oldest entries when over capacity.
    pub fn put(&self, database: &str, object: &str, result: AnalysisResult) {
        self.entries.insert(
            CacheKey::new(database, object),
            CacheEntry {
                result,
                stored_at: Instant::now(),
            },
        );
        while self.entries.len() > self.capacity {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|entry| entry.stored_at)
                .map(|entry| entry.key().clone());
            match oldest {
                Some(key) => {
                    self.entries.remove(&key);
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                }
                None => break,
            }
        }
    }

    /// Drop entries for one database, or everything when `database` is None.
    pub fn invalidate(&self, database: Option<&str>) {
        match database {
            Some(db) => {
                let db = db.to_uppercase();
                self.entries.retain(|key, _| key.database != db);
            }
            None => self.entries.clear(),
        }
    }

    /// Proactively drop expired entries. Optional; reads stay correct
    /// without it.
    pub fn purge_expired(&self) {
        self.entries
            .retain(|_, entry| entry.stored_at.elapsed() <= self.ttl);
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}
