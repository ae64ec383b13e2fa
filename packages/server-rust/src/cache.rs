//! Read-through cache with fixed TTL and bounded staleness.
//!
//! The cache is the read path's primary source. A miss is not an error: the
//! caller reads the store and fills the cache with [`ReadCache::put`].
//! Absence is never cached, and fills are whole-entry replacements where the
//! last writer wins.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use surge_core::Document;
use tokio::time::Instant;

/// A cached value with the instant it was inserted.
///
/// Valid only while `now - inserted_at < ttl`.
#[derive(Debug, Clone)]
struct CacheEntry {
    value: Document,
    inserted_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.inserted_at) < self.ttl
    }
}

/// Concurrent key-to-document cache backed by [`DashMap`].
///
/// Expired entries are treated as absent whether or not they have been
/// physically removed; [`purge_expired`](Self::purge_expired) reclaims them.
pub struct ReadCache {
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ReadCache {
    /// Creates an empty cache whose fills expire after `ttl`.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// The TTL applied by [`put`](Self::put).
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the cached value if an entry exists and is within its TTL.
    ///
    /// Counts a hit or a miss. An expired entry found here is removed, unless
    /// a concurrent fill replaced it in the meantime.
    pub fn get(&self, key: &str) -> Option<Document> {
        let now = Instant::now();
        let live = self
            .entries
            .get(key)
            .and_then(|entry| entry.is_live(now).then(|| entry.value.clone()));

        if live.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            self.entries.remove_if(key, |_, entry| !entry.is_live(now));
        }
        live
    }

    /// Inserts or replaces the entry for `key` with the configured TTL.
    pub fn put(&self, key: impl Into<String>, value: Document) {
        self.put_with_ttl(key, value, self.ttl);
    }

    /// Inserts or replaces the entry for `key` with an explicit TTL.
    pub fn put_with_ttl(&self, key: impl Into<String>, value: Document, ttl: Duration) {
        self.entries.insert(
            key.into(),
            CacheEntry {
                value,
                inserted_at: Instant::now(),
                ttl,
            },
        );
    }

    /// Removes the entry for `key`. Returns whether one was present.
    pub fn invalidate(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Removes every entry. Returns how many were removed.
    pub fn clear(&self) -> usize {
        let removed = self.entries.len();
        self.entries.clear();
        removed
    }

    /// Physically removes expired entries. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live(now));
        before.saturating_sub(self.entries.len())
    }

    /// Number of stored entries, including expired ones not yet purged.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Fraction of all lookups since creation that hit, or 0.0 before any
    /// lookup. Cumulative, so it moves slowly once the cache is warm.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits();
        let total = hits + self.misses();
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}
