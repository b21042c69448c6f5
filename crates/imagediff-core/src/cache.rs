//! # Diff Result Cache
//!
//! A bounded LRU cache for encoded diff images.
//!
//! Screenshot reviews revisit the same pair of frames many times while a
//! user toggles the overlay, so the backend keeps recent results keyed by
//! both image paths, their modification stamps and the threshold.
//!
//! ## Design
//!
//! - BTreeMap storage for deterministic iteration order
//! - Logical clock (monotonic counter) instead of wall time
//! - A recency index so eviction removes exactly the oldest entry

use crate::diff::DiffStats;
use std::collections::BTreeMap;
use std::sync::Arc;

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Default maximum number of cached diffs.
pub const DEFAULT_CACHE_SIZE: usize = 64;

// =============================================================================
// LRU CACHE
// =============================================================================

#[derive(Debug, Clone)]
struct Slot<V> {
    value: V,
    last_access: u64,
}

/// LRU cache ordered by a logical clock.
#[derive(Debug)]
pub struct LruCache<K: Ord + Clone, V: Clone> {
    /// key -> value and last access tick.
    entries: BTreeMap<K, Slot<V>>,

    /// last access tick -> key; the first entry is the eviction victim.
    recency: BTreeMap<u64, K>,

    max_size: usize,
    clock: u64,
    hits: u64,
    misses: u64,
}

impl<K: Ord + Clone, V: Clone> Default for LruCache<K, V> {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_SIZE)
    }
}

impl<K: Ord + Clone, V: Clone> LruCache<K, V> {
    /// Create a cache holding at most `max_size` entries (minimum 1).
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            recency: BTreeMap::new(),
            max_size: max_size.max(1),
            clock: 0,
            hits: 0,
            misses: 0,
        }
    }

    fn tick(&mut self) -> u64 {
        self.clock = self.clock.saturating_add(1);
        self.clock
    }

    /// Look up a value, refreshing its recency on hit.
    pub fn get(&mut self, key: &K) -> Option<V> {
        let now = self.tick();
        match self.entries.get_mut(key) {
            Some(slot) => {
                self.recency.remove(&slot.last_access);
                slot.last_access = now;
                self.recency.insert(now, key.clone());
                self.hits = self.hits.saturating_add(1);
                Some(slot.value.clone())
            }
            None => {
                self.misses = self.misses.saturating_add(1);
                None
            }
        }
    }

    /// Look up a value without touching recency or statistics.
    #[must_use]
    pub fn peek(&self, key: &K) -> Option<&V> {
        self.entries.get(key).map(|s| &s.value)
    }

    /// Insert or replace a value, evicting the least recently used entry
    /// when full.
    pub fn insert(&mut self, key: K, value: V) {
        let now = self.tick();

        if let Some(slot) = self.entries.get_mut(&key) {
            self.recency.remove(&slot.last_access);
            slot.value = value;
            slot.last_access = now;
            self.recency.insert(now, key);
            return;
        }

        if self.entries.len() >= self.max_size {
            if let Some((_, victim)) = self.recency.pop_first() {
                self.entries.remove(&victim);
            }
        }

        self.recency.insert(now, key.clone());
        self.entries.insert(
            key,
            Slot {
                value,
                last_access: now,
            },
        );
    }

    /// Remove a key.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let slot = self.entries.remove(key)?;
        self.recency.remove(&slot.last_access);
        Some(slot.value)
    }

    /// Drop every entry. Statistics are kept.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.recency.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let total = self.hits.saturating_add(self.misses);
        let hit_rate_percent = if total == 0 {
            0
        } else {
            (self.hits.saturating_mul(100) / total) as u8
        };
        CacheStats {
            size: self.entries.len(),
            max_size: self.max_size,
            hits: self.hits,
            misses: self.misses,
            hit_rate_percent,
        }
    }
}

/// Cache performance counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
    /// Integer percentage (0-100).
    pub hit_rate_percent: u8,
}

// =============================================================================
// DIFF CACHE
// =============================================================================

/// Identity of a diff computation.
///
/// Stamps are caller-supplied modification times, so a rewritten
/// screenshot never serves a stale diff.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DiffCacheKey {
    pub image_a: String,
    pub image_b: String,
    pub stamp_a: u64,
    pub stamp_b: u64,
    /// Threshold in thousandths of a percent.
    pub threshold_millis: u64,
}

impl DiffCacheKey {
    #[must_use]
    pub fn new(
        image_a: impl Into<String>,
        image_b: impl Into<String>,
        stamps: (u64, u64),
        threshold: f64,
    ) -> Self {
        Self {
            image_a: image_a.into(),
            image_b: image_b.into(),
            stamp_a: stamps.0,
            stamp_b: stamps.1,
            threshold_millis: (threshold * 1000.0).round() as u64,
        }
    }

    /// Hex identifier derived from the key contents with BLAKE3.
    ///
    /// Unlike `Hash`, the value is fixed across builds, so it can name
    /// files that outlive the process.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for text in [&self.image_a, &self.image_b] {
            hasher.update(&(text.len() as u64).to_le_bytes());
            hasher.update(text.as_bytes());
        }
        for value in [self.stamp_a, self.stamp_b, self.threshold_millis] {
            hasher.update(&value.to_le_bytes());
        }
        hasher.finalize().to_hex().as_str()[..FINGERPRINT_LEN].to_string()
    }
}

/// Hex digits kept by [`DiffCacheKey::fingerprint`].
pub const FINGERPRINT_LEN: usize = 16;

/// A cached diff: statistics plus shared PNG bytes.
#[derive(Debug, Clone)]
pub struct CachedDiff {
    pub stats: DiffStats,
    pub png: Arc<[u8]>,
}

/// LRU cache of diff results.
pub type DiffCache = LruCache<DiffCacheKey, CachedDiff>;

// =============================================================================
// TESTS
// =============================================================================
