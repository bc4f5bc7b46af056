//! Content-addressed result cache for refinement-style tools.
//!
//! Entries are keyed by a SHA-256 digest of `prompt|technique|format`, bounded
//! by capacity (least-recently-used evicted first) and by a fixed time-to-live
//! that applies regardless of access pattern. A lookup never reaches a
//! backend; a miss is just `None`.
//!
//! A process-wide instance is available through [`global`]. Tests and
//! embedders that need isolation construct their own with [`ResultCache::new`].

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::CacheConfig;

/// Default entry lifetime: 15 minutes.
pub const DEFAULT_TTL: Duration = Duration::from_secs(15 * 60);

/// Hex-encoded SHA-256 of the semantic inputs of a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key for `(prompt, technique, format)`.
    #[must_use]
    pub fn derive(prompt: &str, technique: &str, format: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(prompt.as_bytes());
        hasher.update(b"|");
        hasher.update(technique.as_bytes());
        hasher.update(b"|");
        hasher.update(format.as_bytes());
        Self(format!("{:x}", hasher.finalize()))
    }

    /// The 64-character lowercase hex digest.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

struct CacheEntry {
    value: String,
    inserted_at: Instant,
}

impl CacheEntry {
    fn is_fresh(&self, ttl: Duration) -> bool {
        self.inserted_at.elapsed() < ttl
    }
}

struct CacheInner {
    entries: LruCache<CacheKey, CacheEntry>,
    hits: u64,
    misses: u64,
    expired: u64,
    evictions: u64,
}

/// Statistics about the result cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Entries currently held (fresh or not yet purged).
    pub len: usize,
    /// Configured capacity.
    pub capacity: usize,
    /// Lookups that returned a value.
    pub hits: u64,
    /// Lookups that returned nothing, including expired entries.
    pub misses: u64,
    /// Entries dropped because they outlived the TTL.
    pub expired: u64,
    /// Entries dropped to make room at capacity.
    pub evictions: u64,
}

impl CacheStats {
    /// Fraction of lookups that hit, or 0 with no lookups.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Capacity- and TTL-bounded cache of refined text.
pub struct ResultCache {
    inner: Mutex<CacheInner>,
    ttl: Duration,
}

impl ResultCache {
    /// Create an independent cache. A zero capacity is raised to one.
    #[must_use]
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(CacheInner {
                entries: LruCache::new(capacity),
                hits: 0,
                misses: 0,
                expired: 0,
                evictions: 0,
            }),
            ttl,
        }
    }

    /// Create a cache from configuration.
    #[must_use]
    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.capacity, config.ttl())
    }

    /// Entry lifetime.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Look up a cached refinement. Expired entries are removed and reported
    /// as absent.
    #[must_use]
    pub fn get(&self, prompt: &str, technique: &str, format: &str) -> Option<String> {
        self.get_by_key(&CacheKey::derive(prompt, technique, format))
    }

    /// Look up by a precomputed key.
    #[must_use]
    pub fn get_by_key(&self, key: &CacheKey) -> Option<String> {
        let mut inner = self.inner.lock();
        let lookup = inner
            .entries
            .get(key)
            .map(|entry| entry.is_fresh(self.ttl).then(|| entry.value.clone()));

        match lookup {
            Some(Some(value)) => {
                inner.hits += 1;
                Some(value)
            }
            Some(None) => {
                inner.entries.pop(key);
                inner.expired += 1;
                inner.misses += 1;
                debug!(key = %key, "cache entry expired");
                None
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    /// Store a refinement. Rewriting a fresh entry with the same value leaves
    /// it untouched.
    pub fn set(&self, prompt: &str, technique: &str, format: &str, value: impl Into<String>) {
        self.set_by_key(CacheKey::derive(prompt, technique, format), value.into());
    }

    /// Store under a precomputed key.
    pub fn set_by_key(&self, key: CacheKey, value: String) {
        let mut inner = self.inner.lock();

        let unchanged = inner
            .entries
            .get(&key)
            .is_some_and(|entry| entry.value == value && entry.is_fresh(self.ttl));
        if unchanged {
            return;
        }

        let entry = CacheEntry {
            value,
            inserted_at: Instant::now(),
        };
        if let Some((evicted, _)) = inner.entries.push(key.clone(), entry) {
            if evicted != key {
                inner.evictions += 1;
                debug!(key = %evicted, "cache entry evicted at capacity");
            }
        }
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn purge_expired(&self) -> u64 {
        let mut inner = self.inner.lock();
        let stale: Vec<CacheKey> = inner
            .entries
            .iter()
            .filter(|(_, entry)| !entry.is_fresh(self.ttl))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &stale {
            inner.entries.pop(key);
        }
        let removed = stale.len() as u64;
        inner.expired += removed;
        removed
    }

    /// Remove all entries. Counters are kept.
    pub fn clear(&self) {
        self.inner.lock().entries.clear();
    }

    /// Current number of held entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Whether the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Snapshot of cache statistics.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            len: inner.entries.len(),
            capacity: inner.entries.cap().get(),
            hits: inner.hits,
            misses: inner.misses,
            expired: inner.expired,
            evictions: inner.evictions,
        }
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Process-wide instance
// ---------------------------------------------------------------------------

static GLOBAL: OnceLock<Arc<ResultCache>> = OnceLock::new();

/// Install the process-wide cache with explicit sizing.
///
/// Returns `false` if the global cache was already initialised, in which case
/// the existing instance is kept.
pub fn init_global(config: &CacheConfig) -> bool {
    GLOBAL.set(Arc::new(ResultCache::from_config(config))).is_ok()
}

/// The process-wide cache, created with default sizing on first use.
pub fn global() -> &'static Arc<ResultCache> {
    GLOBAL.get_or_init(|| Arc::new(ResultCache::default()))
}

/// Look up a refinement in the process-wide cache.
#[must_use]
pub fn get_cached_refinement(prompt: &str, technique: &str, format: &str) -> Option<String> {
    global().get(prompt, technique, format)
}

/// Store a refinement in the process-wide cache.
pub fn set_cached_refinement(prompt: &str, technique: &str, format: &str, value: impl Into<String>) {
    global().set(prompt, technique, format, value);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_fixed_width_hex() {
        let key = CacheKey::derive("fix my prompt", "chain-of-thought", "markdown");
        assert_eq!(key.as_str().len(), 64);
        assert!(key.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn key_separates_fields() {
        let a = CacheKey::derive("a|b", "c", "d");
        let b = CacheKey::derive("a", "b|c", "d");
        // Same concatenation, so the same key; documented collision class.
        assert_eq!(a, b);
        assert_ne!(
            CacheKey::derive("a", "b", "c"),
            CacheKey::derive("a", "c", "b")
        );
    }

    #[test]
    fn set_then_get_round_trips() {
        let cache = ResultCache::new(8, DEFAULT_TTL);
        cache.set("p", "t", "f", "refined");
        assert_eq!(cache.get("p", "t", "f").as_deref(), Some("refined"));
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn unseen_key_is_absent() {
        let cache = ResultCache::new(8, DEFAULT_TTL);
        assert!(cache.get("never", "stored", "here").is_none());
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn least_recently_used_evicted_first() {
        let cache = ResultCache::new(2, DEFAULT_TTL);
        cache.set("a", "t", "f", "1");
        cache.set("b", "t", "f", "2");
        // Touch "a" so "b" becomes the eviction candidate.
        assert!(cache.get("a", "t", "f").is_some());
        cache.set("c", "t", "f", "3");

        assert!(cache.get("b", "t", "f").is_none());
        assert!(cache.get("a", "t", "f").is_some());
        assert!(cache.get("c", "t", "f").is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn expired_entries_are_absent() {
        let cache = ResultCache::new(8, Duration::from_millis(20));
        cache.set("p", "t", "f", "v");
        std::thread::sleep(Duration::from_millis(40));

        assert!(cache.get("p", "t", "f").is_none());
        let stats = cache.stats();
        assert_eq!(stats.expired, 1);
        assert_eq!(stats.len, 0);
    }

    #[test]
    fn overwrite_replaces_value() {
        let cache = ResultCache::new(8, DEFAULT_TTL);
        cache.set("p", "t", "f", "old");
        cache.set("p", "t", "f", "new");
        assert_eq!(cache.get("p", "t", "f").as_deref(), Some("new"));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().evictions, 0);
    }

    #[test]
    fn purge_expired_counts_removed() {
        let cache = ResultCache::new(8, Duration::from_millis(20));
        cache.set("a", "t", "f", "1");
        cache.set("b", "t", "f", "2");
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(cache.purge_expired(), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        let cache = ResultCache::new(0, DEFAULT_TTL);
        assert_eq!(cache.stats().capacity, 1);
    }
}
