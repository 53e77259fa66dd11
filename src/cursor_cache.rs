//! Translation between virtual page numbers and upstream continuation cursors.
//!
//! The upstream API only knows "the page after cursor X". Clients want page
//! numbers, so every time a page is served we remember the cursor that leads
//! to the following page, keyed by the logical query and that page number.
//! Entries are bounded both in count (LRU eviction) and in age (TTL since the
//! last write). Losing an entry is never an error: the caller simply
//! asks upstream without a cursor.

use std::{
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};

use moka::{notification::RemovalCause, policy::EvictionPolicy, sync::Cache};
use serde::Serialize;
use tracing::debug;

use crate::config::{DEFAULT_CURSOR_CAPACITY, DEFAULT_CURSOR_TTL_SECS};

/// Identity of a logical paginated query.
///
/// Two requests with equal variants and equal fields share cursor state. The
/// derived `Hash`/`Eq` make the cache key a pure function of the shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum QueryShape {
    Trending { region: String },
    Search { q: String },
    Channels { q: String },
}

impl QueryShape {
    pub fn trending(region: impl Into<String>) -> Self {
        Self::Trending {
            region: region.into(),
        }
    }

    pub fn search(q: impl Into<String>) -> Self {
        Self::Search { q: q.into() }
    }

    pub fn channels(q: impl Into<String>) -> Self {
        Self::Channels { q: q.into() }
    }
}

impl fmt::Display for QueryShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Trending { region } => write!(f, "trending:{region}"),
            Self::Search { q } => write!(f, "search:{q}"),
            Self::Channels { q } => write!(f, "channels:{q}"),
        }
    }
}

/// Source of "now" for TTL bookkeeping.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    pub capacity: usize,
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CURSOR_CAPACITY,
            ttl: Duration::from_secs(DEFAULT_CURSOR_TTL_SECS),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    shape: QueryShape,
    page: u32,
}

#[derive(Debug, Clone)]
struct Slot {
    cursor: String,
    stored_at: Instant,
}

/// Bounded, expiring map from `(QueryShape, page)` to an upstream cursor.
///
/// Capacity and LRU order are handled by moka; the age of an entry is checked
/// against the injected [`Clock`] and only restarts when the entry is stored
/// again. Safe to share between concurrent requests.
pub struct CursorCache {
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    entries: Cache<CursorKey, Slot>,
}

impl fmt::Debug for CursorCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CursorCache")
            .field("config", &self.config)
            .field("len", &self.entries.entry_count())
            .finish_non_exhaustive()
    }
}

impl Default for CursorCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl CursorCache {
    pub fn new(config: CacheConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        let entries = Cache::builder()
            .max_capacity(config.capacity as u64)
            .eviction_policy(EvictionPolicy::lru())
            .time_to_live(config.ttl)
            .eviction_listener(|key: Arc<CursorKey>, _slot, cause| {
                if cause == RemovalCause::Size {
                    debug!(shape = %key.shape, page = key.page, "evicted cursor");
                }
            })
            .build();
        Self {
            config,
            clock,
            entries,
        }
    }

    /// Returns the cursor that leads to `page` of `shape`, if one is known.
    ///
    /// Page 1 (and anything below it) is reachable without a cursor, so it is
    /// answered without touching storage. A hit counts as a use for LRU
    /// recency but does not extend the entry's lifetime.
    pub fn lookup(&self, shape: &QueryShape, page: u32) -> Option<String> {
        if page <= 1 {
            return None;
        }
        let key = CursorKey {
            shape: shape.clone(),
            page,
        };
        let Some(slot) = self.entries.get(&key) else {
            debug!(%shape, page, "cursor cache miss");
            return None;
        };
        let age = self.clock.now().saturating_duration_since(slot.stored_at);
        if age >= self.config.ttl {
            self.entries.invalidate(&key);
            debug!(%shape, page, "cursor cache entry expired");
            return None;
        }
        debug!(%shape, page, "cursor cache hit");
        Some(slot.cursor)
    }

    /// Remembers `cursor` as the way to reach page `for_page + 1`.
    ///
    /// Callers pass the page they just served. `None` means upstream reported
    /// no further pages, and nothing is stored. Storing over an existing
    /// entry restarts its lifetime.
    pub fn store(&self, shape: &QueryShape, for_page: u32, cursor: Option<&str>) {
        let Some(cursor) = cursor else {
            return;
        };
        let Some(page) = for_page.checked_add(1) else {
            return;
        };
        let key = CursorKey {
            shape: shape.clone(),
            page,
        };
        self.entries.insert(
            key,
            Slot {
                cursor: cursor.to_string(),
                stored_at: self.clock.now(),
            },
        );
        // Applies pending reads and evictions so the bound holds once
        // `store` returns.
        self.entries.run_pending_tasks();
        debug!(%shape, page, "stored cursor");
    }

    /// Number of stored entries, including ones past their lifetime that
    /// have not been looked up since.
    pub fn len(&self) -> usize {
        self.entries.run_pending_tasks();
        self.entries.entry_count() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Clock that only moves when told to.
    struct ManualClock {
        now: Mutex<Instant>,
    }

    impl ManualClock {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                now: Mutex::new(Instant::now()),
            })
        }

        fn advance(&self, by: Duration) {
            *self.now.lock() += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            *self.now.lock()
        }
    }

    fn cache_with(capacity: usize, ttl_secs: u64) -> (CursorCache, Arc<ManualClock>) {
        let clock = ManualClock::new();
        let cache = CursorCache::with_clock(
            CacheConfig {
                capacity,
                ttl: Duration::from_secs(ttl_secs),
            },
            clock.clone(),
        );
        (cache, clock)
    }

    #[test]
    fn first_page_never_has_a_cursor() {
        let cache = CursorCache::default();
        let shape = QueryShape::search("cats");
        assert_eq!(cache.lookup(&shape, 0), None);
        assert_eq!(cache.lookup(&shape, 1), None);

        // Stored under page 1, which lookups never consult.
        cache.store(&shape, 0, Some("tok"));
        assert_eq!(cache.lookup(&shape, 1), None);
        assert_eq!(cache.lookup(&shape, 0), None);
    }

    #[test]
    fn stored_cursor_serves_the_next_page() {
        let cache = CursorCache::default();
        let shape = QueryShape::trending("US");
        cache.store(&shape, 3, Some("CAoQAA"));
        assert_eq!(cache.lookup(&shape, 4).as_deref(), Some("CAoQAA"));
        assert_eq!(cache.lookup(&shape, 3), None);
        assert_eq!(cache.lookup(&shape, 5), None);
    }

    #[test]
    fn absent_cursor_stores_nothing() {
        let cache = CursorCache::default();
        let shape = QueryShape::search("cats");
        cache.store(&shape, 1, None);
        assert!(cache.is_empty());
        assert_eq!(cache.lookup(&shape, 2), None);
    }

    #[test]
    fn store_overwrites_existing_entry() {
        let cache = CursorCache::default();
        let shape = QueryShape::search("cats");
        cache.store(&shape, 1, Some("old"));
        cache.store(&shape, 1, Some("new"));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.lookup(&shape, 2).as_deref(), Some("new"));
    }

    #[test]
    fn distinct_shapes_do_not_share_cursors() {
        let cache = CursorCache::default();
        cache.store(&QueryShape::search("cats"), 1, Some("search-tok"));
        cache.store(&QueryShape::channels("cats"), 1, Some("channel-tok"));
        cache.store(&QueryShape::trending("US"), 1, Some("us-tok"));

        assert_eq!(
            cache.lookup(&QueryShape::search("cats"), 2).as_deref(),
            Some("search-tok")
        );
        assert_eq!(
            cache.lookup(&QueryShape::channels("cats"), 2).as_deref(),
            Some("channel-tok")
        );
        assert_eq!(cache.lookup(&QueryShape::trending("GB"), 2), None);
        assert_eq!(cache.lookup(&QueryShape::search("dogs"), 2), None);
    }

    #[test]
    fn full_cache_evicts_exactly_the_least_recently_used() {
        let (cache, _clock) = cache_with(500, 1800);
        for i in 0..500u32 {
            cache.store(&QueryShape::search(format!("q{i}")), 1, Some("tok"));
        }
        // Reading q0 makes q1 the oldest entry.
        assert!(cache.lookup(&QueryShape::search("q0"), 2).is_some());

        cache.store(&QueryShape::search("q500"), 1, Some("tok"));
        assert_eq!(cache.len(), 500);
        assert_eq!(cache.lookup(&QueryShape::search("q1"), 2), None);
        for i in (0..=500u32).filter(|i| *i != 1) {
            assert!(
                cache.lookup(&QueryShape::search(format!("q{i}")), 2).is_some(),
                "q{i} should survive"
            );
        }
    }

    #[test]
    fn overwriting_at_capacity_does_not_evict() {
        let (cache, _clock) = cache_with(2, 1800);
        let a = QueryShape::search("a");
        let b = QueryShape::search("b");
        cache.store(&a, 1, Some("a1"));
        cache.store(&b, 1, Some("b1"));
        cache.store(&a, 1, Some("a2"));
        assert_eq!(cache.lookup(&a, 2).as_deref(), Some("a2"));
        assert_eq!(cache.lookup(&b, 2).as_deref(), Some("b1"));
    }

    #[test]
    fn entries_expire_after_ttl_even_when_read() {
        let (cache, clock) = cache_with(500, 30 * 60);
        let shape = QueryShape::trending("US");
        cache.store(&shape, 1, Some("tok"));
        clock.advance(Duration::from_secs(20 * 60));
        assert_eq!(cache.lookup(&shape, 2).as_deref(), Some("tok"));

        // Reading does not extend the lifetime.
        clock.advance(Duration::from_secs(20 * 60));
        assert_eq!(cache.lookup(&shape, 2), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn untouched_entries_expire_without_capacity_pressure() {
        let (cache, clock) = cache_with(500, 1800);
        let shape = QueryShape::search("cats");
        cache.store(&shape, 1, Some("tok"));
        clock.advance(Duration::from_secs(1799));
        assert!(cache.lookup(&shape, 2).is_some());
        clock.advance(Duration::from_secs(1));
        assert_eq!(cache.lookup(&shape, 2), None);
    }

    #[test]
    fn storing_again_restarts_the_lifetime() {
        let (cache, clock) = cache_with(500, 1800);
        let shape = QueryShape::channels("cats");
        cache.store(&shape, 1, Some("first"));
        clock.advance(Duration::from_secs(1500));
        cache.store(&shape, 1, Some("second"));
        clock.advance(Duration::from_secs(1500));
        assert_eq!(cache.lookup(&shape, 2).as_deref(), Some("second"));
    }

    #[test]
    fn shape_display_is_stable() {
        assert_eq!(QueryShape::trending("US").to_string(), "trending:US");
        assert_eq!(QueryShape::search("cats").to_string(), "search:cats");
        assert_eq!(
            serde_json::to_string(&QueryShape::channels("cats")).unwrap(),
            r#"{"kind":"channels","q":"cats"}"#
        );
    }
}
