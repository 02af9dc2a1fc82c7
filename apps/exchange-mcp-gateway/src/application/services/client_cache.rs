//! Exchange Client Cache
//!
//! Memoizes constructed exchange clients by configuration fingerprint.
//!
//! # Design
//!
//! Each key maps to a slot holding a `tokio::sync::OnceCell`. The first
//! caller to find a slot empty runs the constructor; concurrent callers for
//! the same key await that construction and receive the same `Arc`. A
//! failed construction leaves the slot empty and is never counted as an
//! entry; the next lookup retries.
//!
//! Invalidation removes slots from the map. A construction still in flight
//! for a removed slot completes for its own callers but is not visible to
//! later lookups, which build a fresh client.

use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use regex::Regex;
use serde::Serialize;
use tokio::sync::OnceCell;

use crate::infrastructure::metrics;

// =============================================================================
// Entries
// =============================================================================

struct CachedEntry<T: ?Sized> {
    value: Arc<T>,
    created_at: DateTime<Utc>,
    last_access: Mutex<DateTime<Utc>>,
}

impl<T: ?Sized> CachedEntry<T> {
    fn new(value: Arc<T>) -> Self {
        let now = Utc::now();
        Self {
            value,
            created_at: now,
            last_access: Mutex::new(now),
        }
    }

    fn touch(&self) -> Arc<T> {
        *self.last_access.lock() = Utc::now();
        Arc::clone(&self.value)
    }
}

struct Slot<T: ?Sized> {
    cell: OnceCell<CachedEntry<T>>,
}

impl<T: ?Sized> Slot<T> {
    fn empty() -> Arc<Self> {
        Arc::new(Self {
            cell: OnceCell::new(),
        })
    }
}

/// Occupancy details for one cached client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheEntryInfo {
    /// Fingerprint key.
    pub key: String,
    /// When the client was constructed.
    pub created_at: DateTime<Utc>,
    /// When the client was last handed out.
    pub last_access: DateTime<Utc>,
}

/// Cache statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Number of constructed clients.
    pub size: usize,
    /// Sorted fingerprint keys of constructed clients.
    pub keys: Vec<String>,
    /// Per-entry timestamps, sorted by key.
    pub entries: Vec<CacheEntryInfo>,
    /// Lookups served from an existing client.
    pub hits: u64,
    /// Lookups that found no constructed client.
    pub misses: u64,
    /// Constructor invocations, successful or not.
    pub constructions: u64,
    /// Failed constructor invocations.
    pub failures: u64,
}

// =============================================================================
// Client Cache
// =============================================================================

/// Single-flight cache of shared values keyed by string.
pub struct ClientCache<T: ?Sized> {
    slots: Mutex<HashMap<String, Arc<Slot<T>>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    constructions: AtomicU64,
    failures: AtomicU64,
}

impl<T: ?Sized> std::fmt::Debug for ClientCache<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCache")
            .field("size", &self.len())
            .finish_non_exhaustive()
    }
}

impl<T: ?Sized> Default for ClientCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> ClientCache<T> {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            constructions: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// Return the value for `key`, constructing it on a miss.
    ///
    /// Concurrent callers for the same key share one constructor run.
    ///
    /// # Errors
    ///
    /// Returns `ConstructionFailed` if the constructor fails. Nothing is
    /// cached in that case.
    pub async fn get_or_construct<F, Fut, E>(
        &self,
        key: &str,
        construct: F,
    ) -> Result<Arc<T>, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<T>, E>>,
        E: Display,
    {
        let slot = {
            let mut slots = self.slots.lock();
            Arc::clone(slots.entry(key.to_string()).or_insert_with(Slot::empty))
        };

        if let Some(entry) = slot.cell.get() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            metrics::record_cache_lookup(true);
            return Ok(entry.touch());
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        metrics::record_cache_lookup(false);

        let result = slot
            .cell
            .get_or_try_init(|| async {
                self.constructions.fetch_add(1, Ordering::Relaxed);
                match construct().await {
                    Ok(value) => Ok(CachedEntry::new(value)),
                    Err(err) => {
                        self.failures.fetch_add(1, Ordering::Relaxed);
                        Err(err.to_string())
                    }
                }
            })
            .await;

        match result {
            Ok(entry) => {
                let value = entry.touch();
                metrics::set_cache_entries(self.len());
                Ok(value)
            }
            Err(reason) => {
                self.discard_failed(key, &slot);
                Err(CacheError::ConstructionFailed {
                    key: key.to_string(),
                    reason,
                })
            }
        }
    }

    /// Drop an empty slot once no other caller is waiting on it.
    fn discard_failed(&self, key: &str, slot: &Arc<Slot<T>>) {
        let mut slots = self.slots.lock();
        let still_ours = slots
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, slot));
        // map + this caller
        if still_ours && !slot.cell.initialized() && Arc::strong_count(slot) == 2 {
            slots.remove(key);
        }
    }

    /// Remove one entry. Returns `true` if a constructed client was removed.
    pub fn remove(&self, key: &str) -> bool {
        let removed = self
            .slots
            .lock()
            .remove(key)
            .is_some_and(|slot| slot.cell.initialized());
        if removed {
            metrics::record_cache_evictions(1);
            metrics::set_cache_entries(self.len());
        }
        removed
    }

    /// Remove entries and return the sorted keys of removed clients.
    ///
    /// With no pattern every entry is removed. A pattern containing `*` or
    /// `?` is a glob over the whole key; any other pattern matches keys
    /// containing it as a substring. Pending constructions that match are
    /// dropped too but are not reported.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPattern` for an empty pattern or one that cannot be
    /// compiled.
    pub fn clear(&self, pattern: Option<&str>) -> Result<Vec<String>, CacheError> {
        let matcher = pattern.map(KeyMatcher::parse).transpose()?;

        let mut removed: Vec<String> = {
            let mut slots = self.slots.lock();
            let doomed: Vec<String> = slots
                .keys()
                .filter(|key| matcher.as_ref().is_none_or(|m| m.matches(key)))
                .cloned()
                .collect();
            doomed
                .into_iter()
                .filter_map(|key| {
                    let slot = slots.remove(&key)?;
                    slot.cell.initialized().then_some(key)
                })
                .collect()
        };
        removed.sort();

        metrics::record_cache_evictions(removed.len());
        metrics::set_cache_entries(self.len());
        Ok(removed)
    }

    /// Number of constructed clients.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .values()
            .filter(|slot| slot.cell.initialized())
            .count()
    }

    /// Whether no client is constructed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Occupancy and counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let mut entries: Vec<CacheEntryInfo> = self
            .slots
            .lock()
            .iter()
            .filter_map(|(key, slot)| {
                slot.cell.get().map(|entry| CacheEntryInfo {
                    key: key.clone(),
                    created_at: entry.created_at,
                    last_access: *entry.last_access.lock(),
                })
            })
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));

        CacheStats {
            size: entries.len(),
            keys: entries.iter().map(|e| e.key.clone()).collect(),
            entries,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            constructions: self.constructions.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// Pattern Matching
// =============================================================================

enum KeyMatcher {
    Glob(Regex),
    Substring(String),
}

impl KeyMatcher {
    fn parse(pattern: &str) -> Result<Self, CacheError> {
        if pattern.is_empty() {
            return Err(CacheError::InvalidPattern("pattern is empty".to_string()));
        }
        if !pattern.contains(['*', '?']) {
            return Ok(Self::Substring(pattern.to_string()));
        }

        let mut regex = String::with_capacity(pattern.len() + 8);
        regex.push('^');
        for ch in pattern.chars() {
            match ch {
                '*' => regex.push_str(".*"),
                '?' => regex.push('.'),
                other => regex.push_str(&regex::escape(&other.to_string())),
            }
        }
        regex.push('$');

        Regex::new(&regex)
            .map(Self::Glob)
            .map_err(|err| CacheError::InvalidPattern(err.to_string()))
    }

    fn matches(&self, key: &str) -> bool {
        match self {
            Self::Glob(regex) => regex.is_match(key),
            Self::Substring(needle) => key.contains(needle.as_str()),
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Client cache failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    /// The constructor failed; nothing was cached.
    #[error("failed to construct client for {key}: {reason}")]
    ConstructionFailed {
        /// Fingerprint key.
        key: String,
        /// Constructor error.
        reason: String,
    },
    /// The invalidation pattern is unusable.
    #[error("invalid cache pattern: {0}")]
    InvalidPattern(String),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::time::Duration;
    use test_case::test_case;

    async fn ok(value: u32) -> Result<Arc<u32>, String> {
        Ok(Arc::new(value))
    }

    async fn seed(cache: &ClientCache<u32>, keys: &[&str]) {
        for (i, key) in keys.iter().enumerate() {
            cache
                .get_or_construct(key, || ok(u32::try_from(i).unwrap()))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn second_lookup_is_a_hit() {
        let cache = ClientCache::<u32>::new();

        let first = cache.get_or_construct("a", || ok(1)).await.unwrap();
        let second = cache.get_or_construct("a", || ok(2)).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        let stats = cache.stats();
        assert_eq!(stats.size, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.constructions, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_misses_share_one_construction() {
        let cache = Arc::new(ClientCache::<u32>::new());
        let calls = Arc::new(AtomicU64::new(0));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let calls = Arc::clone(&calls);
                tokio::spawn(async move {
                    cache
                        .get_or_construct("binance:spot:direct:public", || async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            Ok::<_, String>(Arc::new(7))
                        })
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut values = Vec::new();
        for handle in handles {
            values.push(handle.await.unwrap());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(values.iter().all(|v| Arc::ptr_eq(v, &values[0])));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn failed_construction_is_not_cached() {
        let cache = ClientCache::<u32>::new();

        let err = cache
            .get_or_construct("a", || async { Err::<Arc<u32>, _>("venue down") })
            .await
            .unwrap_err();

        assert_eq!(
            err,
            CacheError::ConstructionFailed {
                key: "a".to_string(),
                reason: "venue down".to_string(),
            }
        );
        assert_eq!(cache.stats().size, 0);
        assert!(cache.stats().keys.is_empty());

        let value = cache.get_or_construct("a", || ok(3)).await.unwrap();
        assert_eq!(*value, 3);

        let stats = cache.stats();
        assert_eq!(stats.size, 1);
        assert_eq!(stats.constructions, 2);
        assert_eq!(stats.failures, 1);
    }

    #[tokio::test]
    async fn clear_all_returns_every_key() {
        let cache = ClientCache::<u32>::new();
        seed(&cache, &["b", "a", "c"]).await;

        let removed = cache.clear(None).unwrap();

        assert_eq!(removed, vec!["a", "b", "c"]);
        assert!(cache.is_empty());
    }

    #[test_case(
        "binance",
        &["binance:future:direct:public", "binance:spot:direct:public"] ;
        "substring"
    )]
    #[test_case(
        "*:spot:*",
        &["binance:spot:direct:public", "okx:spot:direct:apikey"] ;
        "glob star"
    )]
    #[test_case("okx:???t:*", &["okx:spot:direct:apikey"] ; "glob question mark")]
    #[test_case("kraken", &[] ; "no match")]
    #[tokio::test]
    async fn pattern_clear_arithmetic(pattern: &str, expected: &[&str]) {
        let cache = ClientCache::<u32>::new();
        seed(
            &cache,
            &[
                "binance:spot:direct:public",
                "binance:future:direct:public",
                "okx:spot:direct:apikey",
                "okx:swap:direct:apikey",
            ],
        )
        .await;
        let before = cache.stats().size;

        let removed = cache.clear(Some(pattern)).unwrap();

        assert_eq!(removed, expected);
        assert_eq!(cache.stats().size, before - removed.len());
        for key in &removed {
            assert!(!cache.stats().keys.contains(key));
        }
    }

    proptest! {
        #[test]
        fn pattern_clear_removes_exactly_the_matches(
            keys in prop::collection::btree_set("[a-c]{1,3}:[a-c]{1,2}", 0..12),
            pattern in "[a-c:*?]{1,4}",
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
            let cache = ClientCache::<u32>::new();
            runtime.block_on(seed(&cache, &keys));
            let matcher = KeyMatcher::parse(&pattern).unwrap();
            let before = cache.stats().size;

            let removed = cache.clear(Some(&pattern)).unwrap();

            let after = cache.stats();
            prop_assert_eq!(after.size, before - removed.len());
            prop_assert!(removed.iter().all(|key| matcher.matches(key)));
            prop_assert!(after.keys.iter().all(|key| !matcher.matches(key)));
        }
    }

    #[test]
    fn glob_is_anchored_and_escaped() {
        let matcher = KeyMatcher::parse("proxy=http://a.b*").unwrap();
        assert!(!matcher.matches("x:spot:proxy=http://a.b:public"));
        assert!(matcher.matches("proxy=http://a.b:8080"));
        assert!(!matcher.matches("proxy=http://aXb:8080"));
    }

    #[test]
    fn empty_pattern_is_invalid() {
        let cache = ClientCache::<u32>::new();
        assert!(matches!(
            cache.clear(Some("")),
            Err(CacheError::InvalidPattern(_))
        ));
    }

    #[tokio::test]
    async fn remove_exact_key() {
        let cache = ClientCache::<u32>::new();
        seed(&cache, &["a", "ab"]).await;

        assert!(cache.remove("a"));
        assert!(!cache.remove("a"));
        assert_eq!(cache.stats().keys, vec!["ab"]);
    }

    #[tokio::test]
    async fn stats_report_entry_timestamps() {
        let cache = ClientCache::<u32>::new();
        seed(&cache, &["a"]).await;
        cache.get_or_construct("a", || ok(9)).await.unwrap();

        let stats = cache.stats();
        let entry = &stats.entries[0];
        assert_eq!(entry.key, "a");
        assert!(entry.last_access >= entry.created_at);
    }

    #[tokio::test]
    async fn clear_during_construction_forces_rebuild() {
        let cache = Arc::new(ClientCache::<u32>::new());
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        let pending = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                cache
                    .get_or_construct("a", || async move {
                        release_rx.await.ok();
                        Ok::<_, String>(Arc::new(1))
                    })
                    .await
                    .unwrap()
            })
        };
        tokio::task::yield_now().await;

        assert!(cache.clear(None).unwrap().is_empty());
        release_tx.send(()).unwrap();
        assert_eq!(*pending.await.unwrap(), 1);

        assert!(cache.is_empty());
        let fresh = cache.get_or_construct("a", || ok(2)).await.unwrap();
        assert_eq!(*fresh, 2);
    }
}
