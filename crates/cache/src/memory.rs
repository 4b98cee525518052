//! Bounded in-memory cache of decoded objects
//!
//! Objects live in two tiers. The strong tier owns an `Arc` to each object
//! and is bounded by a byte budget enforced through a pluggable
//! [`EvictionPolicy`]. Every insert also records a `Weak` handle in the
//! recoverable tier: once the strong tier evicts an object, it can still be
//! served from there for as long as some consumer keeps the object alive.
//!
//! The recoverable tier is best effort. Its hit rate depends entirely on
//! what consumers hold on to and nothing may rely on it for correctness.

use crate::policy::{EvictionPolicy, FifoPolicy, LruPolicy, PolicyKind};
use crate::{ByteSize, ResourceKey};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

/// Budgets above this size leave little room for the recoverable tier.
const LARGE_LIMIT_WARNING: usize = 16 * 1024 * 1024;

/// Dead weak handles are pruned once the recoverable map exceeds
/// `2 * strong entries + RECOVERABLE_SLACK`.
const RECOVERABLE_SLACK: usize = 64;

/// Statistics about cache usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of objects in the strong tier
    pub entry_count: usize,

    /// Total size of strong-tier objects (bytes)
    pub memory_used: usize,

    /// Maximum size allowed (bytes)
    pub memory_limit: usize,

    /// Strong-tier hits
    pub hits: u64,

    /// Hits served from the recoverable tier
    pub recovered: u64,

    /// Lookups that found nothing
    pub misses: u64,

    /// Objects evicted from the strong tier
    pub evictions: u64,

    /// Puts refused because the object alone exceeds the budget
    pub rejected: u64,
}

impl CacheStats {
    /// Fraction of lookups answered by either tier (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.recovered + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits + self.recovered) as f64 / total as f64
        }
    }

    /// Calculate memory utilization (0.0 to 1.0)
    pub fn memory_utilization(&self) -> f64 {
        if self.memory_limit == 0 {
            0.0
        } else {
            self.memory_used as f64 / self.memory_limit as f64
        }
    }
}

struct Entry<V> {
    value: Arc<V>,
    size: usize,
}

struct CacheState<V> {
    entries: HashMap<ResourceKey, Entry<V>>,
    recoverable: HashMap<ResourceKey, Weak<V>>,
    policy: Box<dyn EvictionPolicy>,
    memory_used: usize,
    memory_limit: usize,
    stats: CacheStats,
}

impl<V> CacheState<V> {
    fn drop_entry(&mut self, key: &ResourceKey) -> Option<Entry<V>> {
        let entry = self.entries.remove(key)?;
        self.memory_used = self.memory_used.saturating_sub(entry.size);
        Some(entry)
    }

    /// Evict until `required` more bytes fit within the budget.
    fn evict_to_fit(&mut self, required: usize) -> bool {
        while self.memory_used + required > self.memory_limit {
            match self.policy.select_eviction_candidate() {
                Some(victim) => {
                    if let Some(entry) = self.drop_entry(&victim) {
                        log::trace!("evicted {} ({} bytes)", victim, entry.size);
                        self.stats.evictions += 1;
                    }
                }
                None => {
                    log::error!(
                        "eviction policy tracks no keys but {} of {} bytes are in use",
                        self.memory_used,
                        self.memory_limit
                    );
                    return false;
                }
            }
        }
        true
    }

    fn prune_recoverable(&mut self) {
        if self.recoverable.len() > self.entries.len() * 2 + RECOVERABLE_SLACK {
            self.recoverable.retain(|_, weak| weak.strong_count() > 0);
        }
    }

    fn sync_stats(&mut self) {
        self.stats.entry_count = self.entries.len();
        self.stats.memory_used = self.memory_used;
        self.stats.memory_limit = self.memory_limit;
    }
}

/// Size-bounded memory cache with a pluggable eviction policy
///
/// Thread-safe: every operation takes one internal lock, so no caller ever
/// observes a half-evicted state.
///
/// # Example
///
/// ```
/// use resload_cache::{MemoryCache, ResourceKey};
/// use std::sync::Arc;
///
/// let cache: MemoryCache<Vec<u8>> = MemoryCache::lru(1024);
/// let key = ResourceKey::from("uri://thumb");
///
/// assert!(cache.put(key.clone(), Arc::new(vec![0u8; 512]), 512));
/// assert!(cache.get(&key).is_some());
///
/// // An object bigger than the whole budget is refused outright.
/// assert!(!cache.put(ResourceKey::from("uri://huge"), Arc::new(vec![0u8; 2048]), 2048));
/// ```
pub struct MemoryCache<V> {
    state: Mutex<CacheState<V>>,
}

impl<V> MemoryCache<V> {
    /// Create a cache with `memory_limit` bytes and the given policy.
    pub fn new(memory_limit: usize, policy: Box<dyn EvictionPolicy>) -> Self {
        if memory_limit > LARGE_LIMIT_WARNING {
            log::warn!(
                "memory cache limit of {} bytes is large; the recoverable tier will rarely be used",
                memory_limit
            );
        }
        Self {
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                recoverable: HashMap::new(),
                policy,
                memory_used: 0,
                memory_limit,
                stats: CacheStats {
                    memory_limit,
                    ..Default::default()
                },
            }),
        }
    }

    /// Least-recently-used cache.
    pub fn lru(memory_limit: usize) -> Self {
        Self::new(memory_limit, Box::new(LruPolicy::new()))
    }

    /// First-in-first-out cache.
    pub fn fifo(memory_limit: usize) -> Self {
        Self::new(memory_limit, Box::new(FifoPolicy::new()))
    }

    /// Cache using a configured policy kind.
    pub fn with_policy(memory_limit: usize, kind: PolicyKind) -> Self {
        Self::new(memory_limit, kind.build())
    }

    /// Look up an object.
    ///
    /// Strong-tier hits count as an access for the policy. A hit in the
    /// recoverable tier is returned without being promoted back.
    pub fn get(&self, key: &ResourceKey) -> Option<Arc<V>> {
        let mut state = self.state.lock();

        if let Some(value) = state.entries.get(key).map(|e| e.value.clone()) {
            state.policy.on_access(key);
            state.stats.hits += 1;
            return Some(value);
        }

        match state.recoverable.get(key).map(Weak::upgrade) {
            Some(Some(value)) => {
                state.stats.recovered += 1;
                Some(value)
            }
            Some(None) => {
                state.recoverable.remove(key);
                state.stats.misses += 1;
                None
            }
            None => {
                state.stats.misses += 1;
                None
            }
        }
    }

    /// Store an object of `size` bytes.
    ///
    /// Returns `false` without touching the cache if `size` alone exceeds
    /// the budget. Otherwise evicts per policy until the object fits,
    /// inserts it (replacing any previous object for `key`) and returns
    /// `true`.
    pub fn put(&self, key: ResourceKey, value: Arc<V>, size: usize) -> bool {
        let mut state = self.state.lock();

        if size > state.memory_limit {
            state.stats.rejected += 1;
            return false;
        }

        if state.drop_entry(&key).is_some() {
            state.policy.on_remove(&key);
        }

        if !state.evict_to_fit(size) {
            state.stats.rejected += 1;
            state.sync_stats();
            return false;
        }

        state
            .recoverable
            .insert(key.clone(), Arc::downgrade(&value));
        state.memory_used += size;
        state.policy.on_insert(&key);
        state.entries.insert(key, Entry { value, size });
        state.prune_recoverable();
        state.sync_stats();
        true
    }

    /// Remove an object from both tiers.
    ///
    /// Returns the object only if it was resident in the strong tier.
    pub fn remove(&self, key: &ResourceKey) -> Option<Arc<V>> {
        let mut state = self.state.lock();
        state.recoverable.remove(key);
        let entry = state.drop_entry(key)?;
        state.policy.on_remove(key);
        state.sync_stats();
        Some(entry.value)
    }

    /// Empty both tiers and the policy bookkeeping.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.recoverable.clear();
        state.policy.clear();
        state.memory_used = 0;
        state.sync_stats();
    }

    /// Check the strong tier without counting an access.
    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.state.lock().entries.contains_key(key)
    }

    /// Snapshot of the keys resident in the strong tier.
    pub fn keys(&self) -> Vec<ResourceKey> {
        self.state.lock().entries.keys().cloned().collect()
    }

    /// Get current cache statistics
    pub fn stats(&self) -> CacheStats {
        self.state.lock().stats
    }

    /// Change the budget, evicting immediately if usage is now above it.
    pub fn set_memory_limit(&self, new_limit: usize) {
        let mut state = self.state.lock();
        state.memory_limit = new_limit;
        state.evict_to_fit(0);
        state.sync_stats();
    }

    pub fn memory_limit(&self) -> usize {
        self.state.lock().memory_limit
    }

    pub fn memory_used(&self) -> usize {
        self.state.lock().memory_used
    }

    /// Number of objects in the strong tier
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }
}

impl<V: ByteSize> MemoryCache<V> {
    /// Store an object sized by its [`ByteSize`] implementation.
    pub fn insert(&self, key: ResourceKey, value: Arc<V>) -> bool {
        let size = value.byte_size();
        self.put(key, value, size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use std::thread;

    fn k(s: &str) -> ResourceKey {
        ResourceKey::from(s)
    }

    fn obj(size: usize) -> Arc<Vec<u8>> {
        Arc::new(vec![0u8; size])
    }

    #[test]
    fn test_basic_put_get() {
        let cache = MemoryCache::lru(1024);
        let value = obj(256);
        assert!(cache.put(k("a"), value.clone(), 256));

        let hit = cache.get(&k("a")).expect("object should be cached");
        assert!(Arc::ptr_eq(&hit, &value));
        assert_eq!(cache.memory_used(), 256);
    }

    #[test]
    fn test_cache_miss() {
        let cache: MemoryCache<Vec<u8>> = MemoryCache::lru(1024);
        assert!(cache.get(&k("missing")).is_none());

        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 0);
    }

    #[test]
    fn test_rejects_oversized_object() {
        let cache = MemoryCache::lru(100);
        assert!(cache.put(k("small"), obj(50), 50));
        assert!(!cache.put(k("big"), obj(101), 101));

        // Nothing was evicted to make room for the refused object.
        assert!(cache.contains(&k("small")));
        assert_eq!(cache.stats().rejected, 1);
    }

    #[test]
    fn test_lru_evicts_least_recently_touched() {
        let cache = MemoryCache::lru(200);
        cache.put(k("A"), obj(100), 100);
        cache.put(k("B"), obj(100), 100);
        assert!(cache.get(&k("A")).is_some());

        cache.put(k("C"), obj(100), 100);

        assert!(cache.contains(&k("A")));
        assert!(!cache.contains(&k("B")));
        assert!(cache.contains(&k("C")));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_fifo_evicts_earliest_inserted() {
        let cache = MemoryCache::fifo(200);
        cache.put(k("A"), obj(100), 100);
        cache.put(k("B"), obj(100), 100);
        assert!(cache.get(&k("A")).is_some());
        assert!(cache.get(&k("A")).is_some());

        cache.put(k("C"), obj(100), 100);

        assert!(!cache.contains(&k("A")));
        assert!(cache.contains(&k("B")));
        assert!(cache.contains(&k("C")));
    }

    #[test]
    fn test_touch_then_insert_lru_vs_fifo() {
        let lru = MemoryCache::lru(300);
        let fifo = MemoryCache::fifo(300);
        for cache in [&lru, &fifo] {
            cache.put(k("A"), obj(100), 100);
            cache.put(k("B"), obj(100), 100);
            cache.put(k("C"), obj(100), 100);
            assert!(cache.get(&k("A")).is_some());
            cache.put(k("D"), obj(100), 100);
        }

        assert!(lru.contains(&k("A")));
        assert!(!lru.contains(&k("B")));

        assert!(!fifo.contains(&k("A")));
        assert!(fifo.contains(&k("B")));
    }

    #[test]
    fn test_replace_existing_key() {
        let cache = MemoryCache::lru(1000);
        cache.put(k("a"), obj(100), 100);
        cache.put(k("a"), obj(300), 300);

        assert_eq!(cache.memory_used(), 300);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&k("a")).map(|v| v.len()), Some(300));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let cache = MemoryCache::lru(1000);
        cache.put(k("a"), obj(10), 10);

        assert!(cache.remove(&k("a")).is_some());
        assert!(cache.remove(&k("a")).is_none());
        assert!(cache.remove(&k("a")).is_none());
        assert_eq!(cache.memory_used(), 0);
    }

    #[test]
    fn test_remove_absent_twice() {
        let cache: MemoryCache<Vec<u8>> = MemoryCache::fifo(1000);
        assert!(cache.remove(&k("never")).is_none());
        assert!(cache.remove(&k("never")).is_none());
    }

    #[test]
    fn test_recoverable_tier_serves_live_objects() {
        let cache = MemoryCache::lru(100);
        let held = obj(100);
        cache.put(k("a"), held.clone(), 100);
        cache.put(k("b"), obj(100), 100);
        assert!(!cache.contains(&k("a")));

        // A consumer still holds "a", so it is recoverable, but not promoted.
        let recovered = cache.get(&k("a")).expect("still alive");
        assert!(Arc::ptr_eq(&recovered, &held));
        assert!(!cache.contains(&k("a")));
        assert_eq!(cache.stats().recovered, 1);
    }

    #[test]
    fn test_recoverable_tier_forgets_dropped_objects() {
        let cache = MemoryCache::lru(100);
        cache.put(k("a"), obj(100), 100);
        cache.put(k("b"), obj(100), 100);

        // Nobody held "a" after eviction.
        assert!(cache.get(&k("a")).is_none());
    }

    #[test]
    fn test_remove_clears_recoverable_tier() {
        let cache = MemoryCache::lru(100);
        let held = obj(100);
        cache.put(k("a"), held.clone(), 100);
        cache.put(k("b"), obj(100), 100);

        assert!(cache.remove(&k("a")).is_none());
        assert!(cache.get(&k("a")).is_none());
        drop(held);
    }

    #[test]
    fn test_clear() {
        let cache = MemoryCache::fifo(1000);
        cache.put(k("a"), obj(10), 10);
        cache.put(k("b"), obj(10), 10);
        cache.clear();

        assert!(cache.is_empty());
        assert_eq!(cache.memory_used(), 0);
        assert!(cache.get(&k("a")).is_none());
    }

    #[test]
    fn test_set_memory_limit() {
        let cache = MemoryCache::lru(1000);
        for i in 0..4 {
            cache.put(k(&format!("k{}", i)), obj(200), 200);
        }
        cache.set_memory_limit(450);

        assert_eq!(cache.len(), 2);
        assert!(cache.memory_used() <= 450);
        assert!(cache.contains(&k("k3")));
    }

    #[test]
    fn test_insert_uses_byte_size() {
        let cache = MemoryCache::lru(1000);
        assert!(cache.insert(k("a"), obj(123)));
        assert_eq!(cache.memory_used(), 123);
    }

    #[test]
    fn test_stats() {
        let cache = MemoryCache::lru(1000);
        cache.put(k("a"), obj(10), 10);
        let _ = cache.get(&k("a"));
        let _ = cache.get(&k("b"));
        let _ = cache.get(&k("c"));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.entry_count, 1);
        assert!((stats.hit_rate() - 0.333).abs() < 0.01);
        assert!((stats.memory_utilization() - 0.01).abs() < 1e-9);
    }

    #[test]
    fn test_size_invariant_random_operations() {
        let mut rng = rand::thread_rng();
        for kind in [PolicyKind::Lru, PolicyKind::Fifo] {
            let limit = 1000;
            let cache = MemoryCache::with_policy(limit, kind);
            for _ in 0..2000 {
                let key = k(&format!("k{}", rng.gen_range(0..40)));
                match rng.gen_range(0..3) {
                    0 => {
                        let size = rng.gen_range(0..1200);
                        cache.put(key, obj(size), size);
                    }
                    1 => {
                        cache.get(&key);
                    }
                    _ => {
                        cache.remove(&key);
                    }
                }
                let stats = cache.stats();
                assert!(stats.memory_used <= limit);
                assert_eq!(stats.memory_used, cache.memory_used());
            }
        }
    }

    #[test]
    fn test_concurrent_access() {
        let cache = Arc::new(MemoryCache::lru(10_000));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = cache.clone();
                thread::spawn(move || {
                    for i in 0..500 {
                        let key = k(&format!("k{}", (i * 7 + t) % 64));
                        if i % 3 == 0 {
                            cache.remove(&key);
                        } else {
                            cache.put(key.clone(), obj(300), 300);
                            cache.get(&key);
                        }
                        assert!(cache.memory_used() <= 10_000);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("worker panicked");
        }
        assert!(cache.memory_used() <= 10_000);
    }
}
