//! Per-key lock table
//!
//! Hands out one reentrant lock per resource key. The table only keeps
//! `Weak` handles: a lock lives exactly as long as some task holds or
//! waits on it, and dead entries are swept as the table grows.

use parking_lot::{Mutex, ReentrantMutex};
use resload_cache::ResourceKey;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

/// Lock serializing work on one key.
pub type KeyLock = ReentrantMutex<()>;

const MIN_SWEEP_THRESHOLD: usize = 64;

struct LockMap {
    locks: HashMap<ResourceKey, Weak<KeyLock>>,
    sweep_at: usize,
}

/// Table of lazily created per-key locks.
///
/// # Example
///
/// ```
/// use resload_cache::ResourceKey;
/// use resload_engine::KeyLockTable;
///
/// let table = KeyLockTable::new();
/// let key = ResourceKey::from("uri://a");
///
/// let lock = table.acquire(&key);
/// let _guard = lock.lock();
/// // Same key, same lock instance
/// assert!(std::sync::Arc::ptr_eq(&lock, &table.acquire(&key)));
/// ```
pub struct KeyLockTable {
    map: Mutex<LockMap>,
}

impl KeyLockTable {
    pub fn new() -> Self {
        Self {
            map: Mutex::new(LockMap {
                locks: HashMap::new(),
                sweep_at: MIN_SWEEP_THRESHOLD,
            }),
        }
    }

    /// Get the lock for `key`, creating it if no live one exists.
    ///
    /// The returned handle is not locked; callers lock it themselves and
    /// keep the `Arc` alive for as long as they hold or wait on it.
    pub fn acquire(&self, key: &ResourceKey) -> Arc<KeyLock> {
        let mut map = self.map.lock();
        if let Some(lock) = map.locks.get(key).and_then(Weak::upgrade) {
            return lock;
        }

        if map.locks.len() >= map.sweep_at {
            map.locks.retain(|_, lock| lock.strong_count() > 0);
            map.sweep_at = (map.locks.len() * 2).max(MIN_SWEEP_THRESHOLD);
        }

        let lock = Arc::new(KeyLock::new(()));
        map.locks.insert(key.clone(), Arc::downgrade(&lock));
        lock
    }

    /// Number of keys whose lock is still referenced.
    pub fn len(&self) -> usize {
        self.map
            .lock()
            .locks
            .values()
            .filter(|lock| lock.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every entry. Locks already handed out stay valid.
    pub fn clear(&self) {
        let mut map = self.map.lock();
        map.locks.clear();
        map.sweep_at = MIN_SWEEP_THRESHOLD;
    }
}

impl Default for KeyLockTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    fn k(s: &str) -> ResourceKey {
        ResourceKey::from(s)
    }

    #[test]
    fn test_same_key_same_lock() {
        let table = KeyLockTable::new();
        let a1 = table.acquire(&k("a"));
        let a2 = table.acquire(&k("a"));
        let b = table.acquire(&k("b"));

        assert!(Arc::ptr_eq(&a1, &a2));
        assert!(!Arc::ptr_eq(&a1, &b));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_lock_is_reentrant() {
        let table = KeyLockTable::new();
        let lock = table.acquire(&k("a"));
        let _outer = lock.lock();
        let _inner = lock.lock();
    }

    #[test]
    fn test_idle_locks_are_reclaimed() {
        let table = KeyLockTable::new();
        let first = table.acquire(&k("a"));
        let weak = Arc::downgrade(&first);
        drop(first);

        assert!(weak.upgrade().is_none());
        assert!(table.is_empty());

        // A fresh lock is created on the next request.
        let second = table.acquire(&k("a"));
        assert_eq!(table.len(), 1);
        drop(second);
    }

    #[test]
    fn test_sweep_bounds_the_table() {
        let table = KeyLockTable::new();
        for i in 0..1000 {
            let _lock = table.acquire(&k(&format!("key-{}", i)));
        }
        assert!(table.map.lock().locks.len() <= MIN_SWEEP_THRESHOLD * 2);
    }

    #[test]
    fn test_same_key_is_mutually_exclusive() {
        let table = Arc::new(KeyLockTable::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let overlap = Arc::new(AtomicBool::new(false));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let table = table.clone();
                let inside = inside.clone();
                let overlap = overlap.clone();
                thread::spawn(move || {
                    let lock = table.acquire(&k("shared"));
                    let _guard = lock.lock();
                    if inside.fetch_add(1, Ordering::SeqCst) > 0 {
                        overlap.store(true, Ordering::SeqCst);
                    }
                    thread::sleep(Duration::from_millis(2));
                    inside.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("thread panicked");
        }

        assert!(!overlap.load(Ordering::SeqCst));
    }

    #[test]
    fn test_different_keys_do_not_block() {
        let table = Arc::new(KeyLockTable::new());
        let held = table.acquire(&k("a"));
        let _guard = held.lock();

        let other = {
            let table = table.clone();
            thread::spawn(move || {
                let lock = table.acquire(&k("b"));
                let _guard = lock.lock();
                true
            })
        };
        assert!(other.join().expect("thread panicked"));
    }

    #[test]
    fn test_clear_keeps_handed_out_locks_valid() {
        let table = KeyLockTable::new();
        let lock = table.acquire(&k("a"));
        table.clear();
        assert!(table.is_empty());
        let _guard = lock.lock();
    }
}
