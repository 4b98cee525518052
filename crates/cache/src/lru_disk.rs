//! Size- and count-limited disk cache with LRU eviction.
//!
//! Usage order is tracked in memory only. On open, the directory is
//! scanned and files are ordered by modification time, so the least
//! recently written file of a previous run is the first to go.

use crate::codec::FileKeyCodec;
use crate::disk::{resolve_cache_dir, DiskCache, FileStore, TEMP_SUFFIX};
use crate::error::{CacheError, CacheResult};
use crate::ResourceKey;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Statistics for monitoring disk cache performance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiskCacheStats {
    /// Lookups for indexed files
    pub hits: u64,
    /// Lookups for unknown keys
    pub misses: u64,
    /// Files removed to get back under the ceilings
    pub evictions: u64,
    /// Number of indexed files
    pub file_count: usize,
    /// Total size of indexed files in bytes
    pub bytes_used: u64,
}

impl DiskCacheStats {
    /// Calculate cache hit rate as a percentage (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct IndexEntry {
    size: u64,
    tick: u64,
}

#[derive(Default)]
struct CacheState {
    /// File name -> size and last-use tick
    entries: HashMap<String, IndexEntry>,
    /// Last-use tick -> file name; first entry is least recently used
    order: BTreeMap<u64, String>,
    next_tick: u64,
    stats: DiskCacheStats,
}

impl CacheState {
    fn next_tick(&mut self) -> u64 {
        let tick = self.next_tick;
        self.next_tick += 1;
        tick
    }

    /// Mark a file as most recently used
    fn touch(&mut self, name: &str) -> bool {
        let tick = self.next_tick();
        match self.entries.get_mut(name) {
            Some(entry) => {
                self.order.remove(&entry.tick);
                entry.tick = tick;
                self.order.insert(tick, name.to_string());
                true
            }
            None => false,
        }
    }

    fn insert(&mut self, name: String, size: u64) {
        self.forget(&name);
        let tick = self.next_tick();
        self.order.insert(tick, name.clone());
        self.entries.insert(name, IndexEntry { size, tick });
        self.stats.bytes_used += size;
        self.stats.file_count = self.entries.len();
    }

    fn forget(&mut self, name: &str) -> Option<IndexEntry> {
        let entry = self.entries.remove(name)?;
        self.order.remove(&entry.tick);
        self.stats.bytes_used = self.stats.bytes_used.saturating_sub(entry.size);
        self.stats.file_count = self.entries.len();
        Some(entry)
    }

    fn pop_lru(&mut self) -> Option<String> {
        let (_, name) = self.order.pop_first()?;
        if let Some(entry) = self.entries.remove(&name) {
            self.stats.bytes_used = self.stats.bytes_used.saturating_sub(entry.size);
            self.stats.file_count = self.entries.len();
        }
        Some(name)
    }
}

/// Disk cache bounded by total bytes and/or file count
///
/// A ceiling of `0` disables that limit; at least one must be set.
/// Thread-safe for concurrent access from multiple threads.
pub struct LruDiskCache {
    store: FileStore,
    max_bytes: u64,
    max_files: usize,
    state: Mutex<CacheState>,
}

impl LruDiskCache {
    /// Open (or create) a limited cache and index any files already there.
    pub fn open<P: AsRef<Path>, R: AsRef<Path>>(
        primary: P,
        reserve: R,
        codec: Box<dyn FileKeyCodec>,
        max_bytes: u64,
        max_files: usize,
    ) -> CacheResult<Self> {
        if max_bytes == 0 && max_files == 0 {
            return Err(CacheError::InvalidValue(
                "disk cache needs a size or file-count ceiling".to_string(),
            ));
        }

        let dir = resolve_cache_dir(primary.as_ref(), reserve.as_ref())?;
        let cache = Self {
            store: FileStore::new(dir, codec),
            max_bytes,
            max_files,
            state: Mutex::new(CacheState::default()),
        };
        cache.rebuild_index()?;
        Ok(cache)
    }

    /// Rebuild the usage index from the directory contents.
    ///
    /// Leftover temporary files from an interrupted write are deleted.
    pub fn rebuild_index(&self) -> CacheResult<()> {
        let mut found = Vec::new();
        for entry in fs::read_dir(self.store.dir())? {
            let entry = entry?;
            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(TEMP_SUFFIX) {
                fs::remove_file(entry.path()).ok();
                continue;
            }
            let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            found.push((modified, name, metadata.len()));
        }
        found.sort();

        let mut state = self.state.lock();
        let evictions = state.stats.evictions;
        *state = CacheState::default();
        state.stats.evictions = evictions;
        for (_, name, size) in found {
            state.insert(name, size);
        }
        log::debug!(
            "indexed {} cached files ({} bytes) in {}",
            state.stats.file_count,
            state.stats.bytes_used,
            self.store.dir().display()
        );
        self.trim(&mut state);
        Ok(())
    }

    fn over_budget(&self, state: &CacheState) -> bool {
        (self.max_bytes > 0 && state.stats.bytes_used > self.max_bytes)
            || (self.max_files > 0 && state.entries.len() > self.max_files)
    }

    /// Evict least recently used files until within both ceilings
    fn trim(&self, state: &mut CacheState) {
        while self.over_budget(state) {
            let Some(name) = state.pop_lru() else { break };
            if let Err(e) = self.store.delete(&name) {
                log::warn!("failed to evict cached file {}: {}", name, e);
            }
            state.stats.evictions += 1;
        }
    }

    /// Get current cache statistics
    pub fn stats(&self) -> DiskCacheStats {
        self.state.lock().stats
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    pub fn max_files(&self) -> usize {
        self.max_files
    }

    /// Total size of indexed files in bytes
    pub fn bytes_used(&self) -> u64 {
        self.state.lock().stats.bytes_used
    }

    /// Number of indexed files
    pub fn file_count(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Check whether `key` is indexed without counting a use.
    pub fn contains(&self, key: &ResourceKey) -> bool {
        let name = self.store.file_name(key);
        self.state.lock().entries.contains_key(&name)
    }
}

impl DiskCache for LruDiskCache {
    fn directory(&self) -> &Path {
        self.store.dir()
    }

    fn get(&self, key: &ResourceKey) -> Option<PathBuf> {
        let name = self.store.file_name(key);
        let mut state = self.state.lock();
        if state.touch(&name) {
            state.stats.hits += 1;
            Some(self.store.path_of(&name))
        } else {
            state.stats.misses += 1;
            None
        }
    }

    fn is_cached(&self, key: &ResourceKey) -> bool {
        let name = self.store.file_name(key);
        let indexed = self.state.lock().entries.contains_key(&name);
        indexed && self.store.path_of(&name).is_file()
    }

    fn save(&self, key: &ResourceKey, source: &mut dyn Read) -> CacheResult<PathBuf> {
        let name = self.store.file_name(key);
        // The copy happens outside the lock; only the rename is serialized.
        let (temp, size) = self.store.write_temp(&name, source)?;
        if self.max_bytes > 0 && size > self.max_bytes {
            fs::remove_file(&temp).ok();
            return Err(CacheError::TooLarge {
                size,
                limit: self.max_bytes,
            });
        }

        let mut state = self.state.lock();
        let path = self.store.commit(&temp, &name)?;
        state.insert(name, size);
        self.trim(&mut state);
        Ok(path)
    }

    fn remove(&self, key: &ResourceKey) -> bool {
        let name = self.store.file_name(key);
        let mut state = self.state.lock();
        state.forget(&name);
        match self.store.delete(&name) {
            Ok(deleted) => deleted,
            Err(e) => {
                log::warn!("failed to remove cached file for {}: {}", key, e);
                false
            }
        }
    }

    fn clear(&self) {
        let mut state = self.state.lock();
        self.store.delete_all();
        let evictions = state.stats.evictions;
        *state = CacheState::default();
        state.stats.evictions = evictions;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Sha256KeyCodec;
    use crate::disk::find_in_cache;
    use std::sync::Arc;
    use std::thread;

    fn k(s: &str) -> ResourceKey {
        ResourceKey::from(s)
    }

    fn open(dir: &Path, max_bytes: u64, max_files: usize) -> LruDiskCache {
        LruDiskCache::open(
            dir.join("cache"),
            dir.join("reserve"),
            Box::new(Sha256KeyCodec),
            max_bytes,
            max_files,
        )
        .expect("cache should open")
    }

    #[test]
    fn test_basic_save_get() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let cache = open(temp.path(), 1024 * 1024, 0);

        let bytes = vec![255u8; 4096];
        let path = cache.save_bytes(&k("uri://1"), &bytes).expect("save should succeed");

        assert_eq!(cache.get(&k("uri://1")), Some(path.clone()));
        assert_eq!(fs::read(path).expect("file readable"), bytes);
        assert_eq!(cache.bytes_used(), 4096);
        assert_eq!(cache.file_count(), 1);
    }

    #[test]
    fn test_cache_miss() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let cache = open(temp.path(), 1024, 0);

        assert!(cache.get(&k("uri://missing")).is_none());

        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 0);
    }

    #[test]
    fn test_requires_a_ceiling() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let result = LruDiskCache::open(
            temp.path().join("c"),
            temp.path().join("r"),
            Box::new(Sha256KeyCodec),
            0,
            0,
        );
        assert!(matches!(result, Err(CacheError::InvalidValue(_))));
    }

    #[test]
    fn test_size_eviction_removes_oldest_file() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let cache = open(temp.path(), 1000, 0);
        let bytes = vec![1u8; 300];

        let first = cache.save_bytes(&k("1"), &bytes).expect("save should succeed");
        cache.save_bytes(&k("2"), &bytes).expect("save should succeed");
        cache.save_bytes(&k("3"), &bytes).expect("save should succeed");
        cache.save_bytes(&k("4"), &bytes).expect("save should succeed");

        assert!(!first.exists());
        assert!(find_in_cache(&cache, &k("1")).is_none());
        assert!(find_in_cache(&cache, &k("2")).is_some());
        assert!(find_in_cache(&cache, &k("4")).is_some());
        assert!(cache.bytes_used() <= 1000);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_get_refreshes_access_order() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let cache = open(temp.path(), 1000, 0);
        let bytes = vec![1u8; 300];

        cache.save_bytes(&k("1"), &bytes).expect("save should succeed");
        let second = cache.save_bytes(&k("2"), &bytes).expect("save should succeed");
        cache.save_bytes(&k("3"), &bytes).expect("save should succeed");

        // Reading 1 makes 2 the least recently accessed.
        assert!(cache.get(&k("1")).is_some());
        cache.save_bytes(&k("4"), &bytes).expect("save should succeed");

        assert!(cache.contains(&k("1")));
        assert!(!second.exists());
        assert!(!cache.contains(&k("2")));
        assert!(cache.contains(&k("3")));
        assert!(cache.contains(&k("4")));
    }

    #[test]
    fn test_file_count_eviction() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let cache = open(temp.path(), 0, 2);

        cache.save_bytes(&k("a"), b"a").expect("save should succeed");
        cache.save_bytes(&k("b"), b"b").expect("save should succeed");
        cache.save_bytes(&k("c"), b"c").expect("save should succeed");

        assert_eq!(cache.file_count(), 2);
        assert!(!cache.contains(&k("a")));
    }

    #[test]
    fn test_multiple_evictions_for_large_file() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let cache = open(temp.path(), 1000, 0);

        for name in ["a", "b", "c"] {
            cache.save_bytes(&k(name), &[0u8; 300]).expect("save should succeed");
        }
        cache.save_bytes(&k("big"), &[0u8; 700]).expect("save should succeed");

        assert!(!cache.contains(&k("a")));
        assert!(!cache.contains(&k("b")));
        assert!(cache.contains(&k("c")));
        assert!(cache.contains(&k("big")));
        assert_eq!(cache.bytes_used(), 1000);
    }

    #[test]
    fn test_oversized_file_is_rejected() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let cache = open(temp.path(), 100, 0);

        cache.save_bytes(&k("small"), &[1u8; 50]).expect("save should succeed");
        let result = cache.save_bytes(&k("big"), &[2u8; 500]);
        assert!(matches!(result, Err(CacheError::TooLarge { size: 500, limit: 100 })));

        assert!(cache.contains(&k("small")));
        assert!(!cache.contains(&k("big")));
        assert_eq!(cache.file_count(), 1);
        assert_eq!(cache.bytes_used(), 50);
        assert_eq!(cache.stats().evictions, 0);

        let leftovers = fs::read_dir(cache.directory())
            .expect("cache dir readable")
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(TEMP_SUFFIX))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_is_cached_does_not_count_a_use() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let cache = open(temp.path(), 1000, 0);

        cache.save_bytes(&k("a"), &[0u8; 400]).expect("save should succeed");
        cache.save_bytes(&k("b"), &[0u8; 400]).expect("save should succeed");
        assert!(cache.is_cached(&k("a")));
        assert!(!cache.is_cached(&k("missing")));
        assert_eq!(cache.stats().hits, 0);
        assert_eq!(cache.stats().misses, 0);

        // "a" was not refreshed, so it is still the eviction candidate.
        cache.save_bytes(&k("c"), &[0u8; 400]).expect("save should succeed");
        assert!(!cache.contains(&k("a")));
        assert!(cache.contains(&k("b")));
    }

    #[test]
    fn test_overwrite_updates_size() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let cache = open(temp.path(), 10_000, 0);

        cache.save_bytes(&k("a"), &[0u8; 100]).expect("save should succeed");
        cache.save_bytes(&k("a"), &[0u8; 250]).expect("save should succeed");

        assert_eq!(cache.file_count(), 1);
        assert_eq!(cache.bytes_used(), 250);
    }

    #[test]
    fn test_remove() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let cache = open(temp.path(), 10_000, 0);

        let path = cache.save_bytes(&k("a"), b"data").expect("save should succeed");
        assert!(cache.remove(&k("a")));
        assert!(!path.exists());
        assert_eq!(cache.file_count(), 0);
        assert!(!cache.remove(&k("a")));
    }

    #[test]
    fn test_clear() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let cache = open(temp.path(), 10_000, 0);

        cache.save_bytes(&k("a"), b"1").expect("save should succeed");
        cache.save_bytes(&k("b"), b"2").expect("save should succeed");
        cache.clear();

        assert_eq!(cache.file_count(), 0);
        assert_eq!(cache.bytes_used(), 0);
        assert_eq!(fs::read_dir(cache.directory()).expect("dir listable").count(), 0);
    }

    #[test]
    fn test_reopen_rebuilds_index() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        {
            let cache = open(temp.path(), 10_000, 0);
            cache.save_bytes(&k("a"), &[1u8; 100]).expect("save should succeed");
            cache.save_bytes(&k("b"), &[2u8; 200]).expect("save should succeed");
        }
        // A temp file from an interrupted write.
        fs::write(temp.path().join("cache").join("zzz.1.2.tmp"), b"partial")
            .expect("write temp file");

        let cache = open(temp.path(), 10_000, 0);
        assert_eq!(cache.file_count(), 2);
        assert_eq!(cache.bytes_used(), 300);
        assert!(cache.contains(&k("a")));
        assert!(!temp.path().join("cache").join("zzz.1.2.tmp").exists());
    }

    #[test]
    fn test_reopen_with_smaller_ceiling_trims() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        {
            let cache = open(temp.path(), 10_000, 0);
            for name in ["a", "b", "c"] {
                cache.save_bytes(&k(name), &[0u8; 100]).expect("save should succeed");
            }
        }
        let cache = open(temp.path(), 0, 1);
        assert_eq!(cache.file_count(), 1);
    }

    #[test]
    fn test_concurrent_saves_stay_within_budget() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let cache = Arc::new(open(temp.path(), 5_000, 0));

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let cache = cache.clone();
                thread::spawn(move || {
                    for i in 0..20 {
                        let key = k(&format!("t{}-{}", t, i));
                        cache.save_bytes(&key, &[0u8; 400]).expect("save should succeed");
                        cache.get(&key);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("writer panicked");
        }

        assert!(cache.bytes_used() <= 5_000);
        let on_disk = fs::read_dir(cache.directory()).expect("dir listable").count();
        assert_eq!(on_disk, cache.file_count());
    }
}
