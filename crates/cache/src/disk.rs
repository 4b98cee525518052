//! On-disk cache of raw resource bytes
//!
//! One file per resource key lives under a managed directory, named by a
//! [`FileKeyCodec`]. No index file is persisted: the limited variant
//! rebuilds its usage order by scanning the directory when it opens.
//!
//! Files are written to a temporary name and renamed into place, so a
//! reader sees either the previous file or the complete new one.

use crate::codec::FileKeyCodec;
use crate::config::CacheConfig;
use crate::error::{CacheError, CacheResult};
use crate::lru_disk::LruDiskCache;
use crate::ResourceKey;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub(crate) const TEMP_SUFFIX: &str = ".tmp";

/// Bounded or unbounded store of files keyed by resource key.
///
/// `get` returns the path a key maps to. Content can be removed behind the
/// cache's back, so callers must check that the file exists before use;
/// [`find_in_cache`] does both.
pub trait DiskCache: Send + Sync {
    /// Directory chosen at construction (primary or reserve).
    fn directory(&self) -> &Path;

    /// Expected path of the file for `key`, if the cache knows of one.
    fn get(&self, key: &ResourceKey) -> Option<PathBuf>;

    /// Whether a file for `key` exists, without counting as a use.
    fn is_cached(&self, key: &ResourceKey) -> bool {
        self.get(key).is_some_and(|path| path.is_file())
    }

    /// Store everything readable from `source` under `key`.
    fn save(&self, key: &ResourceKey, source: &mut dyn Read) -> CacheResult<PathBuf>;

    /// Store a byte slice under `key`.
    fn save_bytes(&self, key: &ResourceKey, bytes: &[u8]) -> CacheResult<PathBuf> {
        let mut reader = bytes;
        self.save(key, &mut reader)
    }

    /// Delete the file for `key`. Returns `true` if a file was deleted.
    fn remove(&self, key: &ResourceKey) -> bool;

    /// Delete every managed file.
    fn clear(&self);
}

/// Path of the cached file for `key`, only if it exists on disk.
pub fn find_in_cache(cache: &dyn DiskCache, key: &ResourceKey) -> Option<PathBuf> {
    cache.get(key).filter(|path| path.is_file())
}

/// Delete the cached file for `key` if present.
pub fn remove_from_cache(cache: &dyn DiskCache, key: &ResourceKey) -> bool {
    cache.is_cached(key) && cache.remove(key)
}

/// Pick the cache directory once: `primary` if it can be created, else
/// `reserve`.
pub fn resolve_cache_dir(primary: &Path, reserve: &Path) -> CacheResult<PathBuf> {
    match fs::create_dir_all(primary) {
        Ok(()) => Ok(primary.to_path_buf()),
        Err(e) => {
            log::warn!(
                "cache directory {} unavailable ({}), using reserve {}",
                primary.display(),
                e,
                reserve.display()
            );
            fs::create_dir_all(reserve).map_err(|_| CacheError::NoCacheDirectory {
                primary: primary.to_path_buf(),
                reserve: reserve.to_path_buf(),
            })?;
            Ok(reserve.to_path_buf())
        }
    }
}

/// Build the disk cache described by `config`.
///
/// A size or file-count ceiling selects [`LruDiskCache`]; if that cannot be
/// opened the failure is logged and an [`UnlimitedDiskCache`] is used
/// instead.
pub fn create_disk_cache(config: &CacheConfig) -> CacheResult<Arc<dyn DiskCache>> {
    if config.disk_cache_size > 0 || config.disk_cache_file_count > 0 {
        match LruDiskCache::open(
            &config.disk_cache_dir,
            &config.reserve_cache_dir,
            config.key_codec.build(),
            config.disk_cache_size,
            config.disk_cache_file_count,
        ) {
            Ok(cache) => return Ok(Arc::new(cache)),
            Err(e) => log::error!("limited disk cache failed to open, falling back to unlimited: {}", e),
        }
    }

    let cache = UnlimitedDiskCache::open(
        &config.disk_cache_dir,
        &config.reserve_cache_dir,
        config.key_codec.build(),
    )?;
    Ok(Arc::new(cache))
}

/// Directory plus codec; owns the file-writing protocol.
pub(crate) struct FileStore {
    dir: PathBuf,
    codec: Box<dyn FileKeyCodec>,
    temp_counter: AtomicU64,
}

impl FileStore {
    pub(crate) fn new(dir: PathBuf, codec: Box<dyn FileKeyCodec>) -> Self {
        Self {
            dir,
            codec,
            temp_counter: AtomicU64::new(0),
        }
    }

    pub(crate) fn dir(&self) -> &Path {
        &self.dir
    }

    pub(crate) fn file_name(&self, key: &ResourceKey) -> String {
        self.codec.file_name(key)
    }

    pub(crate) fn path_of(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Copy `source` to a fresh temporary file. Returns its path and size.
    pub(crate) fn write_temp(&self, name: &str, source: &mut dyn Read) -> io::Result<(PathBuf, u64)> {
        let unique = self.temp_counter.fetch_add(1, Ordering::Relaxed);
        let temp = self
            .dir
            .join(format!("{}.{}.{}{}", name, std::process::id(), unique, TEMP_SUFFIX));

        let result = (|| {
            let mut file = File::create(&temp)?;
            let written = io::copy(source, &mut file)?;
            file.flush()?;
            file.sync_all()?;
            Ok(written)
        })();

        match result {
            Ok(written) => Ok((temp, written)),
            Err(e) => {
                fs::remove_file(&temp).ok();
                Err(e)
            }
        }
    }

    /// Move a temporary file over its final name.
    pub(crate) fn commit(&self, temp: &Path, name: &str) -> io::Result<PathBuf> {
        let path = self.path_of(name);
        if let Err(e) = fs::rename(temp, &path) {
            fs::remove_file(temp).ok();
            return Err(e);
        }
        Ok(path)
    }

    /// Delete a file, treating "already gone" as success.
    pub(crate) fn delete(&self, name: &str) -> io::Result<bool> {
        match fs::remove_file(self.path_of(name)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Delete every regular file in the directory.
    pub(crate) fn delete_all(&self) {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!("cannot list {}: {}", self.dir.display(), e);
                return;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_file() {
                fs::remove_file(&path).ok();
            }
        }
    }
}

/// Disk cache without any size or count limit.
pub struct UnlimitedDiskCache {
    store: FileStore,
}

impl UnlimitedDiskCache {
    /// Open a cache in `primary`, or in `reserve` if `primary` is unusable.
    pub fn open<P: AsRef<Path>, R: AsRef<Path>>(
        primary: P,
        reserve: R,
        codec: Box<dyn FileKeyCodec>,
    ) -> CacheResult<Self> {
        let dir = resolve_cache_dir(primary.as_ref(), reserve.as_ref())?;
        Ok(Self {
            store: FileStore::new(dir, codec),
        })
    }
}

impl DiskCache for UnlimitedDiskCache {
    fn directory(&self) -> &Path {
        self.store.dir()
    }

    fn get(&self, key: &ResourceKey) -> Option<PathBuf> {
        Some(self.store.path_of(&self.store.file_name(key)))
    }

    fn is_cached(&self, key: &ResourceKey) -> bool {
        self.store.path_of(&self.store.file_name(key)).is_file()
    }

    fn save(&self, key: &ResourceKey, source: &mut dyn Read) -> CacheResult<PathBuf> {
        let name = self.store.file_name(key);
        let (temp, _) = self.store.write_temp(&name, source)?;
        Ok(self.store.commit(&temp, &name)?)
    }

    fn remove(&self, key: &ResourceKey) -> bool {
        let name = self.store.file_name(key);
        match self.store.delete(&name) {
            Ok(deleted) => deleted,
            Err(e) => {
                log::warn!("failed to remove cached file for {}: {}", key, e);
                false
            }
        }
    }

    fn clear(&self) {
        self.store.delete_all();
    }
}
