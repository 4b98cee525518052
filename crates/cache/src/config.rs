//! Cache configuration for memory and disk tiers.
//!
//! Configuration can be loaded from a TOML file, environment variables,
//! or created programmatically.

use crate::codec::KeyCodecKind;
use crate::error::{CacheError, CacheResult};
use crate::policy::PolicyKind;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

const MB: usize = 1024 * 1024;

/// Configuration for the memory and disk caches.
///
/// A disk ceiling of `0` means "no limit"; with both ceilings at `0` the
/// unlimited disk cache is used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Memory cache budget in bytes
    pub memory_cache_size: usize,
    /// Memory cache eviction policy
    pub memory_policy: PolicyKind,
    /// Disk cache size ceiling in bytes
    pub disk_cache_size: u64,
    /// Disk cache file-count ceiling
    pub disk_cache_file_count: usize,
    /// Preferred directory for disk cache storage
    pub disk_cache_dir: PathBuf,
    /// Directory used when `disk_cache_dir` cannot be created
    pub reserve_cache_dir: PathBuf,
    /// How keys are turned into file names
    pub key_codec: KeyCodecKind,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            // One eighth of a nominal 512 MB heap
            memory_cache_size: 64 * MB,
            memory_policy: PolicyKind::Lru,
            disk_cache_size: 0,
            disk_cache_file_count: 0,
            disk_cache_dir: Self::default_cache_dir(),
            reserve_cache_dir: Self::default_reserve_dir(),
            key_codec: KeyCodecKind::Sha256,
        }
    }
}

impl CacheConfig {
    /// Sets the memory cache budget in megabytes, saturating at `usize::MAX` bytes.
    pub fn with_memory_mb(mut self, mb: usize) -> Self {
        self.memory_cache_size = mb.saturating_mul(MB);
        self
    }

    /// Sets the memory cache budget in bytes.
    pub fn with_memory_bytes(mut self, bytes: usize) -> Self {
        self.memory_cache_size = bytes;
        self
    }

    pub fn with_memory_policy(mut self, policy: PolicyKind) -> Self {
        self.memory_policy = policy;
        self
    }

    /// Sets the disk cache size ceiling in megabytes, saturating at `u64::MAX` bytes.
    pub fn with_disk_mb(mut self, mb: u64) -> Self {
        self.disk_cache_size = mb.saturating_mul(MB as u64);
        self
    }

    /// Sets the disk cache size ceiling in bytes.
    pub fn with_disk_bytes(mut self, bytes: u64) -> Self {
        self.disk_cache_size = bytes;
        self
    }

    pub fn with_disk_file_count(mut self, count: usize) -> Self {
        self.disk_cache_file_count = count;
        self
    }

    /// Sets the disk cache directory.
    pub fn with_disk_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.disk_cache_dir = path.as_ref().to_path_buf();
        self
    }

    pub fn with_reserve_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.reserve_cache_dir = path.as_ref().to_path_buf();
        self
    }

    pub fn with_key_codec(mut self, codec: KeyCodecKind) -> Self {
        self.key_codec = codec;
        self
    }

    /// Returns the default cache directory for the current platform.
    ///
    /// - macOS: ~/Library/Caches/resload
    /// - Linux: ~/.cache/resload
    /// - Windows: %LOCALAPPDATA%\resload
    pub fn default_cache_dir() -> PathBuf {
        match dirs::cache_dir() {
            Some(cache_dir) => cache_dir.join("resload"),
            None => PathBuf::from("cache/resload"),
        }
    }

    /// Returns the reserve directory used when the primary is unusable.
    pub fn default_reserve_dir() -> PathBuf {
        std::env::temp_dir().join("resload-cache")
    }

    /// Loads configuration from environment variables.
    ///
    /// Environment variables:
    /// - `RESLOAD_MEMORY_CACHE_MB`: memory cache budget in MB (default: 64)
    /// - `RESLOAD_MEMORY_POLICY`: `lru` or `fifo` (default: `lru`)
    /// - `RESLOAD_DISK_CACHE_MB`: disk cache ceiling in MB (default: unlimited)
    /// - `RESLOAD_DISK_CACHE_FILES`: disk cache file-count ceiling (default: unlimited)
    /// - `RESLOAD_CACHE_DIR`: disk cache directory path
    /// - `RESLOAD_RESERVE_DIR`: reserve disk cache directory path
    ///
    /// # Errors
    /// Returns an error if any environment variable contains an invalid value.
    pub fn from_env() -> CacheResult<Self> {
        let mut config = Self::default();

        if let Some(mb) = parse_env::<usize>("RESLOAD_MEMORY_CACHE_MB")? {
            config.memory_cache_size = mb
                .checked_mul(MB)
                .ok_or_else(|| CacheError::InvalidValue("RESLOAD_MEMORY_CACHE_MB".to_string()))?;
        }
        if let Some(policy) = parse_env::<PolicyKind>("RESLOAD_MEMORY_POLICY")? {
            config.memory_policy = policy;
        }
        if let Some(mb) = parse_env::<u64>("RESLOAD_DISK_CACHE_MB")? {
            config.disk_cache_size = mb
                .checked_mul(MB as u64)
                .ok_or_else(|| CacheError::InvalidValue("RESLOAD_DISK_CACHE_MB".to_string()))?;
        }
        if let Some(count) = parse_env::<usize>("RESLOAD_DISK_CACHE_FILES")? {
            config.disk_cache_file_count = count;
        }
        if let Ok(val) = std::env::var("RESLOAD_CACHE_DIR") {
            config.disk_cache_dir = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("RESLOAD_RESERVE_DIR") {
            config.reserve_cache_dir = PathBuf::from(val);
        }

        Ok(config)
    }

    /// Loads configuration from a TOML file.
    ///
    /// Missing keys keep their defaults:
    /// ```toml
    /// memory_cache_size = 33554432
    /// memory_policy = "fifo"
    /// disk_cache_size = 104857600
    /// disk_cache_dir = "/path/to/cache"
    /// key_codec = "hash-code"
    /// ```
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> CacheResult<Self> {
        let contents = fs::read_to_string(path.as_ref())?;
        Self::from_toml(&contents)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> CacheResult<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Saves configuration to a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> CacheResult<()> {
        fs::write(path.as_ref(), self.to_toml()?)?;
        Ok(())
    }

    /// Converts configuration to TOML format.
    pub fn to_toml(&self) -> CacheResult<String> {
        Ok(toml::to_string(self)?)
    }

    /// Returns the memory cache budget in megabytes.
    pub fn memory_cache_mb(&self) -> usize {
        self.memory_cache_size / MB
    }

    /// Returns the disk cache ceiling in megabytes.
    pub fn disk_cache_mb(&self) -> u64 {
        self.disk_cache_size / MB as u64
    }

    /// Whether either disk ceiling is set.
    pub fn is_disk_limited(&self) -> bool {
        self.disk_cache_size > 0 || self.disk_cache_file_count > 0
    }
}

/// Parse an environment variable, `None` when unset.
pub fn parse_env<T: FromStr>(name: &str) -> CacheResult<Option<T>> {
    match std::env::var(name) {
        Ok(val) => val
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| CacheError::InvalidValue(name.to_string())),
        Err(_) => Ok(None),
    }
}
