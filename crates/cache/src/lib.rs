//! Resource caches for the resload engine
//!
//! Two independent tiers keyed by [`ResourceKey`]:
//! - [`MemoryCache`]: decoded objects under a byte budget with LRU or FIFO
//!   eviction, backed by a recoverable tier of weak handles.
//! - [`DiskCache`]: raw bytes as files, either unlimited or LRU-limited by
//!   total size and file count.

pub mod codec;
pub mod config;
pub mod disk;
pub mod error;
pub mod key;
pub mod lru_disk;
pub mod memory;
pub mod policy;

pub use codec::{FileKeyCodec, HashCodeKeyCodec, KeyCodecKind, Sha256KeyCodec};
pub use config::CacheConfig;
pub use disk::{
    create_disk_cache, find_in_cache, remove_from_cache, resolve_cache_dir, DiskCache,
    UnlimitedDiskCache,
};
pub use error::{CacheError, CacheResult};
pub use key::{ByteSize, ResourceKey};
pub use lru_disk::{DiskCacheStats, LruDiskCache};
pub use memory::{CacheStats, MemoryCache};
pub use policy::{EvictionPolicy, FifoPolicy, LruPolicy, PolicyKind};
