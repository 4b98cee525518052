//! Collaborator traits and per-request options
//!
//! The engine never fetches or decodes anything itself. It drives a
//! [`Fetcher`] for raw bytes, a [`Decoder`] for turning them into objects
//! and reports back to a [`Consumer`].

use crate::cancel::ConsumerId;
use crate::error::{BoxError, FailReason};
use resload_cache::ResourceKey;
use std::fmt;
use std::sync::Arc;

/// Network conditions at the time of a fetch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchContext {
    pub network_denied: bool,
    pub slow_network: bool,
}

/// Produces the raw bytes of a resource.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, key: &ResourceKey, context: &FetchContext) -> Result<Vec<u8>, BoxError>;

    /// Whether fetching `key` goes over the network. Keys that do not are
    /// still fetched while the network is denied.
    fn requires_network(&self, _key: &ResourceKey) -> bool {
        true
    }
}

/// Options passed through to the decoder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Size the decoded object should fit, if any.
    pub target_size: Option<(u32, u32)>,
}

/// Turns raw bytes into a usable object.
pub trait Decoder<T>: Send + Sync {
    fn decode(&self, bytes: &[u8], options: &DecodeOptions) -> Result<T, BoxError>;
}

/// Where a delivered object came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadedFrom {
    Network,
    DiskCache,
    MemoryCache,
}

/// Receiver of a load result.
///
/// Exactly one of `deliver`, `cancelled` or `failed` is called per accepted
/// request. Callbacks run on the engine's completion context, except for a
/// memory-cache hit served synchronously by
/// [`DispatchEngine::load`](crate::DispatchEngine::load).
pub trait Consumer<T>: Send + Sync {
    fn id(&self) -> ConsumerId;

    /// Reuse check, called from worker threads. Return `false` once this
    /// consumer no longer wants `key`.
    fn still_wants(&self, _key: &ResourceKey) -> bool {
        true
    }

    fn deliver(&self, object: Arc<T>, from: LoadedFrom);

    fn cancelled(&self);

    fn failed(&self, reason: FailReason);
}

/// Transforms an already decoded object.
pub trait Processor<T>: Send + Sync {
    fn process(&self, input: &T) -> T;
}

impl<T, F> Processor<T> for F
where
    F: Fn(&T) -> T + Send + Sync,
{
    fn process(&self, input: &T) -> T {
        self(input)
    }
}

/// Per-request settings.
pub struct LoadOptions<T> {
    /// Keep the decoded object in the memory cache
    pub cache_in_memory: bool,
    /// Keep the fetched bytes in the disk cache
    pub cache_on_disk: bool,
    pub decode: DecodeOptions,
    /// Applied after decoding, before the object is memory-cached
    pub pre_processor: Option<Arc<dyn Processor<T>>>,
    /// Applied to every delivered object, after caching
    pub post_processor: Option<Arc<dyn Processor<T>>>,
}

impl<T> LoadOptions<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cache_in_memory(mut self, enabled: bool) -> Self {
        self.cache_in_memory = enabled;
        self
    }

    pub fn cache_on_disk(mut self, enabled: bool) -> Self {
        self.cache_on_disk = enabled;
        self
    }

    pub fn target_size(mut self, width: u32, height: u32) -> Self {
        self.decode.target_size = Some((width, height));
        self
    }

    pub fn pre_processor(mut self, processor: impl Processor<T> + 'static) -> Self {
        self.pre_processor = Some(Arc::new(processor));
        self
    }

    pub fn post_processor(mut self, processor: impl Processor<T> + 'static) -> Self {
        self.post_processor = Some(Arc::new(processor));
        self
    }

    /// Key the decoded result is memory-cached and tracked under.
    ///
    /// Requests with a target size get a size-suffixed key so differently
    /// sized variants of one resource do not collide.
    pub fn memory_key(&self, key: &ResourceKey) -> ResourceKey {
        match self.decode.target_size {
            Some((width, height)) => ResourceKey::for_target(key.as_str(), width, height),
            None => key.clone(),
        }
    }
}

impl<T> Default for LoadOptions<T> {
    fn default() -> Self {
        Self {
            cache_in_memory: true,
            cache_on_disk: true,
            decode: DecodeOptions::default(),
            pre_processor: None,
            post_processor: None,
        }
    }
}

impl<T> Clone for LoadOptions<T> {
    fn clone(&self) -> Self {
        Self {
            cache_in_memory: self.cache_in_memory,
            cache_on_disk: self.cache_on_disk,
            decode: self.decode,
            pre_processor: self.pre_processor.clone(),
            post_processor: self.post_processor.clone(),
        }
    }
}

impl<T> fmt::Debug for LoadOptions<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadOptions")
            .field("cache_in_memory", &self.cache_in_memory)
            .field("cache_on_disk", &self.cache_on_disk)
            .field("decode", &self.decode)
            .field("pre_processor", &self.pre_processor.is_some())
            .field("post_processor", &self.post_processor.is_some())
            .finish()
    }
}

/// One accepted load request as it travels through the pools.
pub(crate) struct LoadRequest<T> {
    /// Key fetched, disk-cached and locked on
    pub(crate) key: ResourceKey,
    /// Key memory-cached and tracked in the consumer table
    pub(crate) memory_key: ResourceKey,
    pub(crate) consumer: Arc<dyn Consumer<T>>,
    pub(crate) options: LoadOptions<T>,
}

impl<T> LoadRequest<T> {
    pub(crate) fn new(key: ResourceKey, consumer: Arc<dyn Consumer<T>>, options: LoadOptions<T>) -> Self {
        Self {
            memory_key: options.memory_key(&key),
            key,
            consumer,
            options,
        }
    }
}
