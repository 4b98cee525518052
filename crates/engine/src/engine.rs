//! The dispatch engine
//!
//! Requests enter through [`DispatchEngine::load`] or
//! [`DispatchEngine::submit_load`]. A distributor thread checks whether
//! the disk cache already holds the resource and queues the load on the
//! fast pool (disk hit) or the slow pool (fetch needed). Completions are
//! delivered back on the distributor.
//!
//! Pools the engine created itself are shut down by
//! [`DispatchEngine::shutdown`] and silently recreated on the next
//! submission. Pools passed in through the builder are never shut down
//! by the engine.

use crate::cancel::{CancellationToken, ConsumerId, ConsumerRegistry};
use crate::completion::{guarded, CancelOnDrop};
use crate::config::{EngineConfig, DISTRIBUTOR_THREAD_NAME_PREFIX};
use crate::control::EngineControl;
use crate::error::{EngineError, PoolError};
use crate::lock::KeyLockTable;
use crate::queue::Job;
use crate::request::{Consumer, Decoder, Fetcher, LoadOptions, LoadRequest, LoadedFrom, Processor};
use crate::task::{LoadTask, ProcessTask};
use crate::worker::WorkerPool;
use parking_lot::RwLock;
use resload_cache::{create_disk_cache, ByteSize, DiskCache, MemoryCache, ResourceKey};
use std::sync::Arc;

type PoolFactory = Box<dyn Fn() -> Result<WorkerPool, PoolError> + Send + Sync>;

/// A pool plus, for pools the engine owns, the recipe to rebuild it.
pub(crate) struct PoolSlot {
    label: &'static str,
    pool: RwLock<Arc<WorkerPool>>,
    factory: Option<PoolFactory>,
}

impl PoolSlot {
    fn owned(label: &'static str, factory: PoolFactory) -> Result<Self, PoolError> {
        let pool = factory()?;
        Ok(Self {
            label,
            pool: RwLock::new(Arc::new(pool)),
            factory: Some(factory),
        })
    }

    fn external(label: &'static str, pool: Arc<WorkerPool>) -> Self {
        Self {
            label,
            pool: RwLock::new(pool),
            factory: None,
        }
    }

    /// Current pool, rebuilt first if it is ours and has been shut down.
    pub(crate) fn get(&self) -> Result<Arc<WorkerPool>, PoolError> {
        {
            let pool = self.pool.read();
            if !pool.is_shut_down() || self.factory.is_none() {
                return Ok(pool.clone());
            }
        }

        let mut pool = self.pool.write();
        if let Some(factory) = &self.factory {
            if pool.is_shut_down() {
                log::warn!("{} pool {} was shut down, starting a new one", self.label, pool.name());
                *pool = Arc::new(factory()?);
            }
        }
        Ok(pool.clone())
    }

    pub(crate) fn execute(&self, job: Job) -> Result<(), PoolError> {
        self.get()?.execute(job)
    }

    /// Shut the pool down if the engine owns it.
    fn shutdown(&self) {
        if self.factory.is_some() {
            // Dropped jobs call back into consumers, which may resubmit.
            let pool = self.pool.read().clone();
            pool.shutdown_now();
        }
    }

    fn is_owned(&self) -> bool {
        self.factory.is_some()
    }
}

/// State shared by the engine handle and every task.
pub(crate) struct EngineInner<T> {
    pub(crate) config: EngineConfig,
    pub(crate) fetcher: Arc<dyn Fetcher>,
    pub(crate) decoder: Arc<dyn Decoder<T>>,
    pub(crate) memory: Arc<MemoryCache<T>>,
    pub(crate) disk: Arc<dyn DiskCache>,
    pub(crate) fast: PoolSlot,
    pub(crate) slow: PoolSlot,
    pub(crate) distributor: PoolSlot,
    pub(crate) consumers: ConsumerRegistry,
    pub(crate) locks: KeyLockTable,
    pub(crate) control: EngineControl,
}

/// Cache-aware, deduplicating loader.
///
/// Cloning is cheap; clones share all state.
pub struct DispatchEngine<T> {
    inner: Arc<EngineInner<T>>,
}

impl<T> Clone for DispatchEngine<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> DispatchEngine<T>
where
    T: ByteSize + Send + Sync + 'static,
{
    pub fn builder(
        fetcher: impl Fetcher + 'static,
        decoder: impl Decoder<T> + 'static,
    ) -> EngineBuilder<T> {
        EngineBuilder::new(fetcher, decoder)
    }

    /// Load `key` for `consumer`.
    ///
    /// A memory-cache hit is delivered before this returns, on the calling
    /// thread, unless a post-processor is set. Everything else goes
    /// through [`submit_load`](Self::submit_load).
    pub fn load(
        &self,
        key: ResourceKey,
        consumer: Arc<dyn Consumer<T>>,
        options: LoadOptions<T>,
    ) -> Result<(), EngineError> {
        let memory_key = options.memory_key(&key);
        let id = consumer.id();
        self.prepare(id, memory_key.clone());

        let Some(object) = self.inner.memory.get(&memory_key) else {
            return self.submit_load(key, consumer, options);
        };

        log::trace!("memory cache hit for {}", memory_key);
        match options.post_processor {
            Some(processor) => self.submit_process(memory_key, consumer, object, processor),
            None => {
                consumer.deliver(object, LoadedFrom::MemoryCache);
                self.inner.consumers.release(id, &memory_key);
                Ok(())
            }
        }
    }

    /// Queue a load through the distributor.
    ///
    /// Records `consumer` as waiting for the request's memory key, which
    /// replaces anything it was waiting for before. Once this is called the
    /// consumer hears back exactly once, even if the work is dropped by a
    /// shutdown.
    ///
    /// # Errors
    /// [`PoolError::Rejected`] if the distributor refused the job; the
    /// consumer has already been sent `cancelled()` then.
    /// [`PoolError::Spawn`] if the job was queued but no thread could be
    /// started for it yet.
    pub fn submit_load(
        &self,
        key: ResourceKey,
        consumer: Arc<dyn Consumer<T>>,
        options: LoadOptions<T>,
    ) -> Result<(), EngineError> {
        let request = LoadRequest::new(key, consumer, options);
        let memory_key = request.memory_key.clone();
        self.prepare(request.consumer.id(), memory_key.clone());

        let engine = self.inner.clone();
        let guard = CancelOnDrop::new(engine.clone(), memory_key, request.consumer.clone());
        let job = guarded(guard, move |_token: &CancellationToken| route(engine, request));
        self.inner.distributor.execute(job)?;
        Ok(())
    }

    /// Queue post-processing of an already decoded object on the fast pool.
    ///
    /// Errors as for [`submit_load`](Self::submit_load).
    pub fn submit_process(
        &self,
        key: ResourceKey,
        consumer: Arc<dyn Consumer<T>>,
        object: Arc<T>,
        processor: Arc<dyn Processor<T>>,
    ) -> Result<(), EngineError> {
        self.prepare(consumer.id(), key.clone());

        let guard = CancelOnDrop::new(self.inner.clone(), key.clone(), consumer.clone());
        let task = ProcessTask::new(self.inner.clone(), key, consumer, object, processor);
        self.inner
            .fast
            .execute(guarded(guard, move |token: &CancellationToken| task.run(token)))?;
        Ok(())
    }

    /// Record that `consumer` now waits for `key`.
    pub fn prepare(&self, consumer: ConsumerId, key: ResourceKey) {
        if let Some(previous) = self.inner.consumers.prepare(consumer, key) {
            log::trace!("{} moved on from {}", consumer, previous);
        }
    }

    /// Forget what `consumer` was waiting for. Idempotent.
    pub fn cancel_for(&self, consumer: ConsumerId) {
        self.inner.consumers.cancel_for(consumer);
    }

    /// Whether `consumer` still waits for `key`.
    pub fn is_still_wanted(&self, consumer: ConsumerId, key: &ResourceKey) -> bool {
        self.inner.consumers.is_still_wanted(consumer, key)
    }

    /// Key `consumer` is currently waiting for.
    pub fn loading_key_for(&self, consumer: ConsumerId) -> Option<ResourceKey> {
        self.inner.consumers.loading_key_for(consumer)
    }

    /// Hold new tasks at the pause gate. Running tasks are unaffected.
    pub fn pause(&self) {
        self.inner.control.pause();
    }

    pub fn resume(&self) {
        self.inner.control.resume();
    }

    pub fn is_paused(&self) -> bool {
        self.inner.control.is_paused()
    }

    pub fn deny_network(&self, denied: bool) {
        self.inner.control.deny_network(denied);
    }

    pub fn is_network_denied(&self) -> bool {
        self.inner.control.is_network_denied()
    }

    pub fn set_slow_network(&self, slow: bool) {
        self.inner.control.set_slow_network(slow);
    }

    pub fn is_slow_network(&self) -> bool {
        self.inner.control.is_slow_network()
    }

    /// Stop all work.
    ///
    /// Owned pools drop their queued jobs and interrupt running ones;
    /// externally supplied pools are left alone. Consumers of dropped jobs
    /// are sent `cancelled()` before this returns. Consumer associations and
    /// the lock table are cleared. Later submissions start fresh pools.
    pub fn shutdown(&self) {
        self.inner.fast.shutdown();
        self.inner.slow.shutdown();
        self.inner.distributor.shutdown();
        self.inner.control.interrupt();
        self.inner.consumers.clear();
        self.inner.locks.clear();
        log::debug!(
            "engine shut down (fast pool owned: {}, slow pool owned: {})",
            self.inner.fast.is_owned(),
            self.inner.slow.is_owned()
        );
    }

    pub fn memory_cache(&self) -> &Arc<MemoryCache<T>> {
        &self.inner.memory
    }

    pub fn disk_cache(&self) -> &Arc<dyn DiskCache> {
        &self.inner.disk
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Pool used for disk-cache hits.
    pub fn fast_pool(&self) -> Result<Arc<WorkerPool>, EngineError> {
        Ok(self.inner.fast.get()?)
    }

    /// Pool used for loads that need a fetch.
    pub fn slow_pool(&self) -> Result<Arc<WorkerPool>, EngineError> {
        Ok(self.inner.slow.get()?)
    }
}

/// Runs on the distributor: pick the pool by disk-cache presence.
fn route<T>(engine: Arc<EngineInner<T>>, request: LoadRequest<T>)
where
    T: ByteSize + Send + Sync + 'static,
{
    let cached = engine.disk.is_cached(&request.key);
    let slot = if cached { &engine.fast } else { &engine.slow };
    log::debug!("routing {} to the {} pool", request.key, slot.label);

    let memory_key = request.memory_key.clone();
    let guard = CancelOnDrop::new(engine.clone(), memory_key.clone(), request.consumer.clone());
    let task = LoadTask::new(engine.clone(), request);
    if let Err(e) = slot.execute(guarded(guard, move |token: &CancellationToken| task.run(token))) {
        log::warn!("could not queue load of {}: {}", memory_key, e);
    }
}

/// Assembles a [`DispatchEngine`].
///
/// Caches and pools not supplied here are created from the
/// [`EngineConfig`].
pub struct EngineBuilder<T> {
    fetcher: Arc<dyn Fetcher>,
    decoder: Arc<dyn Decoder<T>>,
    config: EngineConfig,
    memory: Option<Arc<MemoryCache<T>>>,
    disk: Option<Arc<dyn DiskCache>>,
    fast: Option<Arc<WorkerPool>>,
    slow: Option<Arc<WorkerPool>>,
}

impl<T> EngineBuilder<T>
where
    T: ByteSize + Send + Sync + 'static,
{
    pub fn new(fetcher: impl Fetcher + 'static, decoder: impl Decoder<T> + 'static) -> Self {
        Self {
            fetcher: Arc::new(fetcher),
            decoder: Arc::new(decoder),
            config: EngineConfig::default(),
            memory: None,
            disk: None,
            fast: None,
            slow: None,
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_memory_cache(mut self, cache: Arc<MemoryCache<T>>) -> Self {
        self.memory = Some(cache);
        self
    }

    pub fn with_disk_cache(mut self, cache: Arc<dyn DiskCache>) -> Self {
        self.disk = Some(cache);
        self
    }

    /// Use an external pool for disk-cache hits. The engine never shuts it down.
    pub fn with_fast_pool(mut self, pool: Arc<WorkerPool>) -> Self {
        self.fast = Some(pool);
        self
    }

    /// Use an external pool for fetches. The engine never shuts it down.
    pub fn with_slow_pool(mut self, pool: Arc<WorkerPool>) -> Self {
        self.slow = Some(pool);
        self
    }

    pub fn build(self) -> Result<DispatchEngine<T>, EngineError> {
        let config = self.config;

        let memory = match self.memory {
            Some(memory) => memory,
            None => Arc::new(MemoryCache::with_policy(
                config.cache.memory_cache_size,
                config.cache.memory_policy,
            )),
        };
        let disk = match self.disk {
            Some(disk) => disk,
            None => create_disk_cache(&config.cache)?,
        };

        let fast = match self.fast {
            Some(pool) => PoolSlot::external("fast", pool),
            None => PoolSlot::owned("fast", fixed_pool_factory(&config))?,
        };
        let slow = match self.slow {
            Some(pool) => PoolSlot::external("slow", pool),
            None => PoolSlot::owned("slow", fixed_pool_factory(&config))?,
        };
        let keep_alive = config.distributor_keep_alive;
        let distributor = PoolSlot::owned(
            "distributor",
            Box::new(move || Ok(WorkerPool::cached(DISTRIBUTOR_THREAD_NAME_PREFIX, keep_alive))),
        )?;

        Ok(DispatchEngine {
            inner: Arc::new(EngineInner {
                config,
                fetcher: self.fetcher,
                decoder: self.decoder,
                memory,
                disk,
                fast,
                slow,
                distributor,
                consumers: ConsumerRegistry::new(),
                locks: KeyLockTable::new(),
                control: EngineControl::new(),
            }),
        })
    }
}

fn fixed_pool_factory(config: &EngineConfig) -> PoolFactory {
    let prefix = config.thread_name_prefix.clone();
    let size = config.thread_pool_size;
    let order = config.queue_type;
    Box::new(move || WorkerPool::fixed(&prefix, size, order))
}
