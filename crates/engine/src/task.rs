//! Load and process tasks run on the fast and slow pools
//!
//! A [`LoadTask`] walks the states of [`TaskState`] in order. After the
//! pause gate, every transition re-checks that the consumer still wants
//! the result and that the pool has not been shut down; either failing
//! ends the task as cancelled without running the remaining steps.
//!
//! Bytes fetched before a cancellation stay in the disk cache, and a
//! decoded object may still be memory-cached: another consumer can want
//! the same key later.

use crate::cancel::CancellationToken;
use crate::completion::CompletionTask;
use crate::engine::EngineInner;
use crate::error::FailReason;
use crate::request::{Consumer, FetchContext, LoadRequest, LoadedFrom, Processor};
use resload_cache::{find_in_cache, ByteSize, ResourceKey};
use std::fmt;
use std::fs;
use std::sync::Arc;

/// States of a load task, in the order they are entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Created,
    WaitingForTurn,
    AcquiringLock,
    CacheCheck,
    Fetching,
    Decoding,
    PostProcessing,
    Completing,
    Delivered,
    Cancelled,
    Failed,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskState::Created => "created",
            TaskState::WaitingForTurn => "waiting-for-turn",
            TaskState::AcquiringLock => "acquiring-lock",
            TaskState::CacheCheck => "cache-check",
            TaskState::Fetching => "fetching",
            TaskState::Decoding => "decoding",
            TaskState::PostProcessing => "post-processing",
            TaskState::Completing => "completing",
            TaskState::Delivered => "delivered",
            TaskState::Cancelled => "cancelled",
            TaskState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// How a task ended, handed to the completion step.
pub enum TaskOutcome<T> {
    Delivered { object: Arc<T>, from: LoadedFrom },
    Cancelled,
    Failed(FailReason),
}

impl<T> TaskOutcome<T> {
    /// Terminal state this outcome corresponds to.
    pub fn state(&self) -> TaskState {
        match self {
            TaskOutcome::Delivered { .. } => TaskState::Delivered,
            TaskOutcome::Cancelled => TaskState::Cancelled,
            TaskOutcome::Failed(_) => TaskState::Failed,
        }
    }
}

impl<T> fmt::Debug for TaskOutcome<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskOutcome::Delivered { from, .. } => write!(f, "Delivered({:?})", from),
            TaskOutcome::Cancelled => f.write_str("Cancelled"),
            TaskOutcome::Failed(reason) => write!(f, "Failed({})", reason),
        }
    }
}

/// Early exit from a task.
enum Stop {
    Cancelled,
    Failed(FailReason),
}

impl From<FailReason> for Stop {
    fn from(reason: FailReason) -> Self {
        Stop::Failed(reason)
    }
}

pub(crate) struct LoadTask<T> {
    engine: Arc<EngineInner<T>>,
    request: LoadRequest<T>,
    state: TaskState,
}

impl<T> LoadTask<T>
where
    T: ByteSize + Send + Sync + 'static,
{
    pub(crate) fn new(engine: Arc<EngineInner<T>>, request: LoadRequest<T>) -> Self {
        Self {
            engine,
            request,
            state: TaskState::Created,
        }
    }

    pub(crate) fn run(mut self, token: &CancellationToken) {
        let outcome = match self.execute(token) {
            Ok((object, from)) => TaskOutcome::Delivered { object, from },
            Err(Stop::Cancelled) => TaskOutcome::Cancelled,
            Err(Stop::Failed(reason)) => {
                log::debug!("load of {} failed: {}", self.request.key, reason);
                TaskOutcome::Failed(reason)
            }
        };

        self.enter(TaskState::Completing);
        let LoadRequest {
            memory_key, consumer, ..
        } = self.request;
        CompletionTask::new(self.engine, memory_key, consumer, outcome).dispatch();
    }

    fn execute(&mut self, token: &CancellationToken) -> Result<(Arc<T>, LoadedFrom), Stop> {
        self.enter(TaskState::WaitingForTurn);
        if !self.engine.control.wait_if_paused(token) {
            return Err(Stop::Cancelled);
        }

        self.advance(TaskState::AcquiringLock, token)?;
        let lock = self.engine.locks.acquire(&self.request.key);
        let guard = lock.lock();

        self.advance(TaskState::CacheCheck, token)?;
        let cached = self.engine.memory.get(&self.request.memory_key);
        let (object, from) = match cached {
            Some(object) => {
                log::trace!("memory cache hit for {}", self.request.memory_key);
                (object, LoadedFrom::MemoryCache)
            }
            None => {
                let (decoded, from) = match self.load_from_disk(token)? {
                    Some(decoded) => (decoded, LoadedFrom::DiskCache),
                    None => (self.load_from_network(token)?, LoadedFrom::Network),
                };
                (self.cache_in_memory(decoded), from)
            }
        };
        drop(guard);

        self.advance(TaskState::PostProcessing, token)?;
        let object = match &self.request.options.post_processor {
            Some(processor) => Arc::new(processor.process(&object)),
            None => object,
        };
        Ok((object, from))
    }

    /// Decode the disk-cached copy, if any.
    ///
    /// A cached file that fails to decode is deleted and `None` is
    /// returned so the resource is fetched again.
    fn load_from_disk(&mut self, token: &CancellationToken) -> Result<Option<T>, Stop> {
        let key = &self.request.key;
        let Some(path) = find_in_cache(self.engine.disk.as_ref(), key) else {
            return Ok(None);
        };
        log::trace!("disk cache hit for {}", key);
        let bytes = fs::read(&path).map_err(FailReason::IoFailure)?;

        self.advance(TaskState::Decoding, token)?;
        let key = &self.request.key;
        match self.engine.decoder.decode(&bytes, &self.request.options.decode) {
            Ok(decoded) => Ok(Some(decoded)),
            Err(e) => {
                log::warn!("cached copy of {} does not decode ({}), fetching again", key, e);
                self.engine.disk.remove(key);
                Ok(None)
            }
        }
    }

    fn load_from_network(&mut self, token: &CancellationToken) -> Result<T, Stop> {
        self.advance(TaskState::Fetching, token)?;
        let engine = &self.engine;
        let key = &self.request.key;
        let context = FetchContext {
            network_denied: engine.control.is_network_denied(),
            slow_network: engine.control.is_slow_network(),
        };
        if context.network_denied && engine.fetcher.requires_network(key) {
            return Err(FailReason::NetworkDenied.into());
        }

        let bytes = engine.fetcher.fetch(key, &context).map_err(FailReason::FetchFailed)?;
        if self.request.options.cache_on_disk {
            if let Err(e) = engine.disk.save_bytes(key, &bytes) {
                log::warn!("could not write {} to the disk cache: {}", key, e);
            }
        }

        self.advance(TaskState::Decoding, token)?;
        let decoded = self
            .engine
            .decoder
            .decode(&bytes, &self.request.options.decode)
            .map_err(FailReason::DecodeFailed)?;
        Ok(decoded)
    }

    fn cache_in_memory(&self, decoded: T) -> Arc<T> {
        let options = &self.request.options;
        let object = match &options.pre_processor {
            Some(processor) => processor.process(&decoded),
            None => decoded,
        };
        let object = Arc::new(object);

        if options.cache_in_memory {
            let key = self.request.memory_key.clone();
            if !self.engine.memory.put(key, object.clone(), object.byte_size()) {
                log::debug!("{} is too large for the memory cache", self.request.memory_key);
            }
        }
        object
    }

    fn enter(&mut self, next: TaskState) {
        log::debug!(
            "{} [{}] {} -> {}",
            self.request.memory_key,
            self.request.consumer.id(),
            self.state,
            next
        );
        self.state = next;
    }

    /// Move to `next` unless the request has been abandoned.
    fn advance(&mut self, next: TaskState, token: &CancellationToken) -> Result<(), Stop> {
        if token.is_cancelled() {
            log::debug!("{} interrupted during {}", self.request.memory_key, self.state);
            return Err(Stop::Cancelled);
        }
        if !still_wanted(&self.engine, self.request.consumer.as_ref(), &self.request.memory_key) {
            log::debug!("{} no longer wanted after {}", self.request.memory_key, self.state);
            return Err(Stop::Cancelled);
        }
        self.enter(next);
        Ok(())
    }
}

/// Runs a post-processor over an object that is already decoded.
pub(crate) struct ProcessTask<T> {
    engine: Arc<EngineInner<T>>,
    key: ResourceKey,
    consumer: Arc<dyn Consumer<T>>,
    object: Arc<T>,
    processor: Arc<dyn Processor<T>>,
}

impl<T> ProcessTask<T>
where
    T: ByteSize + Send + Sync + 'static,
{
    pub(crate) fn new(
        engine: Arc<EngineInner<T>>,
        key: ResourceKey,
        consumer: Arc<dyn Consumer<T>>,
        object: Arc<T>,
        processor: Arc<dyn Processor<T>>,
    ) -> Self {
        Self {
            engine,
            key,
            consumer,
            object,
            processor,
        }
    }

    pub(crate) fn run(self, token: &CancellationToken) {
        let wanted = still_wanted(&self.engine, self.consumer.as_ref(), &self.key);
        let outcome = if token.is_cancelled() || !wanted {
            TaskOutcome::Cancelled
        } else {
            log::debug!("{} [{}] -> {}", self.key, self.consumer.id(), TaskState::PostProcessing);
            TaskOutcome::Delivered {
                object: Arc::new(self.processor.process(&self.object)),
                from: LoadedFrom::MemoryCache,
            }
        };
        CompletionTask::new(self.engine, self.key, self.consumer, outcome).dispatch();
    }
}

/// Both the engine's association table and the consumer's own reuse hook
/// must agree.
pub(crate) fn still_wanted<T>(engine: &EngineInner<T>, consumer: &dyn Consumer<T>, key: &ResourceKey) -> bool {
    engine.consumers.is_still_wanted(consumer.id(), key) && consumer.still_wants(key)
}
