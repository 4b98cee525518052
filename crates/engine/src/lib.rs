//! Resload dispatch engine
//!
//! Asynchronous, cache-aware resource loading on worker pools. Given a
//! [`ResourceKey`](resload_cache::ResourceKey), the engine checks the
//! memory cache, then the disk cache, then fetches and decodes through
//! user-supplied collaborators. Concurrent loads of one key are serialized
//! so it is fetched at most once at a time.
//!
//! # Example
//!
//! ```no_run
//! use resload_cache::ResourceKey;
//! use resload_engine::{
//!     BoxError, Consumer, ConsumerId, DecodeOptions, Decoder, DispatchEngine, FailReason,
//!     FetchContext, Fetcher, LoadOptions, LoadedFrom,
//! };
//! use std::sync::Arc;
//!
//! struct HttpFetcher;
//!
//! impl Fetcher for HttpFetcher {
//!     fn fetch(&self, key: &ResourceKey, _context: &FetchContext) -> Result<Vec<u8>, BoxError> {
//!         Ok(key.as_str().as_bytes().to_vec())
//!     }
//! }
//!
//! struct RawDecoder;
//!
//! impl Decoder<Vec<u8>> for RawDecoder {
//!     fn decode(&self, bytes: &[u8], _options: &DecodeOptions) -> Result<Vec<u8>, BoxError> {
//!         Ok(bytes.to_vec())
//!     }
//! }
//!
//! struct Printer(ConsumerId);
//!
//! impl Consumer<Vec<u8>> for Printer {
//!     fn id(&self) -> ConsumerId {
//!         self.0
//!     }
//!
//!     fn deliver(&self, object: Arc<Vec<u8>>, from: LoadedFrom) {
//!         println!("{} bytes from {:?}", object.len(), from);
//!     }
//!
//!     fn cancelled(&self) {}
//!
//!     fn failed(&self, reason: FailReason) {
//!         eprintln!("load failed: {}", reason);
//!     }
//! }
//!
//! let engine = DispatchEngine::builder(HttpFetcher, RawDecoder).build().unwrap();
//! engine
//!     .load(
//!         ResourceKey::from("https://example.com/a.png"),
//!         Arc::new(Printer(ConsumerId::next())),
//!         LoadOptions::default(),
//!     )
//!     .unwrap();
//! ```

mod cancel;
mod completion;
mod config;
mod control;
mod engine;
mod error;
mod lock;
mod queue;
mod request;
mod task;
mod worker;

// Re-export public API
pub use cancel::{CancellationToken, ConsumerId, ConsumerRegistry};
pub use config::{
    EngineConfig, QueueProcessingType, DEFAULT_THREAD_NAME_PREFIX, DEFAULT_THREAD_POOL_SIZE,
    DISTRIBUTOR_THREAD_NAME_PREFIX,
};
pub use control::EngineControl;
pub use engine::{DispatchEngine, EngineBuilder};
pub use error::{BoxError, EngineError, FailReason, PoolError};
pub use lock::{KeyLock, KeyLockTable};
pub use queue::Job;
pub use request::{
    Consumer, DecodeOptions, Decoder, FetchContext, Fetcher, LoadOptions, LoadedFrom, Processor,
};
pub use task::{TaskOutcome, TaskState};
pub use worker::WorkerPool;
