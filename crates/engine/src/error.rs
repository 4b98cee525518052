use resload_cache::CacheError;
use std::io;

/// Boxed error produced by fetch and decode collaborators.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Why a load ended without a result. Reported through
/// [`Consumer::failed`](crate::Consumer::failed).
#[derive(Debug, thiserror::Error)]
pub enum FailReason {
    #[error("network access is denied")]
    NetworkDenied,
    #[error("fetch failed: {0}")]
    FetchFailed(#[source] BoxError),
    #[error("decode failed: {0}")]
    DecodeFailed(#[source] BoxError),
    #[error("disk cache I/O failed: {0}")]
    IoFailure(#[from] io::Error),
}

/// Errors raised by worker pools.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("pool is shut down")]
    Rejected,
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] io::Error),
}

/// Errors raised while building or feeding the engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error(transparent)]
    Cache(#[from] CacheError),
}
