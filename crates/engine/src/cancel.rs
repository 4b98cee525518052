//! Cancellation tokens and the consumer association table
//!
//! A [`CancellationToken`] is shared by every job of one worker pool and is
//! tripped when the pool is shut down. Per-request cancellation goes
//! through the [`ConsumerRegistry`] instead: a request stays wanted only
//! while its consumer still maps to the key it asked for.

use parking_lot::Mutex;
use resload_cache::ResourceKey;
use std::collections::HashMap;
use std::fmt;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

/// Cancellation token for cooperative interruption
///
/// Multiple tokens can share the same underlying state via clone.
///
/// # Example
///
/// ```
/// use resload_engine::CancellationToken;
///
/// let token = CancellationToken::new();
/// let worker_token = token.clone();
///
/// token.cancel();
/// assert!(worker_token.is_cancelled());
/// ```
#[derive(Clone, Debug)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a new token in the non-cancelled state
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Cancel this token and every clone of it. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Check if this token has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Identity of a consumer, stable across the requests it makes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConsumerId(u64);

static NEXT_CONSUMER_ID: AtomicU64 = AtomicU64::new(1);

impl ConsumerId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Allocate a process-unique id.
    pub fn next() -> Self {
        Self(NEXT_CONSUMER_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "consumer-{}", self.0)
    }
}

/// Consumer → currently requested key
///
/// Last writer wins: preparing a consumer for a new key silently
/// invalidates whatever it was waiting for before.
///
/// # Example
///
/// ```
/// use resload_cache::ResourceKey;
/// use resload_engine::{ConsumerId, ConsumerRegistry};
///
/// let registry = ConsumerRegistry::new();
/// let consumer = ConsumerId::new(7);
/// let first = ResourceKey::from("uri://first");
///
/// registry.prepare(consumer, first.clone());
/// registry.prepare(consumer, ResourceKey::from("uri://second"));
///
/// assert!(!registry.is_still_wanted(consumer, &first));
/// ```
#[derive(Default)]
pub struct ConsumerRegistry {
    keys: Mutex<HashMap<ConsumerId, ResourceKey>>,
}

impl ConsumerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `consumer` now waits for `key`.
    ///
    /// Returns the key it was previously waiting for, if any.
    pub fn prepare(&self, consumer: ConsumerId, key: ResourceKey) -> Option<ResourceKey> {
        self.keys.lock().insert(consumer, key)
    }

    /// Forget the association for `consumer`. Idempotent.
    pub fn cancel_for(&self, consumer: ConsumerId) -> bool {
        self.keys.lock().remove(&consumer).is_some()
    }

    /// Whether `consumer` still maps to `key`.
    pub fn is_still_wanted(&self, consumer: ConsumerId, key: &ResourceKey) -> bool {
        self.keys.lock().get(&consumer) == Some(key)
    }

    /// Remove the association only if it still maps to `key`.
    ///
    /// A consumer that has been reassigned keeps its new association.
    pub fn release(&self, consumer: ConsumerId, key: &ResourceKey) -> bool {
        let mut keys = self.keys.lock();
        if keys.get(&consumer) == Some(key) {
            keys.remove(&consumer);
            true
        } else {
            false
        }
    }

    /// Key `consumer` is currently waiting for.
    pub fn loading_key_for(&self, consumer: ConsumerId) -> Option<ResourceKey> {
        self.keys.lock().get(&consumer).cloned()
    }

    pub fn len(&self) -> usize {
        self.keys.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.lock().is_empty()
    }

    pub fn clear(&self) {
        self.keys.lock().clear();
    }
}
