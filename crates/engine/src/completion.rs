//! Final delivery step, run on the distributor.
//!
//! The consumer's reuse check runs once more right before the callback.
//! Work can finish long after a consumer has moved on, so a result is
//! only delivered if the consumer still maps to the key it produced.

use crate::cancel::CancellationToken;
use crate::engine::EngineInner;
use crate::queue::Job;
use crate::request::Consumer;
use crate::task::{still_wanted, TaskOutcome, TaskState};
use resload_cache::ResourceKey;
use std::sync::Arc;

pub(crate) struct CompletionTask<T> {
    engine: Arc<EngineInner<T>>,
    key: ResourceKey,
    consumer: Arc<dyn Consumer<T>>,
    outcome: TaskOutcome<T>,
}

impl<T> CompletionTask<T>
where
    T: Send + Sync + 'static,
{
    pub(crate) fn new(
        engine: Arc<EngineInner<T>>,
        key: ResourceKey,
        consumer: Arc<dyn Consumer<T>>,
        outcome: TaskOutcome<T>,
    ) -> Self {
        Self {
            engine,
            key,
            consumer,
            outcome,
        }
    }

    /// Hand the completion to the distributor.
    pub(crate) fn dispatch(self) {
        let engine = self.engine.clone();
        let key = self.key.clone();
        let guard = CancelOnDrop::new(engine.clone(), key.clone(), self.consumer.clone());

        let job = guarded(guard, move |_token: &CancellationToken| self.run());
        if let Err(e) = engine.distributor.execute(job) {
            log::warn!("completion of {} could not be scheduled: {}", key, e);
        }
    }

    pub(crate) fn run(self) {
        let id = self.consumer.id();
        let wanted = still_wanted(&self.engine, self.consumer.as_ref(), &self.key);
        let state = if wanted {
            self.outcome.state()
        } else {
            TaskState::Cancelled
        };

        match self.outcome {
            TaskOutcome::Delivered { object, from } if wanted => {
                self.consumer.deliver(object, from);
            }
            TaskOutcome::Failed(reason) if wanted => {
                self.consumer.failed(reason);
            }
            TaskOutcome::Delivered { .. } | TaskOutcome::Failed(_) => {
                log::debug!("{} was reassigned, discarding result for {}", id, self.key);
                self.consumer.cancelled();
            }
            TaskOutcome::Cancelled => {
                self.consumer.cancelled();
            }
        }

        self.engine.consumers.release(id, &self.key);
        log::debug!("{} [{}] finished as {}", self.key, id, state);
    }
}

/// Sends `cancelled()` to the consumer if dropped while still armed.
///
/// Every engine job carries one. A job that never finishes, whether
/// dropped from a closed queue or unwound by a panic, still answers its
/// consumer exactly once.
pub(crate) struct CancelOnDrop<T> {
    engine: Arc<EngineInner<T>>,
    key: ResourceKey,
    consumer: Option<Arc<dyn Consumer<T>>>,
}

impl<T> CancelOnDrop<T> {
    pub(crate) fn new(engine: Arc<EngineInner<T>>, key: ResourceKey, consumer: Arc<dyn Consumer<T>>) -> Self {
        Self {
            engine,
            key,
            consumer: Some(consumer),
        }
    }

    /// The job finished and answered the consumer some other way.
    pub(crate) fn disarm(mut self) {
        self.consumer = None;
    }
}

impl<T> Drop for CancelOnDrop<T> {
    fn drop(&mut self) {
        if let Some(consumer) = self.consumer.take() {
            log::debug!("{} [{}] dropped before it finished", self.key, consumer.id());
            self.engine.consumers.release(consumer.id(), &self.key);
            consumer.cancelled();
        }
    }
}

/// Box `work` as a pool job that disarms `guard` once `work` returns.
pub(crate) fn guarded<T, F>(guard: CancelOnDrop<T>, work: F) -> Job
where
    T: Send + Sync + 'static,
    F: FnOnce(&CancellationToken) + Send + 'static,
{
    Box::new(move |token: &CancellationToken| {
        work(token);
        guard.disarm();
    })
}
