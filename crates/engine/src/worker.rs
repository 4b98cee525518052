//! Worker pools executing load jobs.
//!
//! Two shapes are provided:
//! - fixed: a set number of named threads draining a FIFO or LIFO queue,
//!   used for the fast and slow pools;
//! - cached: threads are spawned whenever no idle thread is available and
//!   exit after a keep-alive, used for the distributor.
//!
//! Every pool owns one [`CancellationToken`] handed to each job it runs.
//! [`WorkerPool::shutdown_now`] trips it, so jobs stuck in blocking waits
//! can notice and bail out.

use crate::cancel::CancellationToken;
use crate::config::QueueProcessingType;
use crate::error::PoolError;
use crate::queue::{Job, JobQueue, Pop};
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// How often a fixed-pool worker re-checks for shutdown while idle.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

static POOL_NUMBER: AtomicUsize = AtomicUsize::new(1);

#[derive(Debug, Clone, Copy)]
enum PoolShape {
    Fixed,
    Cached { keep_alive: Duration },
}

struct PoolInner {
    name: String,
    shape: PoolShape,
    queue: JobQueue,
    token: CancellationToken,
    thread_counter: AtomicUsize,
}

/// Thread pool with named workers and hard shutdown.
///
/// # Example
///
/// ```
/// use resload_engine::{CancellationToken, QueueProcessingType, WorkerPool};
/// use std::sync::mpsc;
///
/// let pool = WorkerPool::fixed("example-", 2, QueueProcessingType::Fifo).unwrap();
/// let (tx, rx) = mpsc::channel();
/// pool.execute(Box::new(move |_token: &CancellationToken| {
///     tx.send(42).unwrap();
/// }))
/// .unwrap();
///
/// assert_eq!(rx.recv().unwrap(), 42);
/// pool.shutdown_now();
/// pool.join();
/// ```
pub struct WorkerPool {
    inner: Arc<PoolInner>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Start a pool of `size` threads named `{prefix}{pool}-thread-{n}`.
    pub fn fixed(prefix: &str, size: usize, order: QueueProcessingType) -> Result<Self, PoolError> {
        let pool = Self::with_shape(prefix, PoolShape::Fixed, order);
        for _ in 0..size.max(1) {
            pool.spawn_worker()?;
        }
        log::debug!("started pool {} with {} threads", pool.inner.name, size.max(1));
        Ok(pool)
    }

    /// Create a pool that grows on demand and shrinks after `keep_alive`.
    pub fn cached(prefix: &str, keep_alive: Duration) -> Self {
        Self::with_shape(prefix, PoolShape::Cached { keep_alive }, QueueProcessingType::Fifo)
    }

    fn with_shape(prefix: &str, shape: PoolShape, order: QueueProcessingType) -> Self {
        let number = POOL_NUMBER.fetch_add(1, Ordering::Relaxed);
        Self {
            inner: Arc::new(PoolInner {
                name: format!("{}{}", prefix, number),
                shape,
                queue: JobQueue::new(order),
                token: CancellationToken::new(),
                thread_counter: AtomicUsize::new(1),
            }),
            threads: Mutex::new(Vec::new()),
        }
    }

    /// Pool name, the common prefix of its thread names.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Queue a job.
    ///
    /// # Errors
    /// [`PoolError::Rejected`] once the pool is shut down, or
    /// [`PoolError::Spawn`] if a cached pool could not start a thread.
    pub fn execute(&self, job: Job) -> Result<(), PoolError> {
        let pushed = self.inner.queue.push(job).map_err(|_| PoolError::Rejected)?;

        if pushed.needs_worker && matches!(self.inner.shape, PoolShape::Cached { .. }) {
            self.spawn_worker()?;
        }
        Ok(())
    }

    /// Stop accepting jobs, drop queued jobs, interrupt running ones and
    /// wake every worker. Returns the number of jobs dropped.
    pub fn shutdown_now(&self) -> usize {
        self.inner.token.cancel();
        let dropped = self.inner.queue.close();
        if !dropped.is_empty() {
            log::debug!("pool {} dropped {} queued jobs", self.inner.name, dropped.len());
        }
        dropped.len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.queue.is_closed()
    }

    /// Number of jobs waiting for a thread.
    pub fn queued(&self) -> usize {
        self.inner.queue.len()
    }

    /// Wait for every worker thread to exit. Only returns after
    /// [`shutdown_now`](Self::shutdown_now) for fixed pools.
    pub fn join(&self) {
        let threads = std::mem::take(&mut *self.threads.lock());
        for thread in threads {
            if thread.join().is_err() {
                log::error!("worker thread of pool {} panicked", self.inner.name);
            }
        }
    }

    fn spawn_worker(&self) -> Result<(), PoolError> {
        let n = self.inner.thread_counter.fetch_add(1, Ordering::Relaxed);
        let inner = self.inner.clone();
        let handle = thread::Builder::new()
            .name(format!("{}-thread-{}", self.inner.name, n))
            .spawn(move || run(inner))?;

        let mut threads = self.threads.lock();
        threads.retain(|t| !t.is_finished());
        threads.push(handle);
        Ok(())
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown_now();
    }
}

/// Main worker loop.
fn run(inner: Arc<PoolInner>) {
    let timeout = match inner.shape {
        PoolShape::Fixed => POLL_INTERVAL,
        PoolShape::Cached { keep_alive } => keep_alive,
    };

    loop {
        match inner.queue.pop(timeout) {
            Pop::Job(job) => {
                let token = &inner.token;
                if panic::catch_unwind(AssertUnwindSafe(|| job(token))).is_err() {
                    log::error!("job panicked on pool {}", inner.name);
                }
            }
            Pop::Empty => {
                if matches!(inner.shape, PoolShape::Cached { .. }) {
                    break;
                }
            }
            Pop::Closed => break,
        }
    }
}
