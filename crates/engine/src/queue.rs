//! Blocking job queue shared by the threads of one worker pool
//!
//! The queue also tracks how many workers are parked waiting for work, so
//! a growing pool can decide whether a new job needs a new thread.

use crate::cancel::CancellationToken;
use crate::config::QueueProcessingType;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::Duration;

/// Unit of work run by a pool thread. The token is the pool's
/// interruption token, tripped on shutdown.
pub type Job = Box<dyn FnOnce(&CancellationToken) + Send + 'static>;

/// Result of waiting for a job.
pub(crate) enum Pop {
    Job(Job),
    /// Nothing arrived within the timeout
    Empty,
    /// The queue was closed; the worker should exit
    Closed,
}

/// What a successful push observed.
pub(crate) struct Pushed {
    /// More jobs are queued than workers are waiting
    pub(crate) needs_worker: bool,
}

struct QueueState {
    jobs: VecDeque<Job>,
    idle: usize,
    closed: bool,
}

pub(crate) struct JobQueue {
    order: QueueProcessingType,
    state: Mutex<QueueState>,
    available: Condvar,
}

impl JobQueue {
    pub(crate) fn new(order: QueueProcessingType) -> Self {
        Self {
            order,
            state: Mutex::new(QueueState {
                jobs: VecDeque::new(),
                idle: 0,
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Enqueue a job, handing it back if the queue is closed.
    pub(crate) fn push(&self, job: Job) -> Result<Pushed, Job> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(job);
        }
        state.jobs.push_back(job);
        let needs_worker = state.jobs.len() > state.idle;
        drop(state);

        self.available.notify_one();
        Ok(Pushed { needs_worker })
    }

    /// Take the next job in queue order, waiting up to `timeout`.
    pub(crate) fn pop(&self, timeout: Duration) -> Pop {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Pop::Closed;
            }
            if let Some(job) = self.take(&mut state) {
                return Pop::Job(job);
            }

            state.idle += 1;
            let timed_out = self.available.wait_for(&mut state, timeout).timed_out();
            state.idle -= 1;

            if timed_out {
                // A job pushed while we were timing out is still ours to run.
                if state.closed {
                    return Pop::Closed;
                }
                return match self.take(&mut state) {
                    Some(job) => Pop::Job(job),
                    None => Pop::Empty,
                };
            }
        }
    }

    fn take(&self, state: &mut QueueState) -> Option<Job> {
        match self.order {
            QueueProcessingType::Fifo => state.jobs.pop_front(),
            QueueProcessingType::Lifo => state.jobs.pop_back(),
        }
    }

    /// Refuse further jobs, wake every waiter and return the jobs that
    /// never started.
    pub(crate) fn close(&self) -> Vec<Job> {
        let mut state = self.state.lock();
        state.closed = true;
        let dropped = state.jobs.drain(..).collect();
        drop(state);

        self.available.notify_all();
        dropped
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().jobs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::thread;

    fn tagged(tx: &mpsc::Sender<u32>, tag: u32) -> Job {
        let tx = tx.clone();
        Box::new(move |_token: &CancellationToken| {
            tx.send(tag).ok();
        })
    }

    fn drain(queue: &JobQueue) -> usize {
        let token = CancellationToken::new();
        let mut ran = 0;
        while let Pop::Job(job) = queue.pop(Duration::from_millis(1)) {
            job(&token);
            ran += 1;
        }
        ran
    }

    #[test]
    fn test_fifo_order() {
        let queue = JobQueue::new(QueueProcessingType::Fifo);
        let (tx, rx) = mpsc::channel();
        for tag in 1..=3 {
            assert!(queue.push(tagged(&tx, tag)).is_ok());
        }
        assert_eq!(drain(&queue), 3);
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn test_lifo_order() {
        let queue = JobQueue::new(QueueProcessingType::Lifo);
        let (tx, rx) = mpsc::channel();
        for tag in 1..=3 {
            assert!(queue.push(tagged(&tx, tag)).is_ok());
        }
        assert_eq!(drain(&queue), 3);
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![3, 2, 1]);
    }

    #[test]
    fn test_pop_times_out_when_empty() {
        let queue = JobQueue::new(QueueProcessingType::Fifo);
        assert!(matches!(queue.pop(Duration::from_millis(5)), Pop::Empty));
    }

    #[test]
    fn test_needs_worker_without_idle_waiters() {
        let queue = JobQueue::new(QueueProcessingType::Fifo);
        let (tx, _rx) = mpsc::channel();
        let pushed = queue.push(tagged(&tx, 1)).ok().expect("queue open");
        assert!(pushed.needs_worker);
    }

    #[test]
    fn test_close_rejects_and_drops() {
        let queue = JobQueue::new(QueueProcessingType::Fifo);
        let (tx, rx) = mpsc::channel();
        assert!(queue.push(tagged(&tx, 1)).is_ok());
        assert_eq!(queue.len(), 1);

        let dropped = queue.close();
        assert_eq!(dropped.len(), 1);
        assert!(queue.is_closed());
        assert!(queue.push(tagged(&tx, 2)).is_err());
        assert!(matches!(queue.pop(Duration::from_millis(1)), Pop::Closed));
        drop(dropped);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_close_wakes_waiter() {
        let queue = Arc::new(JobQueue::new(QueueProcessingType::Fifo));
        let waiter = {
            let queue = queue.clone();
            thread::spawn(move || matches!(queue.pop(Duration::from_secs(30)), Pop::Closed))
        };
        thread::sleep(Duration::from_millis(20));
        queue.close();
        assert!(waiter.join().expect("waiter panicked"));
    }
}
