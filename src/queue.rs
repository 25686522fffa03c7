//! Bounded work queue between the producing writer and the deflate workers
//!
//! The queue is the one structure deliberately shared outside the stream
//! coordinator's lock. Its bounded capacity is the pipeline's flow control:
//! a full queue blocks the submitting thread until a worker frees a slot.
//! Two monotone flags ride along with the items: `done` turns the queue into
//! a one-way valve for draining in-flight work during shutdown, and `error`
//! records a catastrophic pool failure that every stream must observe.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::block::Block;
use crate::error::Error;

/// Completion hook implemented by the stream coordinator.
///
/// Workers hand the finished block back through this, transferring ownership
/// along with it; a worker must not touch a block after calling this.
pub(crate) trait CompletionSink: Send + Sync {
    /// A block deflated successfully; ownership moves back to the stream.
    fn deflate_complete(&self, block: Block);

    /// Deflating block `id` failed; the stream must poison itself with the
    /// cause so the producer observes it.
    fn deflate_failed(&self, id: u64, error: Error);
}

/// One unit of queued work: a block plus the stream it reports back to.
///
/// The queue is shared by every stream using the same pool, so each job
/// carries its own completion sink.
pub(crate) struct Job {
    pub block: Block,
    pub owner: Arc<dyn CompletionSink>,
}

pub(crate) struct TaskQueue {
    items: Mutex<VecDeque<Job>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
    done: AtomicBool,
    error: AtomicBool,
}

impl TaskQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity: capacity.max(1),
            done: AtomicBool::new(false),
            error: AtomicBool::new(false),
        }
    }

    /// Enqueues a job, blocking while the queue is at capacity.
    ///
    /// Fails without enqueueing once `done` or `error` has been set; the
    /// producer must treat that as a pool failure.
    pub fn push(&self, job: Job) -> Result<(), Job> {
        let mut items = self.items.lock();
        loop {
            if self.is_done() || self.is_error() {
                return Err(job);
            }
            if items.len() < self.capacity {
                items.push_back(job);
                drop(items);
                self.not_empty.notify_one();
                return Ok(());
            }
            self.not_full.wait(&mut items);
        }
    }

    /// Dequeues the next job, blocking while the queue is empty.
    ///
    /// Returns `None` when the queue has drained after `done`, or
    /// immediately once `error` is set.
    pub fn pop(&self) -> Option<Job> {
        let mut items = self.items.lock();
        loop {
            if self.is_error() {
                return None;
            }
            if let Some(job) = items.pop_front() {
                drop(items);
                self.not_full.notify_one();
                return Some(job);
            }
            if self.is_done() {
                return None;
            }
            self.not_empty.wait(&mut items);
        }
    }

    /// Marks the queue as accepting no further work. Monotone.
    pub fn set_done(&self) {
        self.done.store(true, Ordering::SeqCst);
        self.wake_all();
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    /// Records a catastrophic pool failure. Monotone.
    pub fn set_error(&self) {
        self.error.store(true, Ordering::SeqCst);
        self.wake_all();
    }

    pub fn is_error(&self) -> bool {
        self.error.load(Ordering::SeqCst)
    }

    fn wake_all(&self) {
        // Lock to order the wakeup after any in-progress wait registration
        let _items = self.items.lock();
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }
}
